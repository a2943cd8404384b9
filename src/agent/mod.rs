pub mod dispatch;

use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::protocol::{Message, Payload, TestCommand, TestedEvent};
use crate::resources::{Manifest, ResourceLoader};
use crate::runtime::{
    BackgroundTask, EventCtx, EventFilter, EventHandler, LifecycleListener, LifecycleState,
    Runtime, RuntimeError,
};
use crate::schema::TypeBinding;

use dispatch::PingLoop;

/// Identity of the peer every command is sent to.
pub const PEER: &str = "agent-pong";

pub const DELAY_KEY: &str = "delay";
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Schema documents, in registration order: referenced records first.
const SCHEMAS: [&str; 3] = [
    "schema/header.avro",
    "schema/test-command.avro",
    "schema/tested-event.avro",
];

/// The ping agent. Pings `agent-pong` while connected and logs the
/// tested-events it sends back.
pub struct PingAgent {
    runtime: Arc<dyn Runtime>,
    manifest: Manifest,
}

impl PingAgent {
    /// Build the agent and wire it into the runtime. Any registration
    /// failure aborts construction.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        resources: &dyn ResourceLoader,
    ) -> Result<Arc<Self>, AgentError> {
        let manifest = Manifest::load(resources)?;
        runtime.set_default_config(DELAY_KEY, DEFAULT_DELAY_MS.to_string());
        register_messages(runtime.as_ref(), resources)?;

        let agent = Arc::new(Self { runtime, manifest });
        let listener: Arc<dyn LifecycleListener> = agent.clone();
        agent
            .runtime
            .register_lifecycle_listener(Arc::downgrade(&listener));

        info!(
            agent = %agent.manifest.name,
            version = %agent.manifest.version,
            "Agent initialized"
        );
        Ok(agent)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn on_connected(&self) -> Result<(), AgentError> {
        let handler: EventHandler = Arc::new(|ctx: &EventCtx| -> anyhow::Result<()> {
            on_tested_event(ctx)?;
            Ok(())
        });
        let subscription = self
            .runtime
            .subscribe_events(EventFilter::by_type(TestedEvent::TYPE_NAME), handler)
            .map_err(AgentError::Subscription)?;
        debug!(%subscription, "Subscribed to tested-event");

        let ping = PingLoop::new(self.runtime.clone(), self.runtime.config_string(DELAY_KEY));
        let task: BackgroundTask = Box::new(move |cancel: CancellationToken| {
            async move { ping.run(cancel).await.map_err(anyhow::Error::from) }.boxed()
        });
        self.runtime.spawn_task("ping", task);
        Ok(())
    }
}

impl LifecycleListener for PingAgent {
    // Leaving `Connected` does not stop the loop here: the runtime owns the
    // session token and the subscription table and tears both down itself.
    fn on_state_change(&self, state: LifecycleState) -> anyhow::Result<()> {
        match state {
            LifecycleState::Connected => self.on_connected()?,
            LifecycleState::Disconnected => {
                warn!(agent = %self.manifest.name, "Disconnected!");
            }
            _ => {}
        }
        Ok(())
    }
}

/// Register the schema documents, then the native types bound to them.
pub fn register_messages(
    runtime: &dyn Runtime,
    resources: &dyn ResourceLoader,
) -> Result<(), AgentError> {
    for path in SCHEMAS {
        let raw = resources.open(path).map_err(AgentError::Registration)?;
        let raw = String::from_utf8(raw).map_err(|e| {
            AgentError::Registration(RuntimeError::SchemaParse(format!("{path}: {e}")))
        })?;
        let name = runtime
            .register_schema(&raw)
            .map_err(AgentError::Registration)?;
        debug!(schema = %name, path, "Schema registered");
    }

    for binding in [
        TypeBinding::of::<TestedEvent>(),
        TypeBinding::of::<TestCommand>(),
    ] {
        debug!(type_name = %binding.type_name, rust = binding.rust_type, "Type registered");
        runtime
            .register_type(binding)
            .map_err(AgentError::Registration)?;
    }
    Ok(())
}

/// Report the value carried by a tested-event.
pub fn on_tested_event(ctx: &EventCtx) -> Result<(), AgentError> {
    match ctx.message() {
        Payload::TestedEvent(event) => {
            info!(source = %ctx.source, "Receive tested-event: {}", event.value);
            Ok(())
        }
        other => Err(AgentError::PayloadType {
            expected: TestedEvent::TYPE_NAME,
            actual: other.type_name(),
        }),
    }
}
