use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use anyhow::Context;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::Payload;
use crate::schema::{SchemaRegistry, TypeBinding};

use super::{
    BackgroundTask, EventCtx, EventFilter, EventHandler, LifecycleListener, LifecycleState,
    Runtime, RuntimeError, SubscriptionId,
};

/// A peer agent reachable through the local fabric.
#[async_trait]
pub trait Peer: Send + Sync + 'static {
    /// Handle a command. A returned payload is published back as an event.
    async fn on_command(&self, from: &str, command: Payload) -> anyhow::Result<Option<Payload>>;
}

/// Layered key/value configuration: agent defaults under operator overrides.
#[derive(Debug, Default)]
struct ConfigStore {
    defaults: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl ConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.overrides
            .get(key)
            .or_else(|| self.defaults.get(key))
            .cloned()
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler,
}

/// In-process fabric implementing [`Runtime`].
///
/// Every connected session owns a cancellation token. Background tasks get
/// a child of it, and leaving `Connected` cancels it and drops all event
/// subscriptions.
pub struct LocalRuntime {
    identity: String,
    registry: RwLock<SchemaRegistry>,
    config: RwLock<ConfigStore>,
    listeners: Mutex<Vec<Weak<dyn LifecycleListener>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    peers: RwLock<HashMap<String, Arc<dyn Peer>>>,
    state: Mutex<LifecycleState>,
    session: Mutex<CancellationToken>,
    root: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalRuntime {
    pub fn new(identity: impl Into<String>) -> Self {
        let root = CancellationToken::new();
        // No session until the first connect.
        let session = root.child_token();
        session.cancel();
        Self {
            identity: identity.into(),
            registry: RwLock::new(SchemaRegistry::new()),
            config: RwLock::new(ConfigStore::default()),
            listeners: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            peers: RwLock::new(HashMap::new()),
            state: Mutex::new(LifecycleState::Disconnected),
            session: Mutex::new(session),
            root,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_overrides(self, overrides: HashMap<String, String>) -> Self {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .extend(overrides);
        self
    }

    pub fn set_override(&self, key: &str, value: impl Into<String>) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .insert(key.to_string(), value.into());
    }

    pub fn register_peer(&self, name: &str, peer: Arc<dyn Peer>) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), peer);
        debug!(peer = name, "Peer registered");
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_registered(type_name)
    }

    /// Walk `Connecting → Connected`, notifying listeners at each step.
    /// A listener refusing `Connected` rolls the runtime back to
    /// `Disconnected` with the half-built session torn down.
    pub fn connect(&self) -> anyhow::Result<()> {
        if self.state() == LifecycleState::Connected {
            return Ok(());
        }
        let result = self
            .transition(LifecycleState::Connecting)
            .and_then(|()| self.transition(LifecycleState::Connected));
        if result.is_err() {
            self.abort_session();
        }
        result
    }

    fn abort_session(&self) {
        let mut state = lock(&self.state);
        lock(&self.session).cancel();
        lock(&self.subscriptions).clear();
        *state = LifecycleState::Disconnected;
        warn!("Connect aborted, session torn down");
    }

    /// Walk `Disconnecting → Disconnected`, tearing down the session.
    pub fn disconnect(&self) -> anyhow::Result<()> {
        if self.state() == LifecycleState::Disconnected {
            return Ok(());
        }
        self.transition(LifecycleState::Disconnecting)?;
        self.transition(LifecycleState::Disconnected)
    }

    fn transition(&self, next: LifecycleState) -> anyhow::Result<()> {
        {
            let mut state = lock(&self.state);
            if *state == next {
                return Ok(());
            }
            let previous = std::mem::replace(&mut *state, next);
            if previous == LifecycleState::Connected {
                lock(&self.session).cancel();
                lock(&self.subscriptions).clear();
            }
            if next == LifecycleState::Connected {
                *lock(&self.session) = self.root.child_token();
            }
            info!(from = %previous, to = %next, "Lifecycle transition");
        }

        let listeners: Vec<Arc<dyn LifecycleListener>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener
                .on_state_change(next)
                .with_context(|| format!("lifecycle callback failed on {next}"))?;
        }
        Ok(())
    }

    /// Deliver an event to every matching subscription. Handler failures
    /// are logged and do not affect other handlers. Returns how many
    /// handlers ran.
    pub fn publish_event(&self, source: &str, payload: Payload) -> usize {
        let bound = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .binding(payload.type_name())
            .is_some_and(|b| b.binds(&payload));
        if !bound {
            warn!(
                source,
                type_name = payload.type_name(),
                "Dropping event without a matching type binding"
            );
            return 0;
        }
        let ctx = EventCtx::new(source, payload);
        debug!(event = %ctx.id, received_at = %ctx.received_at, "Publishing {}", ctx.message());
        let handlers: Vec<(SubscriptionId, EventHandler)> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.filter.matches(&ctx))
            .map(|s| (s.id, s.handler.clone()))
            .collect();
        for (id, handler) in &handlers {
            if let Err(e) = handler(&ctx) {
                error!(subscription = %id, event = %ctx.id, "Event handler failed: {e:#}");
            }
        }
        handlers.len()
    }

    /// Cancel everything and wait for background tasks to finish.
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect() {
            warn!("Disconnect during shutdown failed: {e:#}");
        }
        self.root.cancel();
        let handles = std::mem::take(&mut *lock(&self.tasks));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task join failed: {e}");
            }
        }
        info!("Runtime shut down");
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn register_schema(&self, raw: &str) -> Result<String, RuntimeError> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_schema(raw)
    }

    fn register_type(&self, binding: TypeBinding) -> Result<(), RuntimeError> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_type(binding)
    }

    fn set_default_config(&self, key: &str, value: String) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .defaults
            .insert(key.to_string(), value);
    }

    fn config_string(&self, key: &str) -> Option<String> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }

    fn register_lifecycle_listener(&self, listener: Weak<dyn LifecycleListener>) {
        lock(&self.listeners).push(listener);
    }

    fn subscribe_events(
        &self,
        filter: EventFilter,
        handler: EventHandler,
    ) -> Result<SubscriptionId, RuntimeError> {
        if self.state() != LifecycleState::Connected {
            return Err(RuntimeError::Subscription(
                "runtime is not connected".to_string(),
            ));
        }
        if filter.is_empty() {
            return Err(RuntimeError::Subscription("empty filter".to_string()));
        }
        if let Some(type_name) = filter.get("type") {
            if !self.is_registered(type_name) {
                return Err(RuntimeError::Subscription(format!(
                    "type {type_name} is not registered"
                )));
            }
        }
        let id = SubscriptionId::new();
        debug!(subscription = %id, ?filter, "Subscribed to events");
        lock(&self.subscriptions).push(Subscription {
            id,
            filter,
            handler,
        });
        Ok(id)
    }

    async fn send_command(&self, peer: &str, command: Payload) -> Result<(), RuntimeError> {
        if self.state() != LifecycleState::Connected {
            return Err(RuntimeError::NotConnected);
        }
        let rust_type = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            let binding = registry
                .binding(command.type_name())
                .ok_or_else(|| RuntimeError::UnregisteredType(command.type_name().to_string()))?;
            if !binding.binds(&command) {
                return Err(RuntimeError::BindingMismatch {
                    type_name: command.type_name().to_string(),
                    bound: binding.rust_type,
                });
            }
            binding.rust_type
        };
        let target = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownPeer(peer.to_string()))?;

        debug!(peer, rust_type, "Sending {command}");
        let reply = target
            .on_command(self.identity(), command)
            .await
            .map_err(|e| RuntimeError::Transport(format!("{e:#}")))?;
        if let Some(reply) = reply {
            self.publish_event(peer, reply);
        }
        Ok(())
    }

    fn spawn_task(&self, name: &str, task: BackgroundTask) {
        let token = lock(&self.session).child_token();
        let name = name.to_string();
        let handle = tokio::spawn(async move {
            debug!(task = %name, "Background task started");
            match task(token).await {
                Ok(()) => debug!(task = %name, "Background task finished"),
                Err(e) => error!(task = %name, "Background task failed: {e:#}"),
            }
        });
        let mut tasks = lock(&self.tasks);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}
