pub mod local;
pub mod pong;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::Payload;
use crate::schema::TypeBinding;

/// Failures reported by the runtime's primitives.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schema: {0}")]
    SchemaParse(String),
    #[error("registration conflict: {0}")]
    Conflict(String),
    #[error("unknown schema {0}")]
    UnknownSchema(String),
    #[error("subscription rejected: {0}")]
    Subscription(String),
    #[error("runtime is not connected")]
    NotConnected,
    #[error("unknown peer {0}")]
    UnknownPeer(String),
    #[error("type {0} is not registered")]
    UnregisteredType(String),
    #[error("type {type_name} is bound to {bound}, not to this payload")]
    BindingMismatch {
        type_name: String,
        bound: &'static str,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Connectivity of the agent relative to the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Receives lifecycle notifications from the runtime. Transitions are
/// delivered one at a time; an error aborts the transition's caller.
pub trait LifecycleListener: Send + Sync + 'static {
    fn on_state_change(&self, state: LifecycleState) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound event as handed to subscribers.
#[derive(Debug, Clone)]
pub struct EventCtx {
    pub id: Uuid,
    pub source: String,
    pub received_at: DateTime<Utc>,
    payload: Payload,
}

impl EventCtx {
    pub fn new(source: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            received_at: Utc::now(),
            payload,
        }
    }

    pub fn message(&self) -> &Payload {
        &self.payload
    }

    /// Attributes a filter can match on: `type` and `source`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "type" => Some(self.payload.type_name()),
            "source" => Some(&self.source),
            _ => None,
        }
    }
}

/// Equality filter over event attributes. Every entry must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter(BTreeMap<String, String>);

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_type(type_name: &str) -> Self {
        Self::new().with("type", type_name)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, ctx: &EventCtx) -> bool {
        self.0
            .iter()
            .all(|(k, v)| ctx.attribute(k) == Some(v.as_str()))
    }
}

pub type EventHandler = Arc<dyn Fn(&EventCtx) -> anyhow::Result<()> + Send + Sync>;

/// A background task body. It receives a token cancelled when the
/// runtime tears down the session the task was started in.
pub type BackgroundTask =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Capabilities the runtime exposes to an agent.
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    /// This agent's identity on the fabric.
    fn identity(&self) -> &str;

    fn register_schema(&self, raw: &str) -> Result<String, RuntimeError>;

    fn register_type(&self, binding: TypeBinding) -> Result<(), RuntimeError>;

    fn set_default_config(&self, key: &str, value: String);

    fn config_string(&self, key: &str) -> Option<String>;

    fn register_lifecycle_listener(&self, listener: Weak<dyn LifecycleListener>);

    fn subscribe_events(
        &self,
        filter: EventFilter,
        handler: EventHandler,
    ) -> Result<SubscriptionId, RuntimeError>;

    async fn send_command(&self, peer: &str, command: Payload) -> Result<(), RuntimeError>;

    fn spawn_task(&self, name: &str, task: BackgroundTask);
}
