//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::agent::register_messages;
use crate::protocol::{Payload, TestCommand, TestedEvent};
use crate::resources::{EmbeddedResources, ResourceLoader, EMBEDDED};
use crate::runtime::local::{LocalRuntime, Peer};
use crate::runtime::RuntimeError;

/// A disconnected runtime with the bundled schemas and types registered.
pub fn registered_runtime() -> LocalRuntime {
    let runtime = LocalRuntime::new("agent-ping");
    register_messages(&runtime, &EmbeddedResources).unwrap();
    runtime
}

/// Records every log event as `(level, rendered line)`.
#[derive(Clone, Default)]
pub struct LogCapture {
    lines: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    /// Route this thread's logs here until the guard drops.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// Number of events at `level` whose line contains `needle`.
    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, line)| *l == level && line.contains(needle))
            .count()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.lines
            .lock()
            .unwrap()
            .push((*event.metadata().level(), line.0));
    }
}

#[derive(Default)]
struct LineVisitor(String);

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{value:?}");
        } else {
            let _ = write!(self.0, " {}={value:?}", field.name());
        }
    }
}

/// Peer that records commands and optionally answers with a tested-event.
#[derive(Default)]
pub struct RecordingPeer {
    commands: Mutex<Vec<TestCommand>>,
    reply: Option<String>,
}

impl RecordingPeer {
    pub fn replying(value: &str) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            reply: Some(value.to_string()),
        }
    }

    pub fn commands(&self) -> Vec<TestCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl Peer for RecordingPeer {
    async fn on_command(&self, _from: &str, command: Payload) -> anyhow::Result<Option<Payload>> {
        let Payload::TestCommand(cmd) = command else {
            return Err(anyhow!("unexpected {}", command.type_name()));
        };
        self.commands.lock().unwrap().push(cmd);
        Ok(self.reply.as_deref().map(|v| TestedEvent::new(v).into()))
    }
}

/// Peer whose link is always down.
#[derive(Default)]
pub struct FailingPeer {
    attempts: AtomicUsize,
}

impl FailingPeer {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Peer for FailingPeer {
    async fn on_command(&self, _from: &str, _command: Payload) -> anyhow::Result<Option<Payload>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("link down"))
    }
}

/// In-memory resources, seeded from the embedded set.
#[derive(Clone, Default)]
pub struct MapResources(HashMap<String, Vec<u8>>);

impl MapResources {
    pub fn embedded() -> Self {
        Self(
            EMBEDDED
                .iter()
                .map(|(path, bytes)| (path.to_string(), bytes.to_vec()))
                .collect(),
        )
    }

    pub fn without(mut self, path: &str) -> Self {
        self.0.remove(path);
        self
    }

    pub fn with(mut self, path: &str, bytes: &[u8]) -> Self {
        self.0.insert(path.to_string(), bytes.to_vec());
        self
    }
}

impl ResourceLoader for MapResources {
    fn open(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        self.0
            .get(path.trim_start_matches('/'))
            .cloned()
            .ok_or_else(|| RuntimeError::ResourceNotFound(path.to_string()))
    }
}
