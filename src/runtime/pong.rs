use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use crate::protocol::{Payload, TestedEvent};

use super::local::Peer;

pub const IDENTITY: &str = "agent-pong";

/// Loopback stand-in for the pong agent: answers every test-command with
/// a tested-event whose value is `done`.
#[derive(Debug, Default)]
pub struct PongPeer {
    answered: AtomicU64,
}

impl PongPeer {
    pub fn answered(&self) -> u64 {
        self.answered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Peer for PongPeer {
    async fn on_command(&self, from: &str, command: Payload) -> anyhow::Result<Option<Payload>> {
        match command {
            Payload::TestCommand(cmd) => {
                let n = self.answered.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(from, x = cmd.x, n, "Pong received {}", cmd.value);
                Ok(Some(TestedEvent::new("done").into()))
            }
            other => bail!("{IDENTITY} cannot handle {}", other.type_name()),
        }
    }
}
