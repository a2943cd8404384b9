use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::AgentError;
use crate::protocol::TestCommand;
use crate::runtime::Runtime;

use super::PEER;

/// Upper bound (exclusive) of the random sample carried by each command.
const X_RANGE: i32 = 1000;

/// Periodic sender of test-commands to the pong agent.
///
/// The raw `delay` setting is captured when the loop is built and parsed
/// once when it starts; later config changes only apply to the next loop.
/// One loop per agent is expected to be live at a time.
pub struct PingLoop {
    runtime: Arc<dyn Runtime>,
    delay: Option<String>,
}

impl PingLoop {
    pub fn new(runtime: Arc<dyn Runtime>, delay: Option<String>) -> Self {
        Self { runtime, delay }
    }

    /// Run until `cancel` fires. Only a malformed delay ends the loop with
    /// an error; send failures are logged and the loop keeps going.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), AgentError> {
        let delay = parse_delay(self.delay.as_deref())?;
        info!(
            agent = self.runtime.identity(),
            delay_ms = delay.as_millis() as u64,
            peer = PEER,
            "Ping loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Ping loop stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let command = TestCommand::ping(sample_x());
            let x = command.x;
            match self.runtime.send_command(PEER, command.into()).await {
                Ok(()) => info!(peer = PEER, x, "ping"),
                Err(source) => {
                    let err = AgentError::Send {
                        peer: PEER.to_string(),
                        source,
                    };
                    error!(x, "{err}");
                }
            }
        }
    }
}

/// Parse a delay in milliseconds. A missing value parses as empty and fails.
pub fn parse_delay(raw: Option<&str>) -> Result<Duration, AgentError> {
    let value = raw.unwrap_or_default();
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|source| AgentError::ConfigParse {
            value: value.to_string(),
            source,
        })
}

fn sample_x() -> i32 {
    rand::rng().random_range(0..X_RANGE)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::runtime::local::LocalRuntime;
    use crate::testing::{registered_runtime, FailingPeer, LogCapture, RecordingPeer};

    fn connected(peer: Arc<dyn crate::runtime::local::Peer>) -> Arc<LocalRuntime> {
        let runtime = Arc::new(registered_runtime());
        runtime.register_peer(PEER, peer);
        runtime.connect().unwrap();
        runtime
    }

    fn start(
        runtime: &Arc<LocalRuntime>,
        delay: &str,
    ) -> (CancellationToken, tokio::task::JoinHandle<Result<(), AgentError>>) {
        let cancel = CancellationToken::new();
        let ping = PingLoop::new(runtime.clone(), Some(delay.to_string()));
        let handle = tokio::spawn(ping.run(cancel.clone()));
        (cancel, handle)
    }

    #[test]
    fn delay_parsing() {
        assert_eq!(parse_delay(Some("1000")).unwrap(), Duration::from_secs(1));
        assert_eq!(parse_delay(Some(" 250 ")).unwrap(), Duration::from_millis(250));
        assert_eq!(parse_delay(Some("0")).unwrap(), Duration::ZERO);
        for bad in [Some("abc"), Some("-5"), Some("1.5"), Some(""), None] {
            assert!(
                matches!(parse_delay(bad), Err(AgentError::ConfigParse { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn samples_stay_in_range() {
        for _ in 0..10_000 {
            let x = sample_x();
            assert!((0..1000).contains(&x), "x out of range: {x}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sends_once_per_delay_and_stops_on_cancel() {
        let peer = Arc::new(RecordingPeer::default());
        let runtime = connected(peer.clone());
        let (cancel, handle) = start(&runtime, "100");

        tokio::time::sleep(Duration::from_millis(1050)).await;
        let sent = peer.count();
        assert!((9..=11).contains(&sent), "sent {sent} commands in 1050ms");

        cancel.cancel();
        handle.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(peer.count(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_sends_nothing() {
        let capture = LogCapture::default();
        let _guard = capture.install();
        let peer = Arc::new(RecordingPeer::default());
        let runtime = connected(peer.clone());
        let (cancel, handle) = start(&runtime, "1000");

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(peer.count(), 0);
        assert_eq!(capture.count(tracing::Level::ERROR, ""), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_delay_ends_loop_without_sending() {
        let peer = Arc::new(RecordingPeer::default());
        let runtime = connected(peer.clone());
        let (_cancel, handle) = start(&runtime, "soon");

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, AgentError::ConfigParse { ref value, .. } if value == "soon"));
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(peer.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_command_is_a_well_formed_ping() {
        let peer = Arc::new(RecordingPeer::default());
        let runtime = connected(peer.clone());
        let (cancel, handle) = start(&runtime, "5");

        tokio::time::sleep(Duration::from_millis(2000)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let commands = peer.commands();
        assert!(commands.len() > 300);
        for cmd in commands {
            assert_eq!(cmd.value, "ping");
            assert_eq!(cmd.header.status, "ok");
            assert!((0..1000).contains(&cmd.x), "x out of range: {}", cmd.x);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_are_reported_and_loop_continues() {
        let capture = LogCapture::default();
        let _guard = capture.install();
        let peer = Arc::new(FailingPeer::default());
        let runtime = connected(peer.clone());
        let (cancel, handle) = start(&runtime, "100");

        tokio::time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let attempts = peer.attempts();
        assert!((4..=6).contains(&attempts), "attempted {attempts} sends");
        assert_eq!(
            capture.count(tracing::Level::ERROR, "failed to send command to agent-pong"),
            attempts
        );
    }
}
