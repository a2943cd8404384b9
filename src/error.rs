use std::num::ParseIntError;

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Failures raised by the ping agent itself.
///
/// Construction errors (`Manifest`, `Registration`) abort agent creation.
/// `Subscription` is returned from the lifecycle callback. The remaining
/// variants are reported by the loop or handler that hit them and never
/// escape further.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("registration failed: {0}")]
    Registration(#[source] RuntimeError),

    #[error("invalid delay {value:?}: {source}")]
    ConfigParse {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("failed to subscribe to events: {0}")]
    Subscription(#[source] RuntimeError),

    #[error("failed to send command to {peer}: {source}")]
    Send {
        peer: String,
        #[source]
        source: RuntimeError,
    },

    #[error("unexpected payload: expected {expected}, got {actual}")]
    PayloadType {
        expected: &'static str,
        actual: &'static str,
    },
}
