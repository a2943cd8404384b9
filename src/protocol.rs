use std::fmt;

use serde::{Deserialize, Serialize};

/// Qualified names of the message kinds exchanged with the pong agent.
pub const TEST_COMMAND_TYPE: &str = "pingpong/example#test-command";
pub const TESTED_EVENT_TYPE: &str = "pingpong/example#tested-event";

/// A message kind that can be bound in the type registry.
pub trait Message: Serialize + Send + Sync + 'static {
    /// Qualified type name, `<namespace>#<kind>`.
    const TYPE_NAME: &'static str;
    /// Full name of the record schema describing this kind.
    const SCHEMA: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub status: String,
}

impl Header {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    pub header: Header,
    pub value: String,
    pub x: i32,
}

impl TestCommand {
    pub fn ping(x: i32) -> Self {
        Self {
            header: Header::ok(),
            value: "ping".to_string(),
            x,
        }
    }
}

impl Message for TestCommand {
    const TYPE_NAME: &'static str = TEST_COMMAND_TYPE;
    const SCHEMA: &'static str = "pingpong.example.TestCommand";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestedEvent {
    pub header: Header,
    pub value: String,
}

impl TestedEvent {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            header: Header::ok(),
            value: value.into(),
        }
    }
}

impl Message for TestedEvent {
    const TYPE_NAME: &'static str = TESTED_EVENT_TYPE;
    const SCHEMA: &'static str = "pingpong.example.TestedEvent";
}

// ── Payload: every registered kind that can travel on the fabric ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    #[serde(rename = "pingpong/example#test-command")]
    TestCommand(TestCommand),
    #[serde(rename = "pingpong/example#tested-event")]
    TestedEvent(TestedEvent),
}

impl Payload {
    /// Qualified type name of the wrapped message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TestCommand(_) => TestCommand::TYPE_NAME,
            Self::TestedEvent(_) => TestedEvent::TYPE_NAME,
        }
    }
}

impl From<TestCommand> for Payload {
    fn from(cmd: TestCommand) -> Self {
        Self::TestCommand(cmd)
    }
}

impl From<TestedEvent> for Payload {
    fn from(event: TestedEvent) -> Self {
        Self::TestedEvent(event)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestCommand(cmd) => {
                write!(f, "{} value={} x={}", self.type_name(), cmd.value, cmd.x)
            }
            Self::TestedEvent(ev) => write!(f, "{} value={}", self.type_name(), ev.value),
        }
    }
}
