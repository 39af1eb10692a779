use std::fmt;

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    /// The frame source was exhausted
    SourceEnded,
    UserRequest,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(signal) => write!(f, "received {}", signal),
            ShutdownReason::Error(e) => write!(f, "error: {}", e),
            ShutdownReason::SourceEnded => f.write_str("frame source ended"),
            ShutdownReason::UserRequest => f.write_str("user request"),
        }
    }
}
