use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Per-frame verdict of the external boundary classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundarySignal {
    /// Ordinary gameplay or menu frame
    None,
    /// Frame looks like the start of a match
    MatchStart,
    /// Frame looks like the end-of-match transition
    MatchEnd,
}

impl BoundarySignal {
    /// Wire representation used by the frame stream codec
    pub fn as_byte(&self) -> u8 {
        match self {
            BoundarySignal::None => 0,
            BoundarySignal::MatchStart => 1,
            BoundarySignal::MatchEnd => 2,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(BoundarySignal::None),
            1 => Some(BoundarySignal::MatchStart),
            2 => Some(BoundarySignal::MatchEnd),
            _ => None,
        }
    }

    pub fn is_boundary(&self) -> bool {
        !matches!(self, BoundarySignal::None)
    }
}

/// Frame data structure containing the encoded payload and capture metadata
#[derive(Debug, Clone)]
pub struct Frame {
    /// Source-assigned frame identifier
    pub id: u64,
    /// Capture timestamp; monotonic within one stream
    pub timestamp: SystemTime,
    /// Encoded payload (shared ownership so windows can hold frames cheaply)
    pub data: Arc<Vec<u8>>,
    /// Boundary annotation supplied with the frame
    pub signal: BoundarySignal,
}

impl Frame {
    /// Create a new frame instance
    pub fn new(id: u64, timestamp: SystemTime, data: Vec<u8>, signal: BoundarySignal) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            signal,
        }
    }

    /// Time elapsed from `earlier` to this frame, zero if `earlier` is later
    pub fn since(&self, earlier: SystemTime) -> Duration {
        self.timestamp
            .duration_since(earlier)
            .unwrap_or(Duration::ZERO)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
