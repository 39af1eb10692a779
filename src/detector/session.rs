use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Externally visible detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    Idle,
    InMatch,
    ResultScreen,
}

/// Phase of an active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    InMatch,
    ResultScreen,
}

/// In-progress match owned by the detector
#[derive(Debug)]
pub(crate) struct MatchSession {
    pub(crate) info: SessionInfo,
    pub(crate) phase: SessionPhase,
    pub(crate) ended_at: Option<SystemTime>,
    pub(crate) clip: Vec<Frame>,
    pub(crate) video_frames: u64,
}

impl MatchSession {
    pub(crate) fn new(started_at: SystemTime) -> Self {
        Self {
            info: SessionInfo {
                session_id: Uuid::new_v4(),
                started_at,
            },
            phase: SessionPhase::InMatch,
            ended_at: None,
            clip: Vec::new(),
            video_frames: 0,
        }
    }
}

/// Identity of a session before the store assigns a match id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Correlation id for logs and events
    pub session_id: Uuid,
    /// Time of the confirmed start boundary (the provisional identity)
    pub started_at: SystemTime,
}

/// Why a session was dropped without producing artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// End boundary confirmed before the minimum match duration
    TooShort { duration: Duration },
    /// No end boundary within the maximum match duration
    MaxDurationExceeded { limit: Duration },
    /// Gap between frames larger than tolerated
    FrameGap { gap: Duration },
    /// Result window closed with too few frames for a usable clip
    ResultClipTooShort { frames: usize, required: usize },
    /// No frames arrived for longer than the stall timeout
    SourceStalled,
    /// Stream ended or shutdown requested mid-session
    StreamEnded,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::TooShort { duration } => {
                write!(f, "match too short ({:.1}s)", duration.as_secs_f64())
            }
            DiscardReason::MaxDurationExceeded { limit } => {
                write!(f, "no end boundary within {}s", limit.as_secs())
            }
            DiscardReason::FrameGap { gap } => {
                write!(f, "frame gap of {:.1}s", gap.as_secs_f64())
            }
            DiscardReason::ResultClipTooShort { frames, required } => {
                write!(f, "result clip has {} frames, need {}", frames, required)
            }
            DiscardReason::SourceStalled => write!(f, "frame source stalled"),
            DiscardReason::StreamEnded => write!(f, "stream ended mid-session"),
        }
    }
}

/// Output of the detector for one observed frame
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// Start boundary confirmed; `backlog` holds the debounce run, oldest first
    MatchStarted {
        session: SessionInfo,
        backlog: Vec<Frame>,
    },
    /// Frame belonging to the full-match video
    VideoFrame { session: SessionInfo, frame: Frame },
    /// End boundary confirmed; the result window is now being collected
    MatchEnded {
        session: SessionInfo,
        ended_at: SystemTime,
    },
    /// Result window complete; the session is ready for hand-off
    MatchCompleted {
        session: SessionInfo,
        ended_at: SystemTime,
        clip: Vec<Frame>,
        video_frames: u64,
    },
    /// Session dropped; any partial artifacts must be removed
    SessionDiscarded {
        session: SessionInfo,
        reason: DiscardReason,
    },
}

/// Counters kept by the detector
#[derive(Debug, Clone, Default)]
pub struct DetectorStats {
    pub frames_observed: u64,
    pub matches_started: u64,
    pub matches_completed: u64,
    pub sessions_discarded: u64,
}
