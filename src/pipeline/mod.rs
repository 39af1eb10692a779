//! Monitoring loop and match finalization
//!
//! The monitor owns the detector and the artifact files of the active
//! session. Completed matches cross to the finalizer as immutable
//! [`MatchHandoff`] values over a bounded channel, so stat extraction and
//! store writes never stall frame consumption.

mod finalize;
mod monitor;


use crate::capture::ArtifactPaths;
use crate::detector::SessionInfo;
use std::time::SystemTime;

pub use finalize::{FinalizeOutcome, Finalizer};
pub use monitor::{MatchMonitor, MonitorReport};

/// Durable artifacts of a completed session, ready for the store
#[derive(Debug, Clone)]
pub struct MatchHandoff {
    pub session: SessionInfo,
    pub ended_at: SystemTime,
    pub paths: ArtifactPaths,
    pub video_frames: u64,
}
