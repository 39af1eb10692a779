//! Match segmentation from a classified frame stream

mod machine;
mod session;
mod window;

#[cfg(test)]
mod tests;

pub use machine::SegmentDetector;
pub use session::{DetectorState, DetectorStats, DiscardReason, SegmentEvent, SessionInfo};
pub use window::FrameWindow;
