use crate::frame::Frame;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// Sliding window of recent frames owned by the detector
///
/// Holds at most `capacity` frames and drops anything older than `retention`
/// relative to the newest frame. Frames share their payload, so keeping a
/// window of a few seconds is cheap.
pub struct FrameWindow {
    frames: VecDeque<Frame>,
    capacity: usize,
    retention: Duration,
    overruns: u64,
}

impl FrameWindow {
    /// Create a new window
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use matchcast::detector::FrameWindow;
    ///
    /// let window = FrameWindow::new(120, Duration::from_secs(3));
    /// assert!(window.is_empty());
    /// ```
    pub fn new(capacity: usize, retention: Duration) -> Self {
        let capacity = capacity.max(1);
        debug!(
            "Created frame window with capacity {} and retention {:?}",
            capacity, retention
        );

        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            retention,
            overruns: 0,
        }
    }

    /// Push a frame, evicting frames beyond capacity or retention
    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.overruns += 1;
            trace!("Frame window overrun, evicted oldest frame");
        }

        let newest = frame.timestamp;
        self.frames.push_back(frame);

        while let Some(front) = self.frames.front() {
            if newest
                .duration_since(front.timestamp)
                .unwrap_or(Duration::ZERO)
                > self.retention
            {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames within `[start, end]`, oldest first
    pub fn frames_in_range(&self, start: SystemTime, end: SystemTime) -> Vec<Frame> {
        let frames: Vec<Frame> = self
            .frames
            .iter()
            .filter(|f| f.timestamp >= start && f.timestamp <= end)
            .cloned()
            .collect();

        trace!("Collected {} frames in window range", frames.len());
        frames
    }

    pub fn latest(&self) -> Option<&Frame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames dropped because the window was full
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
