use crate::config::DetectorConfig;
use crate::frame::{BoundarySignal, Frame};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::session::{
    DetectorState, DetectorStats, DiscardReason, MatchSession, SegmentEvent, SessionPhase,
};
use super::window::FrameWindow;

/// Match segmentation state machine
///
/// Consumes classified frames one at a time and turns the boundary signals
/// into match sessions. All timing is derived from frame timestamps, so the
/// detector is deterministic for a given frame sequence.
pub struct SegmentDetector {
    config: DetectorConfig,
    session: Option<MatchSession>,
    window: FrameWindow,
    run: Vec<Frame>,
    last_frame_at: Option<SystemTime>,
    stats: DetectorStats,
}

impl SegmentDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let retention = config.result_clip_pre() + config.result_clip_post();
        let window = FrameWindow::new(config.window_capacity, retention);

        Self {
            config,
            session: None,
            window,
            run: Vec::new(),
            last_frame_at: None,
            stats: DetectorStats::default(),
        }
    }

    pub fn state(&self) -> DetectorState {
        match self.session.as_ref().map(|s| s.phase) {
            None => DetectorState::Idle,
            Some(SessionPhase::InMatch) => DetectorState::InMatch,
            Some(SessionPhase::ResultScreen) => DetectorState::ResultScreen,
        }
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    /// Feed one frame and collect the resulting events
    pub fn observe(&mut self, frame: Frame) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        self.stats.frames_observed += 1;

        if let Some(last) = self.last_frame_at {
            let gap = frame.since(last);
            if gap > self.config.max_frame_gap() {
                self.run.clear();
                self.discard(DiscardReason::FrameGap { gap }, &mut events);
            }
        }
        self.last_frame_at = Some(frame.timestamp);
        self.window.push(frame.clone());

        match self.session.as_ref().map(|s| s.phase) {
            Some(SessionPhase::InMatch) => self.step_in_match(&frame, &mut events),
            Some(SessionPhase::ResultScreen) => {
                self.step_result_screen(&frame, &mut events);
                self.track_start(&frame, &mut events);
            }
            None => self.track_start(&frame, &mut events),
        }

        events
    }

    /// No frames arrived within the stall timeout
    pub fn on_stall(&mut self) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if self.session.is_some() {
            self.discard(DiscardReason::SourceStalled, &mut events);
        }
        self.window.clear();
        self.last_frame_at = None;
        events
    }

    /// Stream ended or shutdown requested; settle the active session
    pub fn finish(&mut self) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        match self.session.as_ref().map(|s| s.phase) {
            Some(SessionPhase::ResultScreen) => self.close_result_screen(&mut events),
            Some(SessionPhase::InMatch) => self.discard(DiscardReason::StreamEnded, &mut events),
            None => {}
        }
        self.run.clear();
        events
    }

    fn step_in_match(&mut self, frame: &Frame, events: &mut Vec<SegmentEvent>) {
        let (info, limit) = match self.session.as_mut() {
            Some(session) => {
                let limit = self.config.max_match_duration();
                if frame.since(session.info.started_at) > limit {
                    (session.info, Some(limit))
                } else {
                    session.video_frames += 1;
                    (session.info, None)
                }
            }
            None => return,
        };

        if let Some(limit) = limit {
            self.discard(DiscardReason::MaxDurationExceeded { limit }, events);
            return;
        }

        events.push(SegmentEvent::VideoFrame {
            session: info,
            frame: frame.clone(),
        });

        if !self.advance_run(frame, BoundarySignal::MatchEnd) {
            return;
        }

        let ended_at = self.run.first().map(|f| f.timestamp).unwrap_or(frame.timestamp);
        self.run.clear();

        let duration = ended_at
            .duration_since(info.started_at)
            .unwrap_or(Duration::ZERO);
        if duration < self.config.min_match_duration() {
            self.discard(DiscardReason::TooShort { duration }, events);
            return;
        }

        let clip_start = ended_at
            .checked_sub(self.config.result_clip_pre())
            .unwrap_or(UNIX_EPOCH);
        let clip = self.window.frames_in_range(clip_start, frame.timestamp);

        if let Some(session) = self.session.as_mut() {
            session.phase = SessionPhase::ResultScreen;
            session.ended_at = Some(ended_at);
            session.clip = clip;
        }

        info!(
            "Match {} ended after {:.1}s, collecting result screen",
            info.session_id,
            duration.as_secs_f64()
        );
        events.push(SegmentEvent::MatchEnded {
            session: info,
            ended_at,
        });

        if frame.timestamp >= ended_at + self.config.result_clip_post() {
            self.close_result_screen(events);
        }
    }

    fn step_result_screen(&mut self, frame: &Frame, events: &mut Vec<SegmentEvent>) {
        let post = self.config.result_clip_post();
        let complete = match self.session.as_mut() {
            Some(session) => {
                let deadline = session.ended_at.unwrap_or(frame.timestamp) + post;
                if frame.timestamp <= deadline {
                    session.clip.push(frame.clone());
                }
                frame.timestamp >= deadline
            }
            None => return,
        };

        if complete {
            self.close_result_screen(events);
        }
    }

    /// Look for a confirmed start boundary while idle or on the result screen
    fn track_start(&mut self, frame: &Frame, events: &mut Vec<SegmentEvent>) {
        if !self.advance_run(frame, BoundarySignal::MatchStart) {
            return;
        }

        let backlog = std::mem::take(&mut self.run);

        if self.state() == DetectorState::ResultScreen {
            debug!("Start boundary confirmed during result screen, closing previous match");
            self.close_result_screen(events);
        }

        let started_at = backlog.first().map(|f| f.timestamp).unwrap_or(frame.timestamp);
        let mut session = MatchSession::new(started_at);
        session.video_frames = backlog.len() as u64;
        let info = session.info;
        self.session = Some(session);
        self.stats.matches_started += 1;

        info!("Match {} started", info.session_id);
        events.push(SegmentEvent::MatchStarted {
            session: info,
            backlog,
        });
    }

    /// Extend or reset the debounce run; true once the run is confirmed
    fn advance_run(&mut self, frame: &Frame, wanted: BoundarySignal) -> bool {
        if frame.signal == wanted {
            self.run.push(frame.clone());
            self.run.len() >= self.config.debounce_frames as usize
        } else {
            if !self.run.is_empty() {
                debug!(
                    "Boundary run of {} frames broken by frame {}",
                    self.run.len(),
                    frame.id
                );
            }
            self.run.clear();
            false
        }
    }

    fn close_result_screen(&mut self, events: &mut Vec<SegmentEvent>) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        let required = self.config.min_result_frames;
        let ended_at = session.ended_at.unwrap_or(session.info.started_at);

        if session.clip.len() < required {
            let frames = session.clip.len();
            self.session = Some(session);
            self.discard(DiscardReason::ResultClipTooShort { frames, required }, events);
            return;
        }

        self.stats.matches_completed += 1;
        info!(
            "Match {} completed with {} video frames and {} result frames",
            session.info.session_id,
            session.video_frames,
            session.clip.len()
        );

        events.push(SegmentEvent::MatchCompleted {
            session: session.info,
            ended_at,
            clip: session.clip,
            video_frames: session.video_frames,
        });
    }

    fn discard(&mut self, reason: DiscardReason, events: &mut Vec<SegmentEvent>) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        self.run.clear();
        self.stats.sessions_discarded += 1;
        warn!("Discarding match {}: {}", session.info.session_id, reason);

        events.push(SegmentEvent::SessionDiscarded {
            session: session.info,
            reason,
        });
    }
}
