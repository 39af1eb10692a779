use super::*;
use crate::config::DetectorConfig;
use crate::frame::{BoundarySignal, Frame};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FRAME_MS: u64 = 100;

fn create_test_config() -> DetectorConfig {
    DetectorConfig {
        debounce_frames: 5,
        min_match_seconds: 30,
        max_match_seconds: 1800,
        max_frame_gap_seconds: 10,
        result_clip_pre_seconds: 2,
        result_clip_post_seconds: 8,
        min_result_frames: 15,
        window_capacity: 600,
    }
}

/// Builds a synthetic 10 fps frame sequence
struct Script {
    frames: Vec<Frame>,
    next_id: u64,
    at_ms: u64,
}

impl Script {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_id: 0,
            at_ms: 1_700_000_000_000,
        }
    }

    fn push(mut self, signal: BoundarySignal, count: usize) -> Self {
        for _ in 0..count {
            let ts = UNIX_EPOCH + Duration::from_millis(self.at_ms);
            self.frames
                .push(Frame::new(self.next_id, ts, vec![self.next_id as u8], signal));
            self.next_id += 1;
            self.at_ms += FRAME_MS;
        }
        self
    }

    fn idle(self, count: usize) -> Self {
        self.push(BoundarySignal::None, count)
    }

    fn start(self) -> Self {
        self.push(BoundarySignal::MatchStart, 5)
    }

    fn end(self) -> Self {
        self.push(BoundarySignal::MatchEnd, 5)
    }

    fn pause(mut self, millis: u64) -> Self {
        self.at_ms += millis;
        self
    }

    fn run(self, detector: &mut SegmentDetector) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        for frame in self.frames {
            events.extend(detector.observe(frame));
        }
        events
    }
}

fn completed(events: &[SegmentEvent]) -> Vec<&SegmentEvent> {
    events
        .iter()
        .filter(|e| matches!(e, SegmentEvent::MatchCompleted { .. }))
        .collect()
}

fn discards(events: &[SegmentEvent]) -> Vec<DiscardReason> {
    events
        .iter()
        .filter_map(|e| match e {
            SegmentEvent::SessionDiscarded { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_single_match_produces_one_completion() {
    let mut detector = SegmentDetector::new(create_test_config());
    let events = Script::new()
        .idle(20)
        .start()
        .idle(400)
        .end()
        .idle(100)
        .run(&mut detector);

    let done = completed(&events);
    assert_eq!(done.len(), 1);
    assert!(discards(&events).is_empty());
    assert_eq!(detector.state(), DetectorState::Idle);

    match done[0] {
        SegmentEvent::MatchCompleted {
            session,
            ended_at,
            clip,
            video_frames,
        } => {
            let duration = ended_at.duration_since(session.started_at).unwrap();
            assert_eq!(duration, Duration::from_millis(405 * FRAME_MS));
            // 2s before the end boundary through 8s after it
            assert_eq!(clip.len(), 101);
            assert!(clip.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            assert_eq!(*video_frames, 410);
        }
        _ => unreachable!(),
    }

    let stats = detector.stats();
    assert_eq!(stats.matches_started, 1);
    assert_eq!(stats.matches_completed, 1);
    assert_eq!(stats.frames_observed, 530);
}

#[test]
fn test_events_are_ordered() {
    let mut detector = SegmentDetector::new(create_test_config());
    let events = Script::new()
        .start()
        .idle(400)
        .end()
        .idle(100)
        .run(&mut detector);

    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SegmentEvent::MatchStarted { .. } => Some("started"),
            SegmentEvent::MatchEnded { .. } => Some("ended"),
            SegmentEvent::MatchCompleted { .. } => Some("completed"),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec!["started", "ended", "completed"]);
}

#[test]
fn test_max_duration_discards_session() {
    let mut config = create_test_config();
    config.max_match_seconds = 60;
    let mut detector = SegmentDetector::new(config);

    let events = Script::new().start().idle(700).run(&mut detector);

    assert!(completed(&events).is_empty());
    assert_eq!(
        discards(&events),
        vec![DiscardReason::MaxDurationExceeded {
            limit: Duration::from_secs(60)
        }]
    );
    assert_eq!(detector.state(), DetectorState::Idle);
}

#[test]
fn test_short_match_is_noise() {
    let mut detector = SegmentDetector::new(create_test_config());
    let events = Script::new()
        .start()
        .idle(100)
        .end()
        .idle(100)
        .run(&mut detector);

    assert!(completed(&events).is_empty());
    let reasons = discards(&events);
    assert_eq!(reasons.len(), 1);
    assert!(matches!(reasons[0], DiscardReason::TooShort { .. }));
}

#[test]
fn test_debounce_ignores_isolated_frames() {
    let mut detector = SegmentDetector::new(create_test_config());

    // Stray start frames while idle never start a match
    let events = Script::new()
        .idle(10)
        .push(BoundarySignal::MatchStart, 4)
        .idle(10)
        .push(BoundarySignal::MatchStart, 1)
        .idle(10)
        .run(&mut detector);
    assert!(events.is_empty());
    assert_eq!(detector.state(), DetectorState::Idle);

    // Stray end frames mid-match never end it
    let mut detector = SegmentDetector::new(create_test_config());
    let mut script = Script::new().start();
    for _ in 0..8 {
        script = script.idle(50).push(BoundarySignal::MatchEnd, 2);
    }
    let events = script.idle(10).end().idle(100).run(&mut detector);

    let done = completed(&events);
    assert_eq!(done.len(), 1);
    assert!(discards(&events).is_empty());
}

#[test]
fn test_back_to_back_matches_do_not_overlap() {
    let mut detector = SegmentDetector::new(create_test_config());
    let events = Script::new()
        .start()
        .idle(400)
        .end()
        .idle(30)
        .start()
        .idle(400)
        .end()
        .idle(30)
        .start()
        .idle(400)
        .end()
        .idle(100)
        .run(&mut detector);

    let done = completed(&events);
    assert_eq!(done.len(), 3);
    assert!(discards(&events).is_empty());

    // Collect the video span of each session
    let mut spans: Vec<(uuid::Uuid, SystemTime, SystemTime)> = Vec::new();
    for event in &events {
        let (id, frames): (uuid::Uuid, Vec<&Frame>) = match event {
            SegmentEvent::MatchStarted { session, backlog } => {
                (session.session_id, backlog.iter().collect())
            }
            SegmentEvent::VideoFrame { session, frame } => (session.session_id, vec![frame]),
            _ => continue,
        };
        for frame in frames {
            match spans.iter_mut().find(|(sid, _, _)| *sid == id) {
                Some(span) => span.2 = span.2.max(frame.timestamp),
                None => spans.push((id, frame.timestamp, frame.timestamp)),
            }
        }
    }

    assert_eq!(spans.len(), 3);
    for pair in spans.windows(2) {
        assert!(pair[0].2 < pair[1].1, "video spans overlap");
    }
}

#[test]
fn test_frame_gap_discards_session() {
    let mut detector = SegmentDetector::new(create_test_config());
    let events = Script::new()
        .start()
        .idle(100)
        .pause(20_000)
        .idle(10)
        .run(&mut detector);

    let reasons = discards(&events);
    assert_eq!(reasons.len(), 1);
    assert!(matches!(reasons[0], DiscardReason::FrameGap { .. }));
    assert_eq!(detector.state(), DetectorState::Idle);
}

#[test]
fn test_finish_completes_result_screen() {
    let mut detector = SegmentDetector::new(create_test_config());
    Script::new()
        .start()
        .idle(400)
        .end()
        .idle(20)
        .run(&mut detector);
    assert_eq!(detector.state(), DetectorState::ResultScreen);

    let events = detector.finish();
    assert_eq!(completed(&events).len(), 1);
    assert_eq!(detector.state(), DetectorState::Idle);
}

#[test]
fn test_finish_discards_active_match() {
    let mut detector = SegmentDetector::new(create_test_config());
    Script::new().start().idle(50).run(&mut detector);
    assert_eq!(detector.state(), DetectorState::InMatch);

    let events = detector.finish();
    assert_eq!(discards(&events), vec![DiscardReason::StreamEnded]);
    assert!(detector.finish().is_empty());
}

#[test]
fn test_result_clip_too_short() {
    let mut detector = SegmentDetector::new(create_test_config());
    Script::new().start().idle(400).end().run(&mut detector);

    // Only the two seconds before the end boundary are collected so far
    let mut config = create_test_config();
    config.min_result_frames = 200;
    let mut strict = SegmentDetector::new(config);
    Script::new().start().idle(400).end().run(&mut strict);

    let events = strict.finish();
    assert!(completed(&events).is_empty());
    assert!(matches!(
        discards(&events)[0],
        DiscardReason::ResultClipTooShort { required: 200, .. }
    ));

    assert_eq!(completed(&detector.finish()).len(), 1);
}

#[test]
fn test_stall_discards_session() {
    let mut detector = SegmentDetector::new(create_test_config());
    Script::new().start().idle(10).run(&mut detector);

    let events = detector.on_stall();
    assert_eq!(discards(&events), vec![DiscardReason::SourceStalled]);
    assert!(detector.on_stall().is_empty());
}
