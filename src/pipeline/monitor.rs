use super::MatchHandoff;
use crate::capture::{ArtifactFile, ArtifactPaths, ArtifactWriter};
use crate::config::DetectorConfig;
use crate::detector::{DetectorState, SegmentDetector, SegmentEvent, SessionInfo};
use crate::error::{ArtifactError, MatchcastError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::frame::Frame;
use crate::identity::ArtifactName;
use crate::source::FrameSource;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one monitoring run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub frames: u64,
    pub completed: u64,
    pub discarded: u64,
    /// Sessions lost to artifact I/O failures
    pub failed: u64,
}

/// Video file being written for the active session
struct Recording {
    session: SessionInfo,
    name: ArtifactName,
    file: ArtifactFile,
}

/// Single long-lived loop consuming frames and writing artifacts
pub struct MatchMonitor {
    detector: SegmentDetector,
    writer: Arc<ArtifactWriter>,
    handoff: mpsc::Sender<MatchHandoff>,
    stall_timeout: Duration,
    event_bus: Option<EventBus>,
    recording: Option<Recording>,
    report: MonitorReport,
}

impl MatchMonitor {
    pub fn new(
        config: DetectorConfig,
        writer: Arc<ArtifactWriter>,
        handoff: mpsc::Sender<MatchHandoff>,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            detector: SegmentDetector::new(config),
            writer,
            handoff,
            stall_timeout,
            event_bus: None,
            recording: None,
            report: MonitorReport::default(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Consume `source` until it ends or `cancel` fires
    ///
    /// The active session is settled before returning: a session already on
    /// its result screen is completed, anything else is discarded. Dropping
    /// the monitor closes the hand-off channel, which lets the finalizer
    /// drain and stop.
    pub async fn run(
        mut self,
        mut source: Box<dyn FrameSource>,
        cancel: CancellationToken,
    ) -> Result<MonitorReport> {
        let source_name = source.describe();
        info!(
            "Monitoring frame source '{}' (stall timeout {:?})",
            source_name, self.stall_timeout
        );

        let mut failure = None;
        loop {
            // The pending read is kept across stall ticks so no partial frame is lost
            let read = source.next_frame();
            tokio::pin!(read);

            let next = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    result = &mut read => break Some(result),
                    _ = tokio::time::sleep(self.stall_timeout) => self.stalled().await,
                }
            };

            match next {
                None => {
                    info!("Shutdown requested, stopping frame monitor");
                    break;
                }
                Some(Ok(Some(frame))) => {
                    self.report.frames += 1;
                    let events = self.detector.observe(frame);
                    self.handle_events(events).await;
                }
                Some(Ok(None)) => {
                    info!("Frame source '{}' ended", source_name);
                    break;
                }
                Some(Err(e)) => {
                    error!("Frame source '{}' failed: {}", source_name, e);
                    self.emit(PipelineEvent::SystemError {
                        component: "monitor".to_string(),
                        error: e.to_string(),
                    })
                    .await;
                    failure = Some(e);
                    break;
                }
            }
        }

        let events = self.detector.finish();
        self.handle_events(events).await;

        if let Some(recording) = self.recording.take() {
            warn!(
                "Session {} still open after settling, removing its video",
                recording.session.session_id
            );
            recording.file.abort().await;
        }

        let stats = self.detector.stats();
        info!(
            "Frame monitor stopped: {} frames, {} matches started, {} completed, {} discarded, {} failed",
            self.report.frames,
            stats.matches_started,
            self.report.completed,
            self.report.discarded,
            self.report.failed
        );

        match failure {
            Some(e) => Err(MatchcastError::from(e)),
            None => Ok(self.report),
        }
    }

    async fn stalled(&mut self) {
        if self.detector.state() != DetectorState::Idle {
            warn!(
                "No frames for {:?} during an active session",
                self.stall_timeout
            );
        }
        let events = self.detector.on_stall();
        self.handle_events(events).await;
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(event).await {
                error!("Failed to publish monitor event: {}", e);
            }
        }
    }

    async fn handle_events(&mut self, events: Vec<SegmentEvent>) {
        for event in events {
            match event {
                SegmentEvent::MatchStarted { session, backlog } => {
                    self.emit(PipelineEvent::MatchStarted {
                        session_id: session.session_id,
                        started_at: session.started_at,
                    })
                    .await;
                    self.start_recording(session, backlog).await;
                }
                SegmentEvent::VideoFrame { session, frame } => {
                    self.append(session, &frame).await;
                }
                SegmentEvent::MatchEnded { session, ended_at } => {
                    self.emit(PipelineEvent::MatchEnded {
                        session_id: session.session_id,
                        ended_at,
                    })
                    .await;
                }
                SegmentEvent::MatchCompleted {
                    session,
                    ended_at,
                    clip,
                    video_frames,
                } => {
                    self.complete(session, ended_at, &clip, video_frames).await;
                }
                SegmentEvent::SessionDiscarded { session, reason } => {
                    if let Some(recording) = self.take_recording(&session) {
                        recording.file.abort().await;
                    }
                    self.report.discarded += 1;
                    self.emit(PipelineEvent::SessionDiscarded {
                        session_id: session.session_id,
                        reason: reason.to_string(),
                    })
                    .await;
                }
            }
        }
    }

    fn take_recording(&mut self, session: &SessionInfo) -> Option<Recording> {
        match &self.recording {
            Some(r) if r.session.session_id == session.session_id => self.recording.take(),
            _ => None,
        }
    }

    async fn start_recording(&mut self, session: SessionInfo, backlog: Vec<Frame>) {
        if let Some(stale) = self.recording.take() {
            warn!(
                "Session {} left a video open, removing it",
                stale.session.session_id
            );
            stale.file.abort().await;
        }

        let (name, mut file) = match self.writer.begin_video(session.started_at).await {
            Ok(opened) => opened,
            Err(e) => {
                self.session_failed(&session, e).await;
                return;
            }
        };

        for frame in &backlog {
            if let Err(e) = file.append(frame).await {
                file.abort().await;
                self.session_failed(&session, e).await;
                return;
            }
        }

        debug!(
            "Recording session {} to {}",
            session.session_id,
            file.final_path().display()
        );
        self.recording = Some(Recording {
            session,
            name,
            file,
        });
    }

    async fn append(&mut self, session: SessionInfo, frame: &Frame) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };
        if recording.session.session_id != session.session_id {
            return;
        }

        if let Err(e) = recording.file.append(frame).await {
            if let Some(recording) = self.recording.take() {
                recording.file.abort().await;
            }
            self.session_failed(&session, e).await;
        }
    }

    async fn complete(
        &mut self,
        session: SessionInfo,
        ended_at: SystemTime,
        clip: &[Frame],
        video_frames: u64,
    ) {
        let Some(recording) = self.take_recording(&session) else {
            warn!(
                "Session {} completed without a video, dropping it",
                session.session_id
            );
            return;
        };

        let paths = match self.persist(recording, clip).await {
            Ok(paths) => paths,
            Err(e) => {
                self.session_failed(&session, e).await;
                return;
            }
        };

        info!(
            "Match session {} complete: {} ({} frames), clip {} ({} frames)",
            session.session_id,
            paths.video.display(),
            video_frames,
            paths.clip.display(),
            clip.len()
        );

        let handoff = MatchHandoff {
            session,
            ended_at,
            paths,
            video_frames,
        };
        if self.handoff.send(handoff).await.is_err() {
            error!(
                "Finalizer is gone, match session {} stays on disk unrecorded",
                session.session_id
            );
            self.report.failed += 1;
            return;
        }
        self.report.completed += 1;
    }

    /// Make both artifacts durable; a failed clip takes the video with it
    async fn persist(
        &self,
        recording: Recording,
        clip: &[Frame],
    ) -> std::result::Result<ArtifactPaths, ArtifactError> {
        let Recording { name, file, .. } = recording;
        let video = file.finalize().await?;

        match self.writer.write_clip(&name, clip).await {
            Ok(clip) => Ok(ArtifactPaths { name, video, clip }),
            Err(e) => {
                self.writer.remove(&video).await;
                Err(e)
            }
        }
    }

    async fn session_failed(&mut self, session: &SessionInfo, e: ArtifactError) {
        error!(
            "Artifact failure for match session {}, dropping it: {}",
            session.session_id, e
        );
        self.report.failed += 1;
        self.emit(PipelineEvent::SystemError {
            component: "monitor".to_string(),
            error: format!("session {}: {}", session.session_id, e),
        })
        .await;
    }
}
