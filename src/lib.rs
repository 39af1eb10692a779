pub mod app;
pub mod batch;
pub mod capture;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod frame;
pub mod identity;
pub mod logging;
pub mod persist;
pub mod pipeline;
pub mod publish;
pub mod rating;
pub mod reconcile;
pub mod source;
pub mod stats;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{ComponentState, MatchcastOrchestrator, ShutdownReason};
pub use batch::{BatchOptions, BatchSummary, BatchUploader};
pub use capture::{ArtifactPaths, ArtifactWriter};
pub use config::MatchcastConfig;
pub use detector::{SegmentDetector, SegmentEvent, SessionInfo};
pub use error::{ErrorClass, MatchcastError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, PipelineEvent};
pub use frame::{BoundarySignal, Frame};
pub use identity::{ArtifactIdentity, ArtifactName, MatchId};
pub use pipeline::{Finalizer, MatchHandoff, MatchMonitor};
pub use publish::{PublicationQueue, Publisher, QuotaLedger};
pub use rating::{RatingOutcome, RatingService};
pub use reconcile::{LegacyReconciler, Resolution};
pub use store::{JsonMatchStore, MatchStore};
