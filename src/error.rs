use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame source error: {0}")]
    Source(#[from] SourceError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Stat extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Match store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publication error: {0}")]
    Publish(#[from] PublishError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl MatchcastError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Failure class used to decide between retry, degrade and abort
    pub fn class(&self) -> ErrorClass {
        match self {
            MatchcastError::Config(_) => ErrorClass::Configuration,
            MatchcastError::Io(_) => ErrorClass::TransientIo,
            MatchcastError::Json(_) => ErrorClass::TransientIo,
            MatchcastError::Source(_) => ErrorClass::TransientIo,
            MatchcastError::Artifact(_) => ErrorClass::TransientIo,
            MatchcastError::Extraction(_) => ErrorClass::RecognitionFailure,
            MatchcastError::Store(StoreError::Unavailable { .. }) => ErrorClass::Configuration,
            MatchcastError::Store(_) => ErrorClass::TransientIo,
            MatchcastError::Publish(e) => e.class(),
            MatchcastError::EventBus(_) => ErrorClass::TransientIo,
            MatchcastError::System { .. } => ErrorClass::Configuration,
            MatchcastError::Component { .. } => ErrorClass::TransientIo,
        }
    }
}

/// Failure taxonomy shared by the pipeline and the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Disk or network hiccup, safe to retry
    TransientIo,
    /// Credentials or permissions rejected, never retried
    PermanentAuth,
    /// Artifact the remote host will never accept, never retried
    PermanentArtifact,
    /// Daily budget spent; work is deferred, not failed
    QuotaExhausted,
    /// Stats unavailable; the record is kept with null stats
    RecognitionFailure,
    /// Legacy artifact without a unique match; published with placeholder metadata
    ReconciliationAmbiguous,
    /// Unusable configuration, fatal at startup
    Configuration,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid frame stream header: {details}")]
    InvalidHeader { details: String },

    #[error("Unsupported frame stream version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("Invalid boundary signal byte {value} in frame {frame_id}")]
    InvalidSignal { frame_id: u64, value: u8 },

    #[error("Frame {frame_id} payload of {len} bytes exceeds limit")]
    OversizedFrame { frame_id: u64, len: u32 },

    #[error("Failed to open frame source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame source read failed: {0}")]
    Read(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to create artifact directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to finalize artifact {path}: {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognized artifact name: {name}")]
    UnrecognizedName { name: String },
}

#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("Stat extraction timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Stat extractor unavailable: {details}")]
    Unavailable { details: String },

    #[error("Stat extractor rejected clip: {details}")]
    Rejected { details: String },

    #[error("Malformed stat extractor response: {details}")]
    Malformed { details: String },

    #[error("Clip not found: {path}")]
    MissingClip { path: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Match {id} not found")]
    NotFound { id: u64 },

    #[error("Match store unavailable at {path}: {details}")]
    Unavailable { path: String, details: String },

    #[error("Failed to persist match store: {0}")]
    Persist(#[from] std::io::Error),

    #[error("Corrupt match store document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Remote host rejected credentials: {details}")]
    Auth { details: String },

    #[error("Artifact rejected as malformed: {details}")]
    Malformed { details: String },

    #[error("Transient publication failure: {details}")]
    Transient { details: String },

    #[error("Daily quota exhausted ({consumed}/{budget} units)")]
    QuotaExhausted { consumed: u32, budget: u32 },

    #[error("Unknown publication task: {key}")]
    UnknownTask { key: String },

    #[error("Task {key} cannot move from {from} to {to}")]
    InvalidTransition {
        key: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Failed to persist publication state: {0}")]
    Persist(#[from] std::io::Error),

    #[error("Corrupt publication state: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl PublishError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PublishError::Auth { .. } => ErrorClass::PermanentAuth,
            PublishError::QuotaExhausted { .. } => ErrorClass::QuotaExhausted,
            PublishError::Malformed { .. } => ErrorClass::PermanentArtifact,
            _ => ErrorClass::TransientIo,
        }
    }
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, MatchcastError>;
