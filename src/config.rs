use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MatchcastConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub artifacts: ArtifactConfig,
    pub extractor: ExtractorConfig,
    pub store: StoreConfig,
    pub rating: RatingConfig,
    pub publisher: PublisherConfig,
    pub reconciler: ReconcilerConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Frame stream path ("-" reads standard input)
    #[serde(default = "default_source_path")]
    pub path: String,

    /// Seconds without a frame before the active session is considered stale
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Consecutive frames with the same boundary signal needed to confirm it
    #[serde(default = "default_debounce_frames")]
    pub debounce_frames: u32,

    /// Matches shorter than this are treated as noise
    #[serde(default = "default_min_match_seconds")]
    pub min_match_seconds: u64,

    /// Matches longer than this without an end boundary are discarded
    #[serde(default = "default_max_match_seconds")]
    pub max_match_seconds: u64,

    /// Largest tolerated gap between consecutive frames of an active session
    #[serde(default = "default_max_frame_gap")]
    pub max_frame_gap_seconds: u64,

    /// Result clip window before the end boundary
    #[serde(default = "default_result_clip_pre")]
    pub result_clip_pre_seconds: u64,

    /// Result clip window after the end boundary
    #[serde(default = "default_result_clip_post")]
    pub result_clip_post_seconds: u64,

    /// Minimum frames a result clip must hold to be usable
    #[serde(default = "default_min_result_frames")]
    pub min_result_frames: usize,

    /// Frames kept in the sliding window for the result clip pre-roll
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArtifactConfig {
    /// Directory receiving match videos and result clips
    #[serde(default = "default_artifact_path")]
    pub path: String,

    /// Extension used for newly written artifacts
    #[serde(default = "default_artifact_extension")]
    pub extension: String,

    /// Extensions recognized as videos when scanning directories
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Suffix marking result-screen clips, which are never published
    #[serde(default = "default_result_clip_suffix")]
    pub result_clip_suffix: String,

    /// Time zone used for timestamps embedded in artifact names
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractorConfig {
    /// Recognition service endpoint; stats are skipped when unset
    pub endpoint: Option<String>,

    /// File holding the recognition service API key
    pub api_key_path: Option<String>,

    /// Upper bound for a single extraction call
    #[serde(default = "default_extractor_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// JSON document holding match records and ratings
    #[serde(default = "default_store_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RatingConfig {
    #[serde(default = "default_k_factor")]
    pub k_factor: f64,

    #[serde(default = "default_initial_rating")]
    pub initial_rating: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublisherConfig {
    /// Publish match videos to the remote host
    #[serde(default = "default_publisher_enabled")]
    pub enabled: bool,

    /// Upload endpoint of the remote host
    pub endpoint: Option<String>,

    /// File holding the bearer token for the remote host
    pub credentials_path: Option<String>,

    /// Units available per quota period
    #[serde(default = "default_daily_budget")]
    pub daily_budget_units: u32,

    /// Units charged per publish operation
    #[serde(default = "default_unit_cost")]
    pub unit_cost: u32,

    /// Time zone of the quota reset boundary
    #[serde(default = "default_reset_timezone")]
    pub reset_timezone: String,

    /// Local hour (in `reset_timezone`) at which the quota resets
    #[serde(default = "default_reset_hour")]
    pub reset_hour: u32,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay, doubled per retry
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Period of the background drain loop
    #[serde(default = "default_drain_interval")]
    pub drain_interval_seconds: u64,

    /// Per-request timeout for transfers
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: u64,

    /// Durable queue document
    #[serde(default = "default_queue_path")]
    pub queue_path: String,

    /// Durable quota ledger document
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Collection (playlist) the videos are added to
    pub collection: Option<String>,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default = "default_privacy")]
    pub privacy: String,

    /// Game title used in descriptions
    #[serde(default = "default_game_title")]
    pub game_title: String,

    /// Tags attached to every video
    #[serde(default = "default_base_tags")]
    pub base_tags: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReconcilerConfig {
    /// Symmetric window for matching legacy timestamps to records
    #[serde(default = "default_tolerance_seconds")]
    pub tolerance_seconds: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Capacity of the hand-off queue between monitor and finalizer
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,

    /// Grace period for in-flight work during shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl MatchcastConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("matchcast.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("source.path", default_source_path())?
            .set_default("source.stall_timeout_seconds", default_stall_timeout())?
            .set_default("detector.debounce_frames", default_debounce_frames())?
            .set_default("detector.min_match_seconds", default_min_match_seconds())?
            .set_default("detector.max_match_seconds", default_max_match_seconds())?
            .set_default("detector.max_frame_gap_seconds", default_max_frame_gap())?
            .set_default("detector.result_clip_pre_seconds", default_result_clip_pre())?
            .set_default(
                "detector.result_clip_post_seconds",
                default_result_clip_post(),
            )?
            .set_default(
                "detector.min_result_frames",
                default_min_result_frames() as i64,
            )?
            .set_default("detector.window_capacity", default_window_capacity() as i64)?
            .set_default("artifacts.path", default_artifact_path())?
            .set_default("artifacts.extension", default_artifact_extension())?
            .set_default("artifacts.video_extensions", default_video_extensions())?
            .set_default("artifacts.result_clip_suffix", default_result_clip_suffix())?
            .set_default("artifacts.timezone", default_timezone())?
            .set_default("extractor.timeout_seconds", default_extractor_timeout())?
            .set_default("store.path", default_store_path())?
            .set_default("rating.k_factor", default_k_factor())?
            .set_default("rating.initial_rating", default_initial_rating() as i64)?
            .set_default("publisher.enabled", default_publisher_enabled())?
            .set_default("publisher.daily_budget_units", default_daily_budget())?
            .set_default("publisher.unit_cost", default_unit_cost())?
            .set_default("publisher.reset_timezone", default_reset_timezone())?
            .set_default("publisher.reset_hour", default_reset_hour())?
            .set_default("publisher.max_retries", default_max_retries())?
            .set_default("publisher.base_backoff_ms", default_base_backoff_ms())?
            .set_default("publisher.max_backoff_ms", default_max_backoff_ms())?
            .set_default("publisher.drain_interval_seconds", default_drain_interval())?
            .set_default("publisher.upload_timeout_seconds", default_upload_timeout())?
            .set_default("publisher.queue_path", default_queue_path())?
            .set_default("publisher.ledger_path", default_ledger_path())?
            .set_default("publisher.collection", default_collection())?
            .set_default("publisher.category", default_category())?
            .set_default("publisher.privacy", default_privacy())?
            .set_default("publisher.game_title", default_game_title())?
            .set_default("publisher.base_tags", default_base_tags())?
            .set_default("reconciler.tolerance_seconds", default_tolerance_seconds())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default("system.handoff_capacity", default_handoff_capacity() as i64)?
            .set_default("system.shutdown_grace_seconds", default_shutdown_grace())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with MATCHCAST_ prefix
            .add_source(
                Environment::with_prefix("MATCHCAST")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: MatchcastConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.stall_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Source stall_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.detector.debounce_frames == 0 {
            return Err(ConfigError::Message(
                "Detector debounce_frames must be greater than 0".to_string(),
            ));
        }

        if self.detector.max_match_seconds <= self.detector.min_match_seconds {
            return Err(ConfigError::Message(
                "Detector max_match_seconds must exceed min_match_seconds".to_string(),
            ));
        }

        if self.detector.max_frame_gap_seconds == 0 {
            return Err(ConfigError::Message(
                "Detector max_frame_gap_seconds must be greater than 0".to_string(),
            ));
        }

        if self.detector.result_clip_post_seconds == 0 {
            return Err(ConfigError::Message(
                "Detector result_clip_post_seconds must be greater than 0".to_string(),
            ));
        }

        if self.detector.window_capacity == 0 {
            return Err(ConfigError::Message(
                "Detector window_capacity must be greater than 0".to_string(),
            ));
        }

        if self.artifacts.result_clip_suffix.is_empty() {
            return Err(ConfigError::Message(
                "Artifact result_clip_suffix must not be empty".to_string(),
            ));
        }

        validate_timezone("artifacts.timezone", &self.artifacts.timezone)?;

        if self.extractor.timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Extractor timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.rating.k_factor <= 0.0 {
            return Err(ConfigError::Message(
                "Rating k_factor must be positive".to_string(),
            ));
        }

        if self.publisher.enabled && self.publisher.endpoint.is_none() {
            return Err(ConfigError::Message(
                "Publisher endpoint is required when publishing is enabled".to_string(),
            ));
        }

        if self.publisher.unit_cost == 0 {
            return Err(ConfigError::Message(
                "Publisher unit_cost must be greater than 0".to_string(),
            ));
        }

        if self.publisher.daily_budget_units < self.publisher.unit_cost {
            return Err(ConfigError::Message(
                "Publisher daily_budget_units must cover at least one publish".to_string(),
            ));
        }

        if self.publisher.reset_hour > 23 {
            return Err(ConfigError::Message(
                "Publisher reset_hour must be between 0 and 23".to_string(),
            ));
        }

        validate_timezone("publisher.reset_timezone", &self.publisher.reset_timezone)?;

        if self.reconciler.tolerance_seconds <= 0 {
            return Err(ConfigError::Message(
                "Reconciler tolerance_seconds must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 || self.system.handoff_capacity == 0 {
            return Err(ConfigError::Message(
                "System channel capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_timezone(key: &str, name: &str) -> Result<(), ConfigError> {
    name.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| ConfigError::Message(format!("{} '{}' is not a known time zone", key, name)))
}

impl DetectorConfig {
    pub fn min_match_duration(&self) -> Duration {
        Duration::from_secs(self.min_match_seconds)
    }

    pub fn max_match_duration(&self) -> Duration {
        Duration::from_secs(self.max_match_seconds)
    }

    pub fn max_frame_gap(&self) -> Duration {
        Duration::from_secs(self.max_frame_gap_seconds)
    }

    pub fn result_clip_pre(&self) -> Duration {
        Duration::from_secs(self.result_clip_pre_seconds)
    }

    pub fn result_clip_post(&self) -> Duration {
        Duration::from_secs(self.result_clip_post_seconds)
    }
}

impl ArtifactConfig {
    pub fn base_dir(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

impl ExtractorConfig {
    /// API key from `api_key_path`, if one is configured
    pub fn api_key(&self) -> Result<Option<String>, ConfigError> {
        self.api_key_path.as_deref().map(read_credential).transpose()
    }
}

impl PublisherConfig {
    /// Bearer token from `credentials_path`, if one is configured
    pub fn token(&self) -> Result<Option<String>, ConfigError> {
        self.credentials_path.as_deref().map(read_credential).transpose()
    }
}

/// Read a secret from a credentials file
///
/// The first non-empty line is the secret. A missing, unreadable or empty
/// file is a configuration error.
pub fn read_credential(path: &str) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Message(format!("Cannot read credentials file {}: {}", path, e))
    })?;

    let secret = contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| ConfigError::Message(format!("Credentials file {} is empty", path)))?;

    debug!("Loaded credentials from {}", path);
    Ok(secret.to_string())
}

impl Default for MatchcastConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                path: default_source_path(),
                stall_timeout_seconds: default_stall_timeout(),
            },
            detector: DetectorConfig {
                debounce_frames: default_debounce_frames(),
                min_match_seconds: default_min_match_seconds(),
                max_match_seconds: default_max_match_seconds(),
                max_frame_gap_seconds: default_max_frame_gap(),
                result_clip_pre_seconds: default_result_clip_pre(),
                result_clip_post_seconds: default_result_clip_post(),
                min_result_frames: default_min_result_frames(),
                window_capacity: default_window_capacity(),
            },
            artifacts: ArtifactConfig {
                path: default_artifact_path(),
                extension: default_artifact_extension(),
                video_extensions: default_video_extensions(),
                result_clip_suffix: default_result_clip_suffix(),
                timezone: default_timezone(),
            },
            extractor: ExtractorConfig {
                endpoint: None,
                api_key_path: None,
                timeout_seconds: default_extractor_timeout(),
            },
            store: StoreConfig {
                path: default_store_path(),
            },
            rating: RatingConfig {
                k_factor: default_k_factor(),
                initial_rating: default_initial_rating(),
            },
            publisher: PublisherConfig {
                enabled: default_publisher_enabled(),
                endpoint: None,
                credentials_path: None,
                daily_budget_units: default_daily_budget(),
                unit_cost: default_unit_cost(),
                reset_timezone: default_reset_timezone(),
                reset_hour: default_reset_hour(),
                max_retries: default_max_retries(),
                base_backoff_ms: default_base_backoff_ms(),
                max_backoff_ms: default_max_backoff_ms(),
                drain_interval_seconds: default_drain_interval(),
                upload_timeout_seconds: default_upload_timeout(),
                queue_path: default_queue_path(),
                ledger_path: default_ledger_path(),
                collection: Some(default_collection()),
                category: default_category(),
                privacy: default_privacy(),
                game_title: default_game_title(),
                base_tags: default_base_tags(),
            },
            reconciler: ReconcilerConfig {
                tolerance_seconds: default_tolerance_seconds(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                handoff_capacity: default_handoff_capacity(),
                shutdown_grace_seconds: default_shutdown_grace(),
            },
        }
    }
}

// Default value functions
fn default_source_path() -> String {
    "-".to_string()
}
fn default_stall_timeout() -> u64 {
    30
}

fn default_debounce_frames() -> u32 {
    5
}
fn default_min_match_seconds() -> u64 {
    30
}
fn default_max_match_seconds() -> u64 {
    1800
}
fn default_max_frame_gap() -> u64 {
    10
}
fn default_result_clip_pre() -> u64 {
    2
}
fn default_result_clip_post() -> u64 {
    8
}
fn default_min_result_frames() -> usize {
    15
}
fn default_window_capacity() -> usize {
    600
}

fn default_artifact_path() -> String {
    "./matches".to_string()
}
fn default_artifact_extension() -> String {
    "mjpeg".to_string()
}
fn default_video_extensions() -> Vec<String> {
    ["mp4", "mjpeg", "ts", "mkv", "mov", "webm", "avi"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_result_clip_suffix() -> String {
    "_result_screen".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_extractor_timeout() -> u64 {
    120
}

fn default_store_path() -> String {
    "./state/matches.json".to_string()
}

fn default_k_factor() -> f64 {
    32.0
}
fn default_initial_rating() -> i32 {
    1200
}

fn default_publisher_enabled() -> bool {
    false
}
fn default_daily_budget() -> u32 {
    6
}
fn default_unit_cost() -> u32 {
    1
}
fn default_reset_timezone() -> String {
    "America/Los_Angeles".to_string()
}
fn default_reset_hour() -> u32 {
    0
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    16_000
}
fn default_drain_interval() -> u64 {
    300
}
fn default_upload_timeout() -> u64 {
    900
}
fn default_queue_path() -> String {
    "./state/publication_queue.json".to_string()
}
fn default_ledger_path() -> String {
    "./state/quota_ledger.json".to_string()
}
fn default_collection() -> String {
    "Smash Bros Matches".to_string()
}
fn default_category() -> String {
    "20".to_string()
}
fn default_privacy() -> String {
    "public".to_string()
}
fn default_game_title() -> String {
    "Super Smash Bros Ultimate".to_string()
}
fn default_base_tags() -> Vec<String> {
    ["super smash bros", "smash ultimate", "ssbu", "gameplay", "competitive"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_tolerance_seconds() -> i64 {
    5
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_handoff_capacity() -> usize {
    16
}
fn default_shutdown_grace() -> u64 {
    30
}
