use super::model::MatchStats;
use crate::error::ExtractionError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("matchcast/", env!("CARGO_PKG_VERSION"));

/// Result-screen recognition service
#[async_trait]
pub trait StatExtractor: Send + Sync {
    /// Extractor identifier for logs
    fn name(&self) -> &'static str;

    /// Turn a result clip into structured statistics
    async fn extract(&self, clip: &Path) -> Result<MatchStats, ExtractionError>;
}

/// Run an extraction bounded by `timeout`
pub async fn extract_with_timeout(
    extractor: &dyn StatExtractor,
    clip: &Path,
    timeout: Duration,
) -> Result<MatchStats, ExtractionError> {
    match tokio::time::timeout(timeout, extractor.extract(clip)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                "Stat extractor '{}' timed out after {:?} on {}",
                extractor.name(),
                timeout,
                clip.display()
            );
            Err(ExtractionError::Timeout {
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// Extractor reached over HTTP
///
/// The clip is POSTed as the request body; the service answers with
/// `{"participants": [...], "matchTimestamp": ...}`.
pub struct HttpStatExtractor {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpStatExtractor {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Unavailable {
                details: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl StatExtractor for HttpStatExtractor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn extract(&self, clip: &Path) -> Result<MatchStats, ExtractionError> {
        let data = tokio::fs::read(clip).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExtractionError::MissingClip {
                    path: clip.display().to_string(),
                }
            } else {
                ExtractionError::Unavailable {
                    details: format!("failed to read clip: {}", e),
                }
            }
        })?;

        let clip_name = clip
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("clip")
            .to_string();
        debug!("Submitting {} ({} bytes) for stat extraction", clip_name, data.len());

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("X-Clip-Name", clip_name.as_str())
            .body(data);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                ExtractionError::Unavailable {
                    details: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Rejected {
                details: format!("{}: {}", status.as_u16(), text),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Unavailable {
                details: format!("{}: {}", status.as_u16(), text),
            });
        }

        let stats: MatchStats = response
            .json()
            .await
            .map_err(|e| ExtractionError::Malformed {
                details: e.to_string(),
            })?;

        if stats.participants.is_empty() {
            return Err(ExtractionError::Malformed {
                details: "no participants in response".to_string(),
            });
        }

        info!(
            "Extracted stats for {} participants from {}",
            stats.participants.len(),
            clip_name
        );
        Ok(stats)
    }
}
