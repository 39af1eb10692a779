use super::metadata::PublicationMetadata;
use super::retry::AttemptOutcome;
use crate::error::PublishError;
use async_trait::async_trait;
use reqwest::{Body, StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("matchcast/", env!("CARGO_PKG_VERSION"));

/// Video host that publishes artifacts
#[async_trait]
pub trait RemoteHost: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transfer one video; success carries the durable remote reference
    async fn publish(&self, video: &Path, metadata: &PublicationMetadata)
        -> AttemptOutcome<String>;
}

/// Stand-in host for a publisher opened without an endpoint; every transfer is refused
pub struct UnconfiguredHost;

#[async_trait]
impl RemoteHost for UnconfiguredHost {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn publish(&self, _video: &Path, _metadata: &PublicationMetadata) -> AttemptOutcome<String> {
        AttemptOutcome::Permanent(PublishError::Malformed {
            details: "publisher.endpoint is not configured".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: Option<String>,
    id: Option<String>,
}

/// Map a non-success response to an attempt outcome
///
/// Returns `None` for 2xx, which the caller decodes itself.
pub fn classify_failure<T>(status: StatusCode, body: &str) -> Option<AttemptOutcome<T>> {
    if status.is_success() {
        return None;
    }
    let details = format!("{}: {}", status.as_u16(), body.trim());

    if status == StatusCode::TOO_MANY_REQUESTS
        || body.contains("quotaExceeded")
        || body.contains("dailyLimitExceeded")
    {
        return Some(AttemptOutcome::QuotaExceeded(details));
    }

    let outcome = match status.as_u16() {
        401 | 403 => AttemptOutcome::Permanent(PublishError::Auth { details }),
        400 | 404 | 413 | 415 | 422 => AttemptOutcome::Permanent(PublishError::Malformed { details }),
        _ => AttemptOutcome::Transient(details),
    };
    Some(outcome)
}

fn transport_failure<T>(e: reqwest::Error) -> AttemptOutcome<T> {
    if e.is_timeout() {
        AttemptOutcome::Transient(format!("request timed out: {}", e))
    } else {
        AttemptOutcome::Transient(e.to_string())
    }
}

/// Remote host speaking a two-step resumable upload protocol
///
/// A JSON session request carrying the metadata returns an upload URL; the
/// file is then streamed to that URL with a single PUT.
pub struct HttpRemoteHost {
    http_client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpRemoteHost {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self, PublishError> {
        let endpoint = Url::parse(endpoint).map_err(|e| PublishError::Malformed {
            details: format!("invalid endpoint '{}': {}", endpoint, e),
        })?;
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transient {
                details: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            endpoint,
            token,
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn open_session(&self, metadata: &PublicationMetadata) -> AttemptOutcome<Url> {
        let request = self.authorized(self.http_client.post(self.endpoint.clone()).json(metadata));
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if let Some(failure) = classify_failure(status, &body) {
            return failure;
        }

        match serde_json::from_str::<SessionResponse>(&body) {
            Ok(session) => match self.endpoint.join(&session.upload_url) {
                Ok(url) => AttemptOutcome::Success(url),
                Err(e) => AttemptOutcome::Transient(format!("bad upload URL: {}", e)),
            },
            Err(e) => AttemptOutcome::Transient(format!("bad session response: {}", e)),
        }
    }

    fn reference_from(&self, upload: UploadResponse) -> Option<String> {
        if let Some(url) = upload.url {
            return Some(url);
        }
        let id = upload.id?;
        self.endpoint
            .join(&format!("/videos/{}", id))
            .ok()
            .map(|u| u.to_string())
    }
}

#[async_trait]
impl RemoteHost for HttpRemoteHost {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn publish(
        &self,
        video: &Path,
        metadata: &PublicationMetadata,
    ) -> AttemptOutcome<String> {
        let file = match tokio::fs::File::open(video).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return AttemptOutcome::Permanent(PublishError::Malformed {
                    details: format!("video file not found: {}", video.display()),
                })
            }
            Err(e) => return AttemptOutcome::Transient(format!("cannot open video: {}", e)),
        };
        let length = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => return AttemptOutcome::Transient(format!("cannot stat video: {}", e)),
        };

        let upload_url = match self.open_session(metadata).await {
            AttemptOutcome::Success(url) => url,
            AttemptOutcome::Transient(reason) => return AttemptOutcome::Transient(reason),
            AttemptOutcome::Permanent(error) => return AttemptOutcome::Permanent(error),
            AttemptOutcome::QuotaExceeded(reason) => return AttemptOutcome::QuotaExceeded(reason),
        };
        debug!("Streaming {} ({} bytes) to {}", video.display(), length, upload_url);

        let body = Body::wrap_stream(ReaderStream::new(file));
        let request = self.authorized(
            self.http_client
                .put(upload_url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .header(reqwest::header::CONTENT_LENGTH, length)
                .body(body),
        );
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if let Some(failure) = classify_failure(status, &text) {
            return failure;
        }

        // The bytes were accepted; a retry could publish a duplicate
        let reference = serde_json::from_str::<UploadResponse>(&text)
            .ok()
            .and_then(|upload| self.reference_from(upload));
        match reference {
            Some(url) => {
                info!("Published \"{}\" as {}", metadata.title, url);
                AttemptOutcome::Success(url)
            }
            None => AttemptOutcome::Permanent(PublishError::Malformed {
                details: format!("upload accepted without a reference: {}", text.trim()),
            }),
        }
    }
}
