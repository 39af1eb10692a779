use super::queue::PublicationQueue;
use super::quota::QuotaLedger;
use super::remote::{HttpRemoteHost, RemoteHost, UnconfiguredHost};
use super::retry::{AttemptOutcome, RetryPolicy, RetryResult};
use super::task::{Enqueued, PublicationTask, TaskState};
use crate::clock::SystemClock;
use crate::config::PublisherConfig;
use crate::error::{ErrorClass, MatchcastError, PublishError};
use crate::events::{EventBus, PipelineEvent};
use crate::store::MatchStore;
use config::ConfigError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one pass over the pending tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Left pending for a later quota period (or after shutdown)
    pub deferred: usize,
    /// Dry run only: tasks the budget would have covered
    pub would_publish: usize,
    pub quota_exhausted: bool,
    /// Credentials were rejected; the pass stopped
    pub auth_rejected: bool,
}

/// Drains the publication queue against the remote host within the daily quota
pub struct Publisher {
    queue: Arc<PublicationQueue>,
    ledger: Arc<QuotaLedger>,
    host: Arc<dyn RemoteHost>,
    store: Arc<dyn MatchStore>,
    retry: RetryPolicy,
    unit_cost: u32,
    drain_interval: Duration,
    event_bus: Option<EventBus>,
    dry_run: bool,
    wake: Notify,
    drain_lock: Mutex<()>,
}

impl Publisher {
    pub fn new(
        queue: Arc<PublicationQueue>,
        ledger: Arc<QuotaLedger>,
        host: Arc<dyn RemoteHost>,
        store: Arc<dyn MatchStore>,
        config: &PublisherConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            host,
            store,
            retry: RetryPolicy::from_config(config),
            unit_cost: config.unit_cost,
            drain_interval: Duration::from_secs(config.drain_interval_seconds),
            event_bus: None,
            dry_run: false,
            wake: Notify::new(),
            drain_lock: Mutex::new(()),
        }
    }

    /// Build the HTTP publisher with its durable queue and ledger
    ///
    /// A dry run reads the queue without ever writing it back, and works
    /// without an endpoint or credentials.
    pub async fn open(
        config: &PublisherConfig,
        store: Arc<dyn MatchStore>,
        dry_run: bool,
    ) -> Result<Self, MatchcastError> {
        let host: Arc<dyn RemoteHost> = match config.endpoint.as_deref() {
            Some(endpoint) => {
                let token = config.token()?;
                if token.is_none() {
                    warn!("No publisher credentials configured, uploads are unauthenticated");
                }
                Arc::new(HttpRemoteHost::new(
                    endpoint,
                    token,
                    Duration::from_secs(config.upload_timeout_seconds),
                )?)
            }
            None if dry_run => {
                info!("No publisher endpoint configured; a dry run does not need one");
                Arc::new(UnconfiguredHost)
            }
            None => {
                return Err(ConfigError::Message(
                    "publisher.endpoint is required to publish".to_string(),
                )
                .into())
            }
        };
        let queue_path = Path::new(&config.queue_path);
        let queue = if dry_run {
            PublicationQueue::load_detached(queue_path).await?
        } else {
            PublicationQueue::open(queue_path).await?
        };
        let ledger = QuotaLedger::open(
            Path::new(&config.ledger_path),
            config,
            Arc::new(SystemClock),
        )?;

        Ok(Self::new(
            Arc::new(queue),
            Arc::new(ledger),
            host,
            store,
            config,
        )
        .dry_run(dry_run))
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run every step except the transfer itself
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn queue(&self) -> &Arc<PublicationQueue> {
        &self.queue
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(event).await {
                error!("Failed to publish publication event: {}", e);
            }
        }
    }

    /// Queue a task and wake the drain loop
    pub async fn enqueue(&self, task: PublicationTask) -> Result<Enqueued, PublishError> {
        let enqueued = self.queue.enqueue(task).await?;
        if enqueued.is_created() {
            self.emit(PipelineEvent::PublicationQueued {
                key: enqueued.key().to_string(),
            })
            .await;
            self.wake.notify_one();
        }
        Ok(enqueued)
    }

    /// Publish pending tasks in FIFO order until done, out of quota, or cancelled
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport, PublishError> {
        let _serial = self.drain_lock.lock().await;
        let pending = self.queue.pending().await;
        let mut report = DrainReport::default();

        if pending.is_empty() {
            debug!("Publication queue empty");
            return Ok(report);
        }

        if self.dry_run {
            return Ok(self.dry_run_report(&pending).await);
        }

        info!(
            "Draining {} pending publications ({} quota units left)",
            pending.len(),
            self.ledger.remaining()
        );

        for (index, task) in pending.iter().enumerate() {
            let left = pending.len() - index;

            if cancel.is_cancelled() {
                report.deferred += left;
                break;
            }

            if self.already_published(task).await? {
                report.skipped += 1;
                continue;
            }

            let reservation = match self.ledger.try_reserve(self.unit_cost).await {
                Ok(reservation) => reservation,
                Err(e @ PublishError::QuotaExhausted { .. }) => {
                    info!("{}; {} publications wait for the next quota period", e, left);
                    report.deferred += left;
                    report.quota_exhausted = true;
                    self.emit_quota_exhausted().await;
                    break;
                }
                Err(e) => return Err(e),
            };

            let task = match self.queue.begin(&task.key).await {
                Ok(task) => task,
                Err(e) => {
                    // Nothing was transferred for this reservation
                    self.ledger.refund(reservation).await?;
                    match e {
                        PublishError::InvalidTransition { from, .. } => {
                            warn!("Task {} is {} now, not publishing it", task.key, from);
                            continue;
                        }
                        e => return Err(e),
                    }
                }
            };

            match self.transfer(&task, cancel).await {
                RetryResult::Succeeded { value: url, attempts } => {
                    self.queue
                        .complete(&task.key, TaskState::Uploaded { url: url.clone() })
                        .await?;
                    if let Some(id) = task.identity.match_id() {
                        if let Err(e) = self.store.set_remote_url(id, &url).await {
                            error!("Published match #{} but could not store its URL: {}", id, e);
                        }
                    }
                    info!("Published {} after {} attempt(s): {}", task.key, attempts, url);
                    self.emit(PipelineEvent::PublicationCompleted {
                        key: task.key.clone(),
                        url,
                    })
                    .await;
                    report.uploaded += 1;
                }
                RetryResult::Exhausted { reason, attempts } => {
                    let reason = format!("gave up after {} attempts: {}", attempts, reason);
                    self.fail(&task, reason).await?;
                    report.failed += 1;
                }
                RetryResult::Rejected { error, .. } => {
                    let auth = error.class() == ErrorClass::PermanentAuth;
                    self.fail(&task, error.to_string()).await?;
                    report.failed += 1;
                    if auth {
                        error!("Remote host rejected credentials, stopping publication");
                        report.auth_rejected = true;
                        report.deferred += left - 1;
                        break;
                    }
                }
                RetryResult::Deferred { reason, .. } => {
                    self.queue.release(&task.key).await?;
                    report.deferred += left;
                    if cancel.is_cancelled() {
                        info!("Publication of {} deferred: {}", task.key, reason);
                    } else {
                        warn!("Quota exhausted while publishing {}: {}", task.key, reason);
                        self.ledger.mark_exhausted().await?;
                        report.quota_exhausted = true;
                        self.emit_quota_exhausted().await;
                    }
                    break;
                }
            }
        }

        info!(
            "Drain finished: {} uploaded, {} failed, {} skipped, {} deferred",
            report.uploaded, report.failed, report.skipped, report.deferred
        );
        Ok(report)
    }

    /// Walk the pending tasks the way a real drain would, changing nothing
    async fn dry_run_report(&self, pending: &[PublicationTask]) -> DrainReport {
        let mut affordable = self.ledger.remaining() / self.unit_cost.max(1);
        let mut report = DrainReport::default();

        for task in pending {
            if let Some(url) = self.published_url(task).await {
                info!("[dry run] would skip {}, already published as {}", task.key, url);
                report.skipped += 1;
            } else if affordable > 0 {
                info!(
                    "[dry run] would publish {} as \"{}\"",
                    task.video_path.display(),
                    task.metadata.title
                );
                affordable -= 1;
                report.would_publish += 1;
            } else {
                info!("[dry run] quota would defer {}", task.key);
                report.deferred += 1;
                report.quota_exhausted = true;
            }
        }
        report
    }

    /// Remote URL already stored for the task's match, unless the task is forced
    async fn published_url(&self, task: &PublicationTask) -> Option<String> {
        if task.forced {
            return None;
        }
        let id = task.identity.match_id()?;

        match self.store.get(id).await {
            Ok(record) => record.remote_url,
            Err(e) => {
                warn!("Could not check match #{} before publishing: {}", id, e);
                None
            }
        }
    }

    async fn already_published(&self, task: &PublicationTask) -> Result<bool, PublishError> {
        let Some(url) = self.published_url(task).await else {
            return Ok(false);
        };
        info!("{} already published as {}, skipping", task.key, url);
        self.queue
            .skip(&task.key, &format!("already published as {}", url))
            .await?;
        Ok(true)
    }

    async fn transfer(
        &self,
        task: &PublicationTask,
        cancel: &CancellationToken,
    ) -> RetryResult<String> {
        let label = format!("Publishing {}", task.key);
        self.retry
            .run(&label, cancel, |number| async move {
                // The first attempt was charged before the task went in flight
                if number > 1 {
                    match self.ledger.try_reserve(self.unit_cost).await {
                        Ok(_) => {}
                        Err(e @ PublishError::QuotaExhausted { .. }) => {
                            return AttemptOutcome::QuotaExceeded(e.to_string());
                        }
                        Err(e) => return AttemptOutcome::Transient(e.to_string()),
                    }
                }
                if let Err(e) = self.queue.record_attempt(&task.key).await {
                    return AttemptOutcome::Permanent(e);
                }
                self.host.publish(&task.video_path, &task.metadata).await
            })
            .await
    }

    async fn fail(&self, task: &PublicationTask, reason: String) -> Result<(), PublishError> {
        error!("Publication of {} failed: {}", task.video_path.display(), reason);
        self.queue
            .complete(
                &task.key,
                TaskState::Failed {
                    reason: reason.clone(),
                },
            )
            .await?;
        self.emit(PipelineEvent::PublicationFailed {
            key: task.key.clone(),
            reason,
        })
        .await;
        Ok(())
    }

    async fn emit_quota_exhausted(&self) {
        self.emit(PipelineEvent::QuotaExhausted {
            consumed: self.ledger.consumed(),
            budget: self.ledger.budget(),
        })
        .await;
    }

    /// Drain periodically and whenever a task is queued, until cancelled
    ///
    /// A transfer in progress at cancellation is allowed to finish; retries
    /// stop at the next backoff.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Publisher started (drain every {:?}, host '{}')",
            self.drain_interval,
            self.host.name()
        );
        let mut ticker = tokio::time::interval(self.drain_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            match self.drain(&cancel).await {
                Ok(report) if report.quota_exhausted => {
                    info!(
                        "Quota spent; next reset at {}",
                        self.ledger.next_reset().to_rfc3339()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Publication drain failed: {}", e);
                    self.emit(PipelineEvent::SystemError {
                        component: "publisher".to_string(),
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        }
        info!("Publisher stopped");
    }
}
