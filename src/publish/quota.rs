use crate::clock::Clock;
use crate::config::PublisherConfig;
use crate::error::PublishError;
use crate::identity::resolve_timezone;
use crate::persist::{read_json, write_json_atomic, ReadError};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerState {
    period_start: DateTime<Utc>,
    consumed: u32,
    /// The remote host reported the quota spent before our own count did
    exhausted: bool,
}

/// Units charged by one successful `try_reserve`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    units: u32,
    period_start: DateTime<Utc>,
}

impl Reservation {
    pub fn units(&self) -> u32 {
        self.units
    }
}

/// Daily quota bookkeeping for the remote host
///
/// Counts live behind a synchronous mutex that is never held across an
/// `.await`. Changes are written to disk one at a time under a separate async
/// lock, from a snapshot taken after the count was updated. The period rolls
/// over at `reset_hour` local time in the reset timezone.
pub struct QuotaLedger {
    budget: u32,
    timezone: Tz,
    reset_hour: u32,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
    writer: tokio::sync::Mutex<()>,
}

impl QuotaLedger {
    pub fn new(budget: u32, timezone: Tz, reset_hour: u32, clock: Arc<dyn Clock>) -> Self {
        let period_start = period_start(clock.now(), timezone, reset_hour);
        Self {
            budget,
            timezone,
            reset_hour,
            clock,
            path: None,
            state: Mutex::new(LedgerState {
                period_start,
                consumed: 0,
                exhausted: false,
            }),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Ledger persisted at `path`, resuming the stored count within the same period
    pub fn open(
        path: &Path,
        config: &PublisherConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PublishError> {
        let mut ledger = Self::new(
            config.daily_budget_units,
            resolve_timezone(&config.reset_timezone),
            config.reset_hour,
            clock,
        );
        ledger.path = Some(path.to_path_buf());

        match read_json::<LedgerState>(path) {
            Ok(Some(stored)) => {
                let mut state = ledger.state.lock();
                if stored.period_start == state.period_start {
                    *state = stored;
                    info!(
                        "Quota ledger resumed: {}/{} units consumed this period",
                        state.consumed, ledger.budget
                    );
                } else {
                    debug!("Stored quota ledger belongs to an earlier period, starting fresh");
                }
            }
            Ok(None) => {}
            Err(ReadError::Io(e)) => return Err(PublishError::Persist(e)),
            Err(ReadError::Json(e)) => {
                warn!("Quota ledger {} unreadable ({}), starting fresh", path.display(), e);
            }
        }
        Ok(ledger)
    }

    fn roll_over(&self, state: &mut LedgerState) {
        let current = period_start(self.clock.now(), self.timezone, self.reset_hour);
        if current != state.period_start {
            info!(
                "Quota period rolled over ({} units were consumed)",
                state.consumed
            );
            *state = LedgerState {
                period_start: current,
                consumed: 0,
                exhausted: false,
            };
        }
    }

    /// Apply `change` to the current period and write the result to disk
    ///
    /// A failed write puts the count back as it was before `change`.
    async fn update<R>(
        &self,
        change: impl FnOnce(&mut LedgerState) -> Result<R, PublishError>,
    ) -> Result<R, PublishError> {
        let _writer = self.writer.lock().await;

        let (outcome, previous, snapshot) = {
            let mut state = self.state.lock();
            self.roll_over(&mut state);
            let previous = state.clone();
            let outcome = change(&mut *state)?;
            (outcome, previous, state.clone())
        };

        if snapshot == previous {
            return Ok(outcome);
        }
        if let Some(path) = &self.path {
            if let Err(e) = write_json_atomic(path, &snapshot).await {
                *self.state.lock() = previous;
                return Err(PublishError::Persist(e));
            }
        }
        Ok(outcome)
    }

    /// Charge `units` if the remaining budget covers them
    pub async fn try_reserve(&self, units: u32) -> Result<Reservation, PublishError> {
        let budget = self.budget;
        self.update(|state| {
            if state.exhausted || state.consumed + units > budget {
                return Err(PublishError::QuotaExhausted {
                    consumed: state.consumed,
                    budget,
                });
            }
            state.consumed += units;
            debug!("Reserved {} quota units ({}/{})", units, state.consumed, budget);
            Ok(Reservation {
                units,
                period_start: state.period_start,
            })
        })
        .await
    }

    /// Give back a reservation that was never spent on a transfer
    ///
    /// Reservations from an earlier period are dropped; that budget is gone.
    pub async fn refund(&self, reservation: Reservation) -> Result<(), PublishError> {
        let budget = self.budget;
        self.update(|state| {
            if state.period_start == reservation.period_start {
                state.consumed = state.consumed.saturating_sub(reservation.units);
                debug!(
                    "Refunded {} quota units ({}/{})",
                    reservation.units, state.consumed, budget
                );
            }
            Ok(())
        })
        .await
    }

    /// Close the budget for the rest of the period
    pub async fn mark_exhausted(&self) -> Result<(), PublishError> {
        let budget = self.budget;
        self.update(|state| {
            if !state.exhausted {
                warn!(
                    "Remote host reports quota exhausted at {}/{} local units",
                    state.consumed, budget
                );
            }
            state.exhausted = true;
            Ok(())
        })
        .await
    }

    pub fn remaining(&self) -> u32 {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        if state.exhausted {
            0
        } else {
            self.budget.saturating_sub(state.consumed)
        }
    }

    pub fn consumed(&self) -> u32 {
        let mut state = self.state.lock();
        self.roll_over(&mut state);
        state.consumed
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Instant of the next quota reset
    pub fn next_reset(&self) -> DateTime<Utc> {
        let start = period_start(self.clock.now(), self.timezone, self.reset_hour);
        period_start(start + Duration::hours(36), self.timezone, self.reset_hour)
    }
}

/// Start of the quota period containing `now`
fn period_start(now: DateTime<Utc>, tz: Tz, reset_hour: u32) -> DateTime<Utc> {
    let reset_time = NaiveTime::from_hms_opt(reset_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let local_date = now.with_timezone(&tz).date_naive();

    let boundary_on = |date: NaiveDate| {
        let naive = date.and_time(reset_time);
        tz.from_local_datetime(&naive)
            .earliest()
            // Reset hour falls in a DST gap: take the hour after
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    };

    let today = boundary_on(local_date);
    if today <= now {
        today
    } else {
        boundary_on(local_date.pred_opt().unwrap_or(local_date))
    }
}
