use crate::config::{env_or, ConfigError};
use crate::database::error::DatabaseError;
use crate::payments::state::PaymentStatus;
use crate::services::reconciliation::{ReconciliationEngine, ReconciliationError};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the worker wakes up to look for stale payments.
    pub poll_interval: Duration,
    /// Payments younger than this are left to the webhook.
    pub grace_period: Duration,
    pub batch_size: i64,
    /// Gateway verifications in flight at once.
    pub concurrency: usize,
    /// Delay before the single re-check that follows each webhook.
    pub follow_up_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(300),
            batch_size: 50,
            concurrency: 4,
            follow_up_delay: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: Duration::from_secs(env_or(
                "VERIFY_POLL_INTERVAL_SECONDS",
                defaults.poll_interval.as_secs(),
            )?),
            grace_period: Duration::from_secs(env_or(
                "VERIFY_GRACE_PERIOD_SECONDS",
                defaults.grace_period.as_secs(),
            )?),
            batch_size: env_or("VERIFY_BATCH_SIZE", defaults.batch_size)?,
            concurrency: env_or("VERIFY_CONCURRENCY", defaults.concurrency)?,
            follow_up_delay: Duration::from_secs(env_or(
                "VERIFY_FOLLOW_UP_DELAY_SECONDS",
                defaults.follow_up_delay.as_secs(),
            )?),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "VERIFY_POLL_INTERVAL_SECONDS".to_string(),
            ));
        }
        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue("VERIFY_BATCH_SIZE".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue("VERIFY_CONCURRENCY".to_string()));
        }
        Ok(())
    }
}

/// Tally of one polling cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub examined: usize,
    /// Payments that reached a terminal state during this cycle.
    pub settled: usize,
    pub still_pending: usize,
    pub errors: usize,
}

enum PollResult {
    Settled,
    Pending,
    Error,
}

/// Fallback for lost webhooks: periodically re-verifies payments that have
/// sat in `pending` longer than the grace period.
#[derive(Clone)]
pub struct VerificationScheduler {
    engine: Arc<ReconciliationEngine>,
    config: SchedulerConfig,
}

impl VerificationScheduler {
    pub fn new(engine: Arc<ReconciliationEngine>, config: SchedulerConfig) -> Self {
        Self { engine, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            grace_period_secs = self.config.grace_period.as_secs(),
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "payment verification scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment verification scheduler stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.examined > 0 => info!(
                            examined = report.examined,
                            settled = report.settled,
                            still_pending = report.still_pending,
                            errors = report.errors,
                            "verification cycle complete"
                        ),
                        Ok(_) => debug!("no stale pending payments"),
                        Err(e) => warn!(error = %e, "verification cycle failed"),
                    }
                }
            }
        }

        info!("payment verification scheduler stopped");
    }

    /// One pass over the stale pending payments. A failure on one payment is
    /// counted and logged, never propagated.
    pub async fn run_cycle(&self) -> Result<CycleReport, DatabaseError> {
        let grace = chrono::Duration::from_std(self.config.grace_period)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = chrono::Utc::now() - grace;
        let stale = self
            .engine
            .store()
            .find_stale_pending(cutoff, self.config.batch_size)
            .await?;

        let examined = stale.len();
        let results: Vec<PollResult> = stream::iter(stale)
            .map(|payment| {
                let engine = self.engine.clone();
                async move { poll_one(&engine, &payment.tx_ref).await }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = CycleReport {
            examined,
            ..CycleReport::default()
        };
        for result in results {
            match result {
                PollResult::Settled => report.settled += 1,
                PollResult::Pending => report.still_pending += 1,
                PollResult::Error => report.errors += 1,
            }
        }
        Ok(report)
    }

    /// Re-check one payment after `follow_up_delay`. Used after each webhook
    /// in case the webhook itself was lost or lied.
    pub fn schedule_follow_up(&self, tx_ref: String) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let delay = self.config.follow_up_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.poll(&tx_ref).await {
                Ok(Some(record)) => debug!(
                    tx_ref = %tx_ref,
                    status = %record.payment.status,
                    "follow-up verification applied"
                ),
                Ok(None) => debug!(tx_ref = %tx_ref, "follow-up verification: no change"),
                Err(e) => warn!(tx_ref = %tx_ref, error = %e, "follow-up verification failed"),
            }
        })
    }
}

async fn poll_one(engine: &ReconciliationEngine, tx_ref: &str) -> PollResult {
    match engine.poll(tx_ref).await {
        Ok(Some(record)) if record.payment.status != PaymentStatus::Pending => {
            PollResult::Settled
        }
        Ok(_) => PollResult::Pending,
        Err(ReconciliationError::Gateway(e)) => {
            debug!(tx_ref = %tx_ref, error = %e, "gateway unavailable; will retry next cycle");
            PollResult::Error
        }
        Err(e) => {
            warn!(tx_ref = %tx_ref, error = %e, "scheduled verification failed");
            PollResult::Error
        }
    }
}
