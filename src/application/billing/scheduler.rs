//! Scheduler - Background driver for billing lifecycle work.
//!
//! One worker task runs passes back to back on a fixed interval, starting
//! with an immediate pass. A pass runs its stages in a fixed order:
//!
//! 1. scheduled cancellations
//! 2. scheduled resumptions
//! 3. payment retries (when enabled)
//! 4. dunning final actions
//!
//! Every stage runs even if an earlier one failed. The whole pass is bounded
//! by `pass_timeout`; stages that would start after the deadline are
//! reported as timed out.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `interval` | 60s | Time between pass starts |
//! | `pass_timeout` | 300s | Upper bound on a single pass |
//!
//! ## Graceful Shutdown
//!
//! `stop()` signals the worker and waits for it. The signal is only observed
//! between passes, so an in-flight pass runs to completion or to its
//! deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::dunning_engine::DunningEngine;
use super::lifecycle_transitioner::LifecycleTransitioner;
use super::notification_gateway::NotificationGateway;
use super::payment_retry::PaymentRetryProcessor;
use super::report::{PassReport, Stage, StageOutcome, StageReport};
use crate::domain::billing::RetrySchedule;
use crate::domain::foundation::DomainError;
use crate::ports::{Clock, DelegationRedeemer, EmailService, SubscriptionRepository};

/// Scheduler lifecycle errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    #[error("scheduler is already running")]
    AlreadyRunning,
}

/// Timing for the background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between pass starts.
    pub interval: Duration,

    /// Upper bound on a single pass.
    pub pass_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            pass_timeout: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.pass_timeout.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "pass timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs a single pass over all stages.
pub struct ChangeProcessor {
    repository: Arc<dyn SubscriptionRepository>,
    clock: Arc<dyn Clock>,
    transitioner: LifecycleTransitioner,
    payment_retries: Option<PaymentRetryProcessor>,
    dunning: DunningEngine,
}

impl ChangeProcessor {
    pub fn new(
        repository: Arc<dyn SubscriptionRepository>,
        email: Arc<dyn EmailService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let notifications = NotificationGateway::new(email);
        Self {
            clock,
            transitioner: LifecycleTransitioner::new(repository.clone(), notifications.clone()),
            payment_retries: None,
            dunning: DunningEngine::new(repository.clone(), notifications),
            repository,
        }
    }

    /// Enables the payment retry stage.
    pub fn with_payment_retries(
        mut self,
        redeemer: Arc<dyn DelegationRedeemer>,
        schedule: RetrySchedule,
        redeem_timeout: Duration,
    ) -> Self {
        self.payment_retries = Some(PaymentRetryProcessor::new(
            self.repository.clone(),
            redeemer,
            schedule,
            redeem_timeout,
        ));
        self
    }

    pub fn dunning(&self) -> &DunningEngine {
        &self.dunning
    }

    /// Runs every stage once, within `pass_timeout`.
    ///
    /// "Now" is read from the clock once, so every stage of a pass agrees on
    /// what is due.
    pub async fn process_changes(&self, pass_timeout: Duration) -> PassReport {
        let pass_id = Uuid::new_v4();
        let now = self.clock.now();
        let deadline = Instant::now() + pass_timeout;
        let span = info_span!("scheduler_pass", %pass_id, now = %now);

        async move {
            let mut report = PassReport::new(pass_id, now);

            let outcome = run_stage(
                Stage::Cancellations,
                deadline,
                self.transitioner.process_cancellations(now),
            )
            .await;
            report.stages.push((Stage::Cancellations, outcome));

            let outcome = run_stage(
                Stage::Resumptions,
                deadline,
                self.transitioner.process_resumptions(now),
            )
            .await;
            report.stages.push((Stage::Resumptions, outcome));

            if let Some(retries) = &self.payment_retries {
                let outcome = run_stage(
                    Stage::PaymentRetries,
                    deadline,
                    retries.process_due_retries(now),
                )
                .await;
                report.stages.push((Stage::PaymentRetries, outcome));
            }

            let outcome = run_stage(
                Stage::FinalActions,
                deadline,
                self.dunning.process_final_actions(now),
            )
            .await;
            report.stages.push((Stage::FinalActions, outcome));

            log_summary(&report);
            report
        }
        .instrument(span)
        .await
    }
}

async fn run_stage(
    stage: Stage,
    deadline: Instant,
    work: impl Future<Output = Result<StageReport, DomainError>>,
) -> StageOutcome {
    let span = info_span!("stage", stage = stage.as_str());
    async move {
        if Instant::now() >= deadline {
            warn!("pass deadline reached, stage skipped");
            return StageOutcome::TimedOut;
        }
        match time::timeout_at(deadline, work).await {
            Ok(Ok(report)) => StageOutcome::Completed(report),
            Ok(Err(e)) => {
                error!(error = %e, code = %e.code, "stage failed");
                StageOutcome::Failed(e)
            }
            Err(_) => {
                warn!("pass deadline reached, stage abandoned");
                StageOutcome::TimedOut
            }
        }
    }
    .instrument(span)
    .await
}

fn log_summary(report: &PassReport) {
    let total = |f: fn(&StageReport) -> usize| -> usize {
        report
            .stages
            .iter()
            .filter_map(|(_, outcome)| outcome.report())
            .map(f)
            .sum()
    };
    let incomplete = report
        .stages
        .iter()
        .filter(|(_, outcome)| !outcome.is_completed())
        .count();

    if report.is_clean() {
        info!(
            applied = total(|r| r.applied),
            unchanged = total(|r| r.unchanged),
            deferred = total(|r| r.deferred),
            "pass complete"
        );
    } else {
        warn!(
            applied = total(|r| r.applied),
            failed_items = total(|r| r.failed),
            incomplete_stages = incomplete,
            "pass complete with failures"
        );
    }
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic driver around a [`ChangeProcessor`].
pub struct Scheduler {
    processor: Arc<ChangeProcessor>,
    config: SchedulerConfig,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(processor: ChangeProcessor, config: SchedulerConfig) -> Self {
        Self {
            processor: Arc::new(processor),
            config,
            worker: Mutex::new(None),
        }
    }

    /// Launches the background worker. Its first pass starts immediately.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.config.validate()?;

        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(
            self.processor.clone(),
            self.config,
            shutdown_rx,
        ));
        *worker = Some(Worker { shutdown, handle });

        info!(
            interval_secs = self.config.interval.as_secs(),
            pass_timeout_secs = self.config.pass_timeout.as_secs(),
            "scheduler started"
        );
        Ok(())
    }

    /// Signals shutdown and waits for the in-flight pass. Safe to call twice.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        // Only fails if the worker already exited.
        let _ = worker.shutdown.send(true);
        if let Err(e) = worker.handle.await {
            error!(error = %e, "scheduler worker ended abnormally");
        }
        info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    /// Runs one pass now, outside the background worker.
    pub async fn process_changes(&self) -> PassReport {
        self.processor
            .process_changes(self.config.pass_timeout)
            .await
    }

    pub fn processor(&self) -> &ChangeProcessor {
        &self.processor
    }
}

async fn run_worker(
    processor: Arc<ChangeProcessor>,
    config: SchedulerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                processor.process_changes(config.pass_timeout).await;
            }
        }
    }
}
