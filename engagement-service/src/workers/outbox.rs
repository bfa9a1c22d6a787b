use crate::config::OutboxConfig;
use crate::services::metrics::OUTBOX_JOBS_TOTAL;
use crate::services::repository::Repository;
use crate::services::workflow::WorkflowOrchestrator;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Polls the outbox table and runs due jobs.
///
/// Delivery is at-least-once: a job is leased while it runs and handed out
/// again if the lease expires before it is completed. A job that returns an
/// error is failed and not retried.
#[derive(Clone)]
pub struct OutboxWorker {
    config: OutboxConfig,
    repo: Arc<dyn Repository>,
    workflow: WorkflowOrchestrator,
}

impl OutboxWorker {
    pub fn new(
        config: OutboxConfig,
        repo: Arc<dyn Repository>,
        workflow: WorkflowOrchestrator,
    ) -> Self {
        Self {
            config,
            repo,
            workflow,
        }
    }

    /// Runs until `shutdown` is cancelled. A job already in flight finishes
    /// first.
    pub async fn start(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("Outbox worker disabled by configuration");
            return;
        }

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting outbox worker"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Outbox worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due_jobs().await {
                        tracing::error!(error = %e, "Outbox poll failed");
                    }
                }
            }
        }
    }

    /// Claims and runs one batch of due jobs. Returns how many were claimed.
    pub async fn run_due_jobs(&self) -> Result<usize, AppError> {
        let lease = chrono::Duration::from_std(self.config.lease)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid outbox lease: {}", e)))?;

        let jobs = self
            .repo
            .claim_due_jobs(
                Utc::now(),
                lease,
                self.config.batch_size,
                self.config.max_attempts,
            )
            .await?;

        for job in &jobs {
            let name = job.kind().name();
            tracing::info!(job_id = %job.job_id, job = name, attempt = job.attempts, "Running outbox job");

            // A job whose outcome cannot be recorded keeps its lease; the
            // rest of the batch still runs.
            match self.workflow.run_job(job).await {
                Ok(()) => {
                    OUTBOX_JOBS_TOTAL.with_label_values(&[name, "completed"]).inc();
                    if let Err(e) = self.repo.complete_job(job.job_id, Utc::now()).await {
                        tracing::error!(job_id = %job.job_id, job = name, error = %e, "Failed to mark outbox job completed");
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, job = name, error = %e, "Outbox job failed");
                    OUTBOX_JOBS_TOTAL.with_label_values(&[name, "failed"]).inc();
                    if let Err(e) = self
                        .repo
                        .fail_job(job.job_id, &e.to_string(), Utc::now())
                        .await
                    {
                        tracing::error!(job_id = %job.job_id, job = name, error = %e, "Failed to mark outbox job failed");
                    }
                }
            }
        }

        Ok(jobs.len())
    }
}
