use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod reminders;
pub mod webhook;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

/// Drains the durable job queue. Multiple worker processes can run against
/// the same database; `reserve_job` hands each job to exactly one of them.
pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!("delivery worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claims and runs one job. Returns true when a job was processed so the
    /// caller can poll again immediately instead of sleeping.
    async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let job = {
            let mut conn = match self.state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    error!(error = %err, "worker could not reach the database");
                    return Ok(false);
                }
            };
            reserve_job(&mut conn, &job_types)?
        };

        let Some(job) = job else {
            return Ok(false);
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            self.settle(job.id, JobExecution::Failed {
                error: "no handler registered".into(),
            })?;
            return Ok(true);
        };

        let job_id = job.id;
        let job_type = job.job_type.clone();
        let outcome = handler.handle(self.state.clone(), job).await;

        match &outcome {
            JobExecution::Success => {
                info!(job_id = %job_id, job_type = %job_type, "job finished");
            }
            JobExecution::Retry { delay, error } => {
                warn!(job_id = %job_id, job_type = %job_type, ?delay, %error, "job will retry");
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job_id, job_type = %job_type, %error, "job failed permanently");
            }
        }
        self.settle(job_id, outcome)?;
        Ok(true)
    }

    fn settle(&self, job_id: uuid::Uuid, outcome: JobExecution) -> Result<(), JobQueueError> {
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                // The job stays in `processing`; an operator has to requeue
                // it. Better than losing the outcome silently.
                error!(job_id = %job_id, error = %err, "could not settle job outcome");
                return Ok(());
            }
        };
        match outcome {
            JobExecution::Success => mark_job_succeeded(&mut conn, job_id),
            JobExecution::Retry { delay, error } => {
                retry_job_after(&mut conn, job_id, delay, &error)
            }
            JobExecution::Failed { error } => mark_job_failed(&mut conn, job_id, &error),
        }
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(webhook::DeliverWebhookJob::new()),
        Arc::new(reminders::SendReminderJob::new()),
    ]
}
