use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::CoreResult,
    jobs::{enqueue_job, JOB_SEND_REMINDER, STATUS_PROCESSING, STATUS_QUEUED},
    models::{Document, Signer, DOCUMENT_PARTIALLY_SIGNED, DOCUMENT_SENT},
    schema::{documents, jobs, signers},
    state::AppState,
    workflow::reminder_due,
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct ReminderPayload {
    document_id: Uuid,
}

/// Scans active documents with a reminder interval and queues one reminder
/// job per document that has overdue signers. Skips documents that already
/// have a reminder in flight.
pub fn enqueue_due_reminders(conn: &mut PgConnection) -> CoreResult<usize> {
    let now = Utc::now().naive_utc();

    let candidates: Vec<Document> = documents::table
        .filter(documents::status.eq_any([DOCUMENT_SENT, DOCUMENT_PARTIALLY_SIGNED]))
        .filter(documents::reminder_interval_hours.is_not_null())
        .load(conn)?;

    let pending: Vec<serde_json::Value> = jobs::table
        .filter(jobs::job_type.eq(JOB_SEND_REMINDER))
        .filter(jobs::status.eq_any([STATUS_QUEUED, STATUS_PROCESSING]))
        .select(jobs::payload)
        .load(conn)?;
    let in_flight: Vec<Uuid> = pending
        .iter()
        .filter_map(|payload| serde_json::from_value::<ReminderPayload>(payload.clone()).ok())
        .map(|payload| payload.document_id)
        .collect();

    let mut enqueued = 0;
    for document in candidates {
        let Some(interval) = document.reminder_interval_hours else {
            continue;
        };
        if in_flight.contains(&document.id) {
            continue;
        }

        let rows: Vec<Signer> = signers::table
            .filter(signers::document_id.eq(document.id))
            .load(conn)?;
        if rows.iter().any(|s| reminder_due(s, interval, now)) {
            enqueue_job(
                conn,
                JOB_SEND_REMINDER,
                json!({ "document_id": document.id }),
                None,
            )?;
            enqueued += 1;
        }
    }

    Ok(enqueued)
}

pub struct SendReminderJob;

impl SendReminderJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendReminderJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendReminderJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_REMINDER
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: ReminderPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid reminder payload: {err}"),
                }
            }
        };

        let now = Utc::now().naive_utc();
        let loaded = {
            let mut conn = match state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    return JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: err.to_string(),
                    }
                }
            };

            let document: Option<Document> = match documents::table
                .find(payload.document_id)
                .first(&mut conn)
                .optional()
            {
                Ok(document) => document,
                Err(err) => {
                    return JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: err.to_string(),
                    }
                }
            };

            match document {
                Some(document)
                    if matches!(
                        document.status.as_str(),
                        DOCUMENT_SENT | DOCUMENT_PARTIALLY_SIGNED
                    ) =>
                {
                    let rows: Vec<Signer> = match signers::table
                        .filter(signers::document_id.eq(document.id))
                        .load(&mut conn)
                    {
                        Ok(rows) => rows,
                        Err(err) => {
                            return JobExecution::Retry {
                                delay: Duration::from_secs(30),
                                error: err.to_string(),
                            }
                        }
                    };
                    Some((document, rows))
                }
                _ => None,
            }
        };

        let Some((document, rows)) = loaded else {
            // Document finished or disappeared between scan and send.
            return JobExecution::Success;
        };

        let interval = document.reminder_interval_hours.unwrap_or(0);
        let mut reminded = 0;
        for signer in rows.iter().filter(|s| reminder_due(s, interval, now)) {
            if let Err(err) = state.notifier.send_signing_request(signer, &document).await {
                warn!(signer_id = %signer.id, error = %err, "reminder delivery failed");
                continue;
            }
            match state.db() {
                Ok(mut conn) => {
                    // An unrecorded nudge means the signer is reminded again
                    // next sweep.
                    if let Err(err) = diesel::update(signers::table.find(signer.id))
                        .set((
                            signers::reminder_count.eq(signer.reminder_count + 1),
                            signers::updated_at.eq(now),
                        ))
                        .execute(&mut conn)
                    {
                        warn!(signer_id = %signer.id, error = %err, "failed to record reminder");
                    }
                }
                Err(err) => {
                    warn!(signer_id = %signer.id, error = %err, "no connection to record reminder");
                }
            }
            reminded += 1;
        }

        info!(document_id = %document.id, reminded, "reminders sent");
        JobExecution::Success
    }
}
