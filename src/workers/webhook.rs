//! Webhook delivery engine.
//!
//! Each enqueued delivery job carries the event, its payload snapshot and a
//! delivery id. Every attempt POSTs the HMAC-signed body to the endpoint,
//! appends one WebhookDeliveryLog row, and then either finishes, schedules
//! a backed-off retry, or gives up. Delivery is at-least-once; consumers
//! dedupe on `deliveryId`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::warn;
use uuid::Uuid;

use crate::{
    models::{NewWebhookDeliveryLog, WebhookConfig},
    schema::{webhook_configs, webhook_delivery_logs},
    state::AppState,
};

use super::{JobExecution, JobHandler};

pub const SIGNATURE_HEADER: &str = "x-signflow-signature";

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct DeliveryPayload {
    webhook_config_id: Uuid,
    event: String,
    data: serde_json::Value,
    delivery_id: Uuid,
}

/// Hex HMAC-SHA256 over the request body, keyed with the endpoint secret.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
    Success,
    Retry,
    PermanentFailure,
}

/// 2xx succeeds; 429 and 5xx (and no response at all) are retryable; any
/// other 4xx means the endpoint understood us and said no.
pub fn classify_response(status_code: Option<u16>) -> DeliveryVerdict {
    match status_code {
        Some(code) if (200..300).contains(&code) => DeliveryVerdict::Success,
        Some(429) => DeliveryVerdict::Retry,
        Some(code) if (400..500).contains(&code) => DeliveryVerdict::PermanentFailure,
        _ => DeliveryVerdict::Retry,
    }
}

/// Exponential backoff: base, 2x base, 4x base, ... capped at an hour.
pub fn backoff_delay(base_seconds: u64, attempt: i32) -> Duration {
    let exponent = attempt.max(1) as u32 - 1;
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let seconds = base_seconds.saturating_mul(factor);
    Duration::from_secs(seconds).min(MAX_BACKOFF)
}

pub struct DeliverWebhookJob;

impl DeliverWebhookJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeliverWebhookJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for DeliverWebhookJob {
    fn job_type(&self) -> &'static str {
        crate::jobs::JOB_DELIVER_WEBHOOK
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: DeliveryPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid delivery payload: {err}"),
                }
            }
        };

        let config: WebhookConfig = {
            let mut conn = match state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    return JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: err.to_string(),
                    }
                }
            };
            match webhook_configs::table
                .find(payload.webhook_config_id)
                .first(&mut conn)
                .optional()
            {
                Ok(Some(config)) => config,
                Ok(None) => {
                    // Endpoint was deleted after the event fired.
                    return JobExecution::Failed {
                        error: "webhook config no longer exists".into(),
                    };
                }
                Err(err) => {
                    return JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: err.to_string(),
                    }
                }
            }
        };

        let body = json!({
            "event": payload.event,
            "data": payload.data,
            "timestamp": Utc::now().to_rfc3339(),
            "deliveryId": payload.delivery_id,
        });
        let body_bytes = match serde_json::to_vec(&body) {
            Ok(bytes) => bytes,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("unserializable webhook body: {err}"),
                }
            }
        };
        let signature = sign_payload(&config.secret, &body_bytes);

        let started = Instant::now();
        let response = state
            .http
            .post(&config.url)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body_bytes)
            .timeout(Duration::from_secs(state.config.webhook_timeout_seconds))
            .send()
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (status_code, error_text) = match &response {
            Ok(resp) => (Some(resp.status().as_u16()), None),
            Err(err) => (None, Some(err.to_string())),
        };
        let verdict = classify_response(status_code);

        let attempt_number = job.attempts;
        let log_row = NewWebhookDeliveryLog {
            id: Uuid::new_v4(),
            webhook_config_id: config.id,
            event: payload.event.clone(),
            payload: body,
            delivery_id: payload.delivery_id,
            status_code: status_code.map(i32::from),
            duration_ms,
            success: verdict == DeliveryVerdict::Success,
            error: error_text.clone(),
            attempt_number,
        };

        if let Ok(mut conn) = state.db() {
            if let Err(err) = diesel::insert_into(webhook_delivery_logs::table)
                .values(&log_row)
                .execute(&mut conn)
            {
                warn!(delivery_id = %payload.delivery_id, error = %err, "failed to record delivery attempt");
            }
        } else {
            warn!(delivery_id = %payload.delivery_id, "no connection to record delivery attempt");
        }

        match verdict {
            DeliveryVerdict::Success => JobExecution::Success,
            DeliveryVerdict::PermanentFailure => JobExecution::Failed {
                error: format!(
                    "endpoint rejected delivery with status {}",
                    status_code.unwrap_or(0)
                ),
            },
            DeliveryVerdict::Retry => {
                let error = error_text.unwrap_or_else(|| {
                    format!("endpoint answered status {}", status_code.unwrap_or(0))
                });
                if attempt_number >= state.config.webhook_max_attempts {
                    JobExecution::Failed {
                        error: format!("delivery attempts exhausted: {error}"),
                    }
                } else {
                    JobExecution::Retry {
                        delay: backoff_delay(
                            state.config.webhook_base_backoff_seconds,
                            attempt_number,
                        ),
                        error,
                    }
                }
            }
        }
    }
}
