use diesel::prelude::*;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::jobs::{enqueue_job, JOB_DELIVER_WEBHOOK};
use crate::models::WebhookConfig;
use crate::schema::webhook_configs;

pub const DOCUMENT_CREATED: &str = "document.created";
pub const SIGNER_ADDED: &str = "signer.added";
pub const SIGNATURE_COMPLETED: &str = "signature.completed";
pub const DOCUMENT_COMPLETED: &str = "document.completed";
pub const DOCUMENT_EXPIRED: &str = "document.expired";

fn subscribes_to(config: &WebhookConfig, event: &str) -> bool {
    config
        .events
        .as_array()
        .map(|names| names.iter().any(|name| name.as_str() == Some(event)))
        .unwrap_or(false)
}

/// Fans an event out to every active webhook endpoint the tenant has
/// subscribed to it. One durable delivery job is enqueued per endpoint, each
/// with its own delivery id, inside the caller's transaction so the fan-out
/// commits atomically with the state change that produced the event.
pub fn emit(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    event: &str,
    data: Value,
) -> CoreResult<()> {
    let configs: Vec<WebhookConfig> = webhook_configs::table
        .filter(webhook_configs::tenant_id.eq(tenant_id))
        .filter(webhook_configs::active.eq(true))
        .load(conn)?;

    for config in configs.iter().filter(|c| subscribes_to(c, event)) {
        let delivery_id = Uuid::new_v4();
        enqueue_job(
            conn,
            JOB_DELIVER_WEBHOOK,
            json!({
                "webhook_config_id": config.id,
                "event": event,
                "data": data,
                "delivery_id": delivery_id,
            }),
            None,
        )?;
        debug!(%event, webhook_config_id = %config.id, %delivery_id, "enqueued webhook delivery");
    }

    Ok(())
}
