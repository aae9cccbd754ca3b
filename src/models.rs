use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const ROLE_SIGNER: &str = "signer";
pub const ROLE_WITNESS: &str = "witness";
pub const ROLE_APPROVER: &str = "approver";

pub const DOCUMENT_DRAFT: &str = "draft";
pub const DOCUMENT_SENT: &str = "sent";
pub const DOCUMENT_PARTIALLY_SIGNED: &str = "partially_signed";
pub const DOCUMENT_COMPLETED: &str = "completed";
pub const DOCUMENT_EXPIRED: &str = "expired";
pub const DOCUMENT_CANCELLED: &str = "cancelled";

pub const SIGNING_SEQUENTIAL: &str = "sequential";
pub const SIGNING_PARALLEL: &str = "parallel";

pub const CLOSURE_AUTOMATIC: &str = "automatic";
pub const CLOSURE_MANUAL: &str = "manual";

pub const SIGNER_PENDING: &str = "pending";
pub const SIGNER_NOTIFIED: &str = "notified";
pub const SIGNER_VIEWED: &str = "viewed";
pub const SIGNER_VERIFIED: &str = "verified";
pub const SIGNER_SIGNED: &str = "signed";

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub status: String,
    pub signing_mode: String,
    pub closure_mode: String,
    pub reminder_interval_hours: Option<i32>,
    pub signing_language: String,
    pub original_hash: String,
    pub final_hash: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub status: String,
    pub signing_mode: String,
    pub closure_mode: String,
    pub reminder_interval_hours: Option<i32>,
    pub signing_language: String,
    pub original_hash: String,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = signers)]
#[diesel(belongs_to(Document))]
pub struct Signer {
    pub id: Uuid,
    pub document_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub role: String,
    pub auth_method: String,
    pub request_cpf: bool,
    pub request_phone: bool,
    pub request_email: bool,
    pub position: i32,
    pub status: String,
    pub verification_code: Option<String>,
    pub verification_expires_at: Option<NaiveDateTime>,
    pub verification_attempts: i32,
    pub verified_at: Option<NaiveDateTime>,
    pub viewed_at: Option<NaiveDateTime>,
    pub notified_at: Option<NaiveDateTime>,
    pub signed_at: Option<NaiveDateTime>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub signature_data: Option<String>,
    pub reminder_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = signers)]
pub struct NewSigner {
    pub id: Uuid,
    pub document_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub cpf: Option<String>,
    pub role: String,
    pub auth_method: String,
    pub request_cpf: bool,
    pub request_phone: bool,
    pub request_email: bool,
    pub position: i32,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = webhook_configs)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub events: serde_json::Value,
    pub secret: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_configs)]
pub struct NewWebhookConfig {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub events: serde_json::Value,
    pub secret: String,
    pub active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = webhook_delivery_logs)]
#[diesel(belongs_to(WebhookConfig))]
pub struct WebhookDeliveryLog {
    pub id: Uuid,
    pub webhook_config_id: Uuid,
    pub event: String,
    pub payload: serde_json::Value,
    pub delivery_id: Uuid,
    pub status_code: Option<i32>,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub attempt_number: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_delivery_logs)]
pub struct NewWebhookDeliveryLog {
    pub id: Uuid,
    pub webhook_config_id: Uuid,
    pub event: String,
    pub payload: serde_json::Value,
    pub delivery_id: Uuid,
    pub status_code: Option<i32>,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub attempt_number: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tenant_certificates)]
pub struct TenantCertificate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject: String,
    pub issuer: String,
    pub expires_at: NaiveDateTime,
    pub credential: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tenant_certificates)]
pub struct NewTenantCertificate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject: String,
    pub issuer: String,
    pub expires_at: NaiveDateTime,
    pub credential: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
