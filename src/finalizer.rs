//! Final signature assembly.
//!
//! Once every required signer has signed, the tenant's certificate is used
//! to embed a cryptographic signature into the artifact. The actual
//! embedding is behind the [`CertificateSigner`] capability; this module
//! owns the certificate checks, the artifact keys and the final hash.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Document, TenantCertificate};
use crate::schema::tenant_certificates;
use crate::state::AppState;

/// Certificate-backed signing capability. Implementations wrap whatever
/// signing service or HSM the deployment uses.
#[async_trait]
pub trait CertificateSigner: Send + Sync + 'static {
    async fn sign(&self, bytes: Vec<u8>, certificate: &TenantCertificate) -> Result<Vec<u8>>;
}

pub fn original_key(document_id: Uuid) -> String {
    format!("documents/{document_id}/original")
}

pub fn signed_key(document_id: Uuid) -> String {
    format!("documents/{document_id}/signed")
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct FinalizedArtifact {
    pub hash: String,
    pub signed_key: String,
}

/// Produces the signed artifact for a document whose signatures are all in.
///
/// Fails with `CertificateMissing`/`CertificateExpired` before touching the
/// artifact; both leave the document untouched so completion can be retried
/// after the tenant fixes their certificate.
pub async fn assemble(state: &AppState, document: &Document) -> CoreResult<FinalizedArtifact> {
    let certificate: TenantCertificate = {
        let mut conn = state.db()?;
        tenant_certificates::table
            .filter(tenant_certificates::tenant_id.eq(document.tenant_id))
            .first(&mut conn)
            .optional()?
            .ok_or(CoreError::CertificateMissing)?
    };

    if certificate.expires_at < Utc::now().naive_utc() {
        return Err(CoreError::CertificateExpired);
    }

    let original = state
        .storage
        .get_object(&original_key(document.id))
        .await
        .map_err(CoreError::External)?;

    let signed = state
        .cert_signer
        .sign(original, &certificate)
        .await
        .map_err(CoreError::External)?;

    let hash = content_hash(&signed);
    let key = signed_key(document.id);
    state
        .storage
        .put_object(&key, signed, Some("application/pdf".to_string()))
        .await
        .map_err(CoreError::External)?;

    info!(document_id = %document.id, %hash, "assembled final signed artifact");
    Ok(FinalizedArtifact {
        hash,
        signed_key: key,
    })
}
