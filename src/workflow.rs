//! Signing workflow state machine.
//!
//! Documents move forward only: draft → sent → partially_signed →
//! completed, with expired and cancelled as terminal side exits. Every
//! transition runs inside a transaction holding a `FOR UPDATE` lock on the
//! document row, so concurrent signer actions on the same document are
//! serialized and completion is evaluated exactly once. Transitions that
//! must *commit* an expiry while still failing the caller's action return a
//! verdict from the transaction instead of an error, because an `Err` would
//! roll the expiry back.

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::authenticator::{self, AuthMethod, SubmittedProof};
use crate::config::AppConfig;
use crate::error::{CoreError, CoreResult, StateConflict};
use crate::events;
use crate::finalizer;
use crate::models::{
    Document, Signer, CLOSURE_AUTOMATIC, DOCUMENT_CANCELLED, DOCUMENT_COMPLETED, DOCUMENT_DRAFT,
    DOCUMENT_EXPIRED, DOCUMENT_PARTIALLY_SIGNED, DOCUMENT_SENT, ROLE_WITNESS, SIGNER_NOTIFIED,
    SIGNER_PENDING, SIGNER_SIGNED, SIGNER_VIEWED, SIGNING_SEQUENTIAL,
};
use crate::schema::{documents, signers};
use crate::state::AppState;

/// Capture context recorded alongside a signature.
#[derive(Debug, Clone, Default)]
pub struct SignatureSubmission {
    pub signature_data: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SignatureOutcome {
    pub document_id: Uuid,
    pub signer_id: Uuid,
    /// True when closure_mode is automatic and this signature was the last
    /// required one; the caller should follow up with [`complete_document`].
    pub completion_due: bool,
}

fn lock_document(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> Result<Document, diesel::result::Error> {
    documents::table
        .find(document_id)
        .for_update()
        .first(conn)
}

fn load_signers(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> Result<Vec<Signer>, diesel::result::Error> {
    signers::table
        .filter(signers::document_id.eq(document_id))
        .order(signers::position.asc())
        .load(conn)
}

/// Witnesses only count towards completion when the tenant requires them.
pub fn is_required_signer(signer: &Signer, require_witnesses: bool) -> bool {
    signer.role != ROLE_WITNESS || require_witnesses
}

pub fn all_required_signed(signers: &[Signer], require_witnesses: bool) -> bool {
    signers
        .iter()
        .filter(|s| is_required_signer(s, require_witnesses))
        .all(|s| s.status == SIGNER_SIGNED)
}

/// Sequential-mode gate: every signer with a lower ordinal position must
/// already have signed.
pub fn earlier_signers_pending(signers: &[Signer], position: i32) -> bool {
    signers
        .iter()
        .any(|s| s.position < position && s.status != SIGNER_SIGNED)
}

/// Expires the locked document and emits `document.expired`. Caller holds
/// the row lock.
fn expire_locked(conn: &mut PgConnection, document: &Document, now: NaiveDateTime) -> CoreResult<()> {
    diesel::update(documents::table.find(document.id))
        .set((
            documents::status.eq(DOCUMENT_EXPIRED),
            documents::updated_at.eq(now),
        ))
        .execute(conn)?;

    events::emit(
        conn,
        document.tenant_id,
        events::DOCUMENT_EXPIRED,
        json!({
            "tenant_id": document.tenant_id,
            "document_id": document.id,
            "title": document.title,
            "expired_at": now,
        }),
    )?;

    info!(document_id = %document.id, "document expired");
    Ok(())
}

/// Checks that the locked document can still accept signer actions. If its
/// deadline has passed, the expiry transition is applied here, so expiry
/// always wins against an in-flight action evaluated in the same handler.
fn ensure_active(
    conn: &mut PgConnection,
    document: &Document,
    now: NaiveDateTime,
) -> CoreResult<Result<(), StateConflict>> {
    match document.status.as_str() {
        DOCUMENT_CANCELLED => Ok(Err(StateConflict::Cancelled)),
        DOCUMENT_COMPLETED => Ok(Err(StateConflict::AlreadyCompleted)),
        DOCUMENT_EXPIRED => Ok(Err(StateConflict::Expired)),
        DOCUMENT_SENT | DOCUMENT_PARTIALLY_SIGNED => match document.expires_at {
            Some(deadline) if now > deadline => {
                expire_locked(conn, document, now)?;
                Ok(Err(StateConflict::Expired))
            }
            _ => Ok(Ok(())),
        },
        _ => Ok(Ok(())),
    }
}

/// Moves a draft document to `sent`, stamping every signer as notified, and
/// emits `document.created` plus one `signer.added` per signer.
pub fn send(conn: &mut PgConnection, document_id: Uuid) -> CoreResult<(Document, Vec<Signer>)> {
    conn.transaction::<_, CoreError, _>(|conn| {
        let document = lock_document(conn, document_id)?;
        if document.status != DOCUMENT_DRAFT {
            return Err(StateConflict::InvalidTransition.into());
        }

        let rows = load_signers(conn, document.id)?;
        if rows.is_empty() {
            return Err(CoreError::validation(
                "document cannot be sent without signers",
            ));
        }

        let now = Utc::now().naive_utc();
        diesel::update(documents::table.find(document.id))
            .set((
                documents::status.eq(DOCUMENT_SENT),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        diesel::update(signers::table.filter(signers::document_id.eq(document.id)))
            .set((
                signers::status.eq(SIGNER_NOTIFIED),
                signers::notified_at.eq(Some(now)),
                signers::updated_at.eq(now),
            ))
            .execute(conn)?;

        events::emit(
            conn,
            document.tenant_id,
            events::DOCUMENT_CREATED,
            json!({
                "tenant_id": document.tenant_id,
                "document_id": document.id,
                "title": document.title,
                "signing_mode": document.signing_mode,
                "closure_mode": document.closure_mode,
                "expires_at": document.expires_at,
            }),
        )?;

        for signer in &rows {
            events::emit(
                conn,
                document.tenant_id,
                events::SIGNER_ADDED,
                json!({
                    "tenant_id": document.tenant_id,
                    "document_id": document.id,
                    "signer_id": signer.id,
                    "name": signer.name,
                    "email": signer.email,
                    "role": signer.role,
                    "position": signer.position,
                }),
            )?;
        }

        let document = documents::table.find(document.id).first(conn)?;
        let rows = load_signers(conn, document_id)?;
        info!(document_id = %document_id, signers = rows.len(), "document sent");
        Ok((document, rows))
    })
}

/// Sends the document and pushes signing requests through the notification
/// capability.
pub async fn send_document(state: &AppState, document_id: Uuid) -> CoreResult<Vec<Signer>> {
    let (document, rows) = {
        let mut conn = state.db()?;
        send(&mut conn, document_id)?
    };

    for signer in &rows {
        if let Err(err) = state.notifier.send_signing_request(signer, &document).await {
            // Delivery problems must not unwind the transition; reminders
            // will nudge the signer again.
            warn!(signer_id = %signer.id, error = %err, "failed to send signing request");
        }
    }

    Ok(rows)
}

/// Records the first time a signer opens the document.
pub fn mark_viewed(conn: &mut PgConnection, document_id: Uuid, signer_id: Uuid) -> CoreResult<()> {
    let verdict = conn.transaction::<_, CoreError, _>(|conn| {
        let document = lock_document(conn, document_id)?;
        let now = Utc::now().naive_utc();
        if let Err(conflict) = ensure_active(conn, &document, now)? {
            return Ok(Err(conflict));
        }

        let signer: Signer = signers::table.find(signer_id).first(conn)?;
        if signer.document_id != document.id {
            return Err(CoreError::validation("signer does not belong to document"));
        }

        if signer.viewed_at.is_none() {
            diesel::update(signers::table.find(signer.id))
                .set((signers::viewed_at.eq(Some(now)), signers::updated_at.eq(now)))
                .execute(conn)?;
            if signer.status == SIGNER_PENDING || signer.status == SIGNER_NOTIFIED {
                diesel::update(signers::table.find(signer.id))
                    .set(signers::status.eq(SIGNER_VIEWED))
                    .execute(conn)?;
            }
        }
        Ok(Ok(()))
    })?;

    verdict.map_err(CoreError::from)
}

/// Authenticates a signer in the context of their document: the document
/// must still be active and, in sequential mode, it must be this signer's
/// turn. The gate and the proof validation share one transaction holding
/// the document lock, so a document expired concurrently can never gain a
/// committed verification. The outcome rides in the Ok channel so attempt
/// increments and the expiry transition commit even when the caller's
/// attempt fails.
pub fn authenticate_signer(
    conn: &mut PgConnection,
    config: &AppConfig,
    document_id: Uuid,
    signer_id: Uuid,
    proof: &SubmittedProof,
) -> CoreResult<()> {
    let verdict = conn.transaction::<CoreResult<()>, CoreError, _>(|conn| {
        let document = lock_document(conn, document_id)?;
        let now = Utc::now().naive_utc();
        if let Err(conflict) = ensure_active(conn, &document, now)? {
            return Ok(Err(conflict.into()));
        }

        if document.signing_mode == SIGNING_SEQUENTIAL {
            let rows = load_signers(conn, document.id)?;
            let target = rows
                .iter()
                .find(|s| s.id == signer_id)
                .ok_or_else(|| CoreError::validation("signer does not belong to document"))?;
            if earlier_signers_pending(&rows, target.position) {
                return Ok(Err(StateConflict::OutOfOrder.into()));
            }
        }

        Ok(authenticator::authenticate(conn, config, signer_id, proof))
    })?;
    verdict
}

/// Applies a signer's signature and decides whether the document is now due
/// for completion.
pub fn record_signature(
    conn: &mut PgConnection,
    config: &AppConfig,
    document_id: Uuid,
    signer_id: Uuid,
    submission: SignatureSubmission,
) -> CoreResult<SignatureOutcome> {
    let verdict = conn.transaction::<_, CoreError, _>(|conn| {
        let document = lock_document(conn, document_id)?;
        let now = Utc::now().naive_utc();
        if let Err(conflict) = ensure_active(conn, &document, now)? {
            return Ok(Err(conflict));
        }
        if document.status == DOCUMENT_DRAFT {
            return Ok(Err(StateConflict::InvalidTransition));
        }

        let rows = load_signers(conn, document.id)?;
        let target = rows
            .iter()
            .find(|s| s.id == signer_id)
            .ok_or_else(|| CoreError::validation("signer does not belong to document"))?;

        if target.status == SIGNER_SIGNED {
            return Ok(Err(StateConflict::AlreadySigned));
        }

        let method = AuthMethod::parse(&target.auth_method).ok_or_else(|| {
            CoreError::validation(format!(
                "unknown authentication method: {}",
                target.auth_method
            ))
        })?;
        if method != AuthMethod::None && target.verified_at.is_none() {
            return Ok(Err(StateConflict::NotVerified));
        }

        if document.signing_mode == SIGNING_SEQUENTIAL
            && earlier_signers_pending(&rows, target.position)
        {
            return Ok(Err(StateConflict::OutOfOrder));
        }

        diesel::update(signers::table.find(target.id))
            .set((
                signers::status.eq(SIGNER_SIGNED),
                signers::signed_at.eq(Some(now)),
                signers::signature_data.eq(Some(submission.signature_data.clone())),
                signers::ip_address.eq(submission.ip_address.clone()),
                signers::user_agent.eq(submission.user_agent.clone()),
                signers::latitude.eq(submission.latitude),
                signers::longitude.eq(submission.longitude),
                signers::updated_at.eq(now),
            ))
            .execute(conn)?;

        if document.status == DOCUMENT_SENT {
            diesel::update(documents::table.find(document.id))
                .set((
                    documents::status.eq(DOCUMENT_PARTIALLY_SIGNED),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?;
        }

        events::emit(
            conn,
            document.tenant_id,
            events::SIGNATURE_COMPLETED,
            json!({
                "tenant_id": document.tenant_id,
                "document_id": document.id,
                "signer_id": target.id,
                "name": target.name,
                "email": target.email,
                "signed_at": now,
            }),
        )?;

        let rows = load_signers(conn, document.id)?;
        let completion_due = document.closure_mode == CLOSURE_AUTOMATIC
            && all_required_signed(&rows, config.require_witness_signatures);

        info!(document_id = %document.id, signer_id = %signer_id, completion_due, "signature recorded");
        Ok(Ok(SignatureOutcome {
            document_id: document.id,
            signer_id,
            completion_due,
        }))
    })?;

    verdict.map_err(CoreError::from)
}

/// Records a signature and, when closure is automatic and this was the last
/// required signature, completes the document.
pub async fn record_signature_and_complete(
    state: &AppState,
    document_id: Uuid,
    signer_id: Uuid,
    submission: SignatureSubmission,
) -> CoreResult<SignatureOutcome> {
    let outcome = {
        let mut conn = state.db()?;
        record_signature(&mut conn, &state.config, document_id, signer_id, submission)?
    };

    if outcome.completion_due {
        complete_document(state, document_id).await?;
    }

    Ok(outcome)
}

enum CompletionGate {
    Ready(Document),
    Done(String),
    Blocked(StateConflict),
}

/// Completes the document: invokes the final signature assembler, records
/// the final hash and emits `document.completed`.
///
/// Idempotent. Completing an already-completed document returns the existing
/// hash without touching the assembler or emitting anything. A failure in
/// the assembler leaves the document in `partially_signed`, so completion
/// can be retried once the certificate problem is fixed.
pub async fn complete_document(state: &AppState, document_id: Uuid) -> CoreResult<String> {
    let gate = {
        let mut conn = state.db()?;
        conn.transaction::<_, CoreError, _>(|conn| {
            let document = lock_document(conn, document_id)?;
            let now = Utc::now().naive_utc();

            if document.status == DOCUMENT_COMPLETED {
                let hash = document
                    .final_hash
                    .clone()
                    .ok_or_else(|| CoreError::validation("completed document without hash"))?;
                return Ok(CompletionGate::Done(hash));
            }
            if document.status == DOCUMENT_DRAFT {
                return Ok(CompletionGate::Blocked(StateConflict::InvalidTransition));
            }
            if let Err(conflict) = ensure_active(conn, &document, now)? {
                return Ok(CompletionGate::Blocked(conflict));
            }

            let rows = load_signers(conn, document.id)?;
            if !all_required_signed(&rows, state.config.require_witness_signatures) {
                return Ok(CompletionGate::Blocked(StateConflict::SignaturesMissing));
            }

            Ok(CompletionGate::Ready(document))
        })?
    };

    let document = match gate {
        CompletionGate::Done(hash) => return Ok(hash),
        CompletionGate::Blocked(conflict) => return Err(conflict.into()),
        CompletionGate::Ready(document) => document,
    };

    // The assembler runs outside the row lock; a crash or certificate error
    // here leaves the document retryable with no state change.
    let artifact = finalizer::assemble(state, &document).await?;

    let mut conn = state.db()?;
    conn.transaction::<_, CoreError, _>(|conn| {
        let current = lock_document(conn, document_id)?;
        if current.status == DOCUMENT_COMPLETED {
            // Another handler finished first; keep its hash and emit nothing.
            return current
                .final_hash
                .clone()
                .ok_or_else(|| CoreError::validation("completed document without hash"));
        }

        let now = Utc::now().naive_utc();
        diesel::update(documents::table.find(current.id))
            .set((
                documents::status.eq(DOCUMENT_COMPLETED),
                documents::final_hash.eq(Some(artifact.hash.clone())),
                documents::completed_at.eq(Some(now)),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;

        events::emit(
            conn,
            current.tenant_id,
            events::DOCUMENT_COMPLETED,
            json!({
                "tenant_id": current.tenant_id,
                "document_id": current.id,
                "title": current.title,
                "final_hash": artifact.hash,
                "completed_at": now,
            }),
        )?;

        info!(document_id = %current.id, final_hash = %artifact.hash, "document completed");
        Ok(artifact.hash.clone())
    })
}

/// Explicit completion trigger for closure_mode=manual. The decision of who
/// may call it belongs to the API layer; the transition itself is the same
/// idempotent `complete_document`.
pub async fn close(state: &AppState, document_id: Uuid) -> CoreResult<String> {
    complete_document(state, document_id).await
}

/// Cancels a document that has not yet reached a terminal state.
pub fn cancel(conn: &mut PgConnection, document_id: Uuid) -> CoreResult<()> {
    let verdict = conn.transaction::<_, CoreError, _>(|conn| {
        let document = lock_document(conn, document_id)?;
        let now = Utc::now().naive_utc();

        match document.status.as_str() {
            DOCUMENT_DRAFT => {}
            DOCUMENT_SENT | DOCUMENT_PARTIALLY_SIGNED => {
                if let Err(conflict) = ensure_active(conn, &document, now)? {
                    return Ok(Err(conflict));
                }
            }
            _ => return Ok(Err(StateConflict::InvalidTransition)),
        }

        diesel::update(documents::table.find(document.id))
            .set((
                documents::status.eq(DOCUMENT_CANCELLED),
                documents::updated_at.eq(now),
            ))
            .execute(conn)?;
        info!(document_id = %document.id, "document cancelled");
        Ok(Ok(()))
    })?;

    verdict.map_err(CoreError::from)
}

/// Periodic sweep applying the expiry transition to overdue documents. Each
/// document is re-checked under its own lock; the candidate scan holds none.
pub fn sweep_expired(conn: &mut PgConnection) -> CoreResult<Vec<Uuid>> {
    let now = Utc::now().naive_utc();
    let candidates: Vec<Uuid> = documents::table
        .filter(documents::status.eq_any([DOCUMENT_SENT, DOCUMENT_PARTIALLY_SIGNED]))
        .filter(documents::expires_at.lt(now))
        .select(documents::id)
        .load(conn)?;

    let mut expired = Vec::new();
    for document_id in candidates {
        let did_expire = conn.transaction::<_, CoreError, _>(|conn| {
            let document = lock_document(conn, document_id)?;
            let overdue = matches!(
                document.status.as_str(),
                DOCUMENT_SENT | DOCUMENT_PARTIALLY_SIGNED
            ) && document
                .expires_at
                .map(|deadline| now > deadline)
                .unwrap_or(false);

            if overdue {
                expire_locked(conn, &document, now)?;
            }
            Ok(overdue)
        })?;

        if did_expire {
            expired.push(document_id);
        }
    }

    Ok(expired)
}

/// Signers due another reminder: the last nudge (initial notification or a
/// previous reminder) is older than the document's reminder interval.
pub fn reminder_due(signer: &Signer, interval_hours: i32, now: NaiveDateTime) -> bool {
    if signer.status == SIGNER_SIGNED {
        return false;
    }
    match signer.notified_at {
        Some(notified) => {
            let nudges = i64::from(signer.reminder_count) + 1;
            notified + ChronoDuration::hours(i64::from(interval_hours) * nudges) < now
        }
        None => false,
    }
}
