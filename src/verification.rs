use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use rand::Rng;
use subtle::ConstantTimeEq;
use tracing::info;
use uuid::Uuid;

use crate::authenticator::AuthMethod;
use crate::config::AppConfig;
use crate::error::{CoreError, CoreResult, VerificationFailure};
use crate::models::{Signer, SIGNER_VERIFIED};
use crate::notify::CodeChannel;
use crate::schema::signers;
use crate::state::AppState;

pub const CODE_LENGTH: usize = 6;

pub fn generate_code<R: Rng>(rng: &mut R) -> String {
    format!("{:06}", rng.gen_range(0..1_000_000u32))
}

fn codes_match(stored: &str, submitted: &str) -> bool {
    // subtle returns false for mismatched lengths without short-circuiting.
    stored.as_bytes().ct_eq(submitted.as_bytes()).into()
}

/// Pure admission decision for a submitted code. The order matters: expiry
/// and exhaustion are checked against the state *before* this attempt, and
/// the caller must persist the attempt increment before acting on an
/// `Accepted` outcome.
pub fn check_code(
    stored: Option<&str>,
    expires_at: Option<NaiveDateTime>,
    prior_attempts: i32,
    max_attempts: i32,
    submitted: &str,
    now: NaiveDateTime,
) -> Result<(), VerificationFailure> {
    let stored = stored.ok_or(VerificationFailure::NoActiveCode)?;
    match expires_at {
        Some(expiry) if now <= expiry => {}
        _ => return Err(VerificationFailure::Expired),
    }
    if prior_attempts >= max_attempts {
        return Err(VerificationFailure::Exhausted);
    }
    if codes_match(stored, submitted) {
        Ok(())
    } else {
        Err(VerificationFailure::Mismatch)
    }
}

/// Issues a fresh single-use code for a signer, replacing any prior one and
/// resetting the attempt counter. Returns the plaintext code so the caller
/// can hand it to the delivery channel.
pub fn issue_code(
    conn: &mut PgConnection,
    config: &AppConfig,
    signer_id: Uuid,
) -> CoreResult<String> {
    let code = generate_code(&mut rand::thread_rng());
    let now = Utc::now().naive_utc();
    let expires = now + ChronoDuration::minutes(config.verification_code_ttl_minutes);

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        // Lock the row so a concurrent validation cannot interleave with the
        // reset of the attempt counter.
        let signer: Signer = signers::table.find(signer_id).for_update().first(conn)?;

        diesel::update(signers::table.find(signer.id))
            .set((
                signers::verification_code.eq(Some(code.clone())),
                signers::verification_expires_at.eq(Some(expires)),
                signers::verification_attempts.eq(0),
                signers::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(())
    })?;

    info!(signer_id = %signer_id, "issued verification code");
    Ok(code)
}

/// Issues a code and pushes it through the configured delivery channel.
pub async fn request_verification(state: &AppState, signer_id: Uuid) -> CoreResult<()> {
    let (channel, destination) = {
        let mut conn = state.db()?;
        let signer: Signer = signers::table.find(signer_id).first(&mut conn)?;

        match AuthMethod::parse(&signer.auth_method) {
            Some(AuthMethod::Email) => (CodeChannel::Email, signer.email.clone()),
            Some(AuthMethod::Phone) => {
                let phone = signer.phone.clone().ok_or_else(|| {
                    CoreError::validation("signer has phone authentication but no phone number")
                })?;
                (CodeChannel::Phone, phone)
            }
            Some(AuthMethod::Cpf) | Some(AuthMethod::None) => {
                return Err(CoreError::validation(
                    "signer authentication method does not use verification codes",
                ))
            }
            None => {
                return Err(CoreError::validation(format!(
                    "unknown authentication method: {}",
                    signer.auth_method
                )))
            }
        }
    };

    let code = {
        let mut conn = state.db()?;
        issue_code(&mut conn, &state.config, signer_id)?
    };

    state
        .notifier
        .send_code(channel, &destination, &code)
        .await?;
    Ok(())
}

/// Validates a submitted code against the signer's active one.
///
/// The attempt counter is incremented and committed before the comparison
/// result is surfaced, so a guess can never be retried for free. A correct
/// match clears the code (single use), stamps verified_at and moves the
/// signer to `verified`.
pub fn validate_code(
    conn: &mut PgConnection,
    config: &AppConfig,
    signer_id: Uuid,
    submitted: &str,
) -> CoreResult<()> {
    let now = Utc::now().naive_utc();
    let max_attempts = config.verification_max_attempts;

    // The transaction returns the verdict instead of an Err so that attempt
    // increments survive a rejection (an Err would roll them back).
    let verdict = conn.transaction::<Result<(), VerificationFailure>, diesel::result::Error, _>(
        |conn| {
            let signer: Signer = signers::table.find(signer_id).for_update().first(conn)?;

            if AuthMethod::parse(&signer.auth_method) == Some(AuthMethod::None) {
                return Ok(Ok(()));
            }
            if signer.verified_at.is_some() {
                // Already verified; re-validation is a no-op.
                return Ok(Ok(()));
            }

            let decision = check_code(
                signer.verification_code.as_deref(),
                signer.verification_expires_at,
                signer.verification_attempts,
                max_attempts,
                submitted,
                now,
            );

            // Count the attempt whenever a comparison could have happened.
            if !matches!(
                decision,
                Err(VerificationFailure::Expired)
                    | Err(VerificationFailure::Exhausted)
                    | Err(VerificationFailure::NoActiveCode)
            ) {
                diesel::update(signers::table.find(signer.id))
                    .set((
                        signers::verification_attempts.eq(signer.verification_attempts + 1),
                        signers::updated_at.eq(now),
                    ))
                    .execute(conn)?;
            }

            if decision.is_ok() {
                diesel::update(signers::table.find(signer.id))
                    .set((
                        signers::verification_code.eq::<Option<String>>(None),
                        signers::verification_expires_at.eq::<Option<NaiveDateTime>>(None),
                        signers::verified_at.eq(Some(now)),
                        signers::status.eq(SIGNER_VERIFIED),
                        signers::updated_at.eq(now),
                    ))
                    .execute(conn)?;
            }

            Ok(decision)
        },
    )?;

    verdict.map_err(CoreError::from)
}
