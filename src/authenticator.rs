use chrono::Utc;
use diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{CoreError, CoreResult, VerificationFailure};
use crate::models::{Signer, SIGNER_VERIFIED};
use crate::schema::signers;
use crate::verification;

/// How a signer proves they are who the document says they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Email,
    Phone,
    Cpf,
    None,
}

impl AuthMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email" => Some(AuthMethod::Email),
            "phone" => Some(AuthMethod::Phone),
            "cpf" => Some(AuthMethod::Cpf),
            "none" => Some(AuthMethod::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Email => "email",
            AuthMethod::Phone => "phone",
            AuthMethod::Cpf => "cpf",
            AuthMethod::None => "none",
        }
    }
}

/// The evidence a signer submits alongside an authentication request.
#[derive(Debug, Clone)]
pub enum SubmittedProof {
    Code(String),
    Cpf(String),
    None,
}

/// Strips everything but digits, so punctuation variants of the same CPF
/// compare equal.
pub fn canonicalize_cpf(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Standard CPF checksum: eleven digits, not all identical, with two check
/// digits computed over the first nine and ten positions respectively.
pub fn is_valid_cpf(digits: &str) -> bool {
    if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let nums: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if nums.iter().all(|&d| d == nums[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = nums[..len]
            .iter()
            .enumerate()
            .map(|(i, &d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let rem = (sum * 10) % 11;
        if rem == 10 {
            0
        } else {
            rem
        }
    };

    check(9) == nums[9] && check(10) == nums[10]
}

/// Authenticates a signer with the proof appropriate for their configured
/// method. Idempotent: a signer who is already verified is accepted without
/// re-validating, so retried requests after a crash cannot burn codes.
pub fn authenticate(
    conn: &mut PgConnection,
    config: &AppConfig,
    signer_id: Uuid,
    proof: &SubmittedProof,
) -> CoreResult<()> {
    let signer: Signer = signers::table.find(signer_id).first(conn)?;

    let method = AuthMethod::parse(&signer.auth_method).ok_or_else(|| {
        CoreError::validation(format!(
            "unknown authentication method: {}",
            signer.auth_method
        ))
    })?;

    if signer.verified_at.is_some() {
        return Ok(());
    }

    match method {
        AuthMethod::None => {
            mark_verified(conn, signer.id)?;
            Ok(())
        }
        AuthMethod::Email | AuthMethod::Phone => match proof {
            SubmittedProof::Code(code) => verification::validate_code(conn, config, signer.id, code),
            _ => Err(CoreError::validation(
                "a verification code is required for this signer",
            )),
        },
        AuthMethod::Cpf => match proof {
            SubmittedProof::Cpf(submitted) => {
                let submitted = canonicalize_cpf(submitted);
                if !is_valid_cpf(&submitted) {
                    return Err(CoreError::validation("invalid CPF format"));
                }
                let stored = signer
                    .cpf
                    .as_deref()
                    .map(canonicalize_cpf)
                    .ok_or(VerificationFailure::Mismatch)?;
                // A well-formed CPF that is not the registered one is a
                // mismatch, not a format problem.
                if submitted != stored {
                    return Err(VerificationFailure::Mismatch.into());
                }
                mark_verified(conn, signer.id)?;
                Ok(())
            }
            _ => Err(CoreError::validation("a CPF is required for this signer")),
        },
    }
}

fn mark_verified(conn: &mut PgConnection, signer_id: Uuid) -> CoreResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(signers::table.find(signer_id))
        .set((
            signers::verified_at.eq(Some(now)),
            signers::status.eq(SIGNER_VERIFIED),
            signers::updated_at.eq(now),
        ))
        .execute(conn)?;
    info!(signer_id = %signer_id, "signer verified");
    Ok(())
}
