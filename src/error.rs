use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Why a state-machine transition was refused. These are caller mistakes or
/// races, never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateConflict {
    #[error("document is expired")]
    Expired,
    #[error("document is cancelled")]
    Cancelled,
    #[error("document is already completed")]
    AlreadyCompleted,
    #[error("signer must wait for earlier signers")]
    OutOfOrder,
    #[error("signer has not been verified")]
    NotVerified,
    #[error("signer has already signed")]
    AlreadySigned,
    #[error("document is not in a state that allows this transition")]
    InvalidTransition,
    #[error("not all required signers have signed")]
    SignaturesMissing,
}

/// Why a verification attempt was rejected. Deliberately coarse so responses
/// do not help an attacker distinguish guessing failures from identity
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("verification code expired")]
    Expired,
    #[error("verification attempts exhausted")]
    Exhausted,
    #[error("verification did not match")]
    Mismatch,
    #[error("no active verification code")]
    NoActiveCode,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("state conflict: {0}")]
    StateConflict(#[from] StateConflict),

    #[error("verification rejected: {0}")]
    Verification(#[from] VerificationFailure),

    #[error("no signing certificate configured for tenant")]
    CertificateMissing,

    #[error("tenant signing certificate has expired")]
    CertificateExpired,

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    External(#[from] anyhow::Error),
}

impl From<crate::jobs::JobQueueError> for CoreError {
    fn from(value: crate::jobs::JobQueueError) -> Self {
        match value {
            crate::jobs::JobQueueError::Database(err) => CoreError::Database(err),
        }
    }
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// True for failures worth retrying after the surrounding condition is
    /// fixed (certificate replaced, database back up). Conflicts and
    /// validation errors stay final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::CertificateMissing
                | CoreError::CertificateExpired
                | CoreError::Database(_)
                | CoreError::Pool(_)
                | CoreError::External(_)
        )
    }
}
