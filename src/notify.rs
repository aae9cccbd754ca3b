use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::models::{Document, Signer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChannel {
    Email,
    Phone,
}

impl CodeChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChannel::Email => "email",
            CodeChannel::Phone => "phone",
        }
    }
}

/// Outbound delivery capability for verification codes and signing
/// requests. The transport (email provider, SMS gateway) lives behind this
/// trait and is opaque to the workflow.
#[async_trait]
pub trait NotificationSender: Send + Sync + 'static {
    async fn send_code(&self, channel: CodeChannel, destination: &str, code: &str) -> Result<()>;

    async fn send_signing_request(&self, signer: &Signer, document: &Document) -> Result<()>;
}

/// Development sender that only logs. Codes are not logged in full.
pub struct TracingNotifier;

#[async_trait]
impl NotificationSender for TracingNotifier {
    async fn send_code(&self, channel: CodeChannel, destination: &str, code: &str) -> Result<()> {
        info!(
            channel = channel.as_str(),
            destination,
            code_suffix = &code[code.len().saturating_sub(2)..],
            "would send verification code"
        );
        Ok(())
    }

    async fn send_signing_request(&self, signer: &Signer, document: &Document) -> Result<()> {
        info!(
            signer_id = %signer.id,
            document_id = %document.id,
            email = %signer.email,
            "would send signing request"
        );
        Ok(())
    }
}
