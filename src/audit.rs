//! Audit trail derivation.
//!
//! The timeline is a pure function of the current document and signer rows.
//! Nothing is stored for it, so it can be rebuilt at any time and can never
//! drift from the state the rows describe. The trade-off is accepted
//! deliberately: the state machine's one-way transitions make
//! intermediate-then-reverted states impossible, so there is nothing the
//! derivation could miss.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{Document, Signer, DOCUMENT_COMPLETED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Sent,
    Viewed,
    Verified,
    Signed,
    Completed,
}

impl TimelineEventType {
    /// Tie-break order for events sharing a timestamp.
    fn priority(self) -> u8 {
        match self {
            TimelineEventType::Sent => 0,
            TimelineEventType::Viewed => 1,
            TimelineEventType::Verified => 2,
            TimelineEventType::Signed => 3,
            TimelineEventType::Completed => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub event_type: TimelineEventType,
    pub actor_name: String,
    pub actor_email: Option<String>,
    pub timestamp: NaiveDateTime,
}

/// Builds the ordered compliance timeline for a document.
pub fn build_timeline(document: &Document, signers: &[Signer]) -> Vec<TimelineEvent> {
    let mut events = Vec::new();

    for signer in signers {
        if let Some(notified_at) = signer.notified_at {
            events.push(TimelineEvent {
                event_type: TimelineEventType::Sent,
                actor_name: signer.name.clone(),
                actor_email: Some(signer.email.clone()),
                timestamp: notified_at,
            });
        }
        if let Some(viewed_at) = signer.viewed_at {
            events.push(TimelineEvent {
                event_type: TimelineEventType::Viewed,
                actor_name: signer.name.clone(),
                actor_email: Some(signer.email.clone()),
                timestamp: viewed_at,
            });
        }
        if let Some(verified_at) = signer.verified_at {
            events.push(TimelineEvent {
                event_type: TimelineEventType::Verified,
                actor_name: signer.name.clone(),
                actor_email: Some(signer.email.clone()),
                timestamp: verified_at,
            });
        }
        if let Some(signed_at) = signer.signed_at {
            events.push(TimelineEvent {
                event_type: TimelineEventType::Signed,
                actor_name: signer.name.clone(),
                actor_email: Some(signer.email.clone()),
                timestamp: signed_at,
            });
        }
    }

    if document.status == DOCUMENT_COMPLETED {
        if let Some(completed_at) = document.completed_at {
            events.push(TimelineEvent {
                event_type: TimelineEventType::Completed,
                actor_name: document.title.clone(),
                actor_email: None,
                timestamp: completed_at,
            });
        }
    }

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.event_type.priority().cmp(&b.event_type.priority()))
    });
    events
}
