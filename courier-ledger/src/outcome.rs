use chrono::{DateTime, Utc};
use courier_common::RecipientRecord;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The result of one send attempt.
///
/// Each outcome echoes the recipient's fields so the ledger reads as a
/// self-contained snapshot rather than a diff against the input list. The
/// fields live under their own `fields` key: recipient columns may carry any
/// name, including `delivered` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredOutcome")]
pub struct DeliveryOutcome {
    pub email: String,

    pub delivered: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_at: Option<DateTime<Utc>>,

    /// Why the attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, String>,
}

/// On-disk shape of an outcome, accepting both the nested layout and older
/// ledgers that spread recipient fields beside `email_sent`.
#[derive(Deserialize)]
struct StoredOutcome {
    email: String,

    /// Older ledgers call this `email_sent`. Missing means not delivered.
    #[serde(default, alias = "email_sent")]
    delivered: bool,

    #[serde(default)]
    attempted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    error: Option<String>,

    #[serde(default)]
    fields: Option<IndexMap<String, String>>,

    #[serde(flatten)]
    legacy: IndexMap<String, String>,
}

impl From<StoredOutcome> for DeliveryOutcome {
    fn from(stored: StoredOutcome) -> Self {
        Self {
            email: stored.email,
            delivered: stored.delivered,
            attempted_at: stored.attempted_at,
            error: stored.error,
            fields: stored.fields.unwrap_or(stored.legacy),
        }
    }
}

impl DeliveryOutcome {
    /// A successful attempt for `recipient`, stamped now.
    #[must_use]
    pub fn delivered(recipient: &RecipientRecord) -> Self {
        Self::from_recipient(recipient, true, None)
    }

    /// A failed attempt for `recipient`, stamped now.
    #[must_use]
    pub fn failed(recipient: &RecipientRecord, reason: impl Into<String>) -> Self {
        Self::from_recipient(recipient, false, Some(reason.into()))
    }

    fn from_recipient(recipient: &RecipientRecord, delivered: bool, error: Option<String>) -> Self {
        Self {
            email: recipient.email.clone(),
            delivered,
            attempted_at: Some(Utc::now()),
            error,
            fields: recipient.fields.clone(),
        }
    }

    /// The recipient this outcome was recorded for.
    #[must_use]
    pub fn recipient(&self) -> RecipientRecord {
        RecipientRecord {
            email: self.email.clone(),
            fields: self.fields.clone(),
        }
    }
}
