//! The recipient record shared by the source, the ledger and the composer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One row of the recipient list.
///
/// The email address is the identity. Every other column is carried, in
/// file order, as a template field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub email: String,
    #[serde(flatten)]
    pub fields: IndexMap<String, String>,
}

impl RecipientRecord {
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            fields: IndexMap::new(),
        }
    }

    /// Add (or replace) a template field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field by name. `email` resolves to the address itself.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        if name == "email" {
            return Some(&self.email);
        }

        self.fields.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn forename(&self) -> &str {
        self.field("forename").unwrap_or_default()
    }

    #[must_use]
    pub fn surname(&self) -> &str {
        self.field("surname").unwrap_or_default()
    }
}
