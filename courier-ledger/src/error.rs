use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger exists but couldn't be read.
    #[error("Failed to read ledger {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// The ledger exists but isn't a sequence of delivery outcomes.
    ///
    /// Never papered over: without it there's no telling who already has
    /// their message.
    #[error("Ledger {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The snapshot couldn't be written back.
    #[error("Failed to write ledger {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to serialise ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl LedgerError {
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}
