//! The delivery ledger: the durable record of every send attempt.
//!
//! The ledger is loaded whole when a run starts, appended to after each
//! attempt and rewritten whole (atomically) straight away, so that the file
//! on disk never lags the relay by more than the attempt in flight.

mod error;
mod ledger;
mod outcome;

pub use error::LedgerError;
pub use ledger::{Ledger, LedgerSummary, PendingSet};
pub use outcome::DeliveryOutcome;

/// Where the ledger lives when nothing else is configured, relative to the
/// working directory of the run.
pub const DEFAULT_LEDGER_PATH: &str = "send_progress.json";
