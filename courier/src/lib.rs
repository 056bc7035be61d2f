pub mod console;
pub mod controller;
pub mod prompt;

pub use controller::{Courier, LedgerConfig, Overrides, SenderConfig, StatusReport};
