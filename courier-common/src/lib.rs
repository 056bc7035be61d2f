pub mod logging;
pub mod recipient;

pub use recipient::RecipientRecord;
pub use tracing;
