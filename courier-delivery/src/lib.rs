//! The courier delivery pipeline.
//!
//! A run reads the recipient list, works out from the ledger who is still
//! owed a message, and sends to them one at a time:
//!
//! ```text
//! source::load -> Ledger::pending -> Dispatcher::run
//!                                      |- Composer::compose
//!                                      |- Transport::send
//!                                      `- Ledger::record + persist
//! ```

pub mod compose;
pub mod dispatcher;
pub mod error;
mod smtp_transaction;
pub mod source;
pub mod transport;
mod types;

pub use compose::{Composer, Template};
pub use dispatcher::{
    DispatchConfig, DispatchState, DispatchSummary, Dispatcher,
    events::{DispatchEvent, Observer, Silent},
};
pub use error::{
    DeliveryError, DispatchError, HandshakeError, PermanentError, SourceError, SystemError,
    TemporaryError,
};
pub use transport::{SmtpTransport, Transport};
pub use types::{Credentials, RelayConfig, SmtpTimeouts};
