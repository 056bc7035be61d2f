//! Typed errors for the delivery pipeline.
//!
//! Send failures are split the same way an SMTP relay splits them:
//! - Permanent failures (5xx replies) won't succeed on a later run either
//! - Temporary failures (4xx replies, network trouble) might
//! - System errors are problems on our side
//!
//! None of these stop a run. Only [`DispatchError`] does.

use std::path::PathBuf;

use courier_ledger::LedgerError;
use courier_smtp::ClientError;
use thiserror::Error;

/// Why one send attempt failed. Recorded in the ledger as the failure reason.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures that a later run will most likely hit again.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// The relay refused the recipient address.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The relay refused the message (policy, spam, sender).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Message too large: {0}")]
    MessageTooLarge(String),

    /// STARTTLS was configured but the relay couldn't provide it.
    #[error("TLS required: {0}")]
    TlsRequired(String),
}

/// Failures that may clear up by the next run.
#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Server busy: {0}")]
    ServerBusy(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Whether the relay turned down the credentials.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Permanent(PermanentError::AuthenticationFailed(_)))
    }
}

/// Classifies SMTP client errors:
///
/// - **4xx replies** are temporary
/// - **5xx replies** are permanent
/// - **I/O, closed connections and TLS** are temporary
/// - **Parse and builder errors** are system errors
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if (400..500).contains(&code) => {
                Self::Temporary(TemporaryError::SmtpTemporary(format!("{code} {message}")))
            }

            ClientError::SmtpError { code, message } if (500..600).contains(&code) => {
                Self::Permanent(PermanentError::MessageRejected(format!("{code} {message}")))
            }

            ClientError::AuthenticationFailed { code, message } if (400..500).contains(&code) => {
                Self::Temporary(TemporaryError::SmtpTemporary(format!("{code} {message}")))
            }

            ClientError::AuthenticationFailed { code, message } => Self::Permanent(
                PermanentError::AuthenticationFailed(format!("{code} {message}")),
            ),

            ClientError::SmtpError { code, message }
            | ClientError::UnexpectedResponse { code, message } => Self::System(
                SystemError::Internal(format!("Unexpected SMTP response: {code} {message}")),
            ),

            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(msg) => Self::Temporary(TemporaryError::TlsHandshakeFailed(msg)),

            ClientError::ParseError(msg) => Self::System(SystemError::Internal(format!(
                "SMTP protocol parse error: {msg}"
            ))),

            ClientError::BuilderError(msg) => Self::System(SystemError::Configuration(format!(
                "Message could not be built: {msg}"
            ))),

            ClientError::Utf8Error(e) => {
                Self::System(SystemError::Internal(format!("UTF-8 decoding error: {e}")))
            }
        }
    }
}

/// The recipient list couldn't be used. Nothing is sent and the ledger is
/// left alone.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Recipient list {} does not exist or can't be read", .0.display())]
    NotFound(PathBuf),

    #[error("Recipient list {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Errors that abort a dispatch run.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Input(#[from] SourceError),

    /// The ledger couldn't be loaded. Sending without it could message
    /// people twice.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("This dispatcher has already run")]
    AlreadyRun,
}

/// The throwaway session before a run didn't get through authentication.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("The relay rejected the credentials: {0}")]
    Rejected(String),

    #[error("Could not establish a session with the relay: {0}")]
    Session(DeliveryError),
}

impl From<DeliveryError> for HandshakeError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Permanent(PermanentError::AuthenticationFailed(reason)) => {
                Self::Rejected(reason)
            }
            other => Self::Session(other),
        }
    }
}
