//! Transport Gateway: hands one composed message to the relay.

use async_trait::async_trait;
use chrono::Utc;
use courier_common::{internal, tracing};
use courier_smtp::Message;

use crate::{Credentials, DeliveryError, HandshakeError, RelayConfig, smtp_transaction::SmtpSession};

/// Sends one message and reports how it went.
///
/// Routine trouble (refused recipient, rejected login, timeouts, dropped
/// connections) comes back as an `Err` value for the caller to record. It
/// never aborts the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &str, message: &Message) -> Result<(), DeliveryError>;
}

/// Delivers through an authenticated SMTP relay, one session per message.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    relay: RelayConfig,
    credentials: Credentials,
}

impl SmtpTransport {
    #[must_use]
    pub const fn new(relay: RelayConfig, credentials: Credentials) -> Self {
        Self { relay, credentials }
    }

    #[must_use]
    pub const fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    /// Opens a throwaway session to prove the relay accepts the credentials.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::Rejected`] if the login is refused, or
    /// [`HandshakeError::Session`] if no session could be set up at all.
    #[tracing::instrument(level = "info", skip(self), fields(relay = %self.relay.address(), username = %self.credentials.username))]
    pub async fn handshake(&self) -> Result<(), HandshakeError> {
        let session = SmtpSession::open(&self.relay, &self.credentials).await?;
        session.quit().await;

        internal!(level = INFO, "Relay {} accepted the credentials", self.relay.address());

        Ok(())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, recipient: &str, message: &Message) -> Result<(), DeliveryError> {
        let data = message
            .clone()
            .with_header("Date", Utc::now().to_rfc2822())
            .format();

        let mut session = SmtpSession::open(&self.relay, &self.credentials).await?;
        session.deliver(&message.from, recipient, &data).await?;
        session.quit().await;

        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, recipient: &str, message: &Message) -> Result<(), DeliveryError> {
        (**self).send(recipient, message).await
    }
}
