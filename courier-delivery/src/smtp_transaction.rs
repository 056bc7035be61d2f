//! One authenticated session with the relay.
//!
//! Every step runs under its own timeout from [`SmtpTimeouts`]:
//! - connect, greeting and EHLO
//! - STARTTLS and the second EHLO, when configured
//! - AUTH
//! - MAIL FROM, RCPT TO and DATA for one message
//! - QUIT

use std::{future::Future, time::Duration};

use courier_common::tracing;
use courier_smtp::{Mechanism, Response, Security, SmtpClient, client::Result as ClientResult};

use crate::{
    Credentials, RelayConfig, SmtpTimeouts,
    error::{DeliveryError, PermanentError, TemporaryError},
};

/// Runs one SMTP step under a timeout.
async fn timed<T>(
    secs: u64,
    step: &str,
    future: impl Future<Output = ClientResult<T>>,
) -> Result<T, DeliveryError> {
    let limit = Duration::from_secs(secs);

    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TemporaryError::Timeout(format!("{step} timed out after {limit:?}")))?
        .map_err(DeliveryError::from)
}

/// Turns a refusal into a failure, 5xx as permanent and anything else as
/// temporary.
fn refused(
    response: &Response,
    step: &str,
    permanent: fn(String) -> PermanentError,
) -> DeliveryError {
    let message = format!("Server rejected {step}: {} {}", response.code, response.message());

    if response.is_permanent_error() {
        permanent(message).into()
    } else {
        TemporaryError::SmtpTemporary(message).into()
    }
}

/// An open, authenticated session.
pub struct SmtpSession<'a> {
    client: SmtpClient,
    relay: &'a RelayConfig,
}

impl<'a> SmtpSession<'a> {
    const fn timeouts(&self) -> &SmtpTimeouts {
        &self.relay.timeouts
    }

    /// Connects, greets, secures and authenticates.
    ///
    /// # Errors
    ///
    /// Any failure along the way. A refused login comes back as
    /// [`PermanentError::AuthenticationFailed`].
    #[tracing::instrument(level = "debug", skip_all, fields(relay = %relay.address(), security = ?relay.security))]
    pub async fn open(relay: &'a RelayConfig, credentials: &Credentials) -> Result<Self, DeliveryError> {
        let timeouts = &relay.timeouts;
        let address = relay.address();

        if relay.accept_invalid_certs {
            tracing::warn!(
                relay = %address,
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
        }

        let connect = async {
            match relay.security {
                Security::Implicit => {
                    SmtpClient::connect_tls(&address, relay.host.as_str(), relay.accept_invalid_certs)
                        .await
                }
                Security::StartTls | Security::Plaintext => SmtpClient::connect(&address, relay.host.as_str())
                    .await
                    .map(|client| client.accept_invalid_certs(relay.accept_invalid_certs)),
            }
        };

        let mut client = tokio::time::timeout(Duration::from_secs(timeouts.connect_secs), connect)
            .await
            .map_err(|_| {
                TemporaryError::Timeout(format!(
                    "Connecting to {address} timed out after {}s",
                    timeouts.connect_secs
                ))
            })?
            .map_err(|e| match DeliveryError::from(e) {
                DeliveryError::Temporary(TemporaryError::ConnectionFailed(reason)) => {
                    TemporaryError::ConnectionFailed(format!("Failed to connect to {address}: {reason}"))
                        .into()
                }
                other => other,
            })?;

        let greeting = timed(timeouts.connect_secs, "Greeting", client.read_greeting()).await?;
        if !greeting.is_success() {
            return Err(TemporaryError::ServerBusy(format!(
                "Server rejected connection: {} {}",
                greeting.code,
                greeting.message()
            ))
            .into());
        }

        let mut session = Self { client, relay };
        let mut capabilities = session.ehlo().await?;

        if relay.security == Security::StartTls {
            if !capabilities.advertises("STARTTLS") {
                return Err(PermanentError::TlsRequired(format!(
                    "{address} does not advertise STARTTLS"
                ))
                .into());
            }

            let response = timed(
                session.timeouts().starttls_secs,
                "STARTTLS",
                session.client.starttls(),
            )
            .await
            .map_err(|e| PermanentError::TlsRequired(e.to_string()))?;

            if !response.is_success() {
                return Err(refused(&response, "STARTTLS", PermanentError::TlsRequired));
            }

            // Capabilities may differ once the session is encrypted
            capabilities = session.ehlo().await?;
        } else if relay.security == Security::Plaintext {
            tracing::warn!(relay = %address, "Authenticating over an unencrypted connection");
        }

        session.authenticate(&capabilities, credentials).await?;

        Ok(session)
    }

    async fn ehlo(&mut self) -> Result<Response, DeliveryError> {
        let response = timed(
            self.timeouts().ehlo_secs,
            "EHLO",
            self.client.ehlo(&self.relay.helo_domain),
        )
        .await?;

        if !response.is_success() {
            return Err(TemporaryError::SmtpTemporary(format!(
                "Server rejected EHLO: {} {}",
                response.code,
                response.message()
            ))
            .into());
        }

        Ok(response)
    }

    async fn authenticate(
        &mut self,
        capabilities: &Response,
        credentials: &Credentials,
    ) -> Result<(), DeliveryError> {
        let mechanism = Mechanism::select(capabilities).ok_or_else(|| {
            PermanentError::AuthenticationFailed(
                "Relay does not offer AUTH PLAIN or AUTH LOGIN".to_string(),
            )
        })?;

        timed(
            self.timeouts().auth_secs,
            "AUTH",
            self.client
                .authenticate(mechanism, &credentials.username, credentials.password()),
        )
        .await?;

        tracing::debug!(mechanism = mechanism.name(), "Authenticated with relay");

        Ok(())
    }

    /// Sends one message to one recipient.
    ///
    /// # Errors
    ///
    /// Any refusal or transport failure during MAIL FROM, RCPT TO or DATA.
    #[tracing::instrument(level = "debug", skip(self, data))]
    pub async fn deliver(&mut self, from: &str, recipient: &str, data: &str) -> Result<(), DeliveryError> {
        let timeouts = self.timeouts().clone();

        let response = timed(timeouts.mail_from_secs, "MAIL FROM", self.client.mail_from(from)).await?;
        if !response.is_success() {
            return Err(refused(&response, "MAIL FROM", PermanentError::MessageRejected));
        }

        let response = timed(timeouts.rcpt_to_secs, "RCPT TO", self.client.rcpt_to(recipient)).await?;
        if !response.is_success() {
            return Err(refused(
                &response,
                &format!("RCPT TO {recipient}"),
                PermanentError::InvalidRecipient,
            ));
        }

        let response = timed(timeouts.data_secs, "DATA", self.client.data()).await?;
        if !response.is_intermediate() {
            return Err(refused(&response, "DATA", PermanentError::MessageRejected));
        }

        let response = timed(timeouts.data_secs, "Message data", self.client.send_data(data)).await?;
        if !response.is_success() {
            return Err(if response.code == 552 {
                PermanentError::MessageTooLarge(response.message()).into()
            } else {
                refused(&response, "message", PermanentError::MessageRejected)
            });
        }

        Ok(())
    }

    /// Ends the session. The message has already been accepted by now, so
    /// trouble here is only logged.
    pub async fn quit(mut self) {
        let secs = self.timeouts().quit_secs;

        if let Err(e) = timed(secs, "QUIT", self.client.quit()).await {
            tracing::warn!(relay = %self.relay.address(), "QUIT failed: {e}");
        }
    }
}
