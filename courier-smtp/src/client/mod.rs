//! SMTP client for submitting mail to an authenticated relay.
//!
//! It supports:
//!
//! - Implicit TLS (SMTPS, port 465), STARTTLS upgrade, and plaintext
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - Multi-line response parsing and capability inspection
//! - `multipart/alternative` message formatting
//!
//! # Example
//!
//! ```no_run
//! use courier_smtp::client::{Mechanism, MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .text("Hello World")
//!     .html("<p>Hello World</p>")
//!     .build()?;
//!
//! let mut client = SmtpClient::connect_tls("smtp.example.com:465", "smtp.example.com", false).await?;
//! client.read_greeting().await?;
//! let ehlo = client.ehlo("client.example.com").await?;
//! let mechanism = Mechanism::select(&ehlo).unwrap_or(Mechanism::Login);
//! client.authenticate(mechanism, "sender@example.com", "app-password").await?;
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data(&message.format()).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
mod message;
mod response;
mod smtp_client;

use serde::{Deserialize, Serialize};

pub use auth::Mechanism;
pub use smtp_client::SmtpClient;
pub use error::{ClientError, Result};
pub use message::{Message, MessageBuilder};
pub use response::{Response, ResponseLine};

/// How the session with the relay is secured.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    /// TLS from the first byte (SMTPS).
    #[default]
    Implicit,
    /// Plain connection upgraded with STARTTLS before authenticating.
    StartTls,
    /// No TLS at all. Only for local relays and tests.
    Plaintext,
}
