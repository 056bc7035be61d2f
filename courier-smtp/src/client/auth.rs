//! SASL mechanisms for relay authentication (RFC 4954).

use base64::{Engine, engine::general_purpose::STANDARD};

use super::response::Response;

/// The SASL mechanisms the client knows how to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// Single round trip, `\0user\0password`.
    Plain,
    /// Two challenges, one for the user and one for the password.
    Login,
}

impl Mechanism {
    /// Picks a mechanism from the mechanisms advertised in an EHLO reply,
    /// preferring `PLAIN`.
    #[must_use]
    pub fn select(ehlo: &Response) -> Option<Self> {
        let offered = ehlo.extension_params("AUTH");

        if offered.iter().any(|m| m == "PLAIN") {
            Some(Self::Plain)
        } else if offered.iter().any(|m| m == "LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// The initial response for `AUTH PLAIN`.
pub(super) fn plain_token(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

pub(super) fn encode(value: &str) -> String {
    STANDARD.encode(value)
}
