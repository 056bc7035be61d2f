//! Outbound message representation and MIME formatting.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// Part boundary. Contains `_`, which never occurs in base64, and every
/// part body is base64, so it can't collide with content.
const BOUNDARY: &str = "=_courier_alternative_part";

/// Maximum length of an encoded body line (RFC 2045 section 6.8).
const LINE_LENGTH: usize = 76;

/// A composed message: a subject, the envelope parties and a body in two
/// representations. The receiving client picks which one to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    headers: Vec<(String, String)>,
}

impl Message {
    /// Returns the message with an extra header appended.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Renders the message as RFC 5322 text with a `multipart/alternative`
    /// MIME body, plain text first and HTML second.
    ///
    /// Formatting is a pure function of the message.
    #[must_use]
    pub fn format(&self) -> String {
        let mut message = String::with_capacity(2 * (self.text.len() + self.html.len()) + 512);

        // Writing to a String can't fail
        let _ = write!(message, "From: {}\r\n", self.from);
        let _ = write!(message, "To: {}\r\n", self.to);
        let _ = write!(message, "Subject: {}\r\n", encode_header(&self.subject));
        for (name, value) in &self.headers {
            let _ = write!(message, "{name}: {value}\r\n");
        }
        message.push_str("MIME-Version: 1.0\r\n");
        let _ = write!(
            message,
            "Content-Type: multipart/alternative; boundary=\"{BOUNDARY}\"\r\n\r\n"
        );

        for (content_type, body) in [("text/plain", &self.text), ("text/html", &self.html)] {
            let _ = write!(message, "--{BOUNDARY}\r\n");
            let _ = write!(message, "Content-Type: {content_type}; charset=utf-8\r\n");
            message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
            message.push_str(&base64_lines(body.as_bytes()));
        }

        let _ = write!(message, "--{BOUNDARY}--\r\n");

        message
    }
}

/// Builder for [`Message`].
///
/// # Examples
///
/// ```
/// use courier_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .text("Hello there")
///     .html("<p>Hello there</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.format().contains("multipart/alternative"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    headers: Vec<(String, String)>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets the To header.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builds the message.
    ///
    /// A missing body representation is left empty.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::BuilderError` if the sender or recipient is
    /// missing, or if any header contains a line break.
    pub fn build(self) -> Result<Message> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Missing From address".to_string()))?;
        let to = self
            .to
            .ok_or_else(|| ClientError::BuilderError("Missing To address".to_string()))?;
        let subject = self.subject.unwrap_or_default();

        let header_values = [from.as_str(), to.as_str(), subject.as_str()];
        let custom = self
            .headers
            .iter()
            .flat_map(|(name, value)| [name.as_str(), value.as_str()]);
        if let Some(bad) = header_values
            .into_iter()
            .chain(custom)
            .find(|value| value.contains(['\r', '\n']))
        {
            return Err(ClientError::BuilderError(format!(
                "Header value contains a line break: {bad:?}"
            )));
        }

        Ok(Message {
            from,
            to,
            subject,
            text: self.text.unwrap_or_default(),
            html: self.html.unwrap_or_default(),
            headers: self.headers,
        })
    }
}

/// RFC 2047 encoded-word for header values that aren't plain ASCII.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

/// Base64 with CRLF line breaks every 76 characters.
fn base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_LENGTH * 2 + 2);

    // base64 output is ASCII, so byte chunks are valid str boundaries
    for chunk in encoded.as_bytes().chunks(LINE_LENGTH) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }

    out
}
