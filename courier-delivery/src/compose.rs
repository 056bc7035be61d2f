//! Message Composer: fills the template in for one recipient.

use courier_common::RecipientRecord;
use courier_smtp::{Message, MessageBuilder};
use serde::{Deserialize, Serialize};

use crate::DeliveryError;

/// Subject and bodies with `{field}` placeholders.
///
/// A placeholder names a recipient column, or `email`. Unknown names render
/// as nothing. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default = "default_subject")]
    pub subject: String,

    #[serde(default = "default_text")]
    pub text: String,

    #[serde(default = "default_html")]
    pub html: String,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            text: default_text(),
            html: default_html(),
        }
    }
}

fn default_subject() -> String {
    String::from("Hello {forename}")
}

fn default_text() -> String {
    String::from("Hi {forename} {surname},\n\nThis message was sent to {email}.\n")
}

fn default_html() -> String {
    String::from(
        "<html><body><p>Hi {forename} {surname},</p><p>This message was sent to {email}.</p></body></html>",
    )
}

#[derive(Debug, Clone, Default)]
pub struct Composer {
    template: Template,
}

impl Composer {
    #[must_use]
    pub const fn new(template: Template) -> Self {
        Self { template }
    }

    #[must_use]
    pub const fn template(&self) -> &Template {
        &self.template
    }

    /// Builds the message for `recipient`, sent from `sender`.
    ///
    /// Pure: the same template, recipient and sender always give the same
    /// message.
    ///
    /// # Errors
    ///
    /// Fails when the addresses can't be placed in a header, for instance an
    /// address containing a line break.
    pub fn compose(&self, recipient: &RecipientRecord, sender: &str) -> Result<Message, DeliveryError> {
        let subject = render(&self.template.subject, recipient, push_plain)
            .replace(['\r', '\n'], " ");

        let message = MessageBuilder::new()
            .from(sender)
            .to(recipient.email.as_str())
            .subject(subject)
            .text(render(&self.template.text, recipient, push_plain))
            .html(render(&self.template.html, recipient, push_html))
            .build()?;

        Ok(message)
    }
}

fn push_plain(out: &mut String, value: &str) {
    out.push_str(value);
}

fn push_html(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

fn render(template: &str, recipient: &RecipientRecord, push: fn(&mut String, &str)) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(index) = rest.find(['{', '}']) {
        out.push_str(&rest[..index]);
        let tail = &rest[index..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
        } else if let Some(end) = tail.find('}') {
            let name = tail[1..end].trim();
            push(&mut out, recipient.field(name).unwrap_or_default());
            rest = &tail[end + 1..];
        } else {
            // Unclosed, so not a placeholder
            out.push_str(tail);
            rest = "";
        }
    }

    out.push_str(rest);
    out
}
