//! SMTP submission client used by courier to hand messages to a relay.

pub mod client;

pub use client::{
    ClientError, Mechanism, Message, MessageBuilder, Response, Security, SmtpClient,
};
