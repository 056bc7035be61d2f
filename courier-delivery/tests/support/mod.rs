#![allow(dead_code)]

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use courier_delivery::{DeliveryError, DispatchEvent, PermanentError, TemporaryError, Transport};
use courier_ledger::Ledger;
use courier_smtp::Message;
use tokio::time::Instant;

/// One call the stub saw.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub at: Instant,
    /// Entries in the ledger file when the send started.
    pub ledger_entries: Option<usize>,
}

#[derive(Debug, Default)]
struct Script {
    rejected: HashSet<String>,
    flaky: HashSet<String>,
    sent: Vec<SentMessage>,
}

/// A transport that records every call instead of talking to a relay.
///
/// Addresses marked `rejected` always fail. Addresses marked `flaky` fail
/// the first time they're seen and succeed after that.
#[derive(Debug, Clone, Default)]
pub struct StubTransport {
    script: Arc<Mutex<Script>>,
    ledger: Option<PathBuf>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(self, email: &str) -> Self {
        self.script.lock().unwrap().rejected.insert(email.to_string());
        self
    }

    pub fn flaky(self, email: &str) -> Self {
        self.script.lock().unwrap().flaky.insert(email.to_string());
        self
    }

    /// Read the ledger at `path` on every send, to see what a crash at that
    /// moment would leave behind.
    pub fn watching_ledger(mut self, path: &Path) -> Self {
        self.ledger = Some(path.to_path_buf());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.script.lock().unwrap().sent.clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|sent| sent.recipient).collect()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, recipient: &str, message: &Message) -> Result<(), DeliveryError> {
        let ledger_entries = match &self.ledger {
            Some(path) => Some(Ledger::load(path).await.unwrap().len()),
            None => None,
        };

        let mut script = self.script.lock().unwrap();
        script.sent.push(SentMessage {
            recipient: recipient.to_string(),
            subject: message.subject.clone(),
            at: Instant::now(),
            ledger_entries,
        });

        if script.rejected.contains(recipient) {
            return Err(PermanentError::InvalidRecipient(format!("550 No such user {recipient}")).into());
        }

        if script.flaky.remove(recipient) {
            return Err(TemporaryError::ServerBusy("421 Try again later".to_string()).into());
        }

        Ok(())
    }
}

/// Collects events for later inspection.
pub fn recorder() -> (Arc<Mutex<Vec<DispatchEvent>>>, impl FnMut(&DispatchEvent)) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    (events, move |event: &DispatchEvent| {
        sink.lock().unwrap().push(event.clone());
    })
}

/// Writes a recipient list into `dir` and returns its path.
pub fn write_csv(dir: &Path, rows: &[(&str, &str, &str)]) -> PathBuf {
    let path = dir.join("recipients.csv");
    let mut content = String::from("forename,surname,email\n");
    for (forename, surname, email) in rows {
        content.push_str(&format!("{forename},{surname},{email}\n"));
    }
    std::fs::write(&path, content).unwrap();
    path
}
