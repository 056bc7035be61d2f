use std::{
    fmt,
    io::{self, IsTerminal},
    path::{Path, PathBuf},
};

use anyhow::Context;
use courier_common::{internal, tracing};
use courier_delivery::{
    Composer, Credentials, DispatchConfig, DispatchSummary, Dispatcher, RelayConfig,
    SmtpTransport, Template, source,
};
use courier_ledger::{DEFAULT_LEDGER_PATH, Ledger, LedgerSummary};
use serde::Deserialize;

use crate::{console::ConsoleReporter, prompt};

/// Everything a run needs, as read from `courier.config.ron`.
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub template: Template,
}

/// Who the messages come from and how to log in as them.
#[derive(Default, Deserialize)]
pub struct SenderConfig {
    /// From address. Asked for when empty.
    #[serde(default)]
    pub address: String,

    /// Relay login, when it isn't the address.
    #[serde(default)]
    pub username: Option<String>,

    /// Kept out of the file in favour of `password_env` where possible.
    #[serde(default)]
    pub password: Option<String>,

    /// Environment variable holding the password.
    ///
    /// Default: `COURIER_PASSWORD`
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .finish()
    }
}

fn default_password_env() -> String {
    String::from("COURIER_PASSWORD")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Default: `send_progress.json` in the working directory
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(DEFAULT_LEDGER_PATH)
}

/// Command-line settings that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub batch_size: Option<usize>,
    pub cooldown_secs: Option<u64>,
    pub ledger: Option<PathBuf>,
}

/// What `courier status` prints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub recipients: usize,
    pub pending: usize,
    pub delivered: usize,
    pub exhausted: usize,
    pub ledger: LedgerSummary,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Recipients:        {}", self.recipients)?;
        writeln!(f, "Delivered:         {}", self.delivered)?;
        writeln!(f, "Pending:           {}", self.pending)?;
        if self.exhausted > 0 {
            writeln!(f, "Out of attempts:   {}", self.exhausted)?;
        }
        write!(
            f,
            "Ledger:            {} attempts, {} addresses still failing",
            self.ledger.attempts, self.ledger.failing
        )
    }
}

/// The recipient list must be an existing `.csv` file.
///
/// # Errors
///
/// Says which of the two it isn't.
pub fn validate_source_path(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }

    let is_csv = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("csv"));
    if !is_csv {
        anyhow::bail!("{} is not a .csv file", path.display());
    }

    Ok(())
}

impl Courier {
    /// Parses a RON configuration.
    ///
    /// # Errors
    ///
    /// If the text isn't a valid configuration.
    pub fn from_ron(text: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(text)?)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(batch_size) = overrides.batch_size {
            self.dispatch.batch_size = batch_size;
        }
        if let Some(cooldown_secs) = overrides.cooldown_secs {
            self.dispatch.cooldown_secs = cooldown_secs;
        }
        if let Some(path) = overrides.ledger {
            self.ledger.path = path;
        }
    }

    /// Fills in the sender address and credentials from the config, the
    /// environment, or the terminal, in that order.
    fn credentials(&mut self) -> anyhow::Result<Credentials> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();

        if self.sender.address.is_empty() {
            self.sender.address = prompt::ask(&mut input, &mut output, "Sender address: ")?;
        }
        if self.sender.address.is_empty() {
            anyhow::bail!("No sender address given");
        }

        let username = self
            .sender
            .username
            .clone()
            .unwrap_or_else(|| self.sender.address.clone());

        let password = match (&self.sender.password, std::env::var(&self.sender.password_env)) {
            (Some(password), _) => password.clone(),
            (None, Ok(password)) if !password.is_empty() => password,
            _ => prompt::ask(&mut input, &mut output, &format!("Password for {username}: "))?,
        };

        Ok(Credentials::new(username, password))
    }

    /// Logs in to the relay and straight back out.
    ///
    /// # Errors
    ///
    /// If the relay can't be reached or refuses the credentials.
    pub async fn verify(mut self) -> anyhow::Result<()> {
        let credentials = self.credentials()?;
        let username = credentials.username.clone();

        SmtpTransport::new(self.relay.clone(), credentials)
            .handshake()
            .await
            .context("Authentication setup failed")?;

        println!("{} accepted the credentials for {username}", self.relay.address());

        Ok(())
    }

    /// Sends to everyone on the list the ledger doesn't already show as
    /// delivered.
    ///
    /// # Errors
    ///
    /// If the list is unusable, the ledger can't be loaded, or the relay
    /// refuses the credentials. Failures of individual sends are reported
    /// and recorded, not returned.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn send(mut self, recipients: &Path, assume_yes: bool) -> anyhow::Result<Option<DispatchSummary>> {
        validate_source_path(recipients)?;

        let report = self.status(recipients).await?;
        if report.pending == 0 {
            println!("{report}");
            println!("Nothing to send.");
            return Ok(None);
        }

        let credentials = self.credentials()?;
        let transport = SmtpTransport::new(self.relay.clone(), credentials);
        transport
            .handshake()
            .await
            .context("Authentication setup failed, nothing was sent")?;

        if !assume_yes {
            let stdin = io::stdin();
            let confirmed = prompt::confirm_send(
                &mut stdin.lock(),
                &mut io::stdout(),
                report.pending,
                &self.sender.address,
            )?;
            if !confirmed {
                println!("Cancelled.");
                return Ok(None);
            }
        }

        let mut dispatcher = Dispatcher::new(
            transport,
            Composer::new(self.template),
            self.sender.address,
            self.dispatch,
            self.ledger.path,
        );
        let mut reporter = ConsoleReporter::new(io::stdout(), io::stdout().is_terminal());

        let summary = tokio::select! {
            summary = dispatcher.run(recipients, &mut reporter) => summary?,
            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Interrupted");
                println!();
                println!("Interrupted. Every attempt up to the last one is in the ledger; run again to resume.");
                return Ok(None);
            }
        };

        Ok(Some(summary))
    }

    /// Counts delivered and pending recipients without sending anything.
    ///
    /// # Errors
    ///
    /// If the list is unusable or the ledger can't be loaded.
    pub async fn status(&self, recipients: &Path) -> anyhow::Result<StatusReport> {
        validate_source_path(recipients)?;

        let list = source::load(recipients).await?;
        let ledger = Ledger::load(&self.ledger.path).await?;
        let pending = ledger.pending(&list, self.dispatch.max_attempts);

        Ok(StatusReport {
            recipients: list.len(),
            pending: pending.len(),
            delivered: pending.already_delivered(),
            exhausted: pending.exhausted().len(),
            ledger: ledger.summary(),
        })
    }
}
