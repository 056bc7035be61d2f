use std::{
    collections::{HashMap, HashSet},
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use courier_common::{RecipientRecord, internal};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tokio::{fs, io::AsyncWriteExt};

use crate::{DeliveryOutcome, LedgerError};

/// The in-memory snapshot of the ledger file.
///
/// Owned exclusively by one dispatcher for the length of a run. There is no
/// locking: two processes pointed at the same file will lose each other's
/// attempts.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    entries: Vec<DeliveryOutcome>,
}

/// Recipients still owed a message, in recipient-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSet {
    recipients: IndexMap<String, RecipientRecord>,
    exhausted: Vec<String>,
    delivered: usize,
}

impl PendingSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RecipientRecord)> {
        self.recipients.iter()
    }

    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        self.recipients.contains_key(email)
    }

    /// The pending addresses, in order.
    pub fn emails(&self) -> impl Iterator<Item = &str> {
        self.recipients.keys().map(String::as_str)
    }

    /// Addresses left out because they ran out of attempts.
    #[must_use]
    pub fn exhausted(&self) -> &[String] {
        &self.exhausted
    }

    /// How many listed recipients already have a successful delivery.
    #[must_use]
    pub const fn already_delivered(&self) -> usize {
        self.delivered
    }
}

impl IntoIterator for PendingSet {
    type Item = (String, RecipientRecord);
    type IntoIter = indexmap::map::IntoIter<String, RecipientRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.recipients.into_iter()
    }
}

/// Per-address totals over the whole ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    /// Entries in the file.
    pub attempts: usize,
    /// Distinct addresses with a successful delivery.
    pub delivered: usize,
    /// Distinct addresses with failures and no success.
    pub failing: usize,
}

impl Ledger {
    /// An empty ledger that will be written to `path`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Loads the ledger at `path`.
    ///
    /// A missing file is a first run and yields an empty ledger.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Corrupt`] if the file exists but doesn't parse, and
    /// [`LedgerError::Read`] if it can't be read at all.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                internal!(level = INFO, "No ledger at {}, starting fresh", path.display());
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(LedgerError::Read { path, source }),
        };

        let entries: Vec<DeliveryOutcome> = match serde_json::from_slice(&data) {
            Ok(entries) => entries,
            Err(source) => return Err(LedgerError::Corrupt { path, source }),
        };

        internal!(
            level = DEBUG,
            "Loaded {} ledger entries from {}",
            entries.len(),
            path.display()
        );

        Ok(Self { path, entries })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every recorded attempt, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[DeliveryOutcome] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `email` has a recorded successful delivery.
    #[must_use]
    pub fn is_delivered(&self, email: &str) -> bool {
        self.entries
            .iter()
            .any(|outcome| outcome.delivered && outcome.email == email)
    }

    /// Recorded failed attempts for `email`.
    #[must_use]
    pub fn failures(&self, email: &str) -> usize {
        self.entries
            .iter()
            .filter(|outcome| !outcome.delivered && outcome.email == email)
            .count()
    }

    /// Works out who is still owed a message.
    ///
    /// A recipient is pending unless some entry for its address has
    /// `delivered = true`. Failed entries never block a later retry unless
    /// `max_attempts` is set and the address has used them all up.
    /// Duplicate addresses collapse to the last record seen, kept at the
    /// position of the first.
    #[must_use]
    pub fn pending(&self, recipients: &[RecipientRecord], max_attempts: Option<u32>) -> PendingSet {
        let delivered: HashSet<&str> = self
            .entries
            .iter()
            .filter(|outcome| outcome.delivered)
            .map(|outcome| outcome.email.as_str())
            .collect();

        let mut failures: HashMap<&str, usize> = HashMap::new();
        if max_attempts.is_some() {
            for outcome in self.entries.iter().filter(|outcome| !outcome.delivered) {
                *failures.entry(outcome.email.as_str()).or_default() += 1;
            }
        }

        let mut pending = PendingSet::default();
        let mut counted = HashSet::new();

        for recipient in recipients {
            let email = recipient.email.as_str();

            if delivered.contains(email) {
                if counted.insert(email) {
                    pending.delivered += 1;
                }
                continue;
            }

            if let Some(limit) = max_attempts {
                let used = failures.get(email).copied().unwrap_or_default();
                if used >= usize::try_from(limit).unwrap_or(usize::MAX) {
                    if counted.insert(email) {
                        pending.exhausted.push(email.to_string());
                    }
                    continue;
                }
            }

            pending
                .recipients
                .insert(email.to_string(), recipient.clone());
        }

        pending
    }

    /// Appends an outcome to the snapshot. Call [`Self::persist`] afterwards.
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        self.entries.push(outcome);
    }

    /// Totals by address.
    #[must_use]
    pub fn summary(&self) -> LedgerSummary {
        let mut by_email: IndexMap<&str, bool> = IndexMap::new();
        for outcome in &self.entries {
            *by_email.entry(outcome.email.as_str()).or_default() |= outcome.delivered;
        }

        let delivered = by_email.values().filter(|delivered| **delivered).count();

        LedgerSummary {
            attempts: self.entries.len(),
            delivered,
            failing: by_email.len() - delivered,
        }
    }

    /// Rewrites the whole snapshot to disk.
    ///
    /// The snapshot goes to a sibling temporary file which is synced and
    /// then renamed over the ledger, so a crash leaves either the old or
    /// the new file, never a torn one. The parent directory is synced after
    /// the rename where the platform allows it; if that fails the rename may
    /// not survive a power loss, but the write still counts as persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if serialising or any filesystem step fails. The
    /// in-memory snapshot is untouched either way.
    #[tracing::instrument(level = "trace", skip_all, fields(path = %self.path.display(), entries = self.entries.len()))]
    pub async fn persist(&self) -> Result<(), LedgerError> {
        let mut data = Vec::with_capacity(256 * self.entries.len().max(1));
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut data, PrettyFormatter::with_indent(b"    "));
        self.entries.serialize(&mut serializer)?;
        data.push(b'\n');

        let temp_path = self.temp_path();
        let write_error = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = fs::File::create(&temp_path).await.map_err(write_error)?;
        file.write_all(&data).await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(write_error(source));
        }

        if let Err(error) = self.sync_parent().await {
            internal!(
                level = DEBUG,
                "Could not sync the directory holding {}: {error}",
                self.path.display()
            );
        }

        Ok(())
    }

    async fn sync_parent(&self) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::File::open(parent).await?.sync_all().await
    }

    /// `.{name}.tmp` next to the ledger.
    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(
            self.path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("ledger")),
        );
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
