//! Batch Dispatcher: walks the pending set through compose, send and
//! record, pausing between batches.
//!
//! ```text
//! Idle -> ComputingPending -> Sending <-> CoolingDown
//!                 |              |
//!                 +-----------> Done
//! ```
//!
//! Exactly one pass is made over the pending set. An address that fails is
//! not retried in the same run; the next run picks it up from the ledger.

pub mod events;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use courier_common::{RecipientRecord, internal, tracing};
use courier_ledger::{DeliveryOutcome, Ledger};
use serde::{Deserialize, Serialize};

pub use self::events::{DispatchEvent, Observer, Silent};
use crate::{Composer, DispatchError, Transport, source};

/// Pacing and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Sends per batch before a cooldown. Zero disables pacing.
    ///
    /// Default: 80
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches.
    ///
    /// Default: 600 seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// How often a cooldown reports the time left.
    ///
    /// Default: 1 second
    #[serde(default = "default_countdown_tick_secs")]
    pub countdown_tick_secs: u64,

    /// Stop retrying an address after this many recorded failures.
    ///
    /// Default: unlimited
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cooldown_secs: default_cooldown_secs(),
            countdown_tick_secs: default_countdown_tick_secs(),
            max_attempts: None,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// A zero tick reports once per cooldown.
    #[must_use]
    pub const fn countdown_tick(&self) -> Duration {
        if self.countdown_tick_secs == 0 {
            self.cooldown()
        } else {
            Duration::from_secs(self.countdown_tick_secs)
        }
    }

    /// Whether a cooldown is due after `attempted` sends with more to go.
    const fn cooldown_due(&self, attempted: usize, total: usize) -> bool {
        self.batch_size > 0 && attempted % self.batch_size == 0 && attempted < total
    }
}

const fn default_batch_size() -> usize {
    80
}

const fn default_cooldown_secs() -> u64 {
    600
}

const fn default_countdown_tick_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchState {
    #[default]
    Idle,
    ComputingPending,
    Sending,
    CoolingDown,
    Done,
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    /// Size of the pending set at the start of the run.
    pub total_pending: usize,
    pub cooldowns: usize,
    pub persist_failures: usize,
    /// Addresses skipped for having used up their attempts.
    pub exhausted: usize,
}

impl DispatchSummary {
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// Drives one run. Owns the ledger snapshot for the run's duration.
pub struct Dispatcher<T> {
    transport: T,
    composer: Composer,
    sender: String,
    config: DispatchConfig,
    ledger: Ledger,
    state: DispatchState,
}

impl<T: Transport> Dispatcher<T> {
    /// `sender` is the From address. The transport is expected to hold
    /// credentials that have already been checked.
    pub fn new(
        transport: T,
        composer: Composer,
        sender: impl Into<String>,
        config: DispatchConfig,
        ledger_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            composer,
            sender: sender.into(),
            config,
            ledger: Ledger::empty(ledger_path),
            state: DispatchState::Idle,
        }
    }

    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.state
    }

    /// The ledger snapshot. Empty until a run has loaded it.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn enter(&mut self, state: DispatchState, observer: &mut impl Observer) {
        internal!(level = DEBUG, "Dispatcher {:?} -> {:?}", self.state, state);
        self.state = state;
        observer.observe(&DispatchEvent::State(state));
    }

    /// Sends to everyone on the list at `source` that the ledger doesn't
    /// already show as delivered.
    ///
    /// Every attempt is written to the ledger before the next one starts.
    /// Send failures and ledger write failures are reported through
    /// `observer` and the run carries on.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Input`] if the recipient list can't be used
    /// - [`DispatchError::Ledger`] if the ledger exists but can't be loaded
    /// - [`DispatchError::AlreadyRun`] on a second call
    ///
    /// In the first two cases nothing has been sent or written.
    #[tracing::instrument(level = "info", skip_all, fields(source = %source.as_ref().display(), ledger = %self.ledger.path().display()))]
    pub async fn run(
        &mut self,
        source: impl AsRef<Path>,
        observer: &mut impl Observer,
    ) -> Result<DispatchSummary, DispatchError> {
        if self.state != DispatchState::Idle {
            return Err(DispatchError::AlreadyRun);
        }

        self.enter(DispatchState::ComputingPending, observer);

        let recipients = source::load(source).await?;
        self.ledger = Ledger::load(self.ledger.path()).await?;
        let pending = self.ledger.pending(&recipients, self.config.max_attempts);

        for email in pending.exhausted() {
            internal!(
                level = WARN,
                "Skipping {email}: {} failed attempts recorded",
                self.ledger.failures(email)
            );
        }

        let mut summary = DispatchSummary {
            total_pending: pending.len(),
            exhausted: pending.exhausted().len(),
            ..DispatchSummary::default()
        };

        observer.observe(&DispatchEvent::Pending {
            total: pending.len(),
            already_delivered: pending.already_delivered(),
            exhausted: pending.exhausted().len(),
        });

        if pending.is_empty() {
            internal!(level = INFO, "Nothing to send");
        } else {
            self.enter(DispatchState::Sending, observer);

            for (email, recipient) in pending {
                self.attempt(&email, &recipient, &mut summary, observer).await;

                if self.config.cooldown_due(summary.attempted, summary.total_pending) {
                    self.cool_down(observer).await;
                    summary.cooldowns += 1;
                    self.enter(DispatchState::Sending, observer);
                }
            }
        }

        self.enter(DispatchState::Done, observer);
        internal!(
            level = INFO,
            "Dispatch finished: {}/{} delivered",
            summary.succeeded,
            summary.total_pending
        );
        observer.observe(&DispatchEvent::Finished(summary));

        Ok(summary)
    }

    /// Compose, send, record, persist, report.
    async fn attempt(
        &mut self,
        email: &str,
        recipient: &RecipientRecord,
        summary: &mut DispatchSummary,
        observer: &mut impl Observer,
    ) {
        let result = match self.composer.compose(recipient, &self.sender) {
            Ok(message) => self.transport.send(email, &message).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(()) => DeliveryOutcome::delivered(recipient),
            Err(e) => DeliveryOutcome::failed(recipient, e.to_string()),
        };

        self.ledger.record(outcome);

        if let Err(e) = self.ledger.persist().await {
            tracing::error!(%email, "Failed to persist ledger: {e}");
            summary.persist_failures += 1;
            observer.observe(&DispatchEvent::PersistFailed {
                email: email.to_string(),
                reason: e.to_string(),
            });
        }

        summary.attempted += 1;
        match result {
            Ok(()) => {
                summary.succeeded += 1;
                internal!(level = DEBUG, "Delivered to {email}");
            }
            Err(e) => {
                tracing::warn!(%email, "Delivery failed: {e}");
                observer.observe(&DispatchEvent::SendFailed {
                    email: email.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        observer.observe(&DispatchEvent::Progress {
            attempted: summary.attempted,
            succeeded: summary.succeeded,
            total: summary.total_pending,
        });
    }

    async fn cool_down(&mut self, observer: &mut impl Observer) {
        self.enter(DispatchState::CoolingDown, observer);

        let tick = self.config.countdown_tick();
        let mut remaining = self.config.cooldown();
        internal!(level = INFO, "Cooling down for {remaining:?}");

        while !remaining.is_zero() {
            observer.observe(&DispatchEvent::Countdown { remaining });

            let step = tick.min(remaining);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }
}
