//! What the dispatcher reports while it runs.
//!
//! The dispatcher never prints. It hands these to an [`Observer`] and the
//! hosting program decides how they look.

use std::time::Duration;

use super::{DispatchState, DispatchSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Entered a new state.
    State(DispatchState),

    /// The pending set is known.
    Pending {
        total: usize,
        already_delivered: usize,
        exhausted: usize,
    },

    /// One send failed. Reported straight away, not at the end.
    SendFailed { email: String, reason: String },

    /// The attempt happened but the ledger couldn't be written. A later run
    /// may message this recipient again.
    PersistFailed { email: String, reason: String },

    /// Emitted after every attempt.
    Progress {
        attempted: usize,
        succeeded: usize,
        total: usize,
    },

    /// Time left in the current cooldown, once per tick.
    Countdown { remaining: Duration },

    Finished(DispatchSummary),
}

pub trait Observer {
    fn observe(&mut self, event: &DispatchEvent);
}

impl<F> Observer for F
where
    F: FnMut(&DispatchEvent),
{
    fn observe(&mut self, event: &DispatchEvent) {
        self(event);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Observer for Silent {
    fn observe(&mut self, _event: &DispatchEvent) {}
}
