//! Observer notifications
//!
//! Count and view updates are deferred: mutations only mark the dispatcher
//! dirty, and [`NotificationDispatcher::flush`] pushes one batched update per
//! tick. Takeover results and raffle endings are delivered immediately.

use crate::identifiers::{CandidateId, RoleFamily, RoleId};
use crate::raffle::RaffleOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Aggregate availability pushed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCountUpdate {
    /// Available roles, including roles in released groups
    pub available_count: usize,
    /// Families with at least one available role
    pub families: Vec<RoleFamily>,
}

/// A candidate was granted a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverNotice {
    /// Winning candidate
    pub candidate: CandidateId,
    /// Role taken
    pub role_id: RoleId,
    /// Family of the role
    pub family: RoleFamily,
    /// Display name of the role
    pub role_name: String,
}

/// Receives engine events. Every method defaults to a no-op.
pub trait RoleLifecycleObserver {
    /// Batched availability update, at most once per flush.
    fn on_roles_changed(&mut self, _update: &RoleCountUpdate) {}

    /// Availability sent to a single candidate (e.g. on entering the game).
    fn on_count_sent(&mut self, _candidate: CandidateId, _update: &RoleCountUpdate) {}

    /// The candidate's own view (requests, memberships) changed.
    fn on_candidate_view_changed(&mut self, _candidate: CandidateId) {}

    /// A takeover completed.
    fn on_takeover_complete(&mut self, _notice: &TakeoverNotice) {}

    /// A raffle was won, expired without a winner, or was cancelled.
    fn on_raffle_finished(&mut self, _outcome: &RaffleOutcome) {}
}

/// Coalesces engine mutations into observer calls.
#[derive(Default)]
pub struct NotificationDispatcher {
    observers: Vec<Box<dyn RoleLifecycleObserver>>,
    dirty: bool,
    dirty_candidates: BTreeSet<CandidateId>,
    flushes: u64,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("observers", &self.observers.len())
            .field("dirty", &self.dirty)
            .field("dirty_candidates", &self.dirty_candidates.len())
            .field("flushes", &self.flushes)
            .finish()
    }
}

impl NotificationDispatcher {
    /// Create a dispatcher with no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    pub fn subscribe(&mut self, observer: Box<dyn RoleLifecycleObserver>) {
        self.observers.push(observer);
    }

    /// Request a batched update at the next flush.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Request a view update for one candidate at the next flush.
    pub fn mark_candidate_dirty(&mut self, candidate: CandidateId) {
        self.dirty_candidates.insert(candidate);
    }

    /// Whether a batched update is pending
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of batched updates delivered so far
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Deliver pending updates. `compute` runs only if a batched update is due.
    ///
    /// Returns `true` if a batched count update was pushed.
    pub fn flush(&mut self, compute: impl FnOnce() -> RoleCountUpdate) -> bool {
        let candidates = std::mem::take(&mut self.dirty_candidates);
        for candidate in candidates {
            for observer in &mut self.observers {
                observer.on_candidate_view_changed(candidate);
            }
        }

        if !self.dirty {
            return false;
        }
        self.dirty = false;
        self.flushes += 1;

        let update = compute();
        for observer in &mut self.observers {
            observer.on_roles_changed(&update);
        }
        true
    }

    /// Send the current availability to one candidate, immediately.
    pub fn send_count_to(&mut self, candidate: CandidateId, update: &RoleCountUpdate) {
        for observer in &mut self.observers {
            observer.on_count_sent(candidate, update);
        }
    }

    /// Deliver a takeover result, immediately.
    pub fn notify_winner(&mut self, notice: &TakeoverNotice) {
        for observer in &mut self.observers {
            observer.on_takeover_complete(notice);
        }
    }

    /// Deliver a raffle ending, immediately.
    pub fn notify_raffle_finished(&mut self, outcome: &RaffleOutcome) {
        for observer in &mut self.observers {
            observer.on_raffle_finished(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Default)]
    struct Counts {
        changed: usize,
        views: Vec<CandidateId>,
    }

    struct Recorder(Arc<Mutex<Counts>>);

    impl RoleLifecycleObserver for Recorder {
        fn on_roles_changed(&mut self, _update: &RoleCountUpdate) {
            self.0.lock().changed += 1;
        }

        fn on_candidate_view_changed(&mut self, candidate: CandidateId) {
            self.0.lock().views.push(candidate);
        }
    }

    #[test]
    fn test_flush_coalesces() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut dispatcher = NotificationDispatcher::new();
        dispatcher.subscribe(Box::new(Recorder(Arc::clone(&counts))));

        let candidate = CandidateId::from_uuid(Uuid::from_u128(1));
        for _ in 0..50 {
            dispatcher.mark_dirty();
            dispatcher.mark_candidate_dirty(candidate);
        }

        let mut computed = 0;
        assert!(dispatcher.flush(|| {
            computed += 1;
            RoleCountUpdate::default()
        }));
        assert!(!dispatcher.flush(|| {
            computed += 1;
            RoleCountUpdate::default()
        }));

        assert_eq!(computed, 1);
        let counts = counts.lock();
        assert_eq!(counts.changed, 1);
        assert_eq!(counts.views, vec![candidate]);
        assert_eq!(dispatcher.flush_count(), 1);
    }
}
