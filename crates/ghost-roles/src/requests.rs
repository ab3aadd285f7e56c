//! Candidate request tracking
//!
//! Maps each candidate to its connection status, its pending lottery
//! requests (per family or per role group) and the raffles it has joined.
//! Raffle membership itself is owned by [`RaffleCoordinator`]; the tracker
//! mirrors it so a candidate can be cleared in one call.

use crate::identifiers::{CandidateId, GroupId, RoleFamily, RoleId};
use crate::raffle::{LeaveOutcome, RaffleCoordinator, RaffleOutcome};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Connection status of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateStatus {
    /// Connected and in game as a spectator; may receive roles
    InGame,
    /// Connected but not in a state that may receive roles
    Connected,
    /// Gone
    Disconnected,
}

impl CandidateStatus {
    /// Whether roles may be assigned in this status
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::InGame)
    }
}

/// What a pending lottery request is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestKey {
    /// Any role of the family drawn by the periodic lottery
    Family(RoleFamily),
    /// A released role group
    Group(GroupId),
}

#[derive(Debug, Clone)]
struct CandidateRecord {
    status: CandidateStatus,
    admin: bool,
    requests: BTreeSet<RequestKey>,
    raffles: BTreeSet<RoleId>,
}

impl CandidateRecord {
    fn new(status: CandidateStatus) -> Self {
        Self {
            status,
            admin: false,
            requests: BTreeSet::new(),
            raffles: BTreeSet::new(),
        }
    }
}

/// Per-candidate requests and raffle memberships.
#[derive(Debug, Clone, Default)]
pub struct CandidateRequestTracker {
    candidates: BTreeMap<CandidateId, CandidateRecord>,
}

impl CandidateRequestTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status change, returning the previous status if known.
    pub fn set_status(
        &mut self,
        candidate: CandidateId,
        status: CandidateStatus,
    ) -> Option<CandidateStatus> {
        match self.candidates.get_mut(&candidate) {
            Some(record) => Some(std::mem::replace(&mut record.status, status)),
            None => {
                self.candidates
                    .insert(candidate, CandidateRecord::new(status));
                None
            }
        }
    }

    /// Current status; unknown candidates count as disconnected.
    pub fn status(&self, candidate: CandidateId) -> CandidateStatus {
        self.candidates
            .get(&candidate)
            .map_or(CandidateStatus::Disconnected, |record| record.status)
    }

    /// Whether the candidate may receive roles right now
    pub fn is_eligible(&self, candidate: CandidateId) -> bool {
        self.status(candidate).is_eligible()
    }

    /// Grant or revoke admin rights.
    pub fn set_admin(&mut self, candidate: CandidateId, admin: bool) {
        self.candidates
            .entry(candidate)
            .or_insert_with(|| CandidateRecord::new(CandidateStatus::Disconnected))
            .admin = admin;
    }

    /// Whether the candidate holds admin rights
    pub fn is_admin(&self, candidate: CandidateId) -> bool {
        self.candidates
            .get(&candidate)
            .is_some_and(|record| record.admin)
    }

    /// Add a request. Returns `true` only if it was not already pending.
    pub fn add_request(&mut self, candidate: CandidateId, key: RequestKey) -> bool {
        let Some(record) = self.candidates.get_mut(&candidate) else {
            return false;
        };
        let added = record.requests.insert(key);
        if added {
            debug!(%candidate, "lottery request added");
        }
        added
    }

    /// Remove a request. Returns `true` only if it was pending.
    pub fn remove_request(&mut self, candidate: CandidateId, key: &RequestKey) -> bool {
        self.candidates
            .get_mut(&candidate)
            .is_some_and(|record| record.requests.remove(key))
    }

    /// Whether the request is pending
    pub fn has_request(&self, candidate: CandidateId, key: &RequestKey) -> bool {
        self.candidates
            .get(&candidate)
            .is_some_and(|record| record.requests.contains(key))
    }

    /// Pending requests of a candidate
    pub fn requests_of(&self, candidate: CandidateId) -> Vec<RequestKey> {
        self.candidates
            .get(&candidate)
            .map(|record| record.requests.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Candidates with a pending request for `key`, in id order.
    pub fn requesters(&self, key: &RequestKey) -> Vec<CandidateId> {
        self.candidates
            .iter()
            .filter(|(_, record)| record.requests.contains(key))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of candidates requesting `key`
    pub fn requester_count(&self, key: &RequestKey) -> usize {
        self.candidates
            .values()
            .filter(|record| record.requests.contains(key))
            .count()
    }

    /// Mirror a raffle join. Returns `true` if newly recorded.
    pub fn add_raffle(&mut self, candidate: CandidateId, role_id: RoleId) -> bool {
        self.candidates
            .get_mut(&candidate)
            .is_some_and(|record| record.raffles.insert(role_id))
    }

    /// Forget a raffle membership. Returns `true` if it was recorded.
    pub fn remove_raffle(&mut self, candidate: CandidateId, role_id: RoleId) -> bool {
        self.candidates
            .get_mut(&candidate)
            .is_some_and(|record| record.raffles.remove(&role_id))
    }

    /// Raffles the candidate has joined
    pub fn raffles_of(&self, candidate: CandidateId) -> Vec<RoleId> {
        self.candidates
            .get(&candidate)
            .map(|record| record.raffles.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove the candidate from every request and every raffle.
    ///
    /// Raffle removal goes through [`RaffleCoordinator::leave`], so a raffle
    /// the candidate was the last member of is cancelled here. Returns those
    /// cancellations along with whether anything changed.
    pub fn clear_all(
        &mut self,
        candidate: CandidateId,
        raffles: &mut RaffleCoordinator,
    ) -> (bool, Vec<RaffleOutcome>) {
        let Some(record) = self.candidates.get_mut(&candidate) else {
            return (false, Vec::new());
        };

        let changed = !record.requests.is_empty() || !record.raffles.is_empty();
        record.requests.clear();
        let joined = std::mem::take(&mut record.raffles);

        let cancelled = joined
            .into_iter()
            .filter_map(|role_id| match raffles.leave(candidate, role_id) {
                Some(LeaveOutcome::Cancelled(outcome)) => Some(outcome),
                _ => None,
            })
            .collect();

        if changed {
            debug!(%candidate, "cleared all requests");
        }
        (changed, cancelled)
    }

    /// Drop requests for which `keep` returns `false`. Returns affected candidates.
    pub fn retain_requests(&mut self, keep: impl Fn(&RequestKey) -> bool) -> Vec<CandidateId> {
        let mut affected = Vec::new();
        for (id, record) in &mut self.candidates {
            let before = record.requests.len();
            record.requests.retain(|key| keep(key));
            if record.requests.len() != before {
                affected.push(*id);
            }
        }
        affected
    }

    /// Forget a candidate entirely.
    pub fn remove_candidate(&mut self, candidate: CandidateId) -> bool {
        self.candidates.remove(&candidate).is_some()
    }

    /// Whether the candidate is known
    pub fn contains(&self, candidate: CandidateId) -> bool {
        self.candidates.contains_key(&candidate)
    }

    /// Drop all request and raffle state, keeping statuses and admin rights.
    pub fn clear(&mut self) {
        for record in self.candidates.values_mut() {
            record.requests.clear();
            record.raffles.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{RaffleSettings, Role};
    use std::time::Duration;
    use uuid::Uuid;

    fn candidate(n: u128) -> CandidateId {
        CandidateId::from_uuid(Uuid::from_u128(n))
    }

    fn family(name: &str) -> RequestKey {
        RequestKey::Family(RoleFamily::new(name))
    }

    #[test]
    fn test_add_request_is_idempotent() {
        let mut tracker = CandidateRequestTracker::new();
        tracker.set_status(candidate(1), CandidateStatus::InGame);

        assert!(tracker.add_request(candidate(1), family("mouse")));
        assert!(!tracker.add_request(candidate(1), family("mouse")));
        assert_eq!(tracker.requests_of(candidate(1)), vec![family("mouse")]);

        assert!(tracker.remove_request(candidate(1), &family("mouse")));
        assert!(!tracker.remove_request(candidate(1), &family("mouse")));
    }

    #[test]
    fn test_unknown_candidate_is_ineligible() {
        let mut tracker = CandidateRequestTracker::new();
        assert_eq!(tracker.status(candidate(9)), CandidateStatus::Disconnected);
        assert!(!tracker.add_request(candidate(9), family("mouse")));
    }

    #[test]
    fn test_requesters_in_id_order() {
        let mut tracker = CandidateRequestTracker::new();
        for n in [3, 1, 2] {
            tracker.set_status(candidate(n), CandidateStatus::InGame);
            tracker.add_request(candidate(n), family("mouse"));
        }
        assert_eq!(
            tracker.requesters(&family("mouse")),
            vec![candidate(1), candidate(2), candidate(3)]
        );
        assert_eq!(tracker.requester_count(&family("rat")), 0);
    }

    #[test]
    fn test_clear_all_leaves_raffles() {
        let mut tracker = CandidateRequestTracker::new();
        let mut raffles = RaffleCoordinator::default();
        let settings = RaffleSettings::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            Duration::from_secs(20),
        );
        let solo = Role::new(RoleId(1), "dragon", "Dragon").with_raffle(settings.clone());
        let shared = Role::new(RoleId(2), "dragon", "Dragon").with_raffle(settings);

        for n in [1, 2] {
            tracker.set_status(candidate(n), CandidateStatus::InGame);
        }
        raffles.join(&solo, candidate(1), Duration::ZERO).ok();
        tracker.add_raffle(candidate(1), solo.id);
        for n in [1, 2] {
            raffles.join(&shared, candidate(n), Duration::ZERO).ok();
            tracker.add_raffle(candidate(n), shared.id);
        }
        tracker.add_request(candidate(1), family("mouse"));

        let (changed, cancelled) = tracker.clear_all(candidate(1), &mut raffles);
        assert!(changed);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].role_id(), solo.id);
        assert!(raffles.contains(shared.id));
        assert!(!raffles.is_member(candidate(1), shared.id));
        assert!(tracker.requests_of(candidate(1)).is_empty());
        assert!(tracker.raffles_of(candidate(1)).is_empty());

        let (changed, _) = tracker.clear_all(candidate(1), &mut raffles);
        assert!(!changed);
    }

    #[test]
    fn test_retain_requests() {
        let mut tracker = CandidateRequestTracker::new();
        tracker.set_status(candidate(1), CandidateStatus::InGame);
        tracker.add_request(candidate(1), family("mouse"));
        tracker.add_request(candidate(1), RequestKey::Group(GroupId(4)));

        let affected = tracker.retain_requests(|key| matches!(key, RequestKey::Family(_)));
        assert_eq!(affected, vec![candidate(1)]);
        assert_eq!(tracker.requests_of(candidate(1)), vec![family("mouse")]);
    }
}
