//! Periodic lottery
//!
//! Lottery-mode roles are not handed out on request. Requests accumulate for
//! a fixed period; when it expires every family (and every released role
//! group) is drawn in one pass:
//!
//! 1. Snapshot the available roles and the requesting candidates
//! 2. Shuffle the candidates uniformly
//! 3. Walk both lists: a failed takeover advances only the role cursor and
//!    retries the same candidate, an ineligible candidate advances only the
//!    candidate cursor, a success advances both
//!
//! Roles left over stay registered for the next period and losing requests
//! persist. A candidate that wins once is skipped for the rest of the pass.

use crate::effects::{shuffle, RandomEffects};
use crate::identifiers::{CandidateId, RoleId};
use crate::requests::RequestKey;
use crate::takeover::AllocationGate;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Snapshot of one draw: roles in id order and candidates in shuffled order.
///
/// Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotteryBatch {
    key: RequestKey,
    roles: Vec<RoleId>,
    candidates: Vec<CandidateId>,
}

/// Result of drawing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrawResult {
    /// Successful assignments in draw order
    pub winners: Vec<(CandidateId, RoleId)>,
    /// Roles whose takeover failed during the walk
    pub failed_roles: Vec<RoleId>,
    /// Roles never reached by the walk
    pub unconsumed: Vec<RoleId>,
}

impl LotteryBatch {
    /// Build a batch, shuffling `candidates` with the injected randomness.
    pub fn new(
        key: RequestKey,
        roles: Vec<RoleId>,
        mut candidates: Vec<CandidateId>,
        random: &mut dyn RandomEffects,
    ) -> Self {
        shuffle(random, &mut candidates);
        Self {
            key,
            roles,
            candidates,
        }
    }

    /// What the batch draws for
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Roles in draw order
    pub fn roles(&self) -> &[RoleId] {
        &self.roles
    }

    /// Candidates in shuffled order
    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    /// Run the two-cursor walk. Winners are added to `successful`.
    pub fn draw(
        &self,
        successful: &mut BTreeSet<CandidateId>,
        gate: &mut dyn AllocationGate,
    ) -> DrawResult {
        let mut result = DrawResult::default();
        let mut candidate_idx = 0;
        let mut role_idx = 0;

        while candidate_idx < self.candidates.len() && role_idx < self.roles.len() {
            let candidate = self.candidates[candidate_idx];
            let role_id = self.roles[role_idx];

            if successful.contains(&candidate) || !gate.is_eligible(candidate) {
                debug!(%candidate, "lottery candidate skipped");
                candidate_idx += 1;
                continue;
            }

            match gate.try_takeover(candidate, role_id) {
                Ok(()) => {
                    successful.insert(candidate);
                    result.winners.push((candidate, role_id));
                    candidate_idx += 1;
                    role_idx += 1;
                }
                Err(err) => {
                    debug!(%role_id, %candidate, error = %err, "lottery takeover failed");
                    result.failed_roles.push(role_id);
                    role_idx += 1;
                }
            }
        }

        result.unconsumed = self.roles[role_idx..].to_vec();
        result
    }
}

/// Lottery period timing.
#[derive(Debug, Clone)]
pub struct LotteryScheduler {
    period: Duration,
    started_at: Duration,
    expires_at: Duration,
    passes: u64,
}

impl LotteryScheduler {
    /// Create a scheduler. The first pass is due immediately.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            started_at: Duration::ZERO,
            expires_at: Duration::ZERO,
            passes: 0,
        }
    }

    /// Whether the current period has expired at `now`
    pub fn is_due(&self, now: Duration) -> bool {
        now >= self.expires_at
    }

    /// Begin a new period at `now`.
    pub fn start_period(&mut self, now: Duration) {
        self.started_at = now;
        self.expires_at = now + self.period;
        self.passes += 1;
        debug!(started_at = ?now, expires_at = ?self.expires_at, "lottery period started");
    }

    /// Period length
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Session time the current period started
    pub fn started_at(&self) -> Duration {
        self.started_at
    }

    /// Session time the current period expires
    pub fn expires_at(&self) -> Duration {
        self.expires_at
    }

    /// Number of completed passes
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Make the next pass due immediately.
    pub fn reset(&mut self) {
        self.started_at = Duration::ZERO;
        self.expires_at = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SeededRandom;
    use crate::error::{GhostRoleError, GhostRoleResult};
    use crate::identifiers::RoleFamily;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn candidate(n: u128) -> CandidateId {
        CandidateId::from_uuid(Uuid::from_u128(n))
    }

    #[derive(Default)]
    struct TestGate {
        ineligible: HashSet<CandidateId>,
        broken_roles: HashSet<RoleId>,
        taken: HashSet<RoleId>,
    }

    impl AllocationGate for TestGate {
        fn is_eligible(&self, candidate: CandidateId) -> bool {
            !self.ineligible.contains(&candidate)
        }

        fn role_available(&self, role_id: RoleId) -> bool {
            !self.taken.contains(&role_id)
        }

        fn try_takeover(&mut self, _candidate: CandidateId, role_id: RoleId) -> GhostRoleResult<()> {
            if self.broken_roles.contains(&role_id) || !self.taken.insert(role_id) {
                return Err(GhostRoleError::already_resolved(role_id, "gone"));
            }
            Ok(())
        }
    }

    fn batch(roles: &[u32], candidates: &[u128], seed: u64) -> LotteryBatch {
        LotteryBatch::new(
            RequestKey::Family(RoleFamily::new("mouse")),
            roles.iter().map(|r| RoleId(*r)).collect(),
            candidates.iter().map(|c| candidate(*c)).collect(),
            &mut SeededRandom::new(seed),
        )
    }

    #[test]
    fn test_failed_takeover_retries_same_candidate() {
        let batch = batch(&[1, 2, 3], &[1], 0);
        let mut gate = TestGate::default();
        gate.broken_roles.insert(RoleId(1));

        let result = batch.draw(&mut BTreeSet::new(), &mut gate);
        assert_eq!(result.winners, vec![(candidate(1), RoleId(2))]);
        assert_eq!(result.failed_roles, vec![RoleId(1)]);
        assert_eq!(result.unconsumed, vec![RoleId(3)]);
    }

    #[test]
    fn test_ineligible_candidate_is_skipped() {
        let batch = batch(&[1], &[1, 2], 5);
        let first = batch.candidates()[0];
        let second = batch.candidates()[1];
        let mut gate = TestGate::default();
        gate.ineligible.insert(first);

        let result = batch.draw(&mut BTreeSet::new(), &mut gate);
        assert_eq!(result.winners, vec![(second, RoleId(1))]);
    }

    #[test]
    fn test_previous_winner_is_skipped() {
        let batch = batch(&[1, 2], &[1, 2], 9);
        let mut successful = BTreeSet::from([candidate(1)]);

        let result = batch.draw(&mut successful, &mut TestGate::default());
        assert_eq!(result.winners, vec![(candidate(2), RoleId(1))]);
        assert_eq!(result.unconsumed, vec![RoleId(2)]);
        assert!(successful.contains(&candidate(2)));
    }

    #[test]
    fn test_more_roles_than_candidates() {
        let batch = batch(&[1, 2, 3, 4], &[1, 2], 1);
        let result = batch.draw(&mut BTreeSet::new(), &mut TestGate::default());
        assert_eq!(result.winners.len(), 2);
        assert_eq!(result.unconsumed, vec![RoleId(3), RoleId(4)]);
    }

    #[test]
    fn test_same_seed_same_permutation() {
        let a = batch(&[1], &[1, 2, 3, 4, 5, 6], 42);
        let b = batch(&[1], &[1, 2, 3, 4, 5, 6], 42);
        assert_eq!(a.candidates(), b.candidates());
    }

    #[test]
    fn test_scheduler_timing() {
        let mut scheduler = LotteryScheduler::new(Duration::from_secs(30));
        assert!(scheduler.is_due(Duration::ZERO));

        scheduler.start_period(Duration::from_secs(1));
        assert_eq!(scheduler.expires_at(), Duration::from_secs(31));
        assert!(!scheduler.is_due(Duration::from_secs(30)));
        assert!(scheduler.is_due(Duration::from_secs(31)));

        scheduler.reset();
        assert!(scheduler.is_due(Duration::ZERO));
    }
}
