//! Per-role raffles
//!
//! A raffle opens when the first candidate joins a raffle-mode role and runs
//! a countdown. Each candidate joining for the first time while others are
//! already waiting extends the countdown by the join extension, until the
//! cumulative extension reaches `max - initial`. On expiry the decider orders
//! the members and the first successful takeover wins. A raffle whose last
//! member leaves is cancelled on the spot.
//!
//! ```text
//! Idle ──join──▶ Open ──countdown hits zero──▶ Resolved (winner | no winner)
//!                  │
//!                  └──last member leaves / role vanishes──▶ Cancelled
//! ```

use crate::decider::RaffleDecider;
use crate::error::{GhostRoleError, GhostRoleResult};
use crate::effects::RandomEffects;
use crate::identifiers::{CandidateId, RoleId};
use crate::role::{RaffleSettings, Role};
use crate::takeover::AllocationGate;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The candidate opened a new raffle
    Opened,
    /// The candidate joined; countdown extended by this much (possibly zero)
    Joined {
        /// Extension granted by this join
        extended_by: Duration,
    },
    /// The candidate was already a member
    AlreadyMember,
}

/// Why a raffle ended without resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Every member left
    Emptied,
    /// The role was unregistered, paused or moved into a group
    RoleUnavailable,
    /// The session was reset
    SessionReset,
}

/// Terminal state of a raffle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaffleOutcome {
    /// A member took the role
    Won {
        /// Raffle role
        role_id: RoleId,
        /// Winning candidate
        winner: CandidateId,
        /// Members at expiry, including the winner
        members: Vec<CandidateId>,
    },
    /// Countdown expired but no member could take the role
    NoWinner {
        /// Raffle role
        role_id: RoleId,
        /// Members at expiry
        members: Vec<CandidateId>,
    },
    /// Raffle ended before expiry
    Cancelled {
        /// Raffle role
        role_id: RoleId,
        /// Members at cancellation
        members: Vec<CandidateId>,
        /// Why it ended
        reason: CancelReason,
    },
}

impl RaffleOutcome {
    /// Role the raffle was for
    pub fn role_id(&self) -> RoleId {
        match self {
            Self::Won { role_id, .. }
            | Self::NoWinner { role_id, .. }
            | Self::Cancelled { role_id, .. } => *role_id,
        }
    }

    /// Members at the time the raffle ended
    pub fn members(&self) -> &[CandidateId] {
        match self {
            Self::Won { members, .. }
            | Self::NoWinner { members, .. }
            | Self::Cancelled { members, .. } => members,
        }
    }

    /// Winner, if any
    pub fn winner(&self) -> Option<CandidateId> {
        match self {
            Self::Won { winner, .. } => Some(*winner),
            _ => None,
        }
    }
}

/// Live raffle for one role.
#[derive(Debug, Clone)]
pub struct Raffle {
    role_id: RoleId,
    settings: RaffleSettings,
    decider: RaffleDecider,
    opened_at: Duration,
    countdown: Duration,
    cumulative_extension: Duration,
    current_members: IndexSet<CandidateId>,
    all_time_members: BTreeSet<CandidateId>,
}

impl Raffle {
    /// Open a raffle with the full initial countdown and no members.
    pub fn open(
        role_id: RoleId,
        settings: RaffleSettings,
        decider: RaffleDecider,
        now: Duration,
    ) -> Self {
        Self {
            role_id,
            countdown: settings.initial,
            settings,
            decider,
            opened_at: now,
            cumulative_extension: Duration::ZERO,
            current_members: IndexSet::new(),
            all_time_members: BTreeSet::new(),
        }
    }

    /// Add a member, extending the countdown for first-time joiners.
    pub fn join(&mut self, candidate: CandidateId) -> JoinOutcome {
        if self.current_members.contains(&candidate) {
            return JoinOutcome::AlreadyMember;
        }

        let first_time = self.all_time_members.insert(candidate);
        let others_waiting = !self.current_members.is_empty();
        self.current_members.insert(candidate);

        if !first_time || !others_waiting {
            return JoinOutcome::Joined {
                extended_by: Duration::ZERO,
            };
        }

        let headroom = self
            .settings
            .max_extension()
            .saturating_sub(self.cumulative_extension);
        let extended_by = self.settings.join_extension.min(headroom);
        self.countdown += extended_by;
        self.cumulative_extension += extended_by;

        JoinOutcome::Joined { extended_by }
    }

    /// Remove a member. Returns `true` if it was one.
    pub fn leave(&mut self, candidate: CandidateId) -> bool {
        self.current_members.shift_remove(&candidate)
    }

    /// Count down by `delta`. Returns `true` once the countdown is exhausted.
    pub fn advance(&mut self, delta: Duration) -> bool {
        self.countdown = self.countdown.saturating_sub(delta);
        self.countdown.is_zero()
    }

    /// Role the raffle is for
    pub fn role_id(&self) -> RoleId {
        self.role_id
    }

    /// Remaining time
    pub fn countdown(&self) -> Duration {
        self.countdown
    }

    /// Total extension granted so far
    pub fn cumulative_extension(&self) -> Duration {
        self.cumulative_extension
    }

    /// Session time at which the raffle opened
    pub fn opened_at(&self) -> Duration {
        self.opened_at
    }

    /// Decider resolved when the raffle opened
    pub fn decider(&self) -> RaffleDecider {
        self.decider
    }

    /// Current members in join order
    pub fn members(&self) -> &IndexSet<CandidateId> {
        &self.current_members
    }

    /// Whether the candidate is a current member
    pub fn is_member(&self, candidate: CandidateId) -> bool {
        self.current_members.contains(&candidate)
    }

    /// Whether no members remain
    pub fn is_empty(&self) -> bool {
        self.current_members.is_empty()
    }

    fn member_list(&self) -> Vec<CandidateId> {
        self.current_members.iter().copied().collect()
    }
}

/// Owns every live raffle, keyed by role id.
#[derive(Debug, Clone)]
pub struct RaffleCoordinator {
    raffles: BTreeMap<RoleId, Raffle>,
    default_decider: RaffleDecider,
}

impl Default for RaffleCoordinator {
    fn default() -> Self {
        Self::new(RaffleDecider::default())
    }
}

impl RaffleCoordinator {
    /// Create a coordinator; `default_decider` is used for unknown decider ids.
    pub fn new(default_decider: RaffleDecider) -> Self {
        Self {
            raffles: BTreeMap::new(),
            default_decider,
        }
    }

    /// Join `candidate` to the raffle for `role`, opening it if needed.
    pub fn join(
        &mut self,
        role: &Role,
        candidate: CandidateId,
        now: Duration,
    ) -> GhostRoleResult<JoinOutcome> {
        let settings = role.mode.raffle().ok_or_else(|| {
            GhostRoleError::invalid_raffle(format!("role {} is not raffle-mode", role.id))
        })?;

        let opened = !self.raffles.contains_key(&role.id);
        let raffle = match self.raffles.entry(role.id) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                let decider = RaffleDecider::from_id(&settings.decider).unwrap_or_else(|| {
                    warn!(
                        role_id = %role.id,
                        decider = %settings.decider,
                        fallback = %self.default_decider,
                        "unknown raffle decider"
                    );
                    self.default_decider
                });
                debug!(role_id = %role.id, %decider, countdown = ?settings.initial, "raffle opened");
                entry.insert(Raffle::open(role.id, settings.clone(), decider, now))
            }
        };

        let outcome = raffle.join(candidate);
        debug!(
            role_id = %role.id,
            %candidate,
            ?outcome,
            countdown = ?raffle.countdown(),
            "raffle join"
        );

        Ok(match outcome {
            JoinOutcome::Joined { .. } if opened => JoinOutcome::Opened,
            other => other,
        })
    }

    /// Remove `candidate` from the raffle. Cancels it if that empties it.
    ///
    /// Returns `None` if the candidate was not a member.
    pub fn leave(&mut self, candidate: CandidateId, role_id: RoleId) -> Option<LeaveOutcome> {
        let raffle = self.raffles.get_mut(&role_id)?;
        if !raffle.leave(candidate) {
            return None;
        }
        debug!(%role_id, %candidate, "raffle leave");

        if !raffle.is_empty() {
            return Some(LeaveOutcome::Left);
        }

        self.raffles.remove(&role_id);
        debug!(%role_id, "raffle cancelled, no members left");
        Some(LeaveOutcome::Cancelled(RaffleOutcome::Cancelled {
            role_id,
            members: vec![candidate],
            reason: CancelReason::Emptied,
        }))
    }

    /// Cancel the raffle for `role_id`, if one exists.
    pub fn cancel(&mut self, role_id: RoleId, reason: CancelReason) -> Option<RaffleOutcome> {
        let raffle = self.raffles.remove(&role_id)?;
        debug!(%role_id, ?reason, members = raffle.members().len(), "raffle cancelled");
        Some(RaffleOutcome::Cancelled {
            role_id,
            members: raffle.member_list(),
            reason,
        })
    }

    /// Advance every countdown by `delta` and resolve the expired raffles.
    ///
    /// For each expired raffle the decider orders the members, ineligible
    /// members are skipped, and the first successful takeover wins. Nothing
    /// here fails: a vanished role cancels the raffle and a raffle nobody
    /// could take resolves without a winner.
    ///
    /// A candidate wins at most one raffle per tick. Winners are withdrawn
    /// from the raffles resolved after theirs; a raffle emptied that way is
    /// cancelled.
    pub fn tick(
        &mut self,
        delta: Duration,
        random: &mut dyn RandomEffects,
        gate: &mut dyn AllocationGate,
    ) -> Vec<RaffleOutcome> {
        let expired: Vec<RoleId> = self
            .raffles
            .iter_mut()
            .filter_map(|(id, raffle)| raffle.advance(delta).then_some(*id))
            .collect();

        let mut winners = BTreeSet::new();
        let mut outcomes = Vec::with_capacity(expired.len());
        for role_id in expired {
            let Some(mut raffle) = self.raffles.remove(&role_id) else {
                continue;
            };

            let withdrawn: Vec<CandidateId> = winners
                .iter()
                .copied()
                .filter(|winner| raffle.leave(*winner))
                .collect();
            if raffle.is_empty() {
                debug!(%role_id, "raffle emptied by earlier winners this tick");
                outcomes.push(RaffleOutcome::Cancelled {
                    role_id,
                    members: withdrawn,
                    reason: CancelReason::Emptied,
                });
                continue;
            }

            let outcome = Self::resolve(raffle, random, gate);
            if let Some(winner) = outcome.winner() {
                winners.insert(winner);
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    fn resolve(
        raffle: Raffle,
        random: &mut dyn RandomEffects,
        gate: &mut dyn AllocationGate,
    ) -> RaffleOutcome {
        let role_id = raffle.role_id;
        let members = raffle.member_list();

        if !gate.role_available(role_id) {
            debug!(%role_id, "raffle role vanished before expiry");
            return RaffleOutcome::Cancelled {
                role_id,
                members,
                reason: CancelReason::RoleUnavailable,
            };
        }

        for candidate in raffle.decider.order(&raffle.current_members, random) {
            if !gate.is_eligible(candidate) {
                debug!(%role_id, %candidate, "skipping ineligible raffle member");
                continue;
            }
            match gate.try_takeover(candidate, role_id) {
                Ok(()) => {
                    info!(%role_id, %candidate, members = members.len(), "raffle won");
                    return RaffleOutcome::Won {
                        role_id,
                        winner: candidate,
                        members,
                    };
                }
                Err(err) => debug!(%role_id, %candidate, error = %err, "raffle takeover failed"),
            }
        }

        warn!(
            %role_id,
            members = members.len(),
            error = %GhostRoleError::NoWinnerFound(role_id),
            "raffle resolved without a winner"
        );
        RaffleOutcome::NoWinner { role_id, members }
    }

    /// Look up the raffle for a role
    pub fn get(&self, role_id: RoleId) -> Option<&Raffle> {
        self.raffles.get(&role_id)
    }

    /// Whether a raffle is running for the role
    pub fn contains(&self, role_id: RoleId) -> bool {
        self.raffles.contains_key(&role_id)
    }

    /// Whether the candidate is a member of the role's raffle
    pub fn is_member(&self, candidate: CandidateId, role_id: RoleId) -> bool {
        self.raffles
            .get(&role_id)
            .is_some_and(|raffle| raffle.is_member(candidate))
    }

    /// Roles whose raffles the candidate is currently in
    pub fn raffles_of(&self, candidate: CandidateId) -> Vec<RoleId> {
        self.raffles
            .iter()
            .filter(|(_, raffle)| raffle.is_member(candidate))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Iterate over live raffles in role id order
    pub fn iter(&self) -> impl Iterator<Item = &Raffle> {
        self.raffles.values()
    }

    /// Number of live raffles
    pub fn len(&self) -> usize {
        self.raffles.len()
    }

    /// Whether no raffle is running
    pub fn is_empty(&self) -> bool {
        self.raffles.is_empty()
    }

    /// Cancel everything, returning one outcome per raffle.
    pub fn cancel_all(&mut self, reason: CancelReason) -> Vec<RaffleOutcome> {
        let ids: Vec<RoleId> = self.raffles.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.cancel(id, reason))
            .collect()
    }
}

/// Result of a successful leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Others remain; the raffle keeps running
    Left,
    /// The raffle was cancelled because it emptied
    Cancelled(RaffleOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SeededRandom;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn candidate(n: u128) -> CandidateId {
        CandidateId::from_uuid(Uuid::from_u128(n))
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn raffle_role(id: u32) -> Role {
        Role::new(RoleId(id), "dragon", "Dragon")
            .with_raffle(RaffleSettings::new(secs(10), secs(5), secs(20)))
    }

    /// Gate that accepts everyone except `refuse` and counts successes.
    #[derive(Default)]
    struct TestGate {
        refuse: HashSet<CandidateId>,
        ineligible: HashSet<CandidateId>,
        vanished: HashSet<RoleId>,
        taken: Vec<(CandidateId, RoleId)>,
    }

    impl AllocationGate for TestGate {
        fn is_eligible(&self, candidate: CandidateId) -> bool {
            !self.ineligible.contains(&candidate)
        }

        fn role_available(&self, role_id: RoleId) -> bool {
            !self.vanished.contains(&role_id)
        }

        fn try_takeover(&mut self, candidate: CandidateId, role_id: RoleId) -> GhostRoleResult<()> {
            if self.refuse.contains(&candidate) || self.taken.iter().any(|(_, r)| *r == role_id) {
                return Err(GhostRoleError::already_resolved(role_id, "refused"));
            }
            self.taken.push((candidate, role_id));
            Ok(())
        }
    }

    #[test]
    fn test_extension_follows_join_sequence() {
        let mut raffle = Raffle::open(
            RoleId(1),
            RaffleSettings::new(secs(10), secs(5), secs(20)),
            RaffleDecider::Random,
            Duration::ZERO,
        );

        assert_eq!(
            raffle.join(candidate(1)),
            JoinOutcome::Joined { extended_by: Duration::ZERO }
        );
        assert_eq!(raffle.countdown(), secs(10));

        raffle.advance(secs(2));
        assert_eq!(raffle.join(candidate(2)), JoinOutcome::Joined { extended_by: secs(5) });
        assert_eq!(raffle.countdown(), secs(13));

        raffle.advance(secs(1));
        raffle.join(candidate(3));
        assert_eq!(raffle.cumulative_extension(), secs(10));
        assert_eq!(raffle.countdown(), secs(17));

        raffle.join(candidate(4));
        assert_eq!(raffle.cumulative_extension(), secs(10));
        assert_eq!(raffle.countdown(), secs(17));
    }

    #[test]
    fn test_rejoin_does_not_extend() {
        let mut raffle = Raffle::open(
            RoleId(1),
            RaffleSettings::new(secs(10), secs(5), secs(60)),
            RaffleDecider::Random,
            Duration::ZERO,
        );
        raffle.join(candidate(1));
        raffle.join(candidate(2));
        assert_eq!(raffle.cumulative_extension(), secs(5));

        assert!(raffle.leave(candidate(2)));
        assert_eq!(raffle.join(candidate(2)), JoinOutcome::Joined { extended_by: Duration::ZERO });
        assert_eq!(raffle.join(candidate(2)), JoinOutcome::AlreadyMember);
        assert_eq!(raffle.cumulative_extension(), secs(5));
    }

    #[test]
    fn test_partial_extension_clamps_to_cap() {
        let mut raffle = Raffle::open(
            RoleId(1),
            RaffleSettings::new(secs(10), secs(4), secs(16)),
            RaffleDecider::Random,
            Duration::ZERO,
        );
        raffle.join(candidate(1));
        raffle.join(candidate(2));
        assert_eq!(raffle.join(candidate(3)), JoinOutcome::Joined { extended_by: secs(2) });
        assert_eq!(raffle.cumulative_extension(), secs(6));
    }

    #[test]
    fn test_last_leave_cancels() {
        let mut coordinator = RaffleCoordinator::default();
        let role = raffle_role(1);
        assert_eq!(
            coordinator.join(&role, candidate(1), Duration::ZERO),
            Ok(JoinOutcome::Opened)
        );

        let outcome = coordinator.leave(candidate(1), role.id);
        assert!(matches!(
            outcome,
            Some(LeaveOutcome::Cancelled(RaffleOutcome::Cancelled {
                reason: CancelReason::Emptied,
                ..
            }))
        ));
        assert!(!coordinator.contains(role.id));
        assert_eq!(coordinator.leave(candidate(1), role.id), None);
    }

    #[test]
    fn test_join_rejects_non_raffle_role() {
        let mut coordinator = RaffleCoordinator::default();
        let role = Role::new(RoleId(1), "mouse", "Mouse");
        assert!(coordinator.join(&role, candidate(1), Duration::ZERO).is_err());
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_expiry_picks_first_successful_member() {
        let mut coordinator = RaffleCoordinator::default();
        let role = Role::new(RoleId(1), "dragon", "Dragon").with_raffle(
            RaffleSettings::new(secs(10), secs(5), secs(20)).with_decider("join_order"),
        );
        coordinator.join(&role, candidate(1), Duration::ZERO).ok();
        coordinator.join(&role, candidate(2), Duration::ZERO).ok();
        coordinator.join(&role, candidate(3), Duration::ZERO).ok();

        let mut gate = TestGate::default();
        gate.ineligible.insert(candidate(1));
        gate.refuse.insert(candidate(2));
        let mut random = SeededRandom::new(0);

        assert!(coordinator.tick(secs(19), &mut random, &mut gate).is_empty());
        let outcomes = coordinator.tick(secs(1), &mut random, &mut gate);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winner(), Some(candidate(3)));
        assert_eq!(gate.taken, vec![(candidate(3), role.id)]);
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_one_win_per_candidate_per_tick() {
        let mut coordinator = RaffleCoordinator::new(RaffleDecider::JoinOrder);
        for id in 1..=3 {
            coordinator.join(&raffle_role(id), candidate(1), Duration::ZERO).ok();
        }
        coordinator.join(&raffle_role(2), candidate(2), Duration::ZERO).ok();

        let mut gate = TestGate::default();
        let outcomes = coordinator.tick(secs(20), &mut SeededRandom::new(0), &mut gate);

        assert_eq!(
            gate.taken,
            vec![(candidate(1), RoleId(1)), (candidate(2), RoleId(2))]
        );
        assert!(matches!(
            outcomes.as_slice(),
            [
                RaffleOutcome::Won { .. },
                RaffleOutcome::Won { .. },
                RaffleOutcome::Cancelled { reason: CancelReason::Emptied, .. },
            ]
        ));
        assert_eq!(outcomes[2].members(), &[candidate(1)]);
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_expiry_without_winner() {
        let mut coordinator = RaffleCoordinator::default();
        let role = raffle_role(1);
        coordinator.join(&role, candidate(1), Duration::ZERO).ok();

        let mut gate = TestGate::default();
        gate.refuse.insert(candidate(1));
        let outcomes = coordinator.tick(secs(10), &mut SeededRandom::new(0), &mut gate);
        assert!(matches!(outcomes.as_slice(), [RaffleOutcome::NoWinner { .. }]));
        assert!(gate.taken.is_empty());
    }

    #[test]
    fn test_vanished_role_cancels_on_expiry() {
        let mut coordinator = RaffleCoordinator::default();
        let role = raffle_role(1);
        coordinator.join(&role, candidate(1), Duration::ZERO).ok();

        let mut gate = TestGate::default();
        gate.vanished.insert(role.id);
        let outcomes = coordinator.tick(secs(10), &mut SeededRandom::new(0), &mut gate);
        assert!(matches!(
            outcomes.as_slice(),
            [RaffleOutcome::Cancelled { reason: CancelReason::RoleUnavailable, .. }]
        ));
    }

    #[test]
    fn test_unknown_decider_uses_default() {
        let mut coordinator = RaffleCoordinator::new(RaffleDecider::JoinOrder);
        let role = Role::new(RoleId(1), "dragon", "Dragon").with_raffle(
            RaffleSettings::new(secs(10), secs(5), secs(20)).with_decider("astrology"),
        );
        coordinator.join(&role, candidate(1), Duration::ZERO).ok();
        assert_eq!(
            coordinator.get(role.id).map(Raffle::decider),
            Some(RaffleDecider::JoinOrder)
        );
    }
}
