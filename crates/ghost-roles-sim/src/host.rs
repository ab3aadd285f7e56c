//! Simulated host
//!
//! The host owns the "game objects" behind roles. It implements the takeover
//! half of the contract and records what the engine reports back.

use ghost_roles::{
    CandidateId, RaffleOutcome, Role, RoleCountUpdate, RoleFamily, RoleId,
    RoleLifecycleObserver, TakeoverEffects, TakeoverNotice,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Game-side state shared between the host and the runner.
#[derive(Debug, Default)]
pub struct HostWorld {
    controlled: BTreeMap<RoleId, CandidateId>,
    refused_families: BTreeSet<RoleFamily>,
    refusals: u64,
}

impl HostWorld {
    /// Create a world refusing takeovers for `refused_families`.
    pub fn new(refused_families: impl IntoIterator<Item = RoleFamily>) -> Self {
        Self {
            refused_families: refused_families.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Who controls each taken role
    pub fn controlled(&self) -> &BTreeMap<RoleId, CandidateId> {
        &self.controlled
    }

    /// Takeovers the host refused
    pub fn refusals(&self) -> u64 {
        self.refusals
    }
}

/// [`TakeoverEffects`] over a shared [`HostWorld`].
#[derive(Debug, Clone)]
pub struct SimHost {
    world: Arc<Mutex<HostWorld>>,
}

impl SimHost {
    /// Wrap a shared world
    pub fn new(world: Arc<Mutex<HostWorld>>) -> Self {
        Self { world }
    }
}

impl TakeoverEffects for SimHost {
    fn try_takeover(&mut self, candidate: CandidateId, role: &Role) -> bool {
        let mut world = self.world.lock();
        if world.refused_families.contains(&role.family) {
            world.refusals += 1;
            debug!(role_id = %role.id, %candidate, "host refused takeover");
            return false;
        }
        if let Some(owner) = world.controlled.get(&role.id) {
            warn!(role_id = %role.id, %owner, %candidate, "role already controlled");
            return false;
        }
        world.controlled.insert(role.id, candidate);
        true
    }
}

/// Counters collected from engine notifications.
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    /// Batched count updates received
    pub count_updates: u64,
    /// Point-to-point count updates received
    pub counts_sent: u64,
    /// Per-candidate view invalidations received
    pub view_updates: u64,
    /// Takeovers in completion order
    pub takeovers: Vec<TakeoverNotice>,
    /// Raffles won
    pub raffles_won: u64,
    /// Raffles expired without a winner
    pub raffles_without_winner: u64,
    /// Raffles cancelled before expiry
    pub raffles_cancelled: u64,
}

/// Observer feeding a shared [`SimStats`].
pub struct StatsObserver {
    stats: Arc<Mutex<SimStats>>,
}

impl StatsObserver {
    /// Record into `stats`
    pub fn new(stats: Arc<Mutex<SimStats>>) -> Self {
        Self { stats }
    }
}

impl RoleLifecycleObserver for StatsObserver {
    fn on_roles_changed(&mut self, _update: &RoleCountUpdate) {
        self.stats.lock().count_updates += 1;
    }

    fn on_count_sent(&mut self, _candidate: CandidateId, _update: &RoleCountUpdate) {
        self.stats.lock().counts_sent += 1;
    }

    fn on_candidate_view_changed(&mut self, _candidate: CandidateId) {
        self.stats.lock().view_updates += 1;
    }

    fn on_takeover_complete(&mut self, notice: &TakeoverNotice) {
        self.stats.lock().takeovers.push(notice.clone());
    }

    fn on_raffle_finished(&mut self, outcome: &RaffleOutcome) {
        let mut stats = self.stats.lock();
        match outcome {
            RaffleOutcome::Won { .. } => stats.raffles_won += 1,
            RaffleOutcome::NoWinner { .. } => stats.raffles_without_winner += 1,
            RaffleOutcome::Cancelled { .. } => stats.raffles_cancelled += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_host_refuses_listed_families() {
        let world = Arc::new(Mutex::new(HostWorld::new([RoleFamily::new("dragon")])));
        let mut host = SimHost::new(Arc::clone(&world));
        let alice = CandidateId::from_uuid(Uuid::from_u128(1));

        assert!(!host.try_takeover(alice, &Role::new(RoleId(1), "dragon", "Dragon")));
        assert!(host.try_takeover(alice, &Role::new(RoleId(2), "mouse", "Mouse")));
        assert!(!host.try_takeover(alice, &Role::new(RoleId(2), "mouse", "Mouse")));

        let world = world.lock();
        assert_eq!(world.refusals(), 1);
        assert_eq!(world.controlled().get(&RoleId(2)), Some(&alice));
    }
}
