//! Raffle winner selection strategies.

use crate::effects::{shuffle, RandomEffects};
use crate::identifiers::CandidateId;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Orders raffle members into the sequence in which takeover is attempted.
///
/// Resolved from a configuration id when a raffle opens and stored on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RaffleDecider {
    /// Uniformly random order
    #[default]
    Random,
    /// Members in the order they joined
    JoinOrder,
}

impl RaffleDecider {
    /// Id of the default decider.
    pub const DEFAULT_ID: &'static str = "default";

    /// Resolve a decider from its configuration id.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "default" | "random" | "rng" => Some(Self::Random),
            "join_order" | "join-order" | "first_joined" => Some(Self::JoinOrder),
            _ => None,
        }
    }

    /// Canonical configuration id
    pub fn id(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::JoinOrder => "join_order",
        }
    }

    /// Produce the takeover attempt order for `members`.
    pub fn order(
        &self,
        members: &IndexSet<CandidateId>,
        random: &mut dyn RandomEffects,
    ) -> Vec<CandidateId> {
        let mut order: Vec<CandidateId> = members.iter().copied().collect();
        if matches!(self, Self::Random) {
            shuffle(random, &mut order);
        }
        order
    }
}

impl fmt::Display for RaffleDecider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SeededRandom;
    use uuid::Uuid;

    fn members(n: u128) -> IndexSet<CandidateId> {
        (1..=n)
            .map(|i| CandidateId::from_uuid(Uuid::from_u128(i)))
            .collect()
    }

    #[test]
    fn test_from_id() {
        assert_eq!(RaffleDecider::from_id("default"), Some(RaffleDecider::Random));
        assert_eq!(RaffleDecider::from_id(" JOIN_ORDER "), Some(RaffleDecider::JoinOrder));
        assert_eq!(RaffleDecider::from_id("weighted"), None);
    }

    #[test]
    fn test_join_order_keeps_insertion() {
        let set = members(5);
        let order = RaffleDecider::JoinOrder.order(&set, &mut SeededRandom::new(3));
        assert_eq!(order, set.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_random_is_a_permutation() {
        let set = members(8);
        let order = RaffleDecider::Random.order(&set, &mut SeededRandom::new(3));
        assert_eq!(order.len(), 8);
        assert!(order.iter().all(|c| set.contains(c)));
    }
}
