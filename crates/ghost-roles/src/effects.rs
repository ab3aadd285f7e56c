//! Effects injected by the host
//!
//! - `RandomEffects`: randomness for lottery shuffles and raffle deciders
//! - `TakeoverEffects`: the host's half of the takeover contract
//!
//! The engine never reaches for global randomness or game state directly.
//! Tests and the simulator inject [`SeededRandom`] so draws are reproducible.

use crate::identifiers::CandidateId;
use crate::role::Role;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Source of randomness for shuffles and deciders.
pub trait RandomEffects {
    /// Borrow the underlying generator.
    fn rng(&mut self) -> &mut dyn RngCore;
}

/// Shuffle `items` uniformly using the injected randomness.
pub fn shuffle<T>(random: &mut dyn RandomEffects, items: &mut [T]) {
    items.shuffle(random.rng());
}

/// Deterministic randomness for tests and replays
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
}

impl SeededRandom {
    /// Create a generator from a seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RandomEffects for SeededRandom {
    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

/// Randomness seeded from the operating system
#[derive(Debug)]
pub struct EntropyRandom {
    rng: StdRng,
}

impl Default for EntropyRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyRandom {
    /// Create a generator seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomEffects for EntropyRandom {
    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

/// Grants control of a role's game object to a candidate.
///
/// Implemented by the host. Returning `false` means the object could not be
/// taken (already controlled, deleted mid-tick, ...). The engine calls this at
/// most once per successful assignment and never again for the same role id
/// after a success.
pub trait TakeoverEffects {
    /// Try to hand `role` to `candidate`.
    fn try_takeover(&mut self, candidate: CandidateId, role: &Role) -> bool;
}

impl<F> TakeoverEffects for F
where
    F: FnMut(CandidateId, &Role) -> bool,
{
    fn try_takeover(&mut self, candidate: CandidateId, role: &Role) -> bool {
        self(candidate, role)
    }
}
