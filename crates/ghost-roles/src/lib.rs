//! Ghost Roles - Fair Allocation of Revocable Roles
//!
//! This crate distributes a shared, time-bounded pool of roles to a changing
//! population of waiting candidates during a tick-driven game session.
//!
//! # Allocation Modes
//!
//! - `FirstComeFirstServe`: requests queue per family and are drawn by a
//!   periodic lottery (shuffle, then greedy two-cursor match)
//! - `Immediate`: the first request takes the role
//! - `Raffle`: a per-role countdown, extended by new joiners up to a cap,
//!   resolved by a pluggable decider
//!
//! Admins may also bundle roles into role groups, which are drawn by their
//! own lottery ahead of the family lotteries.
//!
//! # Guarantees
//!
//! - At most one takeover ever succeeds per role id
//! - Raffle extension never exceeds `max - initial`
//! - Requests are idempotent
//! - Nothing on the tick path fails: per-candidate and per-role failures are
//!   logged and skipped
//!
//! # Example
//!
//! ```
//! use ghost_roles::{
//!     CandidateId, CandidateStatus, EngineConfig, GhostRoleEngine, Role, SeededRandom,
//! };
//! use std::time::Duration;
//!
//! let mut engine = GhostRoleEngine::new(
//!     EngineConfig::default(),
//!     Box::new(SeededRandom::new(1)),
//!     Box::new(|_: CandidateId, _: &Role| true),
//! )?;
//!
//! let id = engine.allocate_role_id();
//! engine.on_role_available(Role::new(id, "mouse", "Mouse"));
//!
//! let alice = CandidateId::new_random();
//! engine.on_candidate_status_changed(alice, CandidateStatus::InGame);
//! engine.request_role(alice, id)?;
//!
//! engine.tick(Duration::from_millis(100));
//! assert_eq!(engine.available_count(), 0);
//! # Ok::<(), ghost_roles::GhostRoleError>(())
//! ```

#![forbid(unsafe_code)]

// === Core Modules ===

/// Role, group and candidate identifiers
pub mod identifiers;

/// Unified error handling
pub mod error;

/// Engine configuration
pub mod config;

/// Injected randomness and takeover effects
pub mod effects;

/// Role descriptions and read-only views
pub mod role;

// === Allocation ===

/// Registered roles and availability
pub mod registry;

/// Raffle winner selection
pub mod decider;

/// Per-role raffles
pub mod raffle;

/// Pending requests and raffle memberships per candidate
pub mod requests;

/// Admin-curated role groups
pub mod groups;

/// Periodic batch lottery
pub mod lottery;

/// Takeover contract shared by raffles and lotteries
pub mod takeover;

/// Coalesced observer notifications
pub mod notify;

/// Session engine tying everything together
pub mod engine;

pub use config::{EngineConfig, RaffleConfig};
pub use decider::RaffleDecider;
pub use effects::{EntropyRandom, RandomEffects, SeededRandom, TakeoverEffects};
pub use engine::{GhostRoleEngine, LotteryReport, RequestOutcome};
pub use error::{GhostRoleError, GhostRoleResult};
pub use groups::{GroupStatus, GroupSummary};
pub use identifiers::{CandidateId, GroupId, IdentifierAllocator, RoleFamily, RoleId};
pub use notify::{RoleCountUpdate, RoleLifecycleObserver, TakeoverNotice};
pub use raffle::{CancelReason, Raffle, RaffleOutcome};
pub use requests::{CandidateStatus, RequestKey};
pub use role::{AllocationMode, FamilySummary, RaffleSettings, Role, RoleInfo, RoleKind};
