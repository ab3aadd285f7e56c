//! Role descriptions and read-only role views
//!
//! A [`Role`] is what a host registers when a game object becomes ghost-role
//! eligible. [`RoleInfo`] and [`FamilySummary`] are the snapshots handed back
//! to UI collaborators.

use crate::error::{GhostRoleError, GhostRoleResult};
use crate::identifiers::{RoleFamily, RoleId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and winner selection for a raffle-mode role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleSettings {
    /// Countdown when the first member joins
    pub initial: Duration,
    /// Extension granted when a new member joins a running raffle
    pub join_extension: Duration,
    /// Upper bound on the countdown including all extensions
    pub max: Duration,
    /// Decider strategy id, resolved once when the raffle opens
    pub decider: String,
}

impl RaffleSettings {
    /// Create settings with the default decider.
    pub fn new(initial: Duration, join_extension: Duration, max: Duration) -> Self {
        Self {
            initial,
            join_extension,
            max,
            decider: crate::decider::RaffleDecider::DEFAULT_ID.to_string(),
        }
    }

    /// Use a specific decider strategy.
    pub fn with_decider(mut self, decider: impl Into<String>) -> Self {
        self.decider = decider.into();
        self
    }

    /// Total extension a raffle may accumulate.
    pub fn max_extension(&self) -> Duration {
        self.max.saturating_sub(self.initial)
    }

    /// Check that `max` is not below `initial`.
    pub fn validate(&self) -> GhostRoleResult<()> {
        if self.max < self.initial {
            return Err(GhostRoleError::invalid_raffle(format!(
                "max duration {:?} is below initial duration {:?}",
                self.max, self.initial
            )));
        }
        Ok(())
    }
}

/// How a role is handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMode {
    /// Drawn by the periodic lottery across everyone requesting the family.
    FirstComeFirstServe,
    /// Taken by the first request, without waiting for a lottery.
    Immediate,
    /// Contested by a per-role raffle with its own countdown.
    Raffle(RaffleSettings),
}

impl AllocationMode {
    /// Whether this role goes through the periodic lottery
    pub fn is_lottery(&self) -> bool {
        matches!(self, Self::FirstComeFirstServe)
    }

    /// Raffle settings if this is a raffle-mode role
    pub fn raffle(&self) -> Option<&RaffleSettings> {
        match self {
            Self::Raffle(settings) => Some(settings),
            _ => None,
        }
    }
}

/// An assignable, revocable resource distributed to candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique id, assigned once by the allocator
    pub id: RoleId,
    /// Lottery batching key
    pub family: RoleFamily,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Rules shown before requesting
    pub rules: String,
    /// Allocation mode
    pub mode: AllocationMode,
}

impl Role {
    /// Create a lottery-drawn role.
    pub fn new(id: RoleId, family: impl Into<RoleFamily>, name: impl Into<String>) -> Self {
        Self {
            id,
            family: family.into(),
            name: name.into(),
            description: String::new(),
            rules: String::new(),
            mode: AllocationMode::FirstComeFirstServe,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the rules text.
    pub fn with_rules(mut self, rules: impl Into<String>) -> Self {
        self.rules = rules.into();
        self
    }

    /// Set the allocation mode.
    pub fn with_mode(mut self, mode: AllocationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Make this a raffle-mode role.
    pub fn with_raffle(self, settings: RaffleSettings) -> Self {
        self.with_mode(AllocationMode::Raffle(settings))
    }
}

/// How a role appears to a particular viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleKind {
    /// Waiting for the next lottery draw
    FirstComeFirstServe,
    /// First request takes it
    Immediate,
    /// Raffle-mode role with no raffle running yet
    RaffleOpen,
    /// Raffle running, viewer not a member
    RaffleInProgress,
    /// Raffle running and the viewer is a member
    RaffleJoined,
}

/// Read-only view of one available role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    /// Role id
    pub id: RoleId,
    /// Lottery batching key
    pub family: RoleFamily,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Rules text
    pub rules: String,
    /// Kind as seen by the viewer
    pub kind: RoleKind,
    /// Raffle members, or lottery requesters for the family
    pub member_count: usize,
    /// Session time at which the role is projected to resolve
    pub resolves_at: Option<Duration>,
    /// Whether the viewer has a pending request or raffle membership
    pub requested: bool,
}

/// Per-family aggregate of available roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySummary {
    /// Family key
    pub family: RoleFamily,
    /// Name of the first role in the family
    pub name: String,
    /// Description of the first role in the family
    pub description: String,
    /// Rules of the first role in the family
    pub rules: String,
    /// Roles waiting for the lottery
    pub lottery_count: usize,
    /// Roles takeable immediately
    pub immediate_count: usize,
    /// Raffle-mode roles
    pub raffle_count: usize,
    /// Whether the viewer has a pending lottery request for the family
    pub requested: bool,
}

impl FamilySummary {
    /// Total available roles in the family.
    pub fn total(&self) -> usize {
        self.lottery_count + self.immediate_count + self.raffle_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_extension() {
        let settings = RaffleSettings::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            Duration::from_secs(20),
        );
        assert_eq!(settings.max_extension(), Duration::from_secs(10));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_max_below_initial_is_rejected() {
        let settings = RaffleSettings::new(
            Duration::from_secs(30),
            Duration::from_secs(5),
            Duration::from_secs(20),
        );
        assert_eq!(settings.max_extension(), Duration::ZERO);
        assert!(matches!(
            settings.validate(),
            Err(GhostRoleError::InvalidRaffleConfig { .. })
        ));
    }

    #[test]
    fn test_role_builder() {
        let role = Role::new(RoleId(1), "mouse", "Mouse")
            .with_description("squeak")
            .with_rules("be a mouse");
        assert!(role.mode.is_lottery());
        assert_eq!(role.family.as_str(), "mouse");
        assert_eq!(role.rules, "be a mouse");
    }
}
