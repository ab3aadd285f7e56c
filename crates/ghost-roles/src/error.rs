//! Ghost role error types
//!
//! Every failure here is recoverable. Request paths hand these back to the
//! caller, while the tick path logs them and skips the offending candidate
//! or role.

use crate::identifiers::{CandidateId, GroupId, RoleId};
use thiserror::Error;

/// Errors from ghost role operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GhostRoleError {
    /// The role is not currently registered.
    #[error("role {0} is not registered")]
    UnknownRoleId(RoleId),

    /// The role was already taken or is no longer takeable.
    #[error("role {role_id} is already resolved: {reason}")]
    AlreadyResolved {
        /// The role in question
        role_id: RoleId,
        /// Why the takeover was refused
        reason: String,
    },

    /// The candidate is not in a status that allows receiving roles.
    #[error("candidate {0} is not eligible for ghost roles")]
    IneligibleCandidate(CandidateId),

    /// Raffle durations are inconsistent.
    #[error("invalid raffle configuration: {reason}")]
    InvalidRaffleConfig {
        /// Description of the inconsistency
        reason: String,
    },

    /// A raffle expired without any member successfully taking the role.
    #[error("raffle for role {0} found no winner")]
    NoWinnerFound(RoleId),

    /// The role group does not exist.
    #[error("role group {0} not found")]
    UnknownGroup(GroupId),

    /// The candidate does not own the role group.
    #[error("candidate {candidate} does not own role group {group_id}")]
    NotGroupOwner {
        /// The group in question
        group_id: GroupId,
        /// The caller
        candidate: CandidateId,
    },

    /// The candidate already has an active role group.
    #[error("candidate {candidate} already has active role group {group_id}")]
    GroupAlreadyActive {
        /// The existing group
        group_id: GroupId,
        /// The owner
        candidate: CandidateId,
    },

    /// The role group is not in a status that allows the operation.
    #[error("role group {group_id} is {status}, cannot {operation}")]
    GroupStatus {
        /// The group in question
        group_id: GroupId,
        /// Current status name
        status: String,
        /// Operation that was refused
        operation: String,
    },

    /// The operation requires admin rights.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read config {path}: {message}")]
    ConfigIo {
        /// Path that was read
        path: String,
        /// Underlying IO error
        message: String,
    },

    /// Configuration text could not be parsed.
    #[error("failed to parse config: {0}")]
    ConfigParse(String),
}

impl GhostRoleError {
    /// Create an already resolved error.
    pub fn already_resolved(role_id: RoleId, reason: impl Into<String>) -> Self {
        Self::AlreadyResolved {
            role_id,
            reason: reason.into(),
        }
    }

    /// Create an invalid raffle configuration error.
    pub fn invalid_raffle(reason: impl Into<String>) -> Self {
        Self::InvalidRaffleConfig {
            reason: reason.into(),
        }
    }

    /// Create a group status error.
    pub fn group_status(
        group_id: GroupId,
        status: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self::GroupStatus {
            group_id,
            status: status.into(),
            operation: operation.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result alias for ghost role operations.
pub type GhostRoleResult<T> = Result<T, GhostRoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GhostRoleError::already_resolved(RoleId(4), "taken");
        assert!(err.to_string().contains("role-4"));
        assert!(err.to_string().contains("taken"));

        let err = GhostRoleError::invalid_raffle("max below initial");
        assert!(err.to_string().contains("max below initial"));

        let err = GhostRoleError::group_status(GroupId(2), "Editing", "request");
        assert_eq!(
            err.to_string(),
            "role group group-2 is Editing, cannot request"
        );
    }
}
