//! Admin-curated role groups
//!
//! An admin starts a group, attaches roles to it while it is `Editing`, and
//! releases it. A released group moves to `Released` when the next lottery
//! period starts and from then on is drawn by its own lottery, ahead of the
//! family lotteries.

use crate::error::{GhostRoleError, GhostRoleResult};
use crate::identifiers::{CandidateId, GroupId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Lifecycle of a role group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    /// Owner is still attaching roles
    Editing,
    /// Released, becomes visible at the next lottery period
    Releasing,
    /// Open for requests and drawn each lottery pass
    Released,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Editing => "Editing",
            Self::Releasing => "Releasing",
            Self::Released => "Released",
        };
        f.write_str(name)
    }
}

/// A group of roles owned by one admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGroup {
    /// Group id
    pub id: GroupId,
    /// Admin who started the group
    pub owner: CandidateId,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Lifecycle status
    pub status: GroupStatus,
    roles: Vec<RoleId>,
}

impl RoleGroup {
    /// Roles attached, in attach order
    pub fn roles(&self) -> &[RoleId] {
        &self.roles
    }
}

/// Read-only view of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Group id
    pub id: GroupId,
    /// Display name
    pub name: String,
    /// Display description
    pub description: String,
    /// Lifecycle status
    pub status: GroupStatus,
    /// Roles still attached
    pub available_count: usize,
    /// Whether the viewer has requested the group
    pub requested: bool,
}

/// All role groups, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct RoleGroupRegistry {
    groups: BTreeMap<GroupId, RoleGroup>,
}

impl RoleGroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new `Editing` group for `owner` under a pre-allocated id.
    pub fn start(&mut self, owner: CandidateId, id: GroupId) -> GhostRoleResult<GroupId> {
        if let Some(existing) = self.active_group_of(owner) {
            return Err(GhostRoleError::GroupAlreadyActive {
                group_id: existing,
                candidate: owner,
            });
        }

        self.groups.insert(
            id,
            RoleGroup {
                id,
                owner,
                name: format!("Role Group [{}]", id.value()),
                description: "Custom role group".to_string(),
                status: GroupStatus::Editing,
                roles: Vec::new(),
            },
        );
        debug!(group_id = %id, %owner, "role group started");
        Ok(id)
    }

    /// The group `owner` is still editing, if any.
    pub fn active_group_of(&self, owner: CandidateId) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.owner == owner && g.status == GroupStatus::Editing)
            .map(|g| g.id)
    }

    /// Attach a role to the owner's active group. Idempotent.
    ///
    /// Returns the group id and whether the role was newly attached.
    pub fn attach(&mut self, owner: CandidateId, role_id: RoleId) -> GhostRoleResult<(GroupId, bool)> {
        let id = self.active_group_of(owner).ok_or_else(|| {
            GhostRoleError::PermissionDenied(format!("{owner} has no role group in editing"))
        })?;
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(GhostRoleError::UnknownGroup(id))?;

        if group.roles.contains(&role_id) {
            return Ok((id, false));
        }
        group.roles.push(role_id);
        debug!(group_id = %id, %role_id, "role attached to group");
        Ok((id, true))
    }

    /// Move an `Editing` group owned by `owner` to `Releasing`.
    pub fn release(&mut self, owner: CandidateId, id: GroupId) -> GhostRoleResult<()> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(GhostRoleError::UnknownGroup(id))?;
        if group.owner != owner {
            return Err(GhostRoleError::NotGroupOwner {
                group_id: id,
                candidate: owner,
            });
        }
        if group.status != GroupStatus::Editing {
            return Err(GhostRoleError::group_status(
                id,
                group.status.to_string(),
                "release",
            ));
        }
        group.status = GroupStatus::Releasing;
        debug!(group_id = %id, "role group releasing");
        Ok(())
    }

    /// Promote every `Releasing` group to `Released`.
    pub fn promote_releasing(&mut self) -> Vec<GroupId> {
        let mut promoted = Vec::new();
        for group in self.groups.values_mut() {
            if group.status == GroupStatus::Releasing {
                group.status = GroupStatus::Released;
                promoted.push(group.id);
            }
        }
        promoted
    }

    /// Detach a role from whichever group holds it.
    pub fn remove_role(&mut self, role_id: RoleId) -> Option<GroupId> {
        self.groups.values_mut().find_map(|group| {
            let before = group.roles.len();
            group.roles.retain(|r| *r != role_id);
            (group.roles.len() != before).then_some(group.id)
        })
    }

    /// Look up a group
    pub fn get(&self, id: GroupId) -> Option<&RoleGroup> {
        self.groups.get(&id)
    }

    /// Whether the group exists
    pub fn contains(&self, id: GroupId) -> bool {
        self.groups.contains_key(&id)
    }

    /// Whether the group exists and is `Released`
    pub fn is_released(&self, id: GroupId) -> bool {
        self.groups
            .get(&id)
            .is_some_and(|g| g.status == GroupStatus::Released)
    }

    /// Released group ids in id order
    pub fn released(&self) -> Vec<GroupId> {
        self.groups
            .values()
            .filter(|g| g.status == GroupStatus::Released)
            .map(|g| g.id)
            .collect()
    }

    /// Roles still attached to released groups
    pub fn released_role_count(&self) -> usize {
        self.groups
            .values()
            .filter(|g| g.status == GroupStatus::Released)
            .map(|g| g.roles.len())
            .sum()
    }

    /// Remove a group, returning it.
    pub fn remove(&mut self, id: GroupId) -> Option<RoleGroup> {
        let group = self.groups.remove(&id)?;
        debug!(group_id = %id, "role group removed");
        Some(group)
    }

    /// Iterate over groups in id order
    pub fn iter(&self) -> impl Iterator<Item = &RoleGroup> {
        self.groups.values()
    }

    /// Drop every group.
    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn candidate(n: u128) -> CandidateId {
        CandidateId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn test_one_active_group_per_owner() {
        let mut groups = RoleGroupRegistry::new();
        assert_eq!(groups.start(candidate(1), GroupId(10)), Ok(GroupId(10)));
        assert_eq!(
            groups.start(candidate(1), GroupId(11)),
            Err(GhostRoleError::GroupAlreadyActive {
                group_id: GroupId(10),
                candidate: candidate(1),
            })
        );
        assert_eq!(
            groups.get(GroupId(10)).map(|g| g.name.as_str()),
            Some("Role Group [10]")
        );
    }

    #[test]
    fn test_release_lifecycle() {
        let mut groups = RoleGroupRegistry::new();
        groups.start(candidate(1), GroupId(10)).ok();
        assert_eq!(groups.attach(candidate(1), RoleId(3)), Ok((GroupId(10), true)));
        assert_eq!(groups.attach(candidate(1), RoleId(3)), Ok((GroupId(10), false)));

        assert!(matches!(
            groups.release(candidate(2), GroupId(10)),
            Err(GhostRoleError::NotGroupOwner { .. })
        ));
        assert!(groups.release(candidate(1), GroupId(10)).is_ok());
        assert!(matches!(
            groups.release(candidate(1), GroupId(10)),
            Err(GhostRoleError::GroupStatus { .. })
        ));

        // No longer editing, so attaching fails and a new group may start
        assert!(groups.attach(candidate(1), RoleId(4)).is_err());
        assert!(!groups.is_released(GroupId(10)));

        assert_eq!(groups.promote_releasing(), vec![GroupId(10)]);
        assert!(groups.is_released(GroupId(10)));
        assert_eq!(groups.released_role_count(), 1);
    }

    #[test]
    fn test_remove_role() {
        let mut groups = RoleGroupRegistry::new();
        groups.start(candidate(1), GroupId(10)).ok();
        groups.attach(candidate(1), RoleId(3)).ok();
        assert_eq!(groups.remove_role(RoleId(3)), Some(GroupId(10)));
        assert_eq!(groups.remove_role(RoleId(3)), None);
    }
}
