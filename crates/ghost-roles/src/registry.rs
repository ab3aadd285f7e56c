//! Role registry
//!
//! Owns every registered role and its availability. A role is available when
//! it is registered, not paused, and not attached to a role group. Raffle
//! state lives in [`crate::raffle`]; the registry only knows which mode a
//! role uses.

use crate::identifiers::{GroupId, RoleFamily, RoleId};
use crate::role::{AllocationMode, Role};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct RoleEntry {
    role: Role,
    paused: bool,
    group: Option<GroupId>,
}

impl RoleEntry {
    fn is_available(&self) -> bool {
        !self.paused && self.group.is_none()
    }
}

/// All currently registered roles, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: BTreeMap<RoleId, RoleEntry>,
}

impl RoleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role. Returns `false` if the id is already registered.
    ///
    /// A raffle-mode role whose settings fail validation is registered in
    /// first-come-first-serve mode instead.
    pub fn register(&mut self, mut role: Role) -> bool {
        if self.roles.contains_key(&role.id) {
            debug!(role_id = %role.id, "role already registered");
            return false;
        }

        if let AllocationMode::Raffle(settings) = &role.mode {
            if let Err(err) = settings.validate() {
                warn!(
                    role_id = %role.id,
                    family = %role.family,
                    error = %err,
                    "falling back to first-come-first-serve"
                );
                role.mode = AllocationMode::FirstComeFirstServe;
            }
        }

        debug!(role_id = %role.id, family = %role.family, "role registered");
        self.roles.insert(
            role.id,
            RoleEntry {
                role,
                paused: false,
                group: None,
            },
        );
        true
    }

    /// Remove a role, returning it if it was registered.
    pub fn unregister(&mut self, id: RoleId) -> Option<Role> {
        let entry = self.roles.remove(&id)?;
        debug!(role_id = %id, family = %entry.role.family, "role unregistered");
        Some(entry.role)
    }

    /// Look up a registered role
    pub fn get(&self, id: RoleId) -> Option<&Role> {
        self.roles.get(&id).map(|entry| &entry.role)
    }

    /// Whether the id is registered
    pub fn contains(&self, id: RoleId) -> bool {
        self.roles.contains_key(&id)
    }

    /// Registered, not paused, not in a group.
    pub fn is_available(&self, id: RoleId) -> bool {
        self.roles.get(&id).is_some_and(RoleEntry::is_available)
    }

    /// Registered and not paused; grouped roles are takeable by their group lottery.
    pub fn is_takeable(&self, id: RoleId) -> bool {
        self.roles.get(&id).is_some_and(|entry| !entry.paused)
    }

    /// Whether the role is paused
    pub fn is_paused(&self, id: RoleId) -> bool {
        self.roles.get(&id).is_some_and(|entry| entry.paused)
    }

    /// Pause or unpause a role. Returns `Some(changed)`, or `None` when unknown.
    pub fn set_paused(&mut self, id: RoleId, paused: bool) -> Option<bool> {
        let entry = self.roles.get_mut(&id)?;
        if entry.paused == paused {
            return Some(false);
        }
        entry.paused = paused;
        debug!(role_id = %id, paused, "role pause state changed");
        Some(true)
    }

    /// Move a role out of the family pool into a group.
    pub fn attach_to_group(&mut self, id: RoleId, group: GroupId) -> bool {
        match self.roles.get_mut(&id) {
            Some(entry) if entry.group.is_none() => {
                entry.group = Some(group);
                true
            }
            _ => false,
        }
    }

    /// Group the role is attached to, if any
    pub fn group_of(&self, id: RoleId) -> Option<GroupId> {
        self.roles.get(&id).and_then(|entry| entry.group)
    }

    /// Number of available roles.
    pub fn available_count(&self) -> usize {
        self.roles.values().filter(|e| e.is_available()).count()
    }

    /// Iterate over available roles in id order.
    pub fn available(&self) -> impl Iterator<Item = &Role> {
        self.roles
            .values()
            .filter(|e| e.is_available())
            .map(|e| &e.role)
    }

    /// Available roles of one family in id order.
    pub fn available_in_family<'a>(
        &'a self,
        family: &'a RoleFamily,
    ) -> impl Iterator<Item = &'a Role> + 'a {
        self.available().filter(move |role| &role.family == family)
    }

    /// Immutable copy of the available lottery-mode roles of a family.
    pub fn snapshot(&self, family: &RoleFamily) -> Vec<Role> {
        self.available_in_family(family)
            .filter(|role| role.mode.is_lottery())
            .cloned()
            .collect()
    }

    /// Families with at least one available role.
    pub fn available_families(&self) -> BTreeSet<RoleFamily> {
        self.available().map(|role| role.family.clone()).collect()
    }

    /// Families with at least one available lottery-mode role.
    pub fn lottery_families(&self) -> BTreeSet<RoleFamily> {
        self.available()
            .filter(|role| role.mode.is_lottery())
            .map(|role| role.family.clone())
            .collect()
    }

    /// Whether any role of the family is registered, available or not.
    pub fn has_family(&self, family: &RoleFamily) -> bool {
        self.roles.values().any(|e| &e.role.family == family)
    }

    /// Number of registered roles
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether no roles are registered
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Drop every role.
    pub fn clear(&mut self) {
        self.roles.clear();
    }
}
