//! Identifier types for roles, groups, candidates and role families.
//!
//! Roles and groups share one numeric id space handed out by
//! [`IdentifierAllocator`]. Candidates are connection-scoped and identified by
//! a UUID supplied by the host.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a single assignable role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub u32);

impl RoleId {
    /// Get the raw numeric value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role-{}", self.0)
    }
}

/// Identifier of an admin-curated role group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl GroupId {
    /// Get the raw numeric value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Connection-scoped identity of a player that can request roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId(pub Uuid);

impl CandidateId {
    /// Create a fresh random candidate id
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "candidate-{}", self.0)
    }
}

impl From<Uuid> for CandidateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Grouping key batching roles of the same kind for lottery draws.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleFamily(String);

impl RoleFamily {
    /// Create a family key
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleFamily {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RoleFamily {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Issues monotonically increasing identifiers for roles and groups.
///
/// The counter wraps on overflow. Zero is never issued, and an id reported as
/// still in use by the caller is skipped, so a live role never shares its id
/// with a newly created one.
#[derive(Debug, Clone)]
pub struct IdentifierAllocator {
    next: u32,
}

impl Default for IdentifierAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierAllocator {
    /// Create an allocator starting at 1
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Create an allocator that issues `first` next (0 is bumped to 1)
    pub fn starting_at(first: u32) -> Self {
        Self { next: first.max(1) }
    }

    /// Peek at the value the next call would try first
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Allocate the next id not reported as in use by `in_use`.
    pub fn allocate(&mut self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let candidate = self.next;
            self.next = match self.next.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if !in_use(candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_is_monotonic() {
        let mut alloc = IdentifierAllocator::new();
        let a = alloc.allocate(|_| false);
        let b = alloc.allocate(|_| false);
        let c = alloc.allocate(|_| false);
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn test_allocator_wraps_and_skips_zero() {
        let mut alloc = IdentifierAllocator::starting_at(u32::MAX);
        assert_eq!(alloc.allocate(|_| false), u32::MAX);
        assert_eq!(alloc.allocate(|_| false), 1);
    }

    #[test]
    fn test_allocator_skips_live_ids() {
        let mut alloc = IdentifierAllocator::starting_at(u32::MAX);
        let live = [1u32, 2];
        assert_eq!(alloc.allocate(|id| live.contains(&id)), u32::MAX);
        assert_eq!(alloc.allocate(|id| live.contains(&id)), 3);
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(RoleId(7).to_string(), "role-7");
        assert_eq!(GroupId(3).to_string(), "group-3");
        assert_eq!(RoleFamily::new("mouse").to_string(), "mouse");
    }
}
