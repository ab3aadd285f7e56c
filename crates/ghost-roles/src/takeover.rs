//! Takeover contract
//!
//! Raffles and lotteries decide *who* should get a role; the gate performs
//! the actual takeover. A successful takeover unregisters the role in the
//! same call, so any later attempt on that id fails with `UnknownRoleId` and
//! at most one candidate ever wins a given role.

use crate::effects::TakeoverEffects;
use crate::error::{GhostRoleError, GhostRoleResult};
use crate::groups::RoleGroupRegistry;
use crate::identifiers::{CandidateId, RoleId};
use crate::notify::{NotificationDispatcher, TakeoverNotice};
use crate::registry::RoleRegistry;
use crate::requests::CandidateRequestTracker;
use tracing::info;

/// What the allocation algorithms need from the rest of the engine.
pub trait AllocationGate {
    /// Whether the candidate may receive a role right now.
    fn is_eligible(&self, candidate: CandidateId) -> bool;

    /// Whether the role is still registered and takeable.
    fn role_available(&self, role_id: RoleId) -> bool;

    /// Atomically hand the role to the candidate.
    fn try_takeover(&mut self, candidate: CandidateId, role_id: RoleId) -> GhostRoleResult<()>;
}

/// Gate over the engine's own state, built per allocation phase.
pub(crate) struct TakeoverGate<'a> {
    pub(crate) registry: &'a mut RoleRegistry,
    pub(crate) groups: &'a mut RoleGroupRegistry,
    pub(crate) tracker: &'a CandidateRequestTracker,
    pub(crate) takeover: &'a mut dyn TakeoverEffects,
    pub(crate) dispatcher: &'a mut NotificationDispatcher,
}

impl AllocationGate for TakeoverGate<'_> {
    fn is_eligible(&self, candidate: CandidateId) -> bool {
        self.tracker.is_eligible(candidate)
    }

    fn role_available(&self, role_id: RoleId) -> bool {
        self.registry.is_takeable(role_id)
    }

    fn try_takeover(&mut self, candidate: CandidateId, role_id: RoleId) -> GhostRoleResult<()> {
        let role = self
            .registry
            .get(role_id)
            .ok_or(GhostRoleError::UnknownRoleId(role_id))?;

        if self.registry.is_paused(role_id) {
            return Err(GhostRoleError::already_resolved(role_id, "role is paused"));
        }
        if !self.tracker.is_eligible(candidate) {
            return Err(GhostRoleError::IneligibleCandidate(candidate));
        }
        if !self.takeover.try_takeover(candidate, role) {
            return Err(GhostRoleError::already_resolved(
                role_id,
                "host refused the takeover",
            ));
        }

        let notice = TakeoverNotice {
            candidate,
            role_id,
            family: role.family.clone(),
            role_name: role.name.clone(),
        };
        self.registry.unregister(role_id);
        self.groups.remove_role(role_id);

        info!(%role_id, %candidate, family = %notice.family, "takeover complete");
        self.dispatcher.mark_dirty();
        self.dispatcher.notify_winner(&notice);
        Ok(())
    }
}
