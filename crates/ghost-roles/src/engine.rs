//! Ghost role engine
//!
//! [`GhostRoleEngine`] is the single entry point hosts talk to. It owns the
//! registry, raffles, request tracker, role groups and lottery clock for one
//! game session and funnels every mutation through one `&mut self`, which is
//! what keeps the at-most-one-winner guarantee without locks.
//!
//! Each [`GhostRoleEngine::tick`] runs in a fixed order:
//!
//! 1. Advance session time
//! 2. Count down raffles and resolve the expired ones
//! 3. If the lottery period expired, run a lottery pass (groups first, then
//!    families) and start a new period
//! 4. Flush coalesced notifications

use crate::config::EngineConfig;
use crate::effects::{RandomEffects, TakeoverEffects};
use crate::error::{GhostRoleError, GhostRoleResult};
use crate::groups::{GroupSummary, RoleGroupRegistry};
use crate::identifiers::{CandidateId, GroupId, IdentifierAllocator, RoleFamily, RoleId};
use crate::lottery::{LotteryBatch, LotteryScheduler};
use crate::notify::{NotificationDispatcher, RoleCountUpdate, RoleLifecycleObserver};
use crate::raffle::{CancelReason, JoinOutcome, LeaveOutcome, Raffle, RaffleCoordinator, RaffleOutcome};
use crate::registry::RoleRegistry;
use crate::requests::{CandidateRequestTracker, CandidateStatus, RequestKey};
use crate::role::{AllocationMode, FamilySummary, RaffleSettings, Role, RoleInfo, RoleKind};
use crate::takeover::{AllocationGate, TakeoverGate};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

/// What a [`GhostRoleEngine::request_role`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Queued for the next lottery draw of the role's family
    Queued,
    /// A request for the family was already pending
    AlreadyQueued,
    /// The role was taken on the spot
    TakenOver,
    /// The candidate opened the role's raffle
    RaffleOpened,
    /// The candidate joined a running raffle
    RaffleJoined {
        /// Countdown extension granted by this join
        extended_by: Duration,
    },
    /// The candidate was already a member of the raffle
    AlreadyJoined,
}

/// Summary of one lottery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LotteryReport {
    /// Groups promoted from `Releasing` to `Released`
    pub released_groups: Vec<GroupId>,
    /// Assignments in draw order
    pub winners: Vec<(CandidateId, RoleId)>,
    /// Groups removed after all their roles were taken
    pub consumed_groups: Vec<GroupId>,
    /// Drawn roles still on offer after the pass: refused takeovers and
    /// roles left over once the requesters ran out
    pub unclaimed: Vec<RoleId>,
    /// Candidates whose requests were pruned
    pub pruned: Vec<CandidateId>,
}

/// Ghost role allocation for one game session.
pub struct GhostRoleEngine {
    config: EngineConfig,
    default_raffle: RaffleSettings,
    allocator: IdentifierAllocator,
    registry: RoleRegistry,
    raffles: RaffleCoordinator,
    tracker: CandidateRequestTracker,
    groups: RoleGroupRegistry,
    lottery: LotteryScheduler,
    dispatcher: NotificationDispatcher,
    random: Box<dyn RandomEffects>,
    takeover: Box<dyn TakeoverEffects>,
    now: Duration,
    last_report: LotteryReport,
}

impl std::fmt::Debug for GhostRoleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostRoleEngine")
            .field("now", &self.now)
            .field("roles", &self.registry.len())
            .field("raffles", &self.raffles.len())
            .field("lottery", &self.lottery)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

fn count_update(registry: &RoleRegistry, groups: &RoleGroupRegistry) -> RoleCountUpdate {
    RoleCountUpdate {
        available_count: registry.available_count() + groups.released_role_count(),
        families: registry.available_families().into_iter().collect(),
    }
}

impl GhostRoleEngine {
    /// Create an engine after validating `config`.
    pub fn new(
        config: EngineConfig,
        random: Box<dyn RandomEffects>,
        takeover: Box<dyn TakeoverEffects>,
    ) -> GhostRoleResult<Self> {
        config.validate()?;
        let default_raffle = config.raffle_settings()?;
        let lottery = LotteryScheduler::new(config.lottery_period()?);

        info!(
            lottery_period = ?lottery.period(),
            decider = %config.default_decider(),
            "ghost role engine created"
        );

        Ok(Self {
            raffles: RaffleCoordinator::new(config.default_decider()),
            config,
            default_raffle,
            allocator: IdentifierAllocator::new(),
            registry: RoleRegistry::new(),
            tracker: CandidateRequestTracker::new(),
            groups: RoleGroupRegistry::new(),
            lottery,
            dispatcher: NotificationDispatcher::new(),
            random,
            takeover,
            now: Duration::ZERO,
            last_report: LotteryReport::default(),
        })
    }

    /// Register an observer, builder style.
    pub fn with_observer(mut self, observer: Box<dyn RoleLifecycleObserver>) -> Self {
        self.subscribe(observer);
        self
    }

    /// Register an observer.
    pub fn subscribe(&mut self, observer: Box<dyn RoleLifecycleObserver>) {
        self.dispatcher.subscribe(observer);
    }

    /// Configuration in effect
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Raffle settings from the configuration, for roles registered without their own.
    pub fn default_raffle_settings(&self) -> &RaffleSettings {
        &self.default_raffle
    }

    /// Session time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Allocate a fresh role id. Never returns an id still used by a role or group.
    pub fn allocate_role_id(&mut self) -> RoleId {
        let registry = &self.registry;
        let groups = &self.groups;
        RoleId(
            self.allocator
                .allocate(|v| registry.contains(RoleId(v)) || groups.contains(GroupId(v))),
        )
    }

    fn allocate_group_id(&mut self) -> GroupId {
        let registry = &self.registry;
        let groups = &self.groups;
        GroupId(
            self.allocator
                .allocate(|v| registry.contains(RoleId(v)) || groups.contains(GroupId(v))),
        )
    }

    // =========================================================================
    // UPSTREAM EVENTS
    // =========================================================================

    /// A game object became ghost-role eligible. Returns `false` if its id was already registered.
    pub fn on_role_available(&mut self, role: Role) -> bool {
        let registered = self.registry.register(role);
        if registered {
            self.dispatcher.mark_dirty();
        }
        registered
    }

    /// The role's object was taken, deleted or otherwise withdrawn.
    ///
    /// A running raffle is cancelled first and its members notified.
    pub fn on_role_unavailable(&mut self, role_id: RoleId) -> Option<Role> {
        if let Some(outcome) = self.raffles.cancel(role_id, CancelReason::RoleUnavailable) {
            self.finish_raffle(&outcome);
        }
        let role = self.registry.unregister(role_id)?;
        self.groups.remove_role(role_id);
        self.dispatcher.mark_dirty();
        Some(role)
    }

    /// Pause or unpause a role. Pausing cancels its raffle.
    pub fn set_role_paused(&mut self, role_id: RoleId, paused: bool) -> GhostRoleResult<()> {
        let changed = self
            .registry
            .set_paused(role_id, paused)
            .ok_or(GhostRoleError::UnknownRoleId(role_id))?;
        if !changed {
            return Ok(());
        }
        if paused {
            if let Some(outcome) = self.raffles.cancel(role_id, CancelReason::RoleUnavailable) {
                self.finish_raffle(&outcome);
            }
        }
        self.dispatcher.mark_dirty();
        Ok(())
    }

    /// Track a candidate's connection status.
    ///
    /// Entering the game sends the candidate the current counts. Leaving it
    /// clears every request and raffle membership; disconnecting also forgets
    /// the candidate.
    pub fn on_candidate_status_changed(&mut self, candidate: CandidateId, status: CandidateStatus) {
        let previous = self.tracker.set_status(candidate, status);
        debug!(%candidate, ?previous, ?status, "candidate status changed");

        match status {
            CandidateStatus::InGame => {
                if previous != Some(CandidateStatus::InGame) {
                    let update = count_update(&self.registry, &self.groups);
                    self.dispatcher.send_count_to(candidate, &update);
                }
            }
            CandidateStatus::Connected => self.clear_candidate(candidate),
            CandidateStatus::Disconnected => {
                self.clear_candidate(candidate);
                self.tracker.remove_candidate(candidate);
            }
        }
    }

    /// Grant or revoke admin rights, as decided by the host.
    pub fn set_admin(&mut self, candidate: CandidateId, admin: bool) {
        self.tracker.set_admin(candidate, admin);
        self.dispatcher.mark_candidate_dirty(candidate);
    }

    /// Advance session time by `delta` and run every due allocation.
    pub fn tick(&mut self, delta: Duration) {
        self.now += delta;

        let outcomes = {
            let mut gate = TakeoverGate {
                registry: &mut self.registry,
                groups: &mut self.groups,
                tracker: &self.tracker,
                takeover: self.takeover.as_mut(),
                dispatcher: &mut self.dispatcher,
            };
            self.raffles.tick(delta, self.random.as_mut(), &mut gate)
        };
        for outcome in &outcomes {
            self.finish_raffle(outcome);
        }

        if self.lottery.is_due(self.now) {
            self.last_report = self.run_lottery_pass();
        }

        self.flush();
    }

    /// Push coalesced notifications now. Called at the end of every tick.
    pub fn flush(&mut self) -> bool {
        let registry = &self.registry;
        let groups = &self.groups;
        self.dispatcher.flush(|| count_update(registry, groups))
    }

    // =========================================================================
    // CANDIDATE REQUESTS
    // =========================================================================

    /// Request a role. Lottery roles queue the role's family, immediate
    /// roles are taken on the spot, raffle roles join the raffle.
    pub fn request_role(
        &mut self,
        candidate: CandidateId,
        role_id: RoleId,
    ) -> GhostRoleResult<RequestOutcome> {
        if !self.tracker.is_eligible(candidate) {
            return Err(GhostRoleError::IneligibleCandidate(candidate));
        }
        let role = self
            .registry
            .get(role_id)
            .cloned()
            .ok_or(GhostRoleError::UnknownRoleId(role_id))?;
        if !self.registry.is_available(role_id) {
            return Err(GhostRoleError::already_resolved(role_id, "role is not available"));
        }

        match &role.mode {
            AllocationMode::FirstComeFirstServe => {
                if !self.tracker.add_request(candidate, RequestKey::Family(role.family.clone())) {
                    return Ok(RequestOutcome::AlreadyQueued);
                }
                self.dispatcher.mark_candidate_dirty(candidate);
                self.dispatcher.mark_dirty();
                Ok(RequestOutcome::Queued)
            }
            AllocationMode::Immediate => {
                {
                    let mut gate = TakeoverGate {
                        registry: &mut self.registry,
                        groups: &mut self.groups,
                        tracker: &self.tracker,
                        takeover: self.takeover.as_mut(),
                        dispatcher: &mut self.dispatcher,
                    };
                    gate.try_takeover(candidate, role_id)?;
                }
                self.clear_candidate(candidate);
                Ok(RequestOutcome::TakenOver)
            }
            AllocationMode::Raffle(_) => {
                let outcome = self.raffles.join(&role, candidate, self.now)?;
                if outcome == JoinOutcome::AlreadyMember {
                    return Ok(RequestOutcome::AlreadyJoined);
                }
                self.tracker.add_raffle(candidate, role_id);
                self.dispatcher.mark_candidate_dirty(candidate);
                self.dispatcher.mark_dirty();
                Ok(match outcome {
                    JoinOutcome::Opened => RequestOutcome::RaffleOpened,
                    JoinOutcome::Joined { extended_by } => RequestOutcome::RaffleJoined { extended_by },
                    JoinOutcome::AlreadyMember => RequestOutcome::AlreadyJoined,
                })
            }
        }
    }

    /// Withdraw a pending lottery request for a family.
    pub fn withdraw_request(&mut self, candidate: CandidateId, family: &RoleFamily) -> bool {
        let removed = self
            .tracker
            .remove_request(candidate, &RequestKey::Family(family.clone()));
        if removed {
            self.dispatcher.mark_candidate_dirty(candidate);
            self.dispatcher.mark_dirty();
        }
        removed
    }

    /// Leave a raffle. The last member leaving cancels it on the spot.
    pub fn leave_raffle(&mut self, candidate: CandidateId, role_id: RoleId) -> bool {
        match self.raffles.leave(candidate, role_id) {
            None => false,
            Some(LeaveOutcome::Left) => {
                self.tracker.remove_raffle(candidate, role_id);
                self.dispatcher.mark_candidate_dirty(candidate);
                self.dispatcher.mark_dirty();
                true
            }
            Some(LeaveOutcome::Cancelled(outcome)) => {
                self.finish_raffle(&outcome);
                true
            }
        }
    }

    // =========================================================================
    // ROLE GROUPS
    // =========================================================================

    fn require_admin(&self, candidate: CandidateId, operation: &str) -> GhostRoleResult<()> {
        if self.tracker.is_admin(candidate) {
            Ok(())
        } else {
            Err(GhostRoleError::PermissionDenied(format!(
                "{candidate} is not an admin, cannot {operation}"
            )))
        }
    }

    /// Start a new role group owned by an admin.
    pub fn start_group(&mut self, owner: CandidateId) -> GhostRoleResult<GroupId> {
        self.require_admin(owner, "start a role group")?;
        if let Some(existing) = self.groups.active_group_of(owner) {
            return Err(GhostRoleError::GroupAlreadyActive {
                group_id: existing,
                candidate: owner,
            });
        }
        let id = self.allocate_group_id();
        self.groups.start(owner, id)?;
        self.dispatcher.mark_candidate_dirty(owner);
        Ok(id)
    }

    /// Move a role into the owner's editing group. Idempotent.
    pub fn attach_to_active_group(
        &mut self,
        owner: CandidateId,
        role_id: RoleId,
    ) -> GhostRoleResult<GroupId> {
        self.require_admin(owner, "edit a role group")?;
        if !self.registry.contains(role_id) {
            return Err(GhostRoleError::UnknownRoleId(role_id));
        }
        let active = self.groups.active_group_of(owner);
        if let Some(current) = self.registry.group_of(role_id) {
            if Some(current) != active {
                return Err(GhostRoleError::already_resolved(
                    role_id,
                    format!("role belongs to {current}"),
                ));
            }
        }

        let (group_id, newly) = self.groups.attach(owner, role_id)?;
        if !newly {
            return Ok(group_id);
        }
        self.registry.attach_to_group(role_id, group_id);
        if let Some(outcome) = self.raffles.cancel(role_id, CancelReason::RoleUnavailable) {
            self.finish_raffle(&outcome);
        }
        self.dispatcher.mark_dirty();
        self.dispatcher.mark_candidate_dirty(owner);
        Ok(group_id)
    }

    /// Release an editing group; it opens at the start of the next lottery period.
    pub fn release_group(&mut self, owner: CandidateId, group_id: GroupId) -> GhostRoleResult<()> {
        self.require_admin(owner, "release a role group")?;
        self.groups.release(owner, group_id)?;
        info!(%group_id, %owner, "role group released");
        self.dispatcher.mark_dirty();
        Ok(())
    }

    /// Request a released role group. Returns `false` if already requested.
    pub fn request_group(&mut self, candidate: CandidateId, group_id: GroupId) -> GhostRoleResult<bool> {
        if !self.tracker.is_eligible(candidate) {
            return Err(GhostRoleError::IneligibleCandidate(candidate));
        }
        let group = self
            .groups
            .get(group_id)
            .ok_or(GhostRoleError::UnknownGroup(group_id))?;
        if !self.groups.is_released(group_id) {
            return Err(GhostRoleError::group_status(
                group_id,
                group.status.to_string(),
                "request",
            ));
        }

        let added = self.tracker.add_request(candidate, RequestKey::Group(group_id));
        if added {
            self.dispatcher.mark_candidate_dirty(candidate);
            self.dispatcher.mark_dirty();
        }
        Ok(added)
    }

    /// Withdraw a pending group request.
    pub fn withdraw_group_request(&mut self, candidate: CandidateId, group_id: GroupId) -> bool {
        let removed = self
            .tracker
            .remove_request(candidate, &RequestKey::Group(group_id));
        if removed {
            self.dispatcher.mark_candidate_dirty(candidate);
        }
        removed
    }

    /// Groups visible to `viewer`: released ones for everyone, all of them for admins.
    pub fn group_summaries(&self, viewer: Option<CandidateId>) -> Vec<GroupSummary> {
        let admin = viewer.is_some_and(|c| self.tracker.is_admin(c));
        self.groups
            .iter()
            .filter(|group| admin || self.groups.is_released(group.id))
            .map(|group| GroupSummary {
                id: group.id,
                name: group.name.clone(),
                description: group.description.clone(),
                status: group.status,
                available_count: group.roles().len(),
                requested: viewer.is_some_and(|c| {
                    self.tracker.has_request(c, &RequestKey::Group(group.id))
                }),
            })
            .collect()
    }

    // =========================================================================
    // READ-ONLY VIEWS
    // =========================================================================

    /// Every available role as seen by `viewer`, in id order.
    pub fn role_snapshot(&self, viewer: Option<CandidateId>) -> Vec<RoleInfo> {
        self.registry
            .available()
            .map(|role| self.role_info(role, viewer))
            .collect()
    }

    fn role_info(&self, role: &Role, viewer: Option<CandidateId>) -> RoleInfo {
        let (kind, member_count, resolves_at, requested) = match &role.mode {
            AllocationMode::FirstComeFirstServe => {
                let key = RequestKey::Family(role.family.clone());
                (
                    RoleKind::FirstComeFirstServe,
                    self.tracker.requester_count(&key),
                    Some(self.lottery.expires_at()),
                    viewer.is_some_and(|c| self.tracker.has_request(c, &key)),
                )
            }
            AllocationMode::Immediate => (RoleKind::Immediate, 0, None, false),
            AllocationMode::Raffle(_) => match self.raffles.get(role.id) {
                Some(raffle) => {
                    let joined = viewer.is_some_and(|c| raffle.is_member(c));
                    let kind = if joined {
                        RoleKind::RaffleJoined
                    } else {
                        RoleKind::RaffleInProgress
                    };
                    (
                        kind,
                        raffle.members().len(),
                        Some(self.now + raffle.countdown()),
                        joined,
                    )
                }
                None => (RoleKind::RaffleOpen, 0, None, false),
            },
        };

        RoleInfo {
            id: role.id,
            family: role.family.clone(),
            name: role.name.clone(),
            description: role.description.clone(),
            rules: role.rules.clone(),
            kind,
            member_count,
            resolves_at,
            requested,
        }
    }

    /// Available roles aggregated per family, in family order.
    pub fn family_summaries(&self, viewer: Option<CandidateId>) -> Vec<FamilySummary> {
        let mut summaries: BTreeMap<RoleFamily, FamilySummary> = BTreeMap::new();
        for role in self.registry.available() {
            let summary = summaries
                .entry(role.family.clone())
                .or_insert_with(|| FamilySummary {
                    family: role.family.clone(),
                    name: role.name.clone(),
                    description: role.description.clone(),
                    rules: role.rules.clone(),
                    lottery_count: 0,
                    immediate_count: 0,
                    raffle_count: 0,
                    requested: viewer.is_some_and(|c| {
                        self.tracker
                            .has_request(c, &RequestKey::Family(role.family.clone()))
                    }),
                });
            match role.mode {
                AllocationMode::FirstComeFirstServe => summary.lottery_count += 1,
                AllocationMode::Immediate => summary.immediate_count += 1,
                AllocationMode::Raffle(_) => summary.raffle_count += 1,
            }
        }
        summaries.into_values().collect()
    }

    /// The available role after `current` in the family, wrapping to the first.
    pub fn next_role_in_family(&self, family: &RoleFamily, current: RoleId) -> Option<RoleId> {
        let ids: Vec<RoleId> = self
            .registry
            .available_in_family(family)
            .map(|role| role.id)
            .collect();
        ids.iter()
            .copied()
            .find(|id| *id > current)
            .or_else(|| ids.first().copied())
    }

    /// Available roles, including those in released groups.
    pub fn available_count(&self) -> usize {
        count_update(&self.registry, &self.groups).available_count
    }

    /// Families with at least one available role.
    pub fn available_families(&self) -> Vec<RoleFamily> {
        self.registry.available_families().into_iter().collect()
    }

    /// Look up a registered role
    pub fn role(&self, role_id: RoleId) -> Option<&Role> {
        self.registry.get(role_id)
    }

    /// Families the candidate has a pending lottery request for
    pub fn requested_families(&self, candidate: CandidateId) -> Vec<RoleFamily> {
        self.tracker
            .requests_of(candidate)
            .into_iter()
            .filter_map(|key| match key {
                RequestKey::Family(family) => Some(family),
                RequestKey::Group(_) => None,
            })
            .collect()
    }

    /// Every pending lottery request of the candidate
    pub fn pending_requests(&self, candidate: CandidateId) -> Vec<RequestKey> {
        self.tracker.requests_of(candidate)
    }

    /// Raffles the candidate is a member of
    pub fn joined_raffles(&self, candidate: CandidateId) -> Vec<RoleId> {
        self.tracker.raffles_of(candidate)
    }

    /// Running raffle for a role
    pub fn raffle(&self, role_id: RoleId) -> Option<&Raffle> {
        self.raffles.get(role_id)
    }

    /// Current status of a candidate
    pub fn candidate_status(&self, candidate: CandidateId) -> CandidateStatus {
        self.tracker.status(candidate)
    }

    /// Session time the current lottery period started
    pub fn lottery_start_time(&self) -> Duration {
        self.lottery.started_at()
    }

    /// Session time the current lottery period expires
    pub fn lottery_expires_time(&self) -> Duration {
        self.lottery.expires_at()
    }

    /// Result of the most recent lottery pass
    pub fn last_lottery(&self) -> &LotteryReport {
        &self.last_report
    }

    /// Drop every role, raffle, group and request for a round restart.
    ///
    /// Candidate statuses and admin rights survive, as does the identifier
    /// counter. The next tick runs a lottery pass.
    pub fn reset(&mut self) {
        for outcome in self.raffles.cancel_all(CancelReason::SessionReset) {
            self.dispatcher.notify_raffle_finished(&outcome);
        }
        self.registry.clear();
        self.groups.clear();
        self.tracker.clear();
        self.lottery.reset();
        self.last_report = LotteryReport::default();
        self.dispatcher.mark_dirty();
        info!(next_id = self.allocator.peek(), "ghost role session reset");
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Remove the candidate from every request and raffle.
    fn clear_candidate(&mut self, candidate: CandidateId) {
        let (changed, cancelled) = self.tracker.clear_all(candidate, &mut self.raffles);
        for outcome in &cancelled {
            self.finish_raffle(outcome);
        }
        if changed {
            self.dispatcher.mark_candidate_dirty(candidate);
            self.dispatcher.mark_dirty();
        }
    }

    /// Mirror a finished raffle into the tracker and notify observers.
    fn finish_raffle(&mut self, outcome: &RaffleOutcome) {
        let role_id = outcome.role_id();
        for member in outcome.members() {
            self.tracker.remove_raffle(*member, role_id);
            self.dispatcher.mark_candidate_dirty(*member);
        }
        if let Some(winner) = outcome.winner() {
            self.clear_candidate(winner);
        }
        self.dispatcher.mark_dirty();
        self.dispatcher.notify_raffle_finished(outcome);
    }

    fn eligible_requesters(&self, key: &RequestKey) -> Vec<CandidateId> {
        self.tracker
            .requesters(key)
            .into_iter()
            .filter(|c| self.tracker.is_eligible(*c))
            .collect()
    }

    /// Draw one batch and settle its winners.
    fn draw_batch(
        &mut self,
        key: RequestKey,
        roles: Vec<RoleId>,
        successful: &mut BTreeSet<CandidateId>,
        report: &mut LotteryReport,
    ) {
        let candidates = self.eligible_requesters(&key);
        if roles.is_empty() || candidates.is_empty() {
            return;
        }

        let batch = LotteryBatch::new(key, roles, candidates, self.random.as_mut());
        let result = {
            let mut gate = TakeoverGate {
                registry: &mut self.registry,
                groups: &mut self.groups,
                tracker: &self.tracker,
                takeover: self.takeover.as_mut(),
                dispatcher: &mut self.dispatcher,
            };
            batch.draw(successful, &mut gate)
        };
        debug!(
            key = ?batch.key(),
            roles = batch.roles().len(),
            candidates = batch.candidates().len(),
            winners = result.winners.len(),
            failed = result.failed_roles.len(),
            "lottery batch drawn"
        );

        for (candidate, _) in &result.winners {
            self.clear_candidate(*candidate);
        }
        report.winners.extend(result.winners);
        report.unclaimed.extend(result.failed_roles);
        report.unclaimed.extend(result.unconsumed);
    }

    /// One full lottery pass: groups, then families, then pruning.
    fn run_lottery_pass(&mut self) -> LotteryReport {
        let mut report = LotteryReport {
            released_groups: self.groups.promote_releasing(),
            ..LotteryReport::default()
        };
        if !report.released_groups.is_empty() {
            self.dispatcher.mark_dirty();
        }

        let mut successful = BTreeSet::new();

        for group_id in self.groups.released() {
            let roles: Vec<RoleId> = self
                .groups
                .get(group_id)
                .map(|group| {
                    group
                        .roles()
                        .iter()
                        .copied()
                        .filter(|id| self.registry.is_takeable(*id))
                        .collect()
                })
                .unwrap_or_default();
            self.draw_batch(RequestKey::Group(group_id), roles, &mut successful, &mut report);

            if self.groups.get(group_id).is_some_and(|g| g.roles().is_empty()) {
                self.groups.remove(group_id);
                report.consumed_groups.push(group_id);
            }
        }

        for family in self.registry.lottery_families() {
            let roles = self
                .registry
                .snapshot(&family)
                .into_iter()
                .map(|role| role.id)
                .collect();
            self.draw_batch(RequestKey::Family(family), roles, &mut successful, &mut report);
        }

        let registry = &self.registry;
        let groups = &self.groups;
        report.pruned = self.tracker.retain_requests(|key| match key {
            RequestKey::Family(family) => registry.has_family(family),
            RequestKey::Group(id) => groups.is_released(*id),
        });
        for candidate in &report.pruned {
            self.dispatcher.mark_candidate_dirty(*candidate);
        }
        if !report.consumed_groups.is_empty() || !report.pruned.is_empty() {
            self.dispatcher.mark_dirty();
        }

        self.lottery.start_period(self.now);
        info!(
            pass = self.lottery.passes(),
            winners = report.winners.len(),
            unclaimed = report.unclaimed.len(),
            consumed_groups = report.consumed_groups.len(),
            pruned = report.pruned.len(),
            "lottery pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SeededRandom;
    use uuid::Uuid;

    fn candidate(n: u128) -> CandidateId {
        CandidateId::from_uuid(Uuid::from_u128(n))
    }

    fn engine() -> GhostRoleEngine {
        GhostRoleEngine::new(
            EngineConfig::default(),
            Box::new(SeededRandom::new(7)),
            Box::new(|_: CandidateId, _: &Role| true),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            lottery_period_secs: -3.0,
            ..EngineConfig::default()
        };
        let result = GhostRoleEngine::new(
            config,
            Box::new(SeededRandom::new(0)),
            Box::new(|_: CandidateId, _: &Role| true),
        );
        assert!(matches!(result, Err(GhostRoleError::InvalidConfig(_))));
    }

    #[test]
    fn test_allocated_ids_skip_live_roles() {
        let mut engine = engine();
        engine.on_role_available(Role::new(RoleId(2), "mouse", "Mouse"));
        assert_eq!(engine.allocate_role_id(), RoleId(1));
        assert_eq!(engine.allocate_role_id(), RoleId(3));
    }

    #[test]
    fn test_request_requires_eligibility() {
        let mut engine = engine();
        engine.on_role_available(Role::new(RoleId(1), "mouse", "Mouse"));
        assert_eq!(
            engine.request_role(candidate(1), RoleId(1)),
            Err(GhostRoleError::IneligibleCandidate(candidate(1)))
        );

        engine.on_candidate_status_changed(candidate(1), CandidateStatus::InGame);
        assert_eq!(
            engine.request_role(candidate(1), RoleId(9)),
            Err(GhostRoleError::UnknownRoleId(RoleId(9)))
        );
        assert_eq!(engine.request_role(candidate(1), RoleId(1)), Ok(RequestOutcome::Queued));
        assert_eq!(
            engine.request_role(candidate(1), RoleId(1)),
            Ok(RequestOutcome::AlreadyQueued)
        );
    }

    #[test]
    fn test_next_role_wraps() {
        let mut engine = engine();
        for id in [1, 4, 6] {
            engine.on_role_available(Role::new(RoleId(id), "mouse", "Mouse"));
        }
        engine.on_role_available(Role::new(RoleId(5), "rat", "Rat"));
        let mouse = RoleFamily::new("mouse");

        assert_eq!(engine.next_role_in_family(&mouse, RoleId(1)), Some(RoleId(4)));
        assert_eq!(engine.next_role_in_family(&mouse, RoleId(4)), Some(RoleId(6)));
        assert_eq!(engine.next_role_in_family(&mouse, RoleId(6)), Some(RoleId(1)));
        assert_eq!(engine.next_role_in_family(&RoleFamily::new("cat"), RoleId(1)), None);
    }

    #[test]
    fn test_family_summaries_count_modes() {
        let mut engine = engine();
        let settings = engine.default_raffle_settings().clone();
        engine.on_role_available(Role::new(RoleId(1), "mouse", "Mouse").with_description("squeak"));
        engine.on_role_available(
            Role::new(RoleId(2), "mouse", "Mouse").with_mode(AllocationMode::Immediate),
        );
        engine.on_role_available(Role::new(RoleId(3), "mouse", "Mouse").with_raffle(settings));

        let summaries = engine.family_summaries(None);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].description, "squeak");
        assert_eq!(
            (summaries[0].lottery_count, summaries[0].immediate_count, summaries[0].raffle_count),
            (1, 1, 1)
        );
        assert_eq!(summaries[0].total(), 3);
    }
}
