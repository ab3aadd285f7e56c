//! Scenario runner
//!
//! Drives a [`GhostRoleEngine`] frame by frame: spawns and despawns roles,
//! connects and disconnects candidates, issues their requests, and collects
//! a [`SimSummary`] at the end.

use crate::host::{HostWorld, SimHost, SimStats, StatsObserver};
use crate::scenario::{RoleModeSpec, Scenario};
use anyhow::{Context, Result};
use ghost_roles::{
    AllocationMode, CandidateId, CandidateStatus, EngineConfig, GhostRoleEngine, RequestOutcome,
    Role, RoleFamily, RoleId, RoleKind, SeededRandom,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Options from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the scenario seed
    pub seed: Option<u64>,
    /// `key=value` engine overrides, applied after the environment
    pub overrides: Vec<(String, String)>,
}

/// One completed assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    /// Candidate name
    pub candidate: String,
    /// Role taken
    pub role_id: RoleId,
    /// Role family
    pub family: RoleFamily,
    /// Session time of the takeover, in seconds
    pub at_secs: f64,
}

/// Result of a run, printed as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SimSummary {
    /// Scenario name
    pub scenario: String,
    /// Seed in effect
    pub seed: u64,
    /// Simulated seconds
    pub simulated_secs: f64,
    /// Assignments in completion order
    pub assignments: Vec<Assignment>,
    /// Candidates that never got a role
    pub unassigned: Vec<String>,
    /// Roles still available at the end
    pub remaining_roles: usize,
    /// Lottery passes that produced at least one winner
    pub productive_lotteries: u64,
    /// Raffles won
    pub raffles_won: u64,
    /// Raffles expired without a winner
    pub raffles_without_winner: u64,
    /// Raffles cancelled before expiry
    pub raffles_cancelled: u64,
    /// Takeovers refused by the host
    pub refused_takeovers: u64,
    /// Batched count updates pushed to observers
    pub count_updates: u64,
    /// Point-to-point count updates sent to candidates entering the game
    pub counts_sent: u64,
    /// Per-candidate view invalidations
    pub view_updates: u64,
    /// Roles the host reports as controlled
    pub controlled_roles: usize,
}

struct SimCandidate {
    id: CandidateId,
    name: String,
    joins_at: Duration,
    leaves_at: Option<Duration>,
    admin: bool,
    pending: Vec<RoleFamily>,
    status: CandidateStatus,
}

struct SimRoleBatch {
    family: RoleFamily,
    name: String,
    description: String,
    count: u32,
    mode: RoleModeSpec,
    decider: Option<String>,
    at: Duration,
    until: Option<Duration>,
    spawned: Vec<RoleId>,
    despawned: bool,
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid time {value}"))
}

/// Build the engine configuration: scenario, then environment, then overrides.
pub fn engine_config(scenario: &Scenario, options: &RunOptions) -> Result<EngineConfig> {
    let mut config = scenario.engine.clone();
    config
        .merge_with_env()
        .context("failed to apply environment overrides")?;
    for (key, value) in &options.overrides {
        config
            .set_from_string(key, value)
            .with_context(|| format!("failed to apply override {key}={value}"))?;
    }
    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

/// Run a scenario to completion.
pub fn run(scenario: &Scenario, options: &RunOptions) -> Result<SimSummary> {
    let seed = options.seed.unwrap_or(scenario.seed);
    let config = engine_config(scenario, options)?;

    let world = Arc::new(Mutex::new(HostWorld::new(
        scenario.host.refuse_families.iter().map(RoleFamily::new),
    )));
    let stats = Arc::new(Mutex::new(SimStats::default()));

    let mut engine = GhostRoleEngine::new(
        config,
        Box::new(SeededRandom::new(seed)),
        Box::new(SimHost::new(Arc::clone(&world))),
    )?
    .with_observer(Box::new(StatsObserver::new(Arc::clone(&stats))));

    let mut candidates = scenario
        .candidates
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            Ok(SimCandidate {
                id: CandidateId::from_uuid(Uuid::from_u128(index as u128 + 1)),
                name: spec.name.clone(),
                joins_at: seconds(spec.joins_at_secs)?,
                leaves_at: spec.leaves_at_secs.map(seconds).transpose()?,
                admin: spec.admin,
                pending: spec.requests.iter().map(RoleFamily::new).collect(),
                status: CandidateStatus::Disconnected,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut batches = scenario
        .roles
        .iter()
        .map(|spec| {
            Ok(SimRoleBatch {
                family: RoleFamily::new(spec.family.as_str()),
                name: spec.name.clone().unwrap_or_else(|| spec.family.clone()),
                description: spec.description.clone(),
                count: spec.count,
                mode: spec.mode,
                decider: spec.decider.clone(),
                at: seconds(spec.at_secs)?,
                until: spec.until_secs.map(seconds).transpose()?,
                spawned: Vec::new(),
                despawned: false,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let tick = seconds(scenario.tick_secs)?;
    let end = seconds(scenario.duration_secs)?;
    let mut takeover_times: BTreeMap<RoleId, Duration> = BTreeMap::new();
    let mut productive_lotteries = 0;
    let mut last_pass = Duration::MAX;

    info!(scenario = %scenario.name, seed, "simulation started");

    while engine.now() < end {
        let now = engine.now();
        let taken_before = stats.lock().takeovers.len();
        spawn_roles(&mut engine, &mut batches, now);
        update_candidates(&mut engine, &mut candidates, now);
        issue_requests(&mut engine, &mut candidates);

        engine.tick(tick);
        for notice in &stats.lock().takeovers[taken_before..] {
            takeover_times.insert(notice.role_id, engine.now());
        }

        if engine.lottery_start_time() != last_pass {
            last_pass = engine.lottery_start_time();
            if !engine.last_lottery().winners.is_empty() {
                productive_lotteries += 1;
            }
        }
    }

    let stats = stats.lock().clone();
    let names: BTreeMap<CandidateId, &str> = candidates
        .iter()
        .map(|c| (c.id, c.name.as_str()))
        .collect();

    let assignments: Vec<Assignment> = stats
        .takeovers
        .iter()
        .map(|notice| Assignment {
            candidate: names
                .get(&notice.candidate)
                .map_or_else(|| notice.candidate.to_string(), |name| (*name).to_string()),
            role_id: notice.role_id,
            family: notice.family.clone(),
            at_secs: takeover_times
                .get(&notice.role_id)
                .map_or(0.0, Duration::as_secs_f64),
        })
        .collect();

    let unassigned = candidates
        .iter()
        .filter(|c| !stats.takeovers.iter().any(|t| t.candidate == c.id))
        .map(|c| c.name.clone())
        .collect();

    let (refused_takeovers, controlled_roles) = {
        let world = world.lock();
        (world.refusals(), world.controlled().len())
    };

    let summary = SimSummary {
        scenario: scenario.name.clone(),
        seed,
        simulated_secs: engine.now().as_secs_f64(),
        assignments,
        unassigned,
        remaining_roles: engine.available_count(),
        productive_lotteries,
        raffles_won: stats.raffles_won,
        raffles_without_winner: stats.raffles_without_winner,
        raffles_cancelled: stats.raffles_cancelled,
        refused_takeovers,
        count_updates: stats.count_updates,
        counts_sent: stats.counts_sent,
        view_updates: stats.view_updates,
        controlled_roles,
    };
    info!(
        assignments = summary.assignments.len(),
        unassigned = summary.unassigned.len(),
        "simulation finished"
    );
    Ok(summary)
}

fn spawn_roles(engine: &mut GhostRoleEngine, batches: &mut [SimRoleBatch], now: Duration) {
    for batch in batches.iter_mut() {
        if batch.spawned.is_empty() && !batch.despawned && now >= batch.at {
            for _ in 0..batch.count {
                let id = engine.allocate_role_id();
                let mode = match batch.mode {
                    RoleModeSpec::Lottery => AllocationMode::FirstComeFirstServe,
                    RoleModeSpec::Immediate => AllocationMode::Immediate,
                    RoleModeSpec::Raffle => {
                        let mut settings = engine.default_raffle_settings().clone();
                        if let Some(decider) = &batch.decider {
                            settings = settings.with_decider(decider.clone());
                        }
                        AllocationMode::Raffle(settings)
                    }
                };
                let role = Role::new(id, batch.family.clone(), batch.name.clone())
                    .with_description(batch.description.clone())
                    .with_mode(mode);
                engine.on_role_available(role);
                batch.spawned.push(id);
            }
            debug!(family = %batch.family, count = batch.count, "roles spawned");
        }

        if let Some(until) = batch.until {
            if !batch.despawned && !batch.spawned.is_empty() && now >= until {
                for id in &batch.spawned {
                    engine.on_role_unavailable(*id);
                }
                batch.despawned = true;
                debug!(family = %batch.family, "roles despawned");
            }
        }
    }
}

fn update_candidates(engine: &mut GhostRoleEngine, candidates: &mut [SimCandidate], now: Duration) {
    for candidate in candidates.iter_mut() {
        let gone = candidate.leaves_at.is_some_and(|at| now >= at);
        let target = if gone {
            CandidateStatus::Disconnected
        } else if now >= candidate.joins_at {
            CandidateStatus::InGame
        } else {
            continue;
        };
        if target == candidate.status {
            continue;
        }

        engine.on_candidate_status_changed(candidate.id, target);
        if target == CandidateStatus::InGame {
            engine.set_admin(candidate.id, candidate.admin);
        } else {
            candidate.pending.clear();
        }
        candidate.status = target;
        debug!(candidate = %candidate.name, status = ?target, "candidate status");
    }
}

/// Request the first visible role of each pending family; keep the rest pending.
fn issue_requests(engine: &mut GhostRoleEngine, candidates: &mut [SimCandidate]) {
    for candidate in candidates.iter_mut() {
        if candidate.status != CandidateStatus::InGame || candidate.pending.is_empty() {
            continue;
        }

        let snapshot = engine.role_snapshot(Some(candidate.id));
        let mut still_pending = Vec::new();
        for family in std::mem::take(&mut candidate.pending) {
            let target = snapshot
                .iter()
                .filter(|info| info.family == family)
                .find(|info| info.kind != RoleKind::RaffleJoined)
                .map(|info| info.id);
            let Some(role_id) = target else {
                still_pending.push(family);
                continue;
            };

            match engine.request_role(candidate.id, role_id) {
                Ok(RequestOutcome::TakenOver) => {
                    debug!(candidate = %candidate.name, %role_id, "immediate takeover");
                    still_pending.clear();
                    break;
                }
                Ok(outcome) => {
                    debug!(candidate = %candidate.name, %role_id, ?outcome, "role requested");
                }
                Err(err) => {
                    debug!(candidate = %candidate.name, %role_id, error = %err, "request rejected");
                    still_pending.push(family);
                }
            }
        }
        candidate.pending = still_pending;
    }
}
