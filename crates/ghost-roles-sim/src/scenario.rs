//! Scenario files
//!
//! A scenario describes which roles appear when, which candidates come and
//! go, and what each candidate asks for. Times are seconds of session time.

use anyhow::{bail, Context, Result};
use ghost_roles::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// How a scenario role is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleModeSpec {
    /// Periodic lottery
    #[default]
    Lottery,
    /// First request wins
    Immediate,
    /// Per-role raffle using the engine's default raffle settings
    Raffle,
}

/// One batch of identical roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleSpec {
    /// Family key
    pub family: String,
    /// Display name; defaults to the family
    #[serde(default)]
    pub name: Option<String>,
    /// Display description
    #[serde(default)]
    pub description: String,
    /// How many roles to spawn
    #[serde(default = "default_count")]
    pub count: u32,
    /// Allocation mode
    #[serde(default)]
    pub mode: RoleModeSpec,
    /// Raffle decider override
    #[serde(default)]
    pub decider: Option<String>,
    /// Spawn time
    #[serde(default)]
    pub at_secs: f64,
    /// Despawn time, if the roles vanish before being taken
    #[serde(default)]
    pub until_secs: Option<f64>,
}

fn default_count() -> u32 {
    1
}

/// One simulated player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    /// Display name, unique within the scenario
    pub name: String,
    /// Time the candidate enters the game
    #[serde(default)]
    pub joins_at_secs: f64,
    /// Time the candidate disconnects
    #[serde(default)]
    pub leaves_at_secs: Option<f64>,
    /// Whether the host grants admin rights
    #[serde(default)]
    pub admin: bool,
    /// Families requested once the candidate is in game
    #[serde(default)]
    pub requests: Vec<String>,
}

/// Host behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSpec {
    /// Families whose takeovers the host refuses
    #[serde(default)]
    pub refuse_families: Vec<String>,
}

/// A complete scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name, echoed in the summary
    #[serde(default)]
    pub name: String,
    /// Randomness seed; the command line may override it
    #[serde(default)]
    pub seed: u64,
    /// Simulated frame length
    #[serde(default = "default_tick")]
    pub tick_secs: f64,
    /// Total simulated time
    pub duration_secs: f64,
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,
    /// Host behaviour
    #[serde(default)]
    pub host: HostSpec,
    /// Roles to spawn
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    /// Candidates to simulate
    #[serde(default)]
    pub candidates: Vec<CandidateSpec>,
}

fn default_tick() -> f64 {
    0.5
}

impl Scenario {
    /// Parse a scenario from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(text).context("failed to parse scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Read and parse a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid scenario {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        if !(self.tick_secs.is_finite() && self.tick_secs > 0.0) {
            bail!("tick_secs must be positive, got {}", self.tick_secs);
        }
        if !(self.duration_secs.is_finite() && self.duration_secs >= 0.0) {
            bail!("duration_secs must be non-negative, got {}", self.duration_secs);
        }

        let mut names = BTreeSet::new();
        for candidate in &self.candidates {
            if !names.insert(candidate.name.as_str()) {
                bail!("duplicate candidate name {:?}", candidate.name);
            }
        }
        for role in &self.roles {
            if role.family.trim().is_empty() {
                bail!("role family must not be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_scenario() {
        let scenario = Scenario::from_toml_str(
            r#"
            duration_secs = 10.0

            [[roles]]
            family = "mouse"

            [[candidates]]
            name = "alice"
            requests = ["mouse"]
            "#,
        )
        .unwrap();

        assert_eq!(scenario.tick_secs, 0.5);
        assert_eq!(scenario.roles[0].count, 1);
        assert_eq!(scenario.roles[0].mode, RoleModeSpec::Lottery);
        assert_eq!(scenario.engine, EngineConfig::default());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let result = Scenario::from_toml_str(
            r#"
            duration_secs = 10.0

            [[candidates]]
            name = "alice"

            [[candidates]]
            name = "alice"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_tick() {
        assert!(Scenario::from_toml_str("duration_secs = 1.0\ntick_secs = 0.0").is_err());
    }
}
