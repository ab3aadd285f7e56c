//! Engine configuration
//!
//! Loaded from TOML, then overlaid with `GHOST_ROLES_*` environment variables
//! and individual `key=value` overrides. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! lottery_period_secs = 30.0
//! quick_lottery = false
//!
//! [raffle]
//! initial_secs = 30.0
//! join_extension_secs = 10.0
//! max_secs = 120.0
//! decider = "default"
//! ```

use crate::decider::RaffleDecider;
use crate::error::{GhostRoleError, GhostRoleResult};
use crate::role::RaffleSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables read by [`EngineConfig::merge_with_env`].
pub const ENV_PREFIX: &str = "GHOST_ROLES_";

/// Lottery period used when `quick_lottery` is set.
pub const QUICK_LOTTERY_PERIOD: Duration = Duration::from_secs(1);

/// Default raffle timing for roles registered without explicit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaffleConfig {
    /// Countdown when the first member joins
    pub initial_secs: f64,
    /// Extension per first-time joiner
    pub join_extension_secs: f64,
    /// Countdown cap including extensions
    pub max_secs: f64,
    /// Decider id; unknown ids on individual roles fall back to this one
    pub decider: String,
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self {
            initial_secs: 30.0,
            join_extension_secs: 10.0,
            max_secs: 120.0,
            decider: RaffleDecider::DEFAULT_ID.to_string(),
        }
    }
}

/// Configuration for a [`crate::GhostRoleEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between lottery passes
    pub lottery_period_secs: f64,
    /// Run lotteries every second instead of every period
    pub quick_lottery: bool,
    /// Default raffle settings
    pub raffle: RaffleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lottery_period_secs: 30.0,
            quick_lottery: false,
            raffle: RaffleConfig::default(),
        }
    }
}

fn secs(name: &str, value: f64) -> GhostRoleResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| GhostRoleError::invalid_config(format!("{name} must be finite and non-negative, got {value}")))
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> GhostRoleResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GhostRoleError::invalid_config(format!("invalid value for {key}: {value:?}")))
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> GhostRoleResult<Self> {
        toml::from_str(text).map_err(|e| GhostRoleError::ConfigParse(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load_from_file(path: &Path) -> GhostRoleResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GhostRoleError::ConfigIo {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> GhostRoleResult<String> {
        toml::to_string(self).map_err(|e| GhostRoleError::ConfigParse(e.to_string()))
    }

    /// Overlay `GHOST_ROLES_*` variables from the process environment.
    pub fn merge_with_env(&mut self) -> GhostRoleResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Overlay variables from an explicit list of `(name, value)` pairs.
    ///
    /// `GHOST_ROLES_RAFFLE_MAX_SECS` maps to `raffle.max_secs`; names without
    /// the prefix are ignored.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> GhostRoleResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            let key = match key.strip_prefix("raffle_") {
                Some(rest) => format!("raffle.{rest}"),
                None => key,
            };
            self.set_from_string(&key, value.as_ref())?;
        }
        Ok(())
    }

    /// Set a single option by its dotted key.
    pub fn set_from_string(&mut self, key: &str, value: &str) -> GhostRoleResult<()> {
        match key {
            "lottery_period_secs" => self.lottery_period_secs = parse_value(key, value)?,
            "quick_lottery" => self.quick_lottery = parse_value(key, value)?,
            "raffle.initial_secs" => self.raffle.initial_secs = parse_value(key, value)?,
            "raffle.join_extension_secs" => {
                self.raffle.join_extension_secs = parse_value(key, value)?
            }
            "raffle.max_secs" => self.raffle.max_secs = parse_value(key, value)?,
            "raffle.decider" => self.raffle.decider = value.trim().to_string(),
            _ => {
                return Err(GhostRoleError::invalid_config(format!(
                    "unknown option {key}"
                )))
            }
        }
        Ok(())
    }

    /// Check periods, durations and the decider id.
    pub fn validate(&self) -> GhostRoleResult<()> {
        let period = secs("lottery_period_secs", self.lottery_period_secs)?;
        if period.is_zero() {
            return Err(GhostRoleError::invalid_config(
                "lottery_period_secs must be positive",
            ));
        }
        self.raffle_settings()?.validate()?;
        if RaffleDecider::from_id(&self.raffle.decider).is_none() {
            return Err(GhostRoleError::invalid_config(format!(
                "unknown raffle decider {:?}",
                self.raffle.decider
            )));
        }
        Ok(())
    }

    /// Effective lottery period.
    pub fn lottery_period(&self) -> GhostRoleResult<Duration> {
        if self.quick_lottery {
            return Ok(QUICK_LOTTERY_PERIOD);
        }
        secs("lottery_period_secs", self.lottery_period_secs)
    }

    /// Default raffle settings as durations.
    pub fn raffle_settings(&self) -> GhostRoleResult<RaffleSettings> {
        Ok(RaffleSettings::new(
            secs("raffle.initial_secs", self.raffle.initial_secs)?,
            secs("raffle.join_extension_secs", self.raffle.join_extension_secs)?,
            secs("raffle.max_secs", self.raffle.max_secs)?,
        )
        .with_decider(self.raffle.decider.clone()))
    }

    /// Decider used when a role names an unknown one.
    pub fn default_decider(&self) -> RaffleDecider {
        RaffleDecider::from_id(&self.raffle.decider).unwrap_or_default()
    }
}
