//! TOML-based rewarder configuration.
//!
//! Holds:
//! - AFK detection and playtime reporting settings
//! - Goal modules (daily and global playtime goals) with their thresholds
//! - Named reward collections goals can refer to
//!
//! Configuration is stored at `~/.config/playtime-rewarder/config.toml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::data_dir;
use crate::error::{ConfigError, CoreError, Result};
use crate::goals::{Goal, GoalRegistry, GoalScope, ScopeModule, ScopeSet};
use crate::rewards::{Reward, RewardCollection};
use crate::tracker::{TrackerSettings, IDLE_TICKS_TO_AFK};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugMode {
    #[default]
    None,
    Debug,
    Trace,
}

impl DebugMode {
    /// Default `tracing` filter directive for this mode.
    pub fn log_filter(self) -> &'static str {
        match self {
            DebugMode::None => "info",
            DebugMode::Debug => "info,rewarder_core=debug,rewarder_cli=debug",
            DebugMode::Trace => "debug,rewarder_core=trace,rewarder_cli=trace",
        }
    }
}

/// One goal entry: a playtime threshold and the rewards it pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GoalConfig {
    /// Threshold in minutes.
    pub playtime: u32,
    /// Name of an entry in `collections` to pay in addition to `rewards`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default)]
    pub rewards: RewardCollection,
}

/// Settings of one goal module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScopeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Evaluate goals every this many global minutes. 0 never evaluates.
    #[serde(default = "default_refresh_time")]
    pub refresh_time: u32,
    #[serde(default)]
    pub goals: Vec<GoalConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModulesConfig {
    #[serde(default = "ScopeConfig::daily_default")]
    pub daily_playtime_goals: ScopeConfig,
    #[serde(default = "ScopeConfig::global_default")]
    pub global_playtime_goals: ScopeConfig,
    /// Module sections this build does not know about. Ignored with a warning.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

/// Rewarder configuration.
///
/// Serialized to/from TOML at `~/.config/playtime-rewarder/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub debug_mode: DebugMode,
    /// Report active minutes only (AFK time ignored) when true.
    #[serde(default = "default_true")]
    pub playtime_ignore_afk: bool,
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_ticks: u32,
    /// Driver period between ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub collections: BTreeMap<String, RewardCollection>,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_refresh_time() -> u32 {
    1
}
fn default_idle_threshold() -> u32 {
    IDLE_TICKS_TO_AFK
}
fn default_tick_interval() -> u64 {
    1000
}

impl ScopeConfig {
    fn daily_default() -> Self {
        Self {
            enabled: false,
            refresh_time: default_refresh_time(),
            goals: vec![GoalConfig {
                playtime: 30,
                collection: None,
                rewards: RewardCollection::new(vec![Reward::message(
                    "Thanks for playing 30 minutes today, %user%!",
                )]),
            }],
        }
    }

    fn global_default() -> Self {
        Self {
            enabled: true,
            refresh_time: default_refresh_time(),
            goals: vec![
                GoalConfig {
                    playtime: 60,
                    collection: None,
                    rewards: RewardCollection::new(vec![
                        Reward::command("give %user% diamond 1"),
                        Reward::message("You have played for an hour, %user%!"),
                    ]),
                },
                GoalConfig {
                    playtime: 600,
                    collection: Some("milestone".into()),
                    rewards: RewardCollection::default(),
                },
            ],
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            daily_playtime_goals: ScopeConfig::daily_default(),
            global_playtime_goals: ScopeConfig::global_default(),
            unknown: BTreeMap::new(),
        }
    }
}

impl ModulesConfig {
    pub fn scope(&self, scope: GoalScope) -> &ScopeConfig {
        match scope {
            GoalScope::Daily => &self.daily_playtime_goals,
            GoalScope::Global => &self.global_playtime_goals,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut collections = BTreeMap::new();
        collections.insert(
            "milestone".to_string(),
            RewardCollection::new(vec![Reward::Broadcast {
                message: "%user% has played for %playtime% minutes!".into(),
            }]),
        );
        Self {
            debug_mode: DebugMode::None,
            playtime_ignore_afk: true,
            idle_threshold_ticks: IDLE_TICKS_TO_AFK,
            tick_interval_ms: default_tick_interval(),
            modules: ModulesConfig::default(),
            collections,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing the defaults when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing the defaults there when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// defaults cannot be written.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                CoreError::Config(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    /// Persist to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            CoreError::Config(ConfigError::SaveFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            warn!(error = %e, "using default configuration");
            Self::default()
        })
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Change a value in memory by dot-separated key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the
    /// existing type.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Change a value by key and persist. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            idle_threshold_ticks: self.idle_threshold_ticks,
            ignore_afk: self.playtime_ignore_afk,
        }
    }

    /// Build the goal registries of every enabled module.
    ///
    /// Unknown modules and unknown collection references are logged and
    /// skipped; a goal left with no rewards is dropped.
    pub fn goal_scopes(&self) -> ScopeSet {
        for name in self.modules.unknown.keys() {
            warn!(module = %name, "unknown goal module in configuration, ignoring");
        }

        let modules = GoalScope::ALL
            .into_iter()
            .filter_map(|scope| {
                let section = self.modules.scope(scope);
                if !section.enabled {
                    return None;
                }
                let goals = section
                    .goals
                    .iter()
                    .filter_map(|goal| self.resolve_goal(scope, goal));
                Some(ScopeModule::new(
                    scope,
                    section.refresh_time,
                    GoalRegistry::from_goals(goals),
                ))
            })
            .collect();
        ScopeSet::new(modules)
    }

    fn resolve_goal(&self, scope: GoalScope, goal: &GoalConfig) -> Option<Goal> {
        let mut rewards = goal.rewards.clone();
        if let Some(name) = &goal.collection {
            match self.collections.get(name) {
                Some(collection) => rewards.extend(collection.clone()),
                None => warn!(
                    %scope,
                    threshold = goal.playtime,
                    collection = %name,
                    "goal refers to an unknown reward collection"
                ),
            }
        }
        if rewards.is_empty() {
            warn!(%scope, threshold = goal.playtime, "goal has no rewards, skipping");
            return None;
        }
        Some(Goal::new(goal.playtime, rewards))
    }
}
