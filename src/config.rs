//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the feed API key) are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub betting: BettingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    /// How often the scheduler triggers a synchronization run.
    pub sync_interval_secs: u64,
    /// JSON state file. Falls back to the storage default when absent.
    #[serde(default)]
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub api_key_env: String,
    #[serde(default = "default_markets")]
    pub markets: Vec<String>,
    #[serde(default = "default_bookmakers")]
    pub bookmakers: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Also pull the scores endpoint so completions and results arrive.
    #[serde(default = "default_true")]
    pub fetch_scores: bool,
    #[serde(default = "default_scores_days_from")]
    pub scores_days_from: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BettingConfig {
    /// Maximum legs on a single bet.
    #[serde(default = "default_max_selections")]
    pub max_selections: usize,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            max_selections: default_max_selections(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.the-odds-api.com/v4".to_string()
}

fn default_markets() -> Vec<String> {
    vec!["h2h".to_string()]
}

fn default_bookmakers() -> Vec<String> {
    ["bet365", "betfair", "unibet_eu", "betclic"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_scores_days_from() -> u32 {
    3
}

fn default_max_selections() -> usize {
    12
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service.sync_interval_secs == 0 {
            bail!("service.sync_interval_secs must be greater than zero");
        }
        if self.feed.markets.is_empty() {
            bail!("feed.markets must list at least one market");
        }
        if self.feed.timeout_secs == 0 {
            bail!("feed.timeout_secs must be greater than zero");
        }
        if self.betting.max_selections == 0 {
            bail!("betting.max_selections must be greater than zero");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
