//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Endpoints and secrets (bus URL, sidecar URL, config-repo token) are
//! referenced by env-var name in the config and resolved at runtime.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::bookies::BookieConfig;
use crate::engine::intake::GateSettings;
use crate::engine::reconcile::result_window;
use crate::engine::workers::PoolSettings;
use crate::engine::ListenerSettings;

/// Default config path; override with `BETRELAY_CONFIG`.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub listener: ListenerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    pub bookies: BookiesConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    pub name: String,
    /// Bookies this instance acks and executes for. Empty = all known.
    #[serde(default)]
    pub bookies: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    Nats,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    pub kind: BusKind,
    /// Env var holding the NATS server URL. The producer fleet reads
    /// `NATS_SERVER`, so the default matches it.
    pub url_env: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::Nats,
            url_env: "NATS_SERVER".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IntakeConfig {
    /// Legs per arbitrage cycle, fixed per deployment.
    pub expected_legs: usize,
    pub cycle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub dedup_high_water: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            expected_legs: 2,
            cycle_timeout_secs: 30,
            sweep_interval_secs: 10,
            dedup_high_water: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub workers_per_bookie: usize,
    pub queue_capacity: usize,
    pub enqueue_timeout_ms: u64,
    pub bet_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            workers_per_bookie: 1,
            queue_capacity: 64,
            enqueue_timeout_ms: 5_000,
            bet_timeout_secs: 30,
            max_retries: 2,
            retry_delay_secs: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    DryRun,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    /// Env var holding the automation sidecar base URL.
    pub endpoint_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::DryRun,
            endpoint_env: "EXECUTOR_URL".into(),
            request_timeout_secs: 25,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookieSourceKind {
    Static,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookiesConfig {
    pub source: BookieSourceKind,
    /// Env var holding the config repository URL (http source).
    #[serde(default)]
    pub url_env: Option<String>,
    /// Env var holding a bearer token for the config repository.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_reload_secs")]
    pub reload_interval_secs: u64,
    #[serde(default)]
    pub accounts: Vec<BookieConfig>,
}

fn default_reload_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    /// Elect one reconciler per cycle across a per-bookie fleet. Needs
    /// `listener.bookies`; the first entry is this instance's shard slot.
    pub shard_cycles: bool,
    /// How long to wait for a cycle's remaining leg results. Defaults to
    /// the worst-case execution time of one bet plus a grace period.
    pub result_timeout_secs: Option<u64>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shard_cycles: false,
            result_timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8088,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.intake.expected_legs < 2 {
            bail!("intake.expected_legs must be at least 2, got {}", self.intake.expected_legs);
        }
        if self.dispatch.max_concurrency == 0 {
            bail!("dispatch.max_concurrency must be positive");
        }
        if self.bookies.source == BookieSourceKind::Http && self.bookies.url_env.is_none() {
            bail!("bookies.url_env is required for the http source");
        }
        if self.reconcile.shard_cycles && self.listener.bookies.is_empty() {
            bail!("reconcile.shard_cycles needs listener.bookies to name this instance's primary bookie");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reconciler result window: the configured override, or one derived
    /// from the dispatch retry budget.
    pub fn reconcile_window(&self) -> Duration {
        match self.reconcile.result_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => result_window(&self.listener_settings().pool),
        }
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        let intake = &self.intake;
        let dispatch = &self.dispatch;
        ListenerSettings {
            owned_bookies: self.listener.bookies.clone(),
            gate: GateSettings {
                expected_legs: intake.expected_legs,
                cycle_timeout: Duration::from_secs(intake.cycle_timeout_secs),
                dedup_high_water: intake.dedup_high_water,
            },
            sweep_interval: Duration::from_secs(intake.sweep_interval_secs.max(1)),
            pool: PoolSettings {
                max_concurrency: dispatch.max_concurrency,
                workers_per_bookie: dispatch.workers_per_bookie,
                queue_capacity: dispatch.queue_capacity,
                enqueue_timeout: Duration::from_millis(dispatch.enqueue_timeout_ms),
                bet_timeout: Duration::from_secs(dispatch.bet_timeout_secs),
                max_retries: dispatch.max_retries,
                retry_delay: Duration::from_secs(dispatch.retry_delay_secs),
            },
        }
    }
}
