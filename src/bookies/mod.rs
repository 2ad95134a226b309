//! Bookie account configuration.
//!
//! Defines the `BookieConfigSource` trait and provides implementations for:
//! - Static: accounts listed in `config.toml`
//! - HTTP: a JSON array served by the remote config repository
//!
//! The [`BookieRegistry`] holds the current snapshot and is hot-swapped by
//! [`watch`] on a fixed interval.

pub mod http;
pub mod registry;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use http::HttpConfigSource;
pub use registry::BookieRegistry;

/// One bookmaker account. Only `name` drives routing and ownership; the
/// rest is handed to the executor untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookieConfig {
    pub name: String,
    #[serde(default, alias = "baseUrl")]
    pub base_url: String,
    /// Env var holding the account's login secret.
    #[serde(default, alias = "credentialsEnv")]
    pub credentials_env: Option<String>,
    #[serde(default, alias = "otpRequired")]
    pub otp_required: bool,
}

impl BookieConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: String::new(),
            credentials_env: None,
            otp_required: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// Where bookie account configs come from.
#[async_trait]
pub trait BookieConfigSource: Send + Sync {
    /// Fetch the full current set of account configs.
    async fn list_bookie_configs(&self) -> Result<Vec<BookieConfig>>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Accounts fixed at startup from the config file.
pub struct StaticConfigSource {
    configs: Vec<BookieConfig>,
}

impl StaticConfigSource {
    pub fn new(configs: Vec<BookieConfig>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl BookieConfigSource for StaticConfigSource {
    async fn list_bookie_configs(&self) -> Result<Vec<BookieConfig>> {
        Ok(self.configs.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Populate the registry once at startup. Zero valid configs is fatal.
pub async fn load_initial(
    source: &dyn BookieConfigSource,
    registry: &BookieRegistry,
) -> Result<usize> {
    let configs = source.list_bookie_configs().await?;
    registry.replace(configs);
    let count = registry.len();
    if count == 0 {
        bail!("No valid bookie configs from {} source", source.name());
    }
    info!(source = source.name(), count, bookies = ?registry.names(), "Bookie configs loaded");
    Ok(count)
}

/// Poll `source` every `interval` and swap the registry when the set
/// changes. Fetch errors keep the previous snapshot.
pub async fn watch(
    registry: Arc<BookieRegistry>,
    source: Arc<dyn BookieConfigSource>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; startup already loaded.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match source.list_bookie_configs().await {
                    Ok(configs) if configs.iter().any(BookieConfig::is_valid) => {
                        if registry.replace(configs) {
                            info!(bookies = ?registry.names(), "Bookie configs reloaded");
                        } else {
                            debug!("Bookie configs unchanged");
                        }
                    }
                    Ok(_) => warn!(source = source.name(), "Config source returned no valid bookies, keeping previous set"),
                    Err(e) => warn!(source = source.name(), error = %e, "Bookie config reload failed"),
                }
            }
            _ = cancel.cancelled() => {
                debug!("Bookie config watcher stopped");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
