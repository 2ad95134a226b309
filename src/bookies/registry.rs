//! Shared snapshot of the currently configured bookie accounts.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use super::BookieConfig;

#[derive(Default)]
struct Snapshot {
    /// Sorted by name, names unique.
    configs: Arc<Vec<BookieConfig>>,
    fingerprint: String,
}

/// Read-mostly set of bookie configs. Readers take a cheap `Arc` clone of
/// the current snapshot; writers swap the whole set.
#[derive(Default)]
pub struct BookieRegistry {
    inner: RwLock<Snapshot>,
}

impl BookieRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: Vec<BookieConfig>) -> Self {
        let registry = Self::new();
        registry.replace(configs);
        registry
    }

    /// Replace the whole set. Invalid and repeated names are dropped.
    /// Returns true if the content changed.
    pub fn replace(&self, configs: Vec<BookieConfig>) -> bool {
        let configs = sanitize(configs);
        let fingerprint = fingerprint(&configs);

        let mut inner = self.inner.write();
        if inner.fingerprint == fingerprint {
            return false;
        }
        inner.configs = Arc::new(configs);
        inner.fingerprint = fingerprint;
        true
    }

    pub fn snapshot(&self) -> Arc<Vec<BookieConfig>> {
        self.inner.read().configs.clone()
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.inner.read().configs.iter().any(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<BookieConfig> {
        self.inner.read().configs.iter().find(|c| c.name == name).cloned()
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().configs.iter().map(|c| c.name.clone()).collect()
    }

    /// Position of `name` in the sorted set; used as a shard index.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.inner.read().configs.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sanitize(configs: Vec<BookieConfig>) -> Vec<BookieConfig> {
    let mut valid: Vec<BookieConfig> = Vec::with_capacity(configs.len());
    for mut config in configs {
        config.name = config.name.trim().to_string();
        if !config.is_valid() {
            warn!(config = ?config, "Dropping bookie config without a name");
            continue;
        }
        if valid.iter().any(|c| c.name == config.name) {
            warn!(bookie = %config.name, "Duplicate bookie config, keeping the first");
            continue;
        }
        valid.push(config);
    }
    valid.sort_by(|a, b| a.name.cmp(&b.name));
    valid
}

fn fingerprint(configs: &[BookieConfig]) -> String {
    let mut hasher = Sha256::new();
    for c in configs {
        hasher.update(c.name.as_bytes());
        hasher.update([0]);
        hasher.update(c.base_url.as_bytes());
        hasher.update([0]);
        hasher.update(c.credentials_env.as_deref().unwrap_or_default().as_bytes());
        hasher.update([c.otp_required as u8, 0xff]);
    }
    hex::encode(hasher.finalize())
}
