//! Remote config repository client.
//!
//! Fetches `GET {url}` and expects either a JSON array of bookie configs or
//! an object with a `bookies` array. An optional bearer token is read from
//! the env var named in config.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{BookieConfig, BookieConfigSource};

const SOURCE_NAME: &str = "http";

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigBody {
    List(Vec<BookieConfig>),
    Wrapped { bookies: Vec<BookieConfig> },
}

pub struct HttpConfigSource {
    http: Client,
    url: String,
    token: Option<String>,
}

impl HttpConfigSource {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("betrelay/0.1.0 (config-sync)")
            .build()
            .context("Failed to build HTTP client for config source")?;

        Ok(Self {
            http,
            url: url.into(),
            token,
        })
    }
}

/// Parse a config repository response body.
pub fn parse_configs(body: &str) -> Result<Vec<BookieConfig>> {
    let parsed: ConfigBody =
        serde_json::from_str(body).context("Config source returned invalid JSON")?;
    Ok(match parsed {
        ConfigBody::List(list) => list,
        ConfigBody::Wrapped { bookies } => bookies,
    })
}

#[async_trait]
impl BookieConfigSource for HttpConfigSource {
    async fn list_bookie_configs(&self) -> Result<Vec<BookieConfig>> {
        let mut req = self.http.get(&self.url);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("Config source request failed: {}", self.url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Config source returned {status}: {body}");
        }

        let body = resp.text().await.context("Failed to read config source body")?;
        let configs = parse_configs(&body)?;
        debug!(url = %self.url, count = configs.len(), "Fetched bookie configs");
        Ok(configs)
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}
