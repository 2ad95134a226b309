//! NATS transport.
//!
//! Thin wrapper over `async-nats`. The server URL is read from the env var
//! named in config (default `NATS_SERVER`) and falls back to
//! `nats://localhost:4222`.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{BusMessage, MessageBus, Subscription};
use crate::types::TransportError;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

pub struct NatsBus {
    client: async_nats::Client,
    url: String,
}

impl NatsBus {
    /// Connect to the NATS server at `url`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::Connect(format!("{url}: {e}")))?;
        info!(url, "Connected to NATS server");
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Resolve the server URL from an env var, falling back to the default.
    pub fn resolve_url(url_env: &str) -> String {
        std::env::var(url_env).unwrap_or_else(|_| DEFAULT_NATS_URL.to_string())
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| TransportError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;
        info!(topic, "Subscribed");

        let stream = subscriber.map(|msg| BusMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload.to_vec(),
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;
        debug!(topic, "Published");
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Flush(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The client disconnects when the last handle drops; flushing first
        // makes sure trailing results reach the server.
        if let Err(e) = self.flush().await {
            warn!(url = %self.url, error = %e, "Error flushing NATS on close");
            return Err(e);
        }
        info!(url = %self.url, "NATS connection closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}
