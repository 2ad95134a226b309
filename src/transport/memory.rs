//! In-process message bus.
//!
//! One `tokio::sync::broadcast` channel per topic. Every publish is also
//! appended to a history log so tests can assert on exactly what went out.
//! Like NATS core, a message published before anyone subscribes is lost.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::warn;

use super::{BusMessage, MessageBus, Subscription};
use crate::types::TransportError;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    history: Mutex<Vec<BusMessage>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Payloads published on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.history
            .lock()
            .iter()
            .filter(|m| m.subject == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Topics that have seen at least one publish.
    pub fn published_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> =
            self.history.lock().iter().map(|m| m.subject.clone()).collect();
        topics.sort();
        topics.dedup();
        topics
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = futures::stream::unfold(rx, move |mut rx| {
            let topic = topic.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(msg) => return Some((msg, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let msg = BusMessage {
            subject: topic.to_string(),
            payload,
        };
        self.history.lock().push(msg.clone());
        // No subscribers is not an error on a pub/sub bus.
        let _ = self.sender(topic).send(msg);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the senders ends every open subscription stream.
        self.topics.lock().clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
