//! Message transport.
//!
//! Defines the `MessageBus` trait and provides implementations for:
//! - NATS: the production pub/sub bus shared with the bet producers
//! - In-memory broadcast: tests and local dry runs
//!
//! Payloads are MessagePack with named fields (see [`encode`] / [`decode`]).
//! Delivery is best-effort FIFO per publisher and may duplicate; dedup is
//! the intake layer's job, not the bus's.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::TransportError;

pub const TOPIC_BETS_INCOMING: &str = "bets.incoming";
pub const TOPIC_OTP_UPDATES: &str = "otp.updates";
pub const TOPIC_BETS_ACK: &str = "bets.ack";
pub const TOPIC_BETS_PLACED: &str = "bets.placed";
pub const TOPIC_BETS_SETTLED: &str = "bets.settled";

/// Per-bookie cancellation subject, e.g. `betika.cancel`.
pub fn cancel_topic(bookie: &str) -> String {
    format!("{bookie}.cancel")
}

/// A raw message as delivered by the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Infinite stream of messages for one subscription.
pub type Subscription = BoxStream<'static, BusMessage>;

/// Abstraction over publish/subscribe transports.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to a topic. The stream ends only if the connection closes;
    /// resubscribing after a reconnect is the caller's concern.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    /// Fire-and-forget publish.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Force buffered publishes onto the wire.
    async fn flush(&self) -> Result<(), TransportError>;

    /// Flush and release the connection.
    async fn close(&self) -> Result<(), TransportError>;

    /// Transport name for logging.
    fn name(&self) -> &str;
}

/// Encode a value as MessagePack with field names preserved.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TransportError> {
    rmp_serde::to_vec_named(value).map_err(|e| TransportError::Encode(e.to_string()))
}

/// Decode a MessagePack payload. Empty input is rejected up front.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    if bytes.is_empty() {
        return Err(TransportError::EmptyPayload);
    }
    rmp_serde::from_slice(bytes).map_err(|e| TransportError::Decode(e.to_string()))
}

/// Hex dump of a payload for diagnosing encoding drift, capped so a huge
/// poison message does not flood the log.
pub fn hex_preview(bytes: &[u8]) -> String {
    const MAX_BYTES: usize = 256;
    if bytes.len() <= MAX_BYTES {
        hex::encode(bytes)
    } else {
        format!("{}...(+{} bytes)", hex::encode(&bytes[..MAX_BYTES]), bytes.len() - MAX_BYTES)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
