//! Acknowledgement and settlement publisher.
//!
//! All outbound lifecycle messages share one encode → publish path.
//! Failures are logged and counted and never propagate: a broken publish
//! must not stall consumption.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::stats::RelayStats;
use crate::transport::{self, MessageBus, TOPIC_BETS_ACK, TOPIC_BETS_PLACED, TOPIC_BETS_SETTLED};
use crate::types::{AckPayload, BetRequest, BetResult, CancelRequest, SettledPayload, TransportError};

/// Upper bound on waiting for the server to confirm an ack flush.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    stats: Arc<RelayStats>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn MessageBus>, stats: Arc<RelayStats>) -> Self {
        Self { bus, stats }
    }

    async fn send<T: Serialize>(&self, topic: &str, value: &T) -> Result<(), TransportError> {
        let payload = transport::encode(value)?;
        self.bus.publish(topic, payload).await
    }

    async fn flush(&self) -> Result<(), TransportError> {
        match tokio::time::timeout(FLUSH_TIMEOUT, self.bus.flush()).await {
            Ok(flushed) => flushed,
            Err(_) => Err(TransportError::Flush(format!(
                "timed out after {}ms",
                FLUSH_TIMEOUT.as_millis()
            ))),
        }
    }

    fn record_failure(&self, topic: &str, bet_id: &str, err: &TransportError) {
        RelayStats::incr(&self.stats.publish_failures);
        error!(topic, bet_id, error = %err, "Publish failed");
    }

    /// Ack a bet as received, then flush so the producer sees it promptly.
    pub async fn publish_received_ack(&self, bet: &BetRequest) -> bool {
        let ack = AckPayload::received(bet);
        let sent = match self.send(TOPIC_BETS_ACK, &ack).await {
            Ok(()) => self.flush().await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => {
                RelayStats::incr(&self.stats.acked);
                debug!(bet_id = %bet.bet_id, ack_type = %ack.ack_type, "Ack published");
                true
            }
            Err(e) => {
                self.record_failure(TOPIC_BETS_ACK, &bet.bet_id, &e);
                false
            }
        }
    }

    /// Terminal result for a dispatched bet. Called exactly once per bet.
    pub async fn publish_placed_result(&self, result: &BetResult) -> bool {
        if result.success {
            RelayStats::incr(&self.stats.placed);
        } else {
            RelayStats::incr(&self.stats.failed);
        }
        match self.send(TOPIC_BETS_PLACED, result).await {
            Ok(()) => {
                info!(result = %result, "Placement result published");
                true
            }
            Err(e) => {
                self.record_failure(TOPIC_BETS_PLACED, &result.bet_id, &e);
                false
            }
        }
    }

    pub async fn publish_settled(&self, settled: &SettledPayload) -> bool {
        match self.send(TOPIC_BETS_SETTLED, settled).await {
            Ok(()) => {
                debug!(bet_id = %settled.bet_id, outcome = %settled.outcome, "Settlement published");
                true
            }
            Err(e) => {
                self.record_failure(TOPIC_BETS_SETTLED, &settled.bet_id, &e);
                false
            }
        }
    }

    /// Ask the owning account's listener to void a placed leg.
    pub async fn publish_cancel(&self, request: &CancelRequest) -> bool {
        let topic = transport::cancel_topic(&request.bookie);
        match self.send(&topic, request).await {
            Ok(()) => {
                RelayStats::incr(&self.stats.cancels);
                info!(
                    topic = %topic,
                    bet_id = %request.bet_id,
                    cycle_id = %request.cycle_id,
                    reason = %request.reason,
                    "Cancel request published"
                );
                true
            }
            Err(e) => {
                self.record_failure(&topic, &request.bet_id, &e);
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
