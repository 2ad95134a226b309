//! Cycle outcome reconciler.
//!
//! Watches `bets.placed` and `bets.settled` and groups arbitrage legs by
//! cycle. A cycle where some legs were placed and others failed is exposed
//! on one side only, so every placed leg gets a cancel request. Settled
//! cycles are summed up for profit logging.
//!
//! With cycle sharding on, every listener runs a reconciler but only the
//! one elected by [`CycleShard`] acts on a given cycle, so cancels go out
//! once. Dispatch is unaffected: each owner always places its own leg.

use chrono::Utc;
use futures::StreamExt;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::publisher::Publisher;
use super::workers::PoolSettings;
use crate::bookies::BookieRegistry;
use crate::intake::cycle_shard;
use crate::transport::{self, MessageBus, TOPIC_BETS_PLACED, TOPIC_BETS_SETTLED};
use crate::types::{BetResult, CancelRequest, SettledPayload, TransportError};

const PARTIAL_CYCLE_REASON: &str = "arbitrage cycle partially placed";

/// Slack on top of the execution budget before a result group is dropped.
pub const RESULT_GRACE: Duration = Duration::from_secs(10);

/// How long to wait for the last leg's result after the first one arrived.
///
/// Legs of one cycle are dispatched together, so the spread between their
/// results is bounded by the slowest possible execution of a single leg.
pub fn result_window(pool: &PoolSettings) -> Duration {
    pool.worst_case_latency() + RESULT_GRACE
}

// ---------------------------------------------------------------------------
// Shard election
// ---------------------------------------------------------------------------

/// This instance's slot among the known bookies, fixed at startup.
///
/// The layout is not recomputed on a config reload, so a cycle in flight
/// never changes hands; restart the fleet to reshard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleShard {
    pub index: usize,
    pub count: usize,
}

impl CycleShard {
    /// Slot of `primary` in the registry's sorted names, if configured.
    pub fn from_registry(registry: &BookieRegistry, primary: &str) -> Option<Self> {
        let index = registry.index_of(primary)?;
        Some(Self {
            index,
            count: registry.len(),
        })
    }

    pub fn drives(&self, cycle_id: &str) -> bool {
        cycle_shard(cycle_id, self.count) == self.index
    }
}

// ---------------------------------------------------------------------------
// Decide
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CycleVerdict {
    AllPlaced,
    AllFailed,
    /// Cancels for every leg that did get placed.
    Partial { cancels: Vec<CancelRequest> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementSummary {
    pub cycle_id: Option<String>,
    pub bets: usize,
    pub staked: Decimal,
    pub returned: Decimal,
}

impl SettlementSummary {
    pub fn profit(&self) -> Decimal {
        self.returned - self.staked
    }
}

struct Group<T> {
    items: Vec<T>,
    first_seen: Instant,
}

impl<T> Group<T> {
    fn new(now: Instant) -> Self {
        Self {
            items: Vec::new(),
            first_seen: now,
        }
    }
}

pub struct CycleReconciler {
    expected_legs: usize,
    max_age: Duration,
    shard: Option<CycleShard>,
    placed: HashMap<String, Group<BetResult>>,
    settled: HashMap<String, Group<SettledPayload>>,
}

impl CycleReconciler {
    pub fn new(expected_legs: usize, max_age: Duration) -> Self {
        Self {
            expected_legs: expected_legs.max(1),
            max_age,
            shard: None,
            placed: HashMap::new(),
            settled: HashMap::new(),
        }
    }

    /// Only act on cycles elected to this shard.
    pub fn with_shard(mut self, shard: CycleShard) -> Self {
        self.shard = Some(shard);
        self
    }

    fn drives(&self, cycle_id: &str) -> bool {
        self.shard.map_or(true, |s| s.drives(cycle_id))
    }

    /// Record a placement result. Returns the verdict once every leg of
    /// its cycle has reported. Value bets and cycles driven by another
    /// shard are ignored.
    pub fn on_result(&mut self, result: BetResult, now: Instant) -> Option<(String, CycleVerdict)> {
        let cycle_id = result.cycle_id.clone()?;
        if !self.drives(&cycle_id) {
            return None;
        }
        let group = self
            .placed
            .entry(cycle_id.clone())
            .or_insert_with(|| Group::new(now));

        match group.items.iter_mut().find(|r| r.bet_id == result.bet_id) {
            Some(existing) => *existing = result,
            None => group.items.push(result),
        }
        if group.items.len() < self.expected_legs {
            return None;
        }

        let results = self.placed.remove(&cycle_id)?.items;
        let placed: Vec<&BetResult> = results.iter().filter(|r| r.success).collect();
        let verdict = if placed.len() == results.len() {
            CycleVerdict::AllPlaced
        } else if placed.is_empty() {
            CycleVerdict::AllFailed
        } else {
            CycleVerdict::Partial {
                cancels: placed
                    .into_iter()
                    .map(|r| CancelRequest {
                        bet_id: r.bet_id.clone(),
                        cycle_id: cycle_id.clone(),
                        bookie: r.bookie.clone(),
                        reason: PARTIAL_CYCLE_REASON.to_string(),
                        timestamp: Utc::now(),
                    })
                    .collect(),
            }
        };
        Some((cycle_id, verdict))
    }

    /// Record a settlement. Value bets summarise immediately; arbitrage
    /// legs once the whole cycle has settled.
    pub fn on_settled(&mut self, settled: SettledPayload, now: Instant) -> Option<SettlementSummary> {
        let Some(cycle_id) = settled.cycle_id.clone() else {
            return Some(SettlementSummary {
                cycle_id: None,
                bets: 1,
                staked: settled.stake,
                returned: settled.returned,
            });
        };
        if !self.drives(&cycle_id) {
            return None;
        }

        let group = self
            .settled
            .entry(cycle_id.clone())
            .or_insert_with(|| Group::new(now));
        match group.items.iter_mut().find(|s| s.bet_id == settled.bet_id) {
            Some(existing) => *existing = settled,
            None => group.items.push(settled),
        }
        if group.items.len() < self.expected_legs {
            return None;
        }

        let legs = self.settled.remove(&cycle_id)?.items;
        Some(SettlementSummary {
            cycle_id: Some(cycle_id),
            bets: legs.len(),
            staked: legs.iter().map(|s| s.stake).sum(),
            returned: legs.iter().map(|s| s.returned).sum(),
        })
    }

    /// Drop groups that never completed. Returns how many were removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let max_age = self.max_age;
        let before = self.placed.len() + self.settled.len();
        self.placed.retain(|cycle_id, g| {
            let keep = now.saturating_duration_since(g.first_seen) <= max_age;
            if !keep {
                let placed = g.items.iter().filter(|r| r.success).count();
                warn!(
                    cycle_id = %cycle_id,
                    results = g.items.len(),
                    placed,
                    "Cycle results incomplete, giving up"
                );
            }
            keep
        });
        self.settled.retain(|cycle_id, g| {
            let keep = now.saturating_duration_since(g.first_seen) <= max_age;
            if !keep {
                debug!(cycle_id = %cycle_id, settled = g.items.len(), "Cycle settlement incomplete, giving up");
            }
            keep
        });
        before - self.placed.len() - self.settled.len()
    }

    pub fn pending(&self) -> usize {
        self.placed.len() + self.settled.len()
    }
}

// ---------------------------------------------------------------------------
// Effect loop
// ---------------------------------------------------------------------------

/// Subscribe and reconcile until cancelled.
pub async fn spawn_reconciler(
    bus: Arc<dyn MessageBus>,
    publisher: Publisher,
    mut reconciler: CycleReconciler,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, TransportError> {
    let mut placed = bus.subscribe(TOPIC_BETS_PLACED).await?;
    let mut settled = bus.subscribe(TOPIC_BETS_SETTLED).await?;

    Ok(tokio::spawn(async move {
        let mut sweep = tokio::time::interval(sweep_interval);
        info!(
            expected_legs = reconciler.expected_legs,
            window_secs = reconciler.max_age.as_secs(),
            shard = ?reconciler.shard,
            "Cycle reconciler running"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = placed.next() => {
                    let Some(msg) = msg else { break };
                    match transport::decode::<BetResult>(&msg.payload) {
                        Ok(result) => {
                            if let Some((cycle_id, verdict)) = reconciler.on_result(result, tokio::time::Instant::now().into_std()) {
                                apply_verdict(&publisher, &cycle_id, verdict).await;
                            }
                        }
                        Err(e) => warn!(error = %e, len = msg.payload.len(), "Undecodable placement result"),
                    }
                }
                msg = settled.next() => {
                    let Some(msg) = msg else { break };
                    match transport::decode::<SettledPayload>(&msg.payload) {
                        Ok(s) => {
                            if let Some(summary) = reconciler.on_settled(s, tokio::time::Instant::now().into_std()) {
                                info!(
                                    cycle_id = summary.cycle_id.as_deref().unwrap_or("-"),
                                    bets = summary.bets,
                                    staked = %summary.staked,
                                    returned = %summary.returned,
                                    profit = %summary.profit(),
                                    "Settled"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, len = msg.payload.len(), "Undecodable settlement"),
                    }
                }
                _ = sweep.tick() => {
                    reconciler.expire(tokio::time::Instant::now().into_std());
                }
            }
        }
        debug!("Cycle reconciler stopped");
    }))
}

async fn apply_verdict(publisher: &Publisher, cycle_id: &str, verdict: CycleVerdict) {
    match verdict {
        CycleVerdict::AllPlaced => info!(cycle_id, "Arbitrage cycle fully placed"),
        CycleVerdict::AllFailed => warn!(cycle_id, "Arbitrage cycle failed on every leg"),
        CycleVerdict::Partial { cancels } => {
            warn!(cycle_id, cancels = cancels.len(), "Arbitrage cycle partially placed, cancelling placed legs");
            for cancel in &cancels {
                publisher.publish_cancel(cancel).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
