//! Arbitrage cycle aggregator.
//!
//! Holds partially-received cycles until every leg has arrived, then hands
//! the complete set over as one [`DispatchBundle::Arb`] and forgets the
//! cycle. A cycle that does not fill within the staleness threshold is
//! discarded whole; no leg of a partial cycle is ever dispatched.
//!
//! Owned by a single task, so no interior locking. Every method takes the
//! current `Instant` explicitly.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::types::{BetRequest, DispatchBundle, IntakeError};

pub const DEFAULT_EXPECTED_LEGS: usize = 2;
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A cycle still collecting legs.
#[derive(Debug, Clone)]
pub struct ArbCycle {
    pub cycle_id: String,
    /// Arrival order. At most `expected_legs`, one per bookie.
    pub legs: Vec<BetRequest>,
    pub received_at: Instant,
    pub expected_legs: usize,
}

/// What happened to an offered leg.
#[derive(Debug, Clone, PartialEq)]
pub enum Offer {
    Pending { received: usize, expected: usize },
    Complete(DispatchBundle),
}

/// A cycle removed by the sweep before it filled.
#[derive(Debug, Clone)]
pub struct ExpiredCycle {
    pub cycle_id: String,
    pub legs: Vec<BetRequest>,
    pub age: Duration,
}

pub struct CycleAggregator {
    cycles: HashMap<String, ArbCycle>,
    expected_legs: usize,
    max_age: Duration,
}

impl Default for CycleAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_EXPECTED_LEGS, DEFAULT_CYCLE_TIMEOUT)
    }
}

impl CycleAggregator {
    pub fn new(expected_legs: usize, max_age: Duration) -> Self {
        Self {
            cycles: HashMap::new(),
            expected_legs: expected_legs.max(1),
            max_age,
        }
    }

    /// Add a validated leg. Completes the cycle when the last leg arrives.
    ///
    /// A second leg for a bookie already in the cycle is rejected and the
    /// first one kept.
    pub fn offer(&mut self, leg: BetRequest, now: Instant) -> Result<Offer, IntakeError> {
        let Some(cycle_id) = leg.arb_cycle_id.clone() else {
            return Err(IntakeError::Malformed(format!(
                "bet {} offered to the cycle store without a cycle id",
                leg.bet_id
            )));
        };

        let expected = self.expected_legs;
        let cycle = self.cycles.entry(cycle_id.clone()).or_insert_with(|| {
            debug!(cycle_id = %cycle_id, "Opened arbitrage cycle");
            ArbCycle {
                cycle_id: cycle_id.clone(),
                legs: Vec::with_capacity(expected),
                received_at: now,
                expected_legs: expected,
            }
        });

        if cycle.legs.iter().any(|l| l.bet_id == leg.bet_id) {
            return Err(IntakeError::Duplicate(leg.bet_id));
        }
        if cycle.legs.iter().any(|l| l.bookie == leg.bookie) {
            return Err(IntakeError::CycleAnomaly {
                cycle_id,
                bookie: leg.bookie,
                bet_id: leg.bet_id,
            });
        }

        cycle.legs.push(leg);
        let received = cycle.legs.len();
        if received < cycle.expected_legs {
            debug!(cycle_id = %cycle_id, received, expected, "Waiting for remaining legs");
            return Ok(Offer::Pending { received, expected });
        }

        let Some(cycle) = self.cycles.remove(&cycle_id) else {
            return Ok(Offer::Pending { received, expected });
        };
        info!(
            cycle_id = %cycle_id,
            legs = cycle.legs.len(),
            waited_ms = now.saturating_duration_since(cycle.received_at).as_millis() as u64,
            "Arbitrage cycle complete"
        );
        Ok(Offer::Complete(DispatchBundle::Arb {
            cycle_id,
            legs: cycle.legs,
        }))
    }

    /// Remove every cycle older than the staleness threshold.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<ExpiredCycle> {
        let max_age = self.max_age;
        let stale: Vec<String> = self
            .cycles
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.received_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.cycles.remove(&id))
            .map(|cycle| {
                let age = now.saturating_duration_since(cycle.received_at);
                warn!(
                    cycle_id = %cycle.cycle_id,
                    legs = cycle.legs.len(),
                    expected = cycle.expected_legs,
                    age_secs = age.as_secs(),
                    "Arbitrage cycle timed out, discarding"
                );
                ExpiredCycle {
                    cycle_id: cycle.cycle_id,
                    legs: cycle.legs,
                    age,
                }
            })
            .collect()
    }

    /// Remove and return every open cycle.
    pub fn drain(&mut self) -> Vec<ArbCycle> {
        self.cycles.drain().map(|(_, cycle)| cycle).collect()
    }

    pub fn get(&self, cycle_id: &str) -> Option<&ArbCycle> {
        self.cycles.get(cycle_id)
    }

    pub fn expected_legs(&self) -> usize {
        self.expected_legs
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
