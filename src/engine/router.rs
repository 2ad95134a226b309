//! Dispatch router.
//!
//! Sends each bet of a bundle to the worker pool of its own bookie. Pools
//! are started lazily for bookies this listener hosts; arbitrage legs for
//! accounts hosted elsewhere are skipped, since their own listener will
//! dispatch them from its copy of the cycle.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::intake::Ownership;
use super::workers::{WorkerContext, WorkerPool};
use crate::stats::RelayStats;
use crate::types::{BetRequest, DispatchBundle, DispatchError};

pub struct Router {
    ownership: Ownership,
    ctx: Arc<WorkerContext>,
    pools: Mutex<HashMap<String, WorkerPool>>,
}

impl Router {
    pub fn new(ownership: Ownership, ctx: Arc<WorkerContext>) -> Self {
        Self {
            ownership,
            ctx,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue every hosted bet in the bundle. Returns the bets that could
    /// not be handed to a pool; each needs a terminal failure result.
    pub async fn dispatch(&self, bundle: &DispatchBundle) -> Vec<(BetRequest, DispatchError)> {
        let mut rejected = Vec::new();

        for bet in bundle.bets() {
            if !self.ownership.owns(&bet.bookie) {
                match bundle {
                    DispatchBundle::Arb { cycle_id, .. } => {
                        debug!(cycle_id = %cycle_id, bookie = %bet.bookie, "Leg hosted elsewhere, skipping");
                    }
                    DispatchBundle::Value { .. } => {
                        rejected.push((bet.clone(), DispatchError::NoPool(bet.bookie.clone())));
                    }
                }
                continue;
            }

            match self.enqueue(bet.clone()).await {
                Ok(()) => {
                    RelayStats::incr(&self.ctx.stats.dispatched);
                    debug!(bookie = %bet.bookie, bet_id = %bet.bet_id, kind = %bundle.kind(), "Bet dispatched");
                }
                Err(e) => {
                    if matches!(e, DispatchError::QueueFull { .. }) {
                        RelayStats::incr(&self.ctx.stats.queue_rejections);
                    }
                    rejected.push((bet.clone(), e));
                }
            }
        }
        rejected
    }

    async fn enqueue(&self, bet: BetRequest) -> Result<(), DispatchError> {
        let mut pools = self.pools.lock().await;
        let pool = pools
            .entry(bet.bookie.clone())
            .or_insert_with(|| WorkerPool::spawn(&bet.bookie, self.ctx.clone()));
        pool.enqueue(bet).await
    }

    /// Bookies with a running pool.
    pub async fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every pool, letting queued bets finish.
    pub async fn shutdown(&self) {
        let pools: Vec<WorkerPool> = self.pools.lock().await.drain().map(|(_, p)| p).collect();
        let count = pools.len();
        for pool in pools {
            pool.shutdown().await;
        }
        info!(pools = count, "Worker pools drained");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
