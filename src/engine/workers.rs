//! Per-bookie execution worker pools.
//!
//! Each pool owns a bounded queue drained by N workers (the receiver sits
//! behind a mutex, which turns the mpsc channel into a work queue). A
//! semaphore shared by every pool caps how many executor calls run at
//! once across the whole process, one browser context per permit.
//!
//! Every dequeued bet yields exactly one `bets.placed` result.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::publisher::Publisher;
use crate::bookies::{BookieConfig, BookieRegistry};
use crate::executor::{BetExecutor, Placement};
use crate::stats::RelayStats;
use crate::types::{BetRequest, BetResult, DispatchError, ExecutionError};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Global ceiling on concurrent executor calls.
    pub max_concurrency: usize,
    pub workers_per_bookie: usize,
    pub queue_capacity: usize,
    /// How long `enqueue` waits for queue space before rejecting.
    pub enqueue_timeout: Duration,
    /// Deadline for a single executor attempt.
    pub bet_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            workers_per_bookie: 1,
            queue_capacity: 64,
            enqueue_timeout: Duration::from_secs(5),
            bet_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl PoolSettings {
    /// Longest a single bet can take from enqueue to terminal result,
    /// ignoring time spent behind other bets in the queue.
    pub fn worst_case_latency(&self) -> Duration {
        let attempts = self.max_retries + 1;
        self.bet_timeout * attempts + self.retry_delay * self.max_retries + self.enqueue_timeout
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run one bet through the executor with a per-attempt deadline.
///
/// Transient faults (timeouts included) are retried up to `max_retries`
/// times with a fixed delay; rejections return immediately.
pub async fn place_with_retry(
    executor: &dyn BetExecutor,
    account: &BookieConfig,
    bet: &BetRequest,
    settings: &PoolSettings,
    stats: &RelayStats,
) -> Result<Placement, ExecutionError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(settings.bet_timeout, executor.execute(account, bet)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::Transient(format!(
                "execution timed out after {}s",
                settings.bet_timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(placement) => return Ok(placement),
            Err(e) if e.is_transient() && attempt <= settings.max_retries => {
                RelayStats::incr(&stats.retries);
                warn!(
                    bookie = %bet.bookie,
                    bet_id = %bet.bet_id,
                    attempt,
                    max_retries = settings.max_retries,
                    error = %e,
                    "Transient execution failure, retrying"
                );
                tokio::time::sleep(settings.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Everything a worker needs, shared by all pools of one listener.
pub struct WorkerContext {
    pub executor: Arc<dyn BetExecutor>,
    pub registry: Arc<BookieRegistry>,
    pub publisher: Publisher,
    pub permits: Arc<Semaphore>,
    pub stats: Arc<RelayStats>,
    pub settings: PoolSettings,
}

pub struct WorkerPool {
    bookie: String,
    tx: Option<mpsc::Sender<BetRequest>>,
    enqueue_timeout: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(bookie: &str, ctx: Arc<WorkerContext>) -> Self {
        let (tx, rx) = mpsc::channel(ctx.settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let count = ctx.settings.workers_per_bookie.max(1);

        let workers = (0..count)
            .map(|worker| {
                let rx = rx.clone();
                let ctx = ctx.clone();
                let bookie = bookie.to_string();
                tokio::spawn(async move { run_worker(bookie, worker, rx, ctx).await })
            })
            .collect();

        info!(bookie, workers = count, queue = ctx.settings.queue_capacity, "Worker pool started");
        Self {
            bookie: bookie.to_string(),
            tx: Some(tx),
            enqueue_timeout: ctx.settings.enqueue_timeout,
            workers,
        }
    }

    /// Queue a bet, waiting up to the enqueue timeout for space.
    pub async fn enqueue(&self, bet: BetRequest) -> Result<(), DispatchError> {
        let Some(ref tx) = self.tx else {
            return Err(DispatchError::PoolClosed(self.bookie.clone()));
        };
        tx.send_timeout(bet, self.enqueue_timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => DispatchError::QueueFull {
                bookie: self.bookie.clone(),
                waited_ms: self.enqueue_timeout.as_millis() as u64,
            },
            mpsc::error::SendTimeoutError::Closed(_) => DispatchError::PoolClosed(self.bookie.clone()),
        })
    }

    pub fn bookie(&self) -> &str {
        &self.bookie
    }

    /// Stop accepting work and wait for queued bets to finish.
    pub async fn shutdown(mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!(bookie = %self.bookie, error = %e, "Worker task panicked");
            }
        }
        debug!(bookie = %self.bookie, "Worker pool drained");
    }
}

async fn run_worker(
    bookie: String,
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<BetRequest>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(bet) = next else { break };

        let result = match ctx.permits.clone().acquire_owned().await {
            Ok(_permit) => execute_bet(&ctx, &bet).await,
            Err(_) => BetResult::failed(&bet, "execution capacity closed"),
        };
        ctx.publisher.publish_placed_result(&result).await;
    }
    debug!(bookie = %bookie, worker, "Worker stopped");
}

async fn execute_bet(ctx: &WorkerContext, bet: &BetRequest) -> BetResult {
    // Read at execution time so a hot reload is honoured.
    let Some(account) = ctx.registry.get(&bet.bookie) else {
        warn!(bookie = %bet.bookie, bet_id = %bet.bet_id, "Bookie no longer configured");
        return BetResult::failed(bet, format!("bookie {} is no longer configured", bet.bookie));
    };

    debug!(bet = %bet, "Executing bet");
    match place_with_retry(ctx.executor.as_ref(), &account, bet, &ctx.settings, &ctx.stats).await {
        Ok(placement) => {
            let payout: Option<Decimal> = placement.payout.or_else(|| Some(bet.potential_payout()));
            BetResult::succeeded(bet, payout)
        }
        Err(e) => {
            warn!(bookie = %bet.bookie, bet_id = %bet.bet_id, error = %e, "Bet failed");
            BetResult::failed(bet, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
