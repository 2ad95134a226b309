//! Bet listener: the effect side of intake.
//!
//! One task consumes `bets.incoming` in delivery order and owns the intake
//! gate (dedup window and cycle store) outright, multiplexing the periodic
//! sweep on the same `select!`. A second task consumes `otp.updates`.
//!
//! Per message: admit → ack (+flush) → dispatch. Any failure is logged
//! and the loop moves on to the next message.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::intake::{GateSettings, IntakeGate, Ownership};
use super::publisher::Publisher;
use super::router::Router;
use super::workers::{PoolSettings, WorkerContext};
use crate::bookies::BookieRegistry;
use crate::executor::{BetExecutor, OtpStore};
use crate::intake::{normalize_otp, RawOtpUpdate};
use crate::stats::RelayStats;
use crate::transport::{self, BusMessage, MessageBus, Subscription, TOPIC_BETS_INCOMING, TOPIC_OTP_UPDATES};
use crate::types::{BetResult, DispatchBundle, IntakeError, TransportError};

const EXPIRED_CYCLE_ERROR: &str = "arbitrage cycle expired before quorum";
const SHUTDOWN_ERROR: &str = "listener shutting down";

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    /// Bookies this instance acks and executes for. Empty means all known.
    pub owned_bookies: Vec<String>,
    pub gate: GateSettings,
    pub sweep_interval: Duration,
    pub pool: PoolSettings,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            owned_bookies: Vec::new(),
            gate: GateSettings::default(),
            sweep_interval: Duration::from_secs(10),
            pool: PoolSettings::default(),
        }
    }
}

pub struct BetListener {
    id: String,
    bus: Arc<dyn MessageBus>,
    registry: Arc<BookieRegistry>,
    executor: Arc<dyn BetExecutor>,
    otp: Arc<OtpStore>,
    stats: Arc<RelayStats>,
    settings: ListenerSettings,
}

/// Running listener. Dropping it does not stop the tasks; call
/// [`ListenerHandle::shutdown`].
pub struct ListenerHandle {
    id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    router: Arc<Router>,
    ownership: Ownership,
}

impl BetListener {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        registry: Arc<BookieRegistry>,
        executor: Arc<dyn BetExecutor>,
        otp: Arc<OtpStore>,
        stats: Arc<RelayStats>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bus,
            registry,
            executor,
            otp,
            stats,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to both topics and spawn the consumption tasks. The
    /// subscriptions are live when this returns.
    pub async fn start(self, cancel: CancellationToken) -> Result<ListenerHandle, TransportError> {
        let bets = self.bus.subscribe(TOPIC_BETS_INCOMING).await?;
        let otps = self.bus.subscribe(TOPIC_OTP_UPDATES).await?;

        let ownership = Ownership::new(self.registry.clone(), &self.settings.owned_bookies);
        let publisher = Publisher::new(self.bus.clone(), self.stats.clone());
        let ctx = Arc::new(WorkerContext {
            executor: self.executor.clone(),
            registry: self.registry.clone(),
            publisher: publisher.clone(),
            permits: Arc::new(Semaphore::new(self.settings.pool.max_concurrency.max(1))),
            stats: self.stats.clone(),
            settings: self.settings.pool.clone(),
        });
        let router = Arc::new(Router::new(ownership.clone(), ctx));
        let gate = IntakeGate::new(ownership.clone(), &self.settings.gate);

        info!(
            listener_id = %self.id,
            bus = self.bus.name(),
            owned = ?ownership.owned_names(),
            expected_legs = self.settings.gate.expected_legs,
            "Listener subscribed to {TOPIC_BETS_INCOMING} and {TOPIC_OTP_UPDATES}"
        );

        let bets_task = tokio::spawn(run_bets_loop(BetsLoop {
            subscription: bets,
            gate,
            publisher,
            router: router.clone(),
            stats: self.stats.clone(),
            sweep_interval: self.settings.sweep_interval,
            cancel: cancel.clone(),
        }));
        let otp_task = tokio::spawn(run_otp_loop(
            otps,
            ownership.clone(),
            self.otp.clone(),
            self.stats.clone(),
            cancel.clone(),
        ));

        Ok(ListenerHandle {
            id: self.id,
            cancel,
            tasks: vec![bets_task, otp_task],
            router,
            ownership,
        })
    }
}

impl ListenerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owned_bookies(&self) -> Vec<String> {
        self.ownership.owned_names()
    }

    /// Stop consuming, then drain every worker pool.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(listener_id = %self.id, error = %e, "Listener task panicked");
            }
        }
        self.router.shutdown().await;
        info!(listener_id = %self.id, "Listener stopped");
    }
}

// ---------------------------------------------------------------------------
// Bets loop
// ---------------------------------------------------------------------------

struct BetsLoop {
    subscription: Subscription,
    gate: IntakeGate,
    publisher: Publisher,
    router: Arc<Router>,
    stats: Arc<RelayStats>,
    sweep_interval: Duration,
    cancel: CancellationToken,
}

async fn run_bets_loop(mut state: BetsLoop) {
    let mut sweep = tokio::time::interval(state.sweep_interval);
    sweep.tick().await;

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,
            msg = state.subscription.next() => {
                let Some(msg) = msg else {
                    warn!("Bet subscription closed");
                    break;
                };
                handle_bet(&mut state, msg).await;
            }
            _ = sweep.tick() => run_sweep(&mut state).await,
        }
    }
    fail_pending_cycles(&mut state).await;
    debug!("Bets loop stopped");
}

/// Owned legs of unfinished cycles were acked and still owe a result.
async fn fail_pending_cycles(state: &mut BetsLoop) {
    let pending = state.gate.drain_pending();
    if pending.is_empty() {
        return;
    }
    warn!(cycles = pending.len(), "Stopping with incomplete arbitrage cycles");
    for cycle in pending {
        for leg in cycle.legs.iter().filter(|l| state.gate.ownership().owns(&l.bookie)) {
            state
                .publisher
                .publish_placed_result(&BetResult::failed(leg, SHUTDOWN_ERROR))
                .await;
        }
    }
}

async fn handle_bet(state: &mut BetsLoop, msg: BusMessage) {
    RelayStats::incr(&state.stats.received);

    let admission = match state.gate.admit_payload(&msg.payload, Instant::now().into_std()) {
        Ok(admission) => admission,
        Err(e) => {
            record_rejection(&state.stats, &e, &msg.payload);
            return;
        }
    };
    RelayStats::incr(&state.stats.accepted);
    info!(bet = %admission.bet, ack = admission.ack, "Bet accepted");

    if admission.ack {
        state.publisher.publish_received_ack(&admission.bet).await;
    }

    let Some(bundle) = admission.dispatch else { return };
    if matches!(bundle, DispatchBundle::Arb { .. }) {
        RelayStats::incr(&state.stats.cycles_completed);
    }
    for (bet, err) in state.router.dispatch(&bundle).await {
        warn!(bookie = %bet.bookie, bet_id = %bet.bet_id, error = %err, "Dispatch rejected");
        state.publisher.publish_placed_result(&BetResult::failed(&bet, err.to_string())).await;
    }
}

fn record_rejection(stats: &RelayStats, err: &IntakeError, payload: &[u8]) {
    match err {
        IntakeError::Transport(_) => {
            RelayStats::incr(&stats.decode_errors);
            warn!(
                error = %err,
                len = payload.len(),
                hex = %transport::hex_preview(payload),
                "Dropping undecodable bet payload"
            );
        }
        IntakeError::Malformed(_)
        | IntakeError::MissingField(_)
        | IntakeError::UnknownBookie(_)
        | IntakeError::BetIdMismatch { .. } => {
            RelayStats::incr(&stats.invalid);
            warn!(
                error = %err,
                len = payload.len(),
                hex = %transport::hex_preview(payload),
                "Dropping invalid bet"
            );
        }
        IntakeError::NotOwned { .. } => {
            RelayStats::incr(&stats.not_owned);
            debug!(reason = %err, "Skipping bet");
        }
        IntakeError::Duplicate(bet_id) => {
            RelayStats::incr(&stats.duplicates);
            info!(bet_id = %bet_id, "Duplicate bet ignored");
        }
        IntakeError::CycleAnomaly { .. } => {
            RelayStats::incr(&stats.anomalies);
            warn!(error = %err, "Cycle anomaly, leg rejected");
        }
    }
}

async fn run_sweep(state: &mut BetsLoop) {
    let sweep = state.gate.sweep(Instant::now().into_std());
    for cycle in sweep.expired {
        RelayStats::incr(&state.stats.cycles_expired);
        // Owned legs were acked on arrival and still owe a terminal result.
        for leg in cycle.legs.iter().filter(|l| state.gate.ownership().owns(&l.bookie)) {
            state
                .publisher
                .publish_placed_result(&BetResult::failed(leg, EXPIRED_CYCLE_ERROR))
                .await;
        }
    }
    if sweep.dedup_cleared > 0 {
        debug!(cleared = sweep.dedup_cleared, "Dedup window reset");
    }
}

// ---------------------------------------------------------------------------
// OTP loop
// ---------------------------------------------------------------------------

async fn run_otp_loop(
    mut subscription: Subscription,
    ownership: Ownership,
    store: Arc<OtpStore>,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = subscription.next() => {
                let Some(msg) = msg else {
                    warn!("OTP subscription closed");
                    break;
                };
                let update = transport::decode::<RawOtpUpdate>(&msg.payload)
                    .map_err(IntakeError::from)
                    .and_then(normalize_otp);
                match update {
                    Ok(update) if ownership.owns(&update.bookie) => {
                        RelayStats::incr(&stats.otp_updates);
                        info!(bookie = %update.bookie, status = %update.status, "OTP received");
                        store.put(&update.bookie, update.otp);
                    }
                    Ok(update) => debug!(bookie = %update.bookie, "OTP for another listener, skipping"),
                    Err(e) => warn!(
                        error = %e,
                        len = msg.payload.len(),
                        hex = %transport::hex_preview(&msg.payload),
                        "Dropping invalid OTP update"
                    ),
                }
            }
        }
    }
    debug!("OTP loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
