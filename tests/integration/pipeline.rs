//! End-to-end pipeline tests over the in-process bus.
//!
//! Producers publish MessagePack bets on `bets.incoming`; one or more
//! listeners ack, aggregate and execute them through the mock executor,
//! and the tests assert on what comes back out on the bus.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use betrelay::bookies::{BookieConfig, BookieRegistry};
use betrelay::engine::reconcile::{result_window, spawn_reconciler, CycleReconciler, CycleShard};
use betrelay::engine::workers::PoolSettings;
use betrelay::engine::{BetListener, ListenerHandle, ListenerSettings, Publisher};
use betrelay::executor::OtpStore;
use betrelay::intake::expected_bet_id;
use betrelay::stats::RelayStats;
use betrelay::transport::memory::MemoryBus;
use betrelay::transport::{
    self, cancel_topic, MessageBus, TOPIC_BETS_ACK, TOPIC_BETS_INCOMING, TOPIC_BETS_PLACED,
};
use betrelay::types::{AckPayload, BetKind, BetRequest, BetResult, BetStatus, CancelRequest};

use crate::mock_executor::MockExecutor;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A bet with its correct content-hash id.
fn bet(bookie: &str, match_id: &str, cycle: Option<&str>) -> BetRequest {
    let mut bet = BetRequest {
        bet_id: String::new(),
        bookie: bookie.into(),
        arb_cycle_id: cycle.map(String::from),
        match_id: match_id.into(),
        home_team: "Gor Mahia".into(),
        away_team: "AFC Leopards".into(),
        match_time: "2025-10-25 15:00:00".into(),
        side: if bookie == "A" { "home".into() } else { "away".into() },
        strategy: "S1".into(),
        odds: dec!(2.10),
        stake: dec!(50),
        search_query: "Gor Mahia v AFC Leopards".into(),
        event_id: "E1".into(),
        timestamp: "2025-10-25T12:00:00Z".into(),
    };
    bet.bet_id = expected_bet_id(&bet.identity());
    bet
}

fn registry() -> Arc<BookieRegistry> {
    Arc::new(BookieRegistry::with_configs(vec![
        BookieConfig::named("A"),
        BookieConfig::named("B"),
    ]))
}

struct Relay {
    stats: Arc<RelayStats>,
    handle: ListenerHandle,
}

async fn start_relay(
    bus: &Arc<MemoryBus>,
    owned: &[&str],
    executor: MockExecutor,
    pool: PoolSettings,
) -> Relay {
    let stats = Arc::new(RelayStats::new());
    let settings = ListenerSettings {
        owned_bookies: owned.iter().map(|s| s.to_string()).collect(),
        pool,
        ..ListenerSettings::default()
    };
    let handle = BetListener::new(
        bus.clone(),
        registry(),
        Arc::new(executor),
        Arc::new(OtpStore::new()),
        stats.clone(),
        settings,
    )
    .start(CancellationToken::new())
    .await
    .unwrap();
    Relay { stats, handle }
}

fn fast_pool() -> PoolSettings {
    PoolSettings {
        retry_delay: Duration::from_millis(10),
        ..PoolSettings::default()
    }
}

async fn send(bus: &MemoryBus, bet: &BetRequest) {
    bus.publish(TOPIC_BETS_INCOMING, transport::encode(bet).unwrap())
        .await
        .unwrap();
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn acks(bus: &MemoryBus) -> Vec<AckPayload> {
    bus.published(TOPIC_BETS_ACK)
        .iter()
        .map(|p| transport::decode(p).unwrap())
        .collect()
}

fn results(bus: &MemoryBus) -> Vec<BetResult> {
    bus.published(TOPIC_BETS_PLACED)
        .iter()
        .map(|p| transport::decode(p).unwrap())
        .collect()
}

// ---------------------------------------------------------------------------
// Value bets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_value_bet_acked_then_placed() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    let relay = start_relay(&bus, &["A"], exec.clone(), fast_pool()).await;

    let b = bet("A", "M1", None);
    send(&bus, &b).await;
    wait_until(|| bus.published(TOPIC_BETS_PLACED).len() == 1).await;

    let acks = acks(&bus);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].bet_id, b.bet_id);
    assert_eq!(acks[0].status, "Received");
    assert_eq!(acks[0].ack_type, BetKind::Value);

    let results = results(&bus);
    assert_eq!(results[0].bet_id, b.bet_id);
    assert_eq!(results[0].status, BetStatus::Success);
    assert_eq!(results[0].payout, Some(dec!(105)));
    assert_eq!(exec.calls_for("A"), 1);

    relay.handle.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_delivery_acked_once() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    let relay = start_relay(&bus, &[], exec.clone(), fast_pool()).await;

    let b = bet("A", "M1", None);
    send(&bus, &b).await;
    send(&bus, &b).await;
    wait_until(|| relay.stats.snapshot().duplicates == 1).await;
    wait_until(|| bus.published(TOPIC_BETS_PLACED).len() == 1).await;

    assert_eq!(acks(&bus).len(), 1);
    assert_eq!(results(&bus).len(), 1);
    assert_eq!(exec.calls_for("A"), 1);
    assert_eq!(relay.stats.snapshot().duplicates, 1);

    relay.handle.shutdown().await;
}

#[tokio::test]
async fn test_tampered_bet_id_is_dropped() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    let relay = start_relay(&bus, &[], exec.clone(), fast_pool()).await;

    let mut b = bet("A", "M1", None);
    b.side = "draw".into();
    send(&bus, &b).await;
    // A clean bet behind it proves the loop kept going.
    send(&bus, &bet("A", "M2", None)).await;
    wait_until(|| bus.published(TOPIC_BETS_PLACED).len() == 1).await;

    let acks = acks(&bus);
    assert_eq!(acks.len(), 1);
    assert_ne!(acks[0].bet_id, b.bet_id);
    assert_eq!(relay.stats.snapshot().invalid, 1);
    assert_eq!(exec.calls().len(), 1);

    relay.handle.shutdown().await;
}

#[tokio::test]
async fn test_value_bets_stay_with_their_owner() {
    let bus = Arc::new(MemoryBus::new());
    let exec_a = MockExecutor::new();
    let exec_b = MockExecutor::new();
    let relay_a = start_relay(&bus, &["A"], exec_a.clone(), fast_pool()).await;
    let relay_b = start_relay(&bus, &["B"], exec_b.clone(), fast_pool()).await;

    let b = bet("B", "M1", None);
    send(&bus, &b).await;
    wait_until(|| bus.published(TOPIC_BETS_PLACED).len() == 1).await;
    wait_until(|| relay_a.stats.snapshot().not_owned == 1).await;

    assert_eq!(acks(&bus).len(), 1);
    assert_eq!(results(&bus)[0].bookie, "B");
    assert_eq!(exec_a.calls().len(), 0);
    assert_eq!(exec_b.calls_for("B"), 1);
    assert_eq!(relay_a.stats.snapshot().not_owned, 1);

    relay_a.handle.shutdown().await;
    relay_b.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Arbitrage cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_two_listeners_each_place_their_own_leg() {
    let bus = Arc::new(MemoryBus::new());
    let exec_a = MockExecutor::new();
    let exec_b = MockExecutor::new();
    let relay_a = start_relay(&bus, &["A"], exec_a.clone(), fast_pool()).await;
    let relay_b = start_relay(&bus, &["B"], exec_b.clone(), fast_pool()).await;

    let leg_a = bet("A", "M1", Some("C1"));
    let leg_b = bet("B", "M1", Some("C1"));
    send(&bus, &leg_a).await;
    send(&bus, &leg_b).await;
    wait_until(|| bus.published(TOPIC_BETS_PLACED).len() == 2).await;

    let mut acked: Vec<String> = acks(&bus).into_iter().map(|a| a.bet_id).collect();
    acked.sort();
    let mut expected = vec![leg_a.bet_id.clone(), leg_b.bet_id.clone()];
    expected.sort();
    assert_eq!(acked, expected, "each leg acked exactly once, by its owner");

    assert!(results(&bus).iter().all(|r| r.status == BetStatus::Success));
    assert_eq!(exec_a.calls(), vec![("A".to_string(), leg_a.bet_id.clone())]);
    assert_eq!(exec_b.calls(), vec![("B".to_string(), leg_b.bet_id.clone())]);
    assert_eq!(relay_a.stats.snapshot().cycles_completed, 1);
    assert_eq!(relay_b.stats.snapshot().cycles_completed, 1);

    relay_a.handle.shutdown().await;
    relay_b.handle.shutdown().await;
}

#[tokio::test]
async fn test_half_cycle_is_not_dispatched() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    let relay = start_relay(&bus, &[], exec.clone(), fast_pool()).await;

    send(&bus, &bet("A", "M1", Some("C9"))).await;
    wait_until(|| relay.stats.snapshot().accepted == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(acks(&bus).len(), 1);
    assert!(bus.published(TOPIC_BETS_PLACED).is_empty());
    assert!(exec.calls().is_empty());

    relay.handle.shutdown().await;
}

#[tokio::test]
async fn test_partial_cycle_cancels_placed_leg() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    exec.reject_for("B");
    let relay = start_relay(&bus, &[], exec.clone(), fast_pool()).await;

    let cancel = CancellationToken::new();
    let reconciler = spawn_reconciler(
        bus.clone(),
        Publisher::new(bus.clone(), relay.stats.clone()),
        CycleReconciler::new(2, Duration::from_secs(30)),
        Duration::from_secs(10),
        cancel.clone(),
    )
    .await
    .unwrap();

    let leg_a = bet("A", "M1", Some("C2"));
    send(&bus, &leg_a).await;
    send(&bus, &bet("B", "M1", Some("C2"))).await;
    wait_until(|| !bus.published(&cancel_topic("A")).is_empty()).await;

    let cancels = bus.published(&cancel_topic("A"));
    assert_eq!(cancels.len(), 1);
    let req: CancelRequest = transport::decode(&cancels[0]).unwrap();
    assert_eq!(req.bet_id, leg_a.bet_id);
    assert_eq!(req.cycle_id, "C2");
    assert!(bus.published(&cancel_topic("B")).is_empty());

    cancel.cancel();
    reconciler.await.unwrap();
    relay.handle.shutdown().await;
}

#[tokio::test]
async fn test_sharded_fleet_cancels_partial_cycle_once() {
    let bus = Arc::new(MemoryBus::new());
    let exec_a = MockExecutor::new();
    let exec_b = MockExecutor::new();
    exec_b.reject_for("B");
    let relay_a = start_relay(&bus, &["A"], exec_a.clone(), fast_pool()).await;
    let relay_b = start_relay(&bus, &["B"], exec_b.clone(), fast_pool()).await;

    // Each instance runs its own reconciler, elected per cycle.
    let cancel = CancellationToken::new();
    let mut reconcilers = Vec::new();
    for (primary, relay) in [("A", &relay_a), ("B", &relay_b)] {
        let shard = CycleShard::from_registry(&registry(), primary).unwrap();
        reconcilers.push(
            spawn_reconciler(
                bus.clone(),
                Publisher::new(bus.clone(), relay.stats.clone()),
                CycleReconciler::new(2, Duration::from_secs(30)).with_shard(shard),
                Duration::from_secs(10),
                cancel.clone(),
            )
            .await
            .unwrap(),
        );
    }

    let leg_a = bet("A", "M1", Some("C3"));
    send(&bus, &leg_a).await;
    send(&bus, &bet("B", "M1", Some("C3"))).await;
    wait_until(|| !bus.published(&cancel_topic("A")).is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(exec_a.calls_for("A"), 1);
    assert_eq!(exec_b.calls_for("B"), 1);
    assert_eq!(results(&bus).len(), 2);

    let cancels = bus.published(&cancel_topic("A"));
    assert_eq!(cancels.len(), 1);
    let req: CancelRequest = transport::decode(&cancels[0]).unwrap();
    assert_eq!(req.bet_id, leg_a.bet_id);
    let total = relay_a.stats.snapshot().cancels + relay_b.stats.snapshot().cancels;
    assert_eq!(total, 1);

    cancel.cancel();
    for reconciler in reconcilers {
        reconciler.await.unwrap();
    }
    relay_a.handle.shutdown().await;
    relay_b.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_failing_leg_still_cancels_placed_leg() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    exec.flaky_for("B");
    exec.hold_for("B", Duration::from_secs(20));
    let pool = PoolSettings::default();
    let relay = start_relay(&bus, &[], exec.clone(), pool.clone()).await;

    let cancel = CancellationToken::new();
    let reconciler = spawn_reconciler(
        bus.clone(),
        Publisher::new(bus.clone(), relay.stats.clone()),
        CycleReconciler::new(2, result_window(&pool)),
        Duration::from_secs(10),
        cancel.clone(),
    )
    .await
    .unwrap();

    let leg_a = bet("A", "M1", Some("C4"));
    send(&bus, &leg_a).await;
    send(&bus, &bet("B", "M1", Some("C4"))).await;

    // Three 20s attempts plus two retry delays before B gives up.
    tokio::time::sleep(Duration::from_secs(90)).await;

    assert_eq!(exec.calls_for("B"), 3);
    let failed: Vec<BetResult> = results(&bus).into_iter().filter(|r| r.bookie == "B").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, BetStatus::Failed);

    let cancels = bus.published(&cancel_topic("A"));
    assert_eq!(cancels.len(), 1);
    let req: CancelRequest = transport::decode(&cancels[0]).unwrap();
    assert_eq!(req.bet_id, leg_a.bet_id);

    cancel.cancel();
    reconciler.await.unwrap();
    relay.handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_acked_leg_of_open_cycle() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::new();
    let relay = start_relay(&bus, &["A"], exec.clone(), fast_pool()).await;

    let leg_a = bet("A", "M1", Some("C5"));
    send(&bus, &leg_a).await;
    wait_until(|| acks(&bus).len() == 1).await;
    assert!(results(&bus).is_empty());

    relay.handle.shutdown().await;

    let results = results(&bus);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].bet_id, leg_a.bet_id);
    assert_eq!(results[0].status, BetStatus::Failed);
    assert_eq!(results[0].error.as_deref(), Some("listener shutting down"));
    assert!(exec.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Backpressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_queue_fails_bet_instead_of_blocking() {
    let bus = Arc::new(MemoryBus::new());
    let exec = MockExecutor::holding(Duration::from_millis(400));
    let pool = PoolSettings {
        max_concurrency: 1,
        workers_per_bookie: 1,
        queue_capacity: 1,
        enqueue_timeout: Duration::from_millis(50),
        ..fast_pool()
    };
    let relay = start_relay(&bus, &["A"], exec.clone(), pool).await;

    // One in flight, one queued, the third finds no room.
    let third = bet("A", "M3", None);
    send(&bus, &bet("A", "M1", None)).await;
    send(&bus, &bet("A", "M2", None)).await;
    send(&bus, &third).await;
    wait_until(|| relay.stats.snapshot().queue_rejections == 1).await;
    wait_until(|| bus.published(TOPIC_BETS_PLACED).len() == 3).await;

    let results = results(&bus);
    let rejected: Vec<&BetResult> = results.iter().filter(|r| r.status == BetStatus::Failed).collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].bet_id, third.bet_id);
    assert!(rejected[0].error.as_deref().unwrap_or_default().contains("full"));
    assert_eq!(acks(&bus).len(), 3);

    relay.handle.shutdown().await;
}
