//! Mock executor for integration testing.
//!
//! Provides a deterministic `BetExecutor` that records every call and can
//! be told to reject or time out bets for chosen bookies, or to hold calls
//! for a while. Everything stays in-memory with no browser or sidecar.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use betrelay::bookies::BookieConfig;
use betrelay::executor::{BetExecutor, Placement};
use betrelay::types::{BetRequest, ExecutionError};

/// A mock bet executor. State is shared so clones observe the same calls.
#[derive(Clone, Default)]
pub struct MockExecutor {
    calls: Arc<Mutex<Vec<(String, String)>>>,
    /// Bookies whose bets are rejected outright.
    rejecting: Arc<Mutex<HashSet<String>>>,
    /// Bookies whose bets always fail with a retryable error.
    flaky: Arc<Mutex<HashSet<String>>>,
    /// Each call sleeps this long before answering.
    hold: Option<Duration>,
    /// Per-bookie hold, taking precedence over `hold`.
    holds: Arc<Mutex<HashMap<String, Duration>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holding(hold: Duration) -> Self {
        Self {
            hold: Some(hold),
            ..Self::default()
        }
    }

    pub fn reject_for(&self, bookie: &str) {
        self.rejecting.lock().unwrap().insert(bookie.to_string());
    }

    pub fn flaky_for(&self, bookie: &str) {
        self.flaky.lock().unwrap().insert(bookie.to_string());
    }

    pub fn hold_for(&self, bookie: &str, hold: Duration) {
        self.holds.lock().unwrap().insert(bookie.to_string(), hold);
    }

    /// `(bookie, bet_id)` for every call, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, bookie: &str) -> usize {
        self.calls().iter().filter(|(b, _)| b == bookie).count()
    }
}

#[async_trait]
impl BetExecutor for MockExecutor {
    async fn execute(
        &self,
        account: &BookieConfig,
        bet: &BetRequest,
    ) -> Result<Placement, ExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((account.name.clone(), bet.bet_id.clone()));

        let hold = self.holds.lock().unwrap().get(&account.name).copied().or(self.hold);
        if let Some(hold) = hold {
            tokio::time::sleep(hold).await;
        }

        if self.rejecting.lock().unwrap().contains(&account.name) {
            return Err(ExecutionError::Rejected("odds changed".into()));
        }
        if self.flaky.lock().unwrap().contains(&account.name) {
            return Err(ExecutionError::Transient("selector timeout".into()));
        }

        Ok(Placement {
            payout: Some(bet.potential_payout()),
            reference: Some(format!("mock-{}", bet.bet_id)),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests for the mock itself
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bet(bookie: &str) -> BetRequest {
        BetRequest {
            bet_id: format!("id-{bookie}"),
            bookie: bookie.into(),
            arb_cycle_id: None,
            match_id: "M1".into(),
            home_team: "X".into(),
            away_team: "Y".into(),
            match_time: "2025-10-25 15:00:00".into(),
            side: "home".into(),
            strategy: "S1".into(),
            odds: dec!(2.0),
            stake: dec!(10),
            search_query: "X v Y".into(),
            event_id: "E1".into(),
            timestamp: "2025-10-25T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_mock_places_and_records() {
        let exec = MockExecutor::new();
        let placement = exec.execute(&BookieConfig::named("A"), &bet("A")).await.unwrap();
        assert_eq!(placement.payout, Some(dec!(20)));
        assert_eq!(exec.calls(), vec![("A".to_string(), "id-A".to_string())]);
    }

    #[tokio::test]
    async fn test_mock_rejects_chosen_bookie() {
        let exec = MockExecutor::new();
        exec.reject_for("B");
        let err = exec.execute(&BookieConfig::named("B"), &bet("B")).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(exec.calls_for("B"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_flaky_bookie_is_slow_and_transient() {
        let exec = MockExecutor::new();
        exec.flaky_for("B");
        exec.hold_for("B", Duration::from_secs(20));

        let started = tokio::time::Instant::now();
        let err = exec.execute(&BookieConfig::named("B"), &bet("B")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(started.elapsed() >= Duration::from_secs(20));

        assert!(exec.execute(&BookieConfig::named("A"), &bet("A")).await.is_ok());
    }
}
