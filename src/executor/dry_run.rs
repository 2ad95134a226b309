use async_trait::async_trait;
use tracing::info;

use super::{BetExecutor, Placement};
use crate::bookies::BookieConfig;
use crate::types::{BetRequest, ExecutionError};

/// Logs each bet and reports it as placed at the requested odds.
#[derive(Debug, Default, Clone)]
pub struct DryRunExecutor;

impl DryRunExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BetExecutor for DryRunExecutor {
    async fn execute(
        &self,
        account: &BookieConfig,
        bet: &BetRequest,
    ) -> Result<Placement, ExecutionError> {
        let payout = bet.potential_payout();
        info!(
            bookie = %account.name,
            bet_id = %bet.bet_id,
            kind = %bet.kind(),
            side = %bet.side,
            odds = %bet.odds,
            stake = %bet.stake,
            payout = %payout,
            "[DRY RUN] Would place bet"
        );
        Ok(Placement {
            payout: Some(payout),
            reference: Some(format!("dry-run-{}", &bet.bet_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::sample_bet;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_dry_run_reports_payout() {
        let exec = DryRunExecutor::new();
        let placement = exec
            .execute(&BookieConfig::named("A"), &sample_bet("A", None))
            .await
            .unwrap();
        assert_eq!(placement.payout, Some(dec!(105.00)));
        assert_eq!(placement.reference.as_deref(), Some("dry-run-bet-A-value"));
    }
}
