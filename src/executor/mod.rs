//! Bet execution collaborators.
//!
//! Defines the `BetExecutor` trait (the boundary to whatever actually
//! places a bet on a bookmaker site) and provides implementations for:
//! - Dry run: logs and reports success, places nothing
//! - HTTP: delegates to a browser-automation sidecar
//!
//! Failures are classified as transient (retryable) or rejections.

pub mod dry_run;
pub mod http;
pub mod otp;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::bookies::BookieConfig;
use crate::types::{BetRequest, ExecutionError};

pub use dry_run::DryRunExecutor;
pub use http::HttpExecutor;
pub use otp::OtpStore;

/// Confirmation returned by an executor for a placed bet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Placement {
    /// Potential return reported by the bookie, if known.
    pub payout: Option<Decimal>,
    /// Bookie-side ticket reference, if any.
    pub reference: Option<String>,
}

/// Places a single bet on one bookie account.
///
/// Implementations must be safe to call concurrently for different bets;
/// the worker pool bounds how many calls are in flight.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BetExecutor: Send + Sync {
    async fn execute(
        &self,
        account: &BookieConfig,
        bet: &BetRequest,
    ) -> Result<Placement, ExecutionError>;
}
