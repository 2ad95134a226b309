//! Shared types for the betrelay engine.
//!
//! The wire entities (bet requests, acknowledgements, results, settlements)
//! and the error taxonomy used across the transport, intake, dispatch and
//! execution layers. Kept free of module dependencies so every layer can
//! import them without cycles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel stored in place of any inbound field that was missing or
/// unparseable.
pub const UNKNOWN: &str = "unknown";

// ---------------------------------------------------------------------------
// Bet request
// ---------------------------------------------------------------------------

/// Which strategy a bet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetKind {
    Value,
    Arb,
}

impl fmt::Display for BetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetKind::Value => write!(f, "value"),
            BetKind::Arb => write!(f, "arb"),
        }
    }
}

/// A validated, normalized bet request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub bet_id: String,
    pub bookie: String,
    pub arb_cycle_id: Option<String>,
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    /// UTC, `YYYY-MM-DD HH:MM:SS`, or [`UNKNOWN`].
    pub match_time: String,
    pub side: String,
    pub strategy: String,
    pub odds: Decimal,
    pub stake: Decimal,
    pub search_query: String,
    pub event_id: String,
    pub timestamp: String,
}

impl BetRequest {
    pub fn kind(&self) -> BetKind {
        if self.arb_cycle_id.is_some() {
            BetKind::Arb
        } else {
            BetKind::Value
        }
    }

    /// Potential return if the bet wins at the requested odds.
    pub fn potential_payout(&self) -> Decimal {
        self.stake * self.odds
    }
}

impl fmt::Display for BetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} v {} | {} @ {} x {} ({})",
            self.bookie, self.home_team, self.away_team, self.side, self.odds, self.stake,
            self.kind(),
        )?;
        if let Some(ref cycle) = self.arb_cycle_id {
            write!(f, " cycle={cycle}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch bundle
// ---------------------------------------------------------------------------

/// Unit of work handed to the dispatch router.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchBundle {
    Value { bet: BetRequest },
    Arb { cycle_id: String, legs: Vec<BetRequest> },
}

impl DispatchBundle {
    /// Every bet carried by this bundle.
    pub fn bets(&self) -> &[BetRequest] {
        match self {
            DispatchBundle::Value { bet } => std::slice::from_ref(bet),
            DispatchBundle::Arb { legs, .. } => legs,
        }
    }

    pub fn kind(&self) -> BetKind {
        match self {
            DispatchBundle::Value { .. } => BetKind::Value,
            DispatchBundle::Arb { .. } => BetKind::Arb,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound lifecycle payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    Success,
    Failed,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Success => write!(f, "Success"),
            BetStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Terminal result of a dispatched bet, published on `bets.placed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetResult {
    pub bet_id: String,
    pub cycle_id: Option<String>,
    pub bookie: String,
    pub success: bool,
    pub placed: bool,
    pub payout: Option<Decimal>,
    pub error: Option<String>,
    pub status: BetStatus,
    pub timestamp: DateTime<Utc>,
}

impl BetResult {
    pub fn succeeded(bet: &BetRequest, payout: Option<Decimal>) -> Self {
        Self {
            bet_id: bet.bet_id.clone(),
            cycle_id: bet.arb_cycle_id.clone(),
            bookie: bet.bookie.clone(),
            success: true,
            placed: true,
            payout,
            error: None,
            status: BetStatus::Success,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(bet: &BetRequest, error: impl Into<String>) -> Self {
        Self {
            bet_id: bet.bet_id.clone(),
            cycle_id: bet.arb_cycle_id.clone(),
            bookie: bet.bookie.clone(),
            success: false,
            placed: false,
            payout: None,
            error: Some(error.into()),
            status: BetStatus::Failed,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for BetResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.bookie, self.bet_id, self.status)?;
        if let Some(ref e) = self.error {
            write!(f, " ({e})")?;
        }
        Ok(())
    }
}

/// Intake acknowledgement, published on `bets.ack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub bet_id: String,
    pub status: String,
    pub ack_type: BetKind,
    pub timestamp: DateTime<Utc>,
}

impl AckPayload {
    pub fn received(bet: &BetRequest) -> Self {
        Self {
            bet_id: bet.bet_id.clone(),
            status: "Received".to_string(),
            ack_type: bet.kind(),
            timestamp: Utc::now(),
        }
    }
}

/// Settlement outcome of a placed bet, published on `bets.settled` by the
/// settlement poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledPayload {
    pub bet_id: String,
    pub cycle_id: Option<String>,
    pub bookie: String,
    pub stake: Decimal,
    /// Total amount returned by the bookie (zero for a lost bet).
    pub returned: Decimal,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl SettledPayload {
    pub fn profit(&self) -> Decimal {
        self.returned - self.stake
    }
}

/// Instruction to void a placed leg, published on `<bookie>.cancel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub bet_id: String,
    pub cycle_id: String,
    pub bookie: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures at the bus boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("empty payload")]
    EmptyPayload,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("bus connection failed: {0}")]
    Connect(String),

    #[error("subscribe to {topic} failed: {message}")]
    Subscribe { topic: String, message: String },

    #[error("publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("flush failed: {0}")]
    Flush(String),
}

/// Reasons an inbound bet is dropped before it reaches dispatch.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed bet request: {0}")]
    Malformed(String),

    #[error("missing required field(s): {}", .0.join(", "))]
    MissingField(Vec<&'static str>),

    #[error("unknown bookie: {0}")]
    UnknownBookie(String),

    #[error("bet id mismatch for {bookie}: expected={expected}, got={actual}")]
    BetIdMismatch {
        bookie: String,
        expected: String,
        actual: String,
    },

    #[error("bet {bet_id} for {bookie} is not owned by this listener")]
    NotOwned { bet_id: String, bookie: String },

    #[error("duplicate bet {0}")]
    Duplicate(String),

    #[error("cycle {cycle_id} already holds a leg for {bookie}; rejected {bet_id}")]
    CycleAnomaly {
        cycle_id: String,
        bookie: String,
        bet_id: String,
    },
}

/// Failures reported by the execution collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// Navigation/selector timeouts and similar; safe to retry.
    #[error("transient execution fault: {0}")]
    Transient(String),

    /// Business rejection (odds moved, market suspended); never retried.
    #[error("bet rejected by bookie: {0}")]
    Rejected(String),
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient(_))
    }
}

/// Failures handing a bet to a worker pool.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("no worker pool for bookie {0}")]
    NoPool(String),

    #[error("worker queue for {bookie} full after {waited_ms}ms")]
    QueueFull { bookie: String, waited_ms: u64 },

    #[error("worker pool for {0} is shut down")]
    PoolClosed(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
