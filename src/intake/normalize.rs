//! Boundary adapter from loosely-typed inbound payloads to fixed-shape rows.
//!
//! Producers have used several naming conventions over time (snake_case,
//! camelCase, PascalCase, `bookie_channel`, the bet body nested under
//! `data`, `team` instead of `side`). All of that is absorbed here, once;
//! nothing past [`normalize`] sees an optional or aliased field.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{BetRequest, IntakeError, UNKNOWN};

/// Output format for normalized match times.
pub const MATCH_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Raw inbound shapes
// ---------------------------------------------------------------------------

/// A scalar that may arrive as text or as a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    /// Trimmed text form; empty strings count as absent.
    pub fn as_text(&self) -> Option<String> {
        let s = match self {
            Scalar::Text(s) => s.trim().to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::UInt(u) => u.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        };
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Scalar::Text(s) => s.trim().parse::<Decimal>().ok(),
            Scalar::Int(i) => Some(Decimal::from(*i)),
            Scalar::UInt(u) => Some(Decimal::from(*u)),
            Scalar::Float(f) => Decimal::from_f64(*f).map(|d| d.normalize()),
            Scalar::Bool(_) => None,
        }
    }
}

/// Every field a bet producer has ever sent, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawBetFields {
    #[serde(alias = "betId", alias = "BetID", alias = "BetId")]
    pub bet_id: Option<Scalar>,
    #[serde(alias = "Bookie")]
    pub bookie: Option<Scalar>,
    #[serde(alias = "bookieChannel")]
    pub bookie_channel: Option<Scalar>,
    #[serde(alias = "arbCycleId", alias = "arbcycle_id", alias = "ArbCycleID", alias = "arbCycleID")]
    pub arb_cycle_id: Option<Scalar>,
    #[serde(alias = "matchId", alias = "MatchID", alias = "MatchId")]
    pub match_id: Option<Scalar>,
    #[serde(alias = "homeTeam", alias = "HomeTeam")]
    pub home_team: Option<Scalar>,
    #[serde(alias = "awayTeam", alias = "AwayTeam")]
    pub away_team: Option<Scalar>,
    #[serde(alias = "matchTime", alias = "MatchTime", alias = "start_time", alias = "startTime")]
    pub match_time: Option<Scalar>,
    #[serde(alias = "Side", alias = "selection")]
    pub side: Option<Scalar>,
    #[serde(alias = "Team")]
    pub team: Option<Scalar>,
    #[serde(alias = "Strategy")]
    pub strategy: Option<Scalar>,
    #[serde(alias = "Odds")]
    pub odds: Option<Scalar>,
    #[serde(alias = "Stake")]
    pub stake: Option<Scalar>,
    #[serde(alias = "searchQuery", alias = "SearchQuery")]
    pub search_query: Option<Scalar>,
    #[serde(alias = "eventId", alias = "EventID", alias = "EventId")]
    pub event_id: Option<Scalar>,
    #[serde(alias = "Timestamp")]
    pub timestamp: Option<Scalar>,
    /// Older producers wrap the bet body in `data`.
    pub data: Option<Box<RawBetFields>>,
}

/// One-time passcode delivery for accounts behind 2FA.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawOtpUpdate {
    #[serde(alias = "Bookie")]
    pub bookie: Option<Scalar>,
    #[serde(alias = "bookieChannel")]
    pub bookie_channel: Option<Scalar>,
    #[serde(alias = "Otp", alias = "OTP", alias = "code")]
    pub otp: Option<Scalar>,
    #[serde(alias = "Status")]
    pub status: Option<Scalar>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtpUpdate {
    pub bookie: String,
    pub otp: String,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Normalized row
// ---------------------------------------------------------------------------

/// Canonical fixed-shape bet row. Text fields hold [`UNKNOWN`] when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub bet_id: String,
    pub bookie: String,
    pub arb_cycle_id: Option<String>,
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub match_time: String,
    pub side: String,
    pub strategy: String,
    pub odds: Option<Decimal>,
    pub stake: Option<Decimal>,
    pub search_query: String,
    pub event_id: String,
    pub timestamp: Option<String>,
}

impl NormalizedRow {
    /// Names of required fields that are missing, in wire (camelCase) form.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let text = [
            ("betId", &self.bet_id),
            ("bookie", &self.bookie),
            ("matchId", &self.match_id),
            ("side", &self.side),
            ("eventId", &self.event_id),
            ("searchQuery", &self.search_query),
        ];
        let mut missing: Vec<&'static str> = text
            .iter()
            .filter(|(_, v)| v.as_str() == UNKNOWN)
            .map(|(name, _)| *name)
            .collect();
        if self.odds.is_none() {
            missing.push("odds");
        }
        if self.stake.is_none() {
            missing.push("stake");
        }
        missing
    }

    /// Promote to a [`BetRequest`], enforcing required fields and sane
    /// amounts. Bet-id verification happens separately.
    pub fn into_request(self) -> Result<BetRequest, IntakeError> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            return Err(IntakeError::MissingField(missing));
        }
        let (Some(odds), Some(stake)) = (self.odds, self.stake) else {
            return Err(IntakeError::MissingField(vec!["odds", "stake"]));
        };
        if stake <= Decimal::ZERO {
            return Err(IntakeError::Malformed(format!("stake must be positive, got {stake}")));
        }
        if odds <= Decimal::ZERO {
            return Err(IntakeError::Malformed(format!("odds must be positive, got {odds}")));
        }

        Ok(BetRequest {
            bet_id: self.bet_id,
            bookie: self.bookie,
            arb_cycle_id: self.arb_cycle_id,
            match_id: self.match_id,
            home_team: self.home_team,
            away_team: self.away_team,
            match_time: self.match_time,
            side: self.side,
            strategy: self.strategy,
            odds,
            stake,
            search_query: self.search_query,
            event_id: self.event_id,
            timestamp: self.timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
        })
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn text_or_unknown(value: &Option<Scalar>) -> String {
    value
        .as_ref()
        .and_then(Scalar::as_text)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn first<'a>(candidates: &[&'a Option<Scalar>]) -> &'a Option<Scalar> {
    candidates
        .iter()
        .copied()
        .find(|c| c.as_ref().and_then(Scalar::as_text).is_some())
        .unwrap_or(&None)
}

impl RawBetFields {
    /// Fold the nested `data` block into the top level. Top-level values win.
    fn merged(mut self) -> RawBetFields {
        let Some(nested) = self.data.take() else {
            return self;
        };
        let nested = nested.merged();
        macro_rules! fill {
            ($($field:ident),*) => {
                $( if self.$field.is_none() { self.$field = nested.$field; } )*
            };
        }
        fill!(
            bet_id, bookie, bookie_channel, arb_cycle_id, match_id, home_team, away_team,
            match_time, side, team, strategy, odds, stake, search_query, event_id, timestamp
        );
        self
    }
}

/// Map a raw inbound payload onto the canonical row.
pub fn normalize(raw: RawBetFields) -> NormalizedRow {
    let raw = raw.merged();

    NormalizedRow {
        bet_id: text_or_unknown(&raw.bet_id),
        bookie: text_or_unknown(first(&[&raw.bookie, &raw.bookie_channel])),
        arb_cycle_id: raw.arb_cycle_id.as_ref().and_then(Scalar::as_text),
        match_id: text_or_unknown(&raw.match_id),
        home_team: text_or_unknown(&raw.home_team),
        away_team: text_or_unknown(&raw.away_team),
        match_time: normalize_match_time(raw.match_time.as_ref()),
        side: text_or_unknown(first(&[&raw.side, &raw.team])),
        strategy: text_or_unknown(&raw.strategy),
        odds: raw.odds.as_ref().and_then(Scalar::as_decimal),
        stake: raw.stake.as_ref().and_then(Scalar::as_decimal),
        search_query: text_or_unknown(&raw.search_query),
        event_id: text_or_unknown(&raw.event_id),
        timestamp: raw.timestamp.as_ref().and_then(Scalar::as_text),
    }
}

/// Normalize a match time to UTC `YYYY-MM-DD HH:MM:SS`.
///
/// Accepts RFC 3339 (any offset), naive `YYYY-MM-DD HH:MM:SS` /
/// `YYYY-MM-DDTHH:MM:SS` (taken as UTC), and epoch seconds or
/// milliseconds. Anything else yields [`UNKNOWN`].
pub fn normalize_match_time(raw: Option<&Scalar>) -> String {
    let parsed = match raw {
        Some(Scalar::Text(s)) => parse_time_text(s.trim()),
        Some(Scalar::Int(i)) => from_epoch(*i),
        Some(Scalar::UInt(u)) => i64::try_from(*u).ok().and_then(from_epoch),
        Some(Scalar::Float(f)) if f.is_finite() => from_epoch(f.trunc() as i64),
        _ => None,
    };
    parsed
        .map(|dt| dt.format(MATCH_TIME_FORMAT).to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn parse_time_text(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }
    None
}

/// Values above 10^11 are taken as milliseconds (10^11 seconds is year 5138).
fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value > 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

/// Normalize an OTP update; bookie and code are required.
pub fn normalize_otp(raw: RawOtpUpdate) -> Result<OtpUpdate, IntakeError> {
    let bookie = first(&[&raw.bookie, &raw.bookie_channel])
        .as_ref()
        .and_then(Scalar::as_text);
    let otp = raw.otp.as_ref().and_then(Scalar::as_text);

    match (bookie, otp) {
        (Some(bookie), Some(otp)) => Ok(OtpUpdate {
            bookie,
            otp,
            status: text_or_unknown(&raw.status),
        }),
        (bookie, otp) => {
            let mut missing = Vec::new();
            if bookie.is_none() {
                missing.push("bookie");
            }
            if otp.is_none() {
                missing.push("otp");
            }
            Err(IntakeError::MissingField(missing))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
