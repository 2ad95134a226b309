//! Deterministic bet identifiers.
//!
//! A bet id is the lowercase hex SHA-256 of the bet's immutable fields
//! joined with `_`:
//!
//! - value: `matchId_homeTeam_awayTeam_matchTime_bookie_side_strategy`
//! - arb:   `arbCycleId_` + the value form
//!
//! Inbound ids are always recomputed and compared, never trusted.

use sha2::{Digest, Sha256};
use tracing::warn;

use super::normalize::NormalizedRow;
use crate::bookies::BookieConfig;
use crate::types::{BetRequest, IntakeError, UNKNOWN};

const ID_DELIMITER: &str = "_";

/// The fields that make up a bet's identity, borrowed from either a
/// normalized row or an accepted request.
#[derive(Debug, Clone, Copy)]
pub struct IdentityFields<'a> {
    pub arb_cycle_id: Option<&'a str>,
    pub match_id: &'a str,
    pub home_team: &'a str,
    pub away_team: &'a str,
    pub match_time: &'a str,
    pub bookie: &'a str,
    pub side: &'a str,
    pub strategy: &'a str,
}

impl NormalizedRow {
    pub fn identity(&self) -> IdentityFields<'_> {
        IdentityFields {
            arb_cycle_id: self.arb_cycle_id.as_deref(),
            match_id: &self.match_id,
            home_team: &self.home_team,
            away_team: &self.away_team,
            match_time: &self.match_time,
            bookie: &self.bookie,
            side: &self.side,
            strategy: &self.strategy,
        }
    }
}

impl BetRequest {
    pub fn identity(&self) -> IdentityFields<'_> {
        IdentityFields {
            arb_cycle_id: self.arb_cycle_id.as_deref(),
            match_id: &self.match_id,
            home_team: &self.home_team,
            away_team: &self.away_team,
            match_time: &self.match_time,
            bookie: &self.bookie,
            side: &self.side,
            strategy: &self.strategy,
        }
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn value_parts<'a>(f: &IdentityFields<'a>) -> [&'a str; 7] {
    [
        f.match_id,
        f.home_team,
        f.away_team,
        f.match_time,
        f.bookie,
        f.side,
        f.strategy,
    ]
}

/// Identifier for a value bet (no cycle id in the preimage).
pub fn compute_value_bet_id(fields: &IdentityFields<'_>) -> String {
    sha256_hex(&value_parts(fields).join(ID_DELIMITER))
}

/// Identifier for an arbitrage leg. A missing cycle id hashes as
/// [`UNKNOWN`], which can never match a real producer's id.
pub fn compute_arb_bet_id(fields: &IdentityFields<'_>) -> String {
    let cycle = fields.arb_cycle_id.unwrap_or(UNKNOWN);
    let mut parts = Vec::with_capacity(8);
    parts.push(cycle);
    parts.extend(value_parts(fields));
    sha256_hex(&parts.join(ID_DELIMITER))
}

/// The id this bet should carry, branching on the presence of a cycle id.
pub fn expected_bet_id(fields: &IdentityFields<'_>) -> String {
    if fields.arb_cycle_id.is_some() {
        compute_arb_bet_id(fields)
    } else {
        compute_value_bet_id(fields)
    }
}

/// Recompute and compare; the error carries expected vs actual.
pub fn verify(bet: &BetRequest) -> Result<(), IntakeError> {
    let expected = expected_bet_id(&bet.identity());
    if expected == bet.bet_id {
        Ok(())
    } else {
        Err(IntakeError::BetIdMismatch {
            bookie: bet.bookie.clone(),
            expected,
            actual: bet.bet_id.clone(),
        })
    }
}

/// Boolean form of [`verify`], logging mismatches.
pub fn validate(bet: &BetRequest) -> bool {
    match verify(bet) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Invalid bet id");
            false
        }
    }
}

/// Stage-one ownership filter: the declared bookie must be one of the
/// currently configured accounts.
pub fn belongs_to_known_bookie(bookie: &str, known: &[BookieConfig]) -> bool {
    known.iter().any(|c| c.name == bookie)
}

/// Deterministic shard for a cycle id, stable across processes and
/// restarts (unlike `DefaultHasher`).
pub fn cycle_shard(cycle_id: &str, shard_count: usize) -> usize {
    if shard_count == 0 {
        return 0;
    }
    let digest = Sha256::digest(cycle_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count as u64) as usize
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::sample_bet;

    /// SHA-256("M1_X_Y_2025-10-25 15:00:00_A_home_S1")
    const SCENARIO_VALUE_ID: &str =
        "a5f0ebc699cda8094357d4d981e636c455d8969208a3d150c45ba0350ad8e783";
    /// SHA-256("C1_M1_X_Y_2025-10-25 15:00:00_A_home_S1")
    const SCENARIO_ARB_ID: &str =
        "0340998e111b6268ddf71b67efb94dfa73c6855ebc1d2fd807e91472394080ae";

    fn scenario(cycle: Option<&str>) -> BetRequest {
        let mut bet = sample_bet("A", cycle);
        bet.bet_id = expected_bet_id(&bet.identity());
        bet
    }

    #[test]
    fn test_concrete_value_scenario() {
        let bet = scenario(None);
        assert_eq!(compute_value_bet_id(&bet.identity()), SCENARIO_VALUE_ID);
        assert_eq!(bet.bet_id, SCENARIO_VALUE_ID);
        assert!(validate(&bet));
    }

    #[test]
    fn test_concrete_arb_scenario() {
        let bet = scenario(Some("C1"));
        assert_eq!(compute_arb_bet_id(&bet.identity()), SCENARIO_ARB_ID);
        assert!(validate(&bet));
    }

    #[test]
    fn test_any_other_id_fails() {
        let mut bet = scenario(None);
        bet.bet_id = "0".repeat(64);
        assert!(!validate(&bet));

        bet.bet_id = SCENARIO_VALUE_ID.to_uppercase();
        assert!(!validate(&bet), "comparison is byte-for-byte");

        // A value id presented on an arb leg is also a mismatch.
        let mut leg = scenario(Some("C1"));
        leg.bet_id = SCENARIO_VALUE_ID.to_string();
        match verify(&leg) {
            Err(IntakeError::BetIdMismatch { expected, actual, .. }) => {
                assert_eq!(expected, SCENARIO_ARB_ID);
                assert_eq!(actual, SCENARIO_VALUE_ID);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let bet = scenario(None);
        let a = compute_value_bet_id(&bet.identity());
        let b = compute_value_bet_id(&bet.clone().identity());
        assert_eq!(a, b);
    }

    #[test]
    fn test_changing_any_field_changes_hash() {
        let base = scenario(Some("C1"));
        let base_id = compute_arb_bet_id(&base.identity());

        let mutations: Vec<fn(&mut BetRequest)> = vec![
            |b| b.side = "away".into(),
            |b| b.bookie = "B".into(),
            |b| b.match_id = "M2".into(),
            |b| b.home_team = "Z".into(),
            |b| b.away_team = "Z".into(),
            |b| b.match_time = "2025-10-25 16:00:00".into(),
            |b| b.strategy = "S2".into(),
            |b| b.arb_cycle_id = Some("C2".into()),
        ];
        for mutate in mutations {
            let mut bet = base.clone();
            mutate(&mut bet);
            assert_ne!(compute_arb_bet_id(&bet.identity()), base_id);
        }
    }

    #[test]
    fn test_non_identity_fields_do_not_affect_hash() {
        let base = scenario(None);
        let mut bet = base.clone();
        bet.stake = bet.stake * rust_decimal::Decimal::TWO;
        bet.search_query = "different".into();
        assert!(validate(&bet));
    }

    #[test]
    fn test_known_bookie() {
        let known = vec![BookieConfig::named("A"), BookieConfig::named("B")];
        assert!(belongs_to_known_bookie("A", &known));
        assert!(!belongs_to_known_bookie("C", &known));
        assert!(!belongs_to_known_bookie("a", &known));
    }

    #[test]
    fn test_cycle_shard_is_stable_and_bounded() {
        for n in 1..6 {
            let s = cycle_shard("cycle-42", n);
            assert!(s < n);
            assert_eq!(s, cycle_shard("cycle-42", n));
        }
        assert_eq!(cycle_shard("anything", 0), 0);
    }
}
