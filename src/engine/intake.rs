//! Intake gate: the synchronous decide step for inbound bets.
//!
//! decode → normalize → known bookie → required fields → bet id →
//! ownership → dedup → cycle store → mark seen.
//!
//! The gate never touches the bus. It returns an [`Admission`] telling the
//! listener whether to ack and what (if anything) to dispatch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::aggregator::{ArbCycle, CycleAggregator, ExpiredCycle, Offer};
use crate::bookies::BookieRegistry;
use crate::intake::{self, DedupWindow, RawBetFields};
use crate::transport;
use crate::types::{BetRequest, DispatchBundle, IntakeError};

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// Which bookie accounts this listener acks and executes for.
///
/// An empty owned list means "every currently known bookie", which is the
/// single-instance deployment.
#[derive(Clone)]
pub struct Ownership {
    registry: Arc<BookieRegistry>,
    owned: BTreeSet<String>,
}

impl Ownership {
    pub fn new(registry: Arc<BookieRegistry>, owned: &[String]) -> Self {
        Self {
            registry,
            owned: owned.iter().cloned().collect(),
        }
    }

    /// Stage one: the bookie is a configured account at all.
    pub fn is_known(&self, bookie: &str) -> bool {
        intake::belongs_to_known_bookie(bookie, &self.registry.snapshot())
    }

    /// Stage two: this instance hosts the account.
    pub fn owns(&self, bookie: &str) -> bool {
        self.is_known(bookie) && (self.owned.is_empty() || self.owned.contains(bookie))
    }

    /// Owned bookie names; all known names when nothing is pinned.
    pub fn owned_names(&self) -> Vec<String> {
        if self.owned.is_empty() {
            self.registry.names()
        } else {
            self.owned.iter().cloned().collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Outcome of admitting one bet.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub bet: BetRequest,
    /// Publish a `Received` ack for this bet.
    pub ack: bool,
    /// Work that became ready because of this bet.
    pub dispatch: Option<DispatchBundle>,
}

/// Result of a periodic sweep.
#[derive(Debug, Default)]
pub struct Sweep {
    pub expired: Vec<ExpiredCycle>,
    pub dedup_cleared: usize,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub expected_legs: usize,
    pub cycle_timeout: Duration,
    pub dedup_high_water: usize,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            expected_legs: super::aggregator::DEFAULT_EXPECTED_LEGS,
            cycle_timeout: super::aggregator::DEFAULT_CYCLE_TIMEOUT,
            dedup_high_water: intake::dedup::DEFAULT_HIGH_WATER,
        }
    }
}

pub struct IntakeGate {
    ownership: Ownership,
    dedup: DedupWindow,
    cycles: CycleAggregator,
}

impl IntakeGate {
    pub fn new(ownership: Ownership, settings: &GateSettings) -> Self {
        Self {
            ownership,
            dedup: DedupWindow::new(settings.dedup_high_water),
            cycles: CycleAggregator::new(settings.expected_legs, settings.cycle_timeout),
        }
    }

    /// Decode a raw bus payload and admit it.
    pub fn admit_payload(&mut self, payload: &[u8], now: Instant) -> Result<Admission, IntakeError> {
        let raw: RawBetFields = transport::decode(payload)?;
        self.admit(raw, now)
    }

    pub fn admit(&mut self, raw: RawBetFields, now: Instant) -> Result<Admission, IntakeError> {
        let row = intake::normalize(raw);

        if !self.ownership.is_known(&row.bookie) {
            return Err(IntakeError::UnknownBookie(row.bookie));
        }
        let bet = row.into_request()?;
        intake::verify(&bet)?;

        // Foreign arb legs are still aggregated so the cycle can complete
        // here; they are never acked or dispatched by this instance.
        let owned = self.ownership.owns(&bet.bookie);
        if !owned && bet.arb_cycle_id.is_none() {
            return Err(IntakeError::NotOwned {
                bet_id: bet.bet_id,
                bookie: bet.bookie,
            });
        }

        if self.dedup.is_duplicate(&bet.bet_id) {
            return Err(IntakeError::Duplicate(bet.bet_id));
        }

        let dispatch = if bet.arb_cycle_id.is_some() {
            match self.cycles.offer(bet.clone(), now)? {
                Offer::Pending { .. } => None,
                Offer::Complete(bundle) => Some(bundle),
            }
        } else {
            Some(DispatchBundle::Value { bet: bet.clone() })
        };

        self.dedup.mark_seen(&bet.bet_id);
        Ok(Admission {
            bet,
            ack: owned,
            dispatch,
        })
    }

    /// Expire stale cycles and bound the dedup window.
    pub fn sweep(&mut self, now: Instant) -> Sweep {
        Sweep {
            expired: self.cycles.expire_stale(now),
            dedup_cleared: self.dedup.truncate_if_over(),
        }
    }

    /// Remove every cycle still collecting legs, for shutdown.
    pub fn drain_pending(&mut self) -> Vec<ArbCycle> {
        self.cycles.drain()
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn pending_cycles(&self) -> usize {
        self.cycles.len()
    }

    pub fn seen(&self) -> usize {
        self.dedup.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bookies::BookieConfig;
    use crate::intake::expected_bet_id;
    use crate::types::tests::sample_bet;
    use crate::types::BetKind;

    /// A bet carrying its correct content-hash id.
    pub(crate) fn valid_bet(bookie: &str, cycle: Option<&str>) -> BetRequest {
        let mut bet = sample_bet(bookie, cycle);
        bet.bet_id = expected_bet_id(&bet.identity());
        bet
    }

    /// The same bet in its loosely-typed inbound shape.
    pub(crate) fn raw_bet(bookie: &str, cycle: Option<&str>) -> RawBetFields {
        let json = serde_json::to_value(valid_bet(bookie, cycle)).unwrap();
        serde_json::from_value(json).unwrap()
    }

    fn registry(names: &[&str]) -> Arc<BookieRegistry> {
        Arc::new(BookieRegistry::with_configs(
            names.iter().map(|n| BookieConfig::named(*n)).collect(),
        ))
    }

    fn gate(known: &[&str], owned: &[&str]) -> IntakeGate {
        let owned: Vec<String> = owned.iter().map(|s| s.to_string()).collect();
        IntakeGate::new(Ownership::new(registry(known), &owned), &GateSettings::default())
    }

    #[test]
    fn test_value_bet_admitted_and_dispatched() {
        let mut gate = gate(&["A", "B"], &["A"]);
        let adm = gate.admit(raw_bet("A", None), Instant::now()).unwrap();
        assert!(adm.ack);
        assert_eq!(adm.bet.kind(), BetKind::Value);
        assert!(matches!(adm.dispatch, Some(DispatchBundle::Value { .. })));
        assert_eq!(gate.seen(), 1);
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let mut gate = gate(&["A"], &[]);
        let now = Instant::now();
        gate.admit(raw_bet("A", None), now).unwrap();
        assert!(matches!(gate.admit(raw_bet("A", None), now), Err(IntakeError::Duplicate(_))));
    }

    #[test]
    fn test_tampered_id_rejected_without_side_effects() {
        let mut gate = gate(&["A"], &[]);
        let mut raw = raw_bet("A", None);
        raw.side = Some(crate::intake::normalize::Scalar::Text("away".into()));
        let err = gate.admit(raw, Instant::now()).unwrap_err();
        assert!(matches!(err, IntakeError::BetIdMismatch { .. }));
        assert_eq!(gate.seen(), 0);
    }

    #[test]
    fn test_unknown_bookie_rejected() {
        let mut gate = gate(&["A"], &[]);
        assert!(matches!(
            gate.admit(raw_bet("Z", None), Instant::now()),
            Err(IntakeError::UnknownBookie(ref b)) if b == "Z"
        ));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut gate = gate(&["A"], &[]);
        let mut raw = raw_bet("A", None);
        raw.event_id = None;
        assert!(matches!(
            gate.admit(raw, Instant::now()),
            Err(IntakeError::MissingField(ref f)) if f == &vec!["eventId"]
        ));
    }

    #[test]
    fn test_value_bet_for_other_instance_not_owned() {
        let mut gate = gate(&["A", "B"], &["A"]);
        assert!(matches!(
            gate.admit(raw_bet("B", None), Instant::now()),
            Err(IntakeError::NotOwned { .. })
        ));
        assert_eq!(gate.seen(), 0);
    }

    #[test]
    fn test_arb_legs_aggregate_across_owners() {
        let mut gate = gate(&["A", "B"], &["A"]);
        let now = Instant::now();

        let foreign = gate.admit(raw_bet("B", Some("C1")), now).unwrap();
        assert!(!foreign.ack, "legs for other accounts are never acked here");
        assert!(foreign.dispatch.is_none());

        let own = gate.admit(raw_bet("A", Some("C1")), now).unwrap();
        assert!(own.ack);
        match own.dispatch {
            Some(DispatchBundle::Arb { ref legs, .. }) => assert_eq!(legs.len(), 2),
            ref other => panic!("expected arb bundle, got {other:?}"),
        }
        assert_eq!(gate.pending_cycles(), 0);
    }

    #[test]
    fn test_sweep_expires_partial_cycle() {
        let mut gate = gate(&["A", "B"], &[]);
        let t0 = Instant::now();
        gate.admit(raw_bet("A", Some("C1")), t0).unwrap();

        let sweep = gate.sweep(t0 + Duration::from_secs(31));
        assert_eq!(sweep.expired.len(), 1);
        assert_eq!(sweep.expired[0].legs[0].bookie, "A");
        assert_eq!(gate.pending_cycles(), 0);
    }

    #[test]
    fn test_drain_pending_returns_open_cycles() {
        let mut gate = gate(&["A", "B"], &["A"]);
        let now = Instant::now();
        gate.admit(raw_bet("A", Some("C1")), now).unwrap();
        gate.admit(raw_bet("B", Some("C2")), now).unwrap();

        let mut drained: Vec<String> = gate.drain_pending().into_iter().map(|c| c.cycle_id).collect();
        drained.sort();
        assert_eq!(drained, vec!["C1", "C2"]);
        assert_eq!(gate.pending_cycles(), 0);
    }

    #[test]
    fn test_owned_names_default_to_all_known() {
        let ownership = Ownership::new(registry(&["B", "A"]), &[]);
        assert_eq!(ownership.owned_names(), vec!["A", "B"]);
        assert!(ownership.owns("A"));
        assert!(!ownership.owns("C"));
    }
}
