//! Bet identity and validation.
//!
//! Normalizes inbound payloads, recomputes content-hash bet ids, and keeps
//! the dedup window. Everything here is synchronous and transport-free.

pub mod dedup;
pub mod identity;
pub mod normalize;

pub use dedup::DedupWindow;
pub use identity::{
    belongs_to_known_bookie, compute_arb_bet_id, compute_value_bet_id, cycle_shard,
    expected_bet_id, validate, verify,
};
pub use normalize::{normalize, normalize_otp, NormalizedRow, OtpUpdate, RawBetFields, RawOtpUpdate};
