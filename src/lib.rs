//! betrelay — bet-intake coordination and arbitrage-cycle aggregation.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod bookies;
pub mod config;
pub mod engine;
pub mod executor;
pub mod intake;
pub mod stats;
pub mod status;
pub mod transport;
pub mod types;
