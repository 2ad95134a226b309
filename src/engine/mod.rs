//! Core engine — intake → aggregate → dispatch → publish.
//!
//! The decide steps (`intake`, `aggregator`, `reconcile`) are synchronous
//! and own their state; the effect steps (`listener`, `router`, `workers`,
//! `publisher`) talk to the bus and the executor.

pub mod aggregator;
pub mod intake;
pub mod listener;
pub mod publisher;
pub mod reconcile;
pub mod router;
pub mod workers;

pub use listener::{BetListener, ListenerHandle, ListenerSettings};
pub use publisher::Publisher;
