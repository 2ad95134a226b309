//! Integration tests for betrelay.
//!
//! Runs full listeners against the in-process bus with a mock executor.

mod mock_executor;
mod pipeline;
