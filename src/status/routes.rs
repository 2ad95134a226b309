//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<StatusState>`.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::bookies::BookieRegistry;
use crate::stats::{RelayStats, StatsSnapshot};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct StatusState {
    pub listener_id: String,
    pub bus: String,
    pub stats: Arc<RelayStats>,
    pub registry: Arc<BookieRegistry>,
    /// Pinned owned bookies; empty means every known account.
    pub owned: Vec<String>,
}

pub type AppState = Arc<StatusState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub listener_id: String,
    pub bus: String,
    #[serde(flatten)]
    pub counters: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookieEntry {
    pub name: String,
    pub owned: bool,
    pub otp_required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookiesResponse {
    pub known: usize,
    pub bookies: Vec<BookieEntry>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        listener_id: state.listener_id.clone(),
        bus: state.bus.clone(),
        counters: state.stats.snapshot(),
    })
}

/// GET /api/bookies
pub async fn get_bookies(State(state): State<AppState>) -> Json<BookiesResponse> {
    let snapshot = state.registry.snapshot();
    let bookies: Vec<BookieEntry> = snapshot
        .iter()
        .map(|c| BookieEntry {
            name: c.name.clone(),
            owned: state.owned.is_empty() || state.owned.contains(&c.name),
            otp_required: c.otp_required,
        })
        .collect();
    Json(BookiesResponse {
        known: bookies.len(),
        bookies,
    })
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.registry.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "no bookies")
    } else {
        (StatusCode::OK, "ok")
    }
}
