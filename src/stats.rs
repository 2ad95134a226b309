//! Process-wide relay counters.
//!
//! Plain relaxed atomics; a snapshot is served on `/api/stats` and logged
//! at shutdown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct RelayStats {
    started_at: DateTime<Utc>,
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub acked: AtomicU64,
    pub decode_errors: AtomicU64,
    pub invalid: AtomicU64,
    pub not_owned: AtomicU64,
    pub duplicates: AtomicU64,
    pub anomalies: AtomicU64,
    pub cycles_completed: AtomicU64,
    pub cycles_expired: AtomicU64,
    pub dispatched: AtomicU64,
    pub placed: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
    pub queue_rejections: AtomicU64,
    pub publish_failures: AtomicU64,
    pub cancels: AtomicU64,
    pub otp_updates: AtomicU64,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            received: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            not_owned: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_expired: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            placed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            cancels: AtomicU64::new(0),
            otp_updates: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub uptime_secs: i64,
    pub received: u64,
    pub accepted: u64,
    pub acked: u64,
    pub decode_errors: u64,
    pub invalid: u64,
    pub not_owned: u64,
    pub duplicates: u64,
    pub anomalies: u64,
    pub cycles_completed: u64,
    pub cycles_expired: u64,
    pub dispatched: u64,
    pub placed: u64,
    pub failed: u64,
    pub retries: u64,
    pub queue_rejections: u64,
    pub publish_failures: u64,
    pub cancels: u64,
    pub otp_updates: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            received: get(&self.received),
            accepted: get(&self.accepted),
            acked: get(&self.acked),
            decode_errors: get(&self.decode_errors),
            invalid: get(&self.invalid),
            not_owned: get(&self.not_owned),
            duplicates: get(&self.duplicates),
            anomalies: get(&self.anomalies),
            cycles_completed: get(&self.cycles_completed),
            cycles_expired: get(&self.cycles_expired),
            dispatched: get(&self.dispatched),
            placed: get(&self.placed),
            failed: get(&self.failed),
            retries: get(&self.retries),
            queue_rejections: get(&self.queue_rejections),
            publish_failures: get(&self.publish_failures),
            cancels: get(&self.cancels),
            otp_updates: get(&self.otp_updates),
        }
    }
}
