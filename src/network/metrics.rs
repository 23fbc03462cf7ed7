use std::sync::atomic::{AtomicU64, Ordering};

pub static ELECTIONS_STARTED: AtomicU64 = AtomicU64::new(0);
pub static ELECTIONS_WON: AtomicU64 = AtomicU64::new(0);
pub static REPLICATION_DELIVERED: AtomicU64 = AtomicU64::new(0);
pub static REPLICATION_FAILED: AtomicU64 = AtomicU64::new(0);
pub static PROBE_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static CLOCK_SYNCS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub elections_started: u64,
    pub elections_won: u64,
    pub replication_delivered: u64,
    pub replication_failed: u64,
    pub probe_failures: u64,
    pub clock_syncs: u64,
}

pub fn record_election_started() {
    ELECTIONS_STARTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_election_won() {
    ELECTIONS_WON.fetch_add(1, Ordering::Relaxed);
}

pub fn record_replication(delivered: bool) {
    if delivered {
        REPLICATION_DELIVERED.fetch_add(1, Ordering::Relaxed);
    } else {
        REPLICATION_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_probe_failure() {
    PROBE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_clock_sync() {
    CLOCK_SYNCS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        elections_started: ELECTIONS_STARTED.load(Ordering::Relaxed),
        elections_won: ELECTIONS_WON.load(Ordering::Relaxed),
        replication_delivered: REPLICATION_DELIVERED.load(Ordering::Relaxed),
        replication_failed: REPLICATION_FAILED.load(Ordering::Relaxed),
        probe_failures: PROBE_FAILURES.load(Ordering::Relaxed),
        clock_syncs: CLOCK_SYNCS.load(Ordering::Relaxed),
    }
}
