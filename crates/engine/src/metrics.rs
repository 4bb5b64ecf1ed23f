use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    steps_started: AtomicU64,
    steps_succeeded: AtomicU64,
    steps_failed: AtomicU64,
    steps_skipped: AtomicU64,
    attempts: AtomicU64,
    fallback_switches: AtomicU64,
    replans: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_step_started() {
    increment(&COUNTERS.steps_started);
}

pub fn record_step_succeeded() {
    increment(&COUNTERS.steps_succeeded);
}

pub fn record_step_failed() {
    increment(&COUNTERS.steps_failed);
}

pub fn record_step_skipped() {
    increment(&COUNTERS.steps_skipped);
}

pub fn record_attempt() {
    increment(&COUNTERS.attempts);
}

pub fn record_fallback_switch() {
    increment(&COUNTERS.fallback_switches);
}

pub fn record_replan() {
    increment(&COUNTERS.replans);
}

#[derive(Clone, Debug, Default)]
pub struct EngineMetricsSnapshot {
    pub steps_started: u64,
    pub steps_succeeded: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
    pub attempts: u64,
    pub fallback_switches: u64,
    pub replans: u64,
}

pub fn snapshot() -> EngineMetricsSnapshot {
    EngineMetricsSnapshot {
        steps_started: COUNTERS.steps_started.load(Ordering::Relaxed),
        steps_succeeded: COUNTERS.steps_succeeded.load(Ordering::Relaxed),
        steps_failed: COUNTERS.steps_failed.load(Ordering::Relaxed),
        steps_skipped: COUNTERS.steps_skipped.load(Ordering::Relaxed),
        attempts: COUNTERS.attempts.load(Ordering::Relaxed),
        fallback_switches: COUNTERS.fallback_switches.load(Ordering::Relaxed),
        replans: COUNTERS.replans.load(Ordering::Relaxed),
    }
}
