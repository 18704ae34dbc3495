//! Prometheus metrics for ledger operations
//!
//! Features:
//! - Operation counts and latency per operation kind
//! - Units issued, transferred and retired
//! - Invariant violations (should stay at zero)
//! - Commit log batches written

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;
use tracing::{error, info};

use crate::error::Result;

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("creditledger_operations_total", "Total ledger operations"),
        &["op", "status"]
    ).unwrap();

    pub static ref UNITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("creditledger_units_total", "Credit units moved by committed operations"),
        &["op"]
    ).unwrap();

    pub static ref OPERATION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "creditledger_operation_duration_seconds",
            "Ledger operation duration in seconds"
        ).buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["op"]
    ).unwrap();

    pub static ref INVARIANT_VIOLATIONS: IntCounter = IntCounter::new(
        "creditledger_invariant_violations_total",
        "Transactions aborted by a failed invariant check"
    ).unwrap();

    pub static ref COMMIT_BATCHES: IntCounter = IntCounter::new(
        "creditledger_commit_batches_total",
        "Batches appended to the commit log"
    ).unwrap();

    pub static ref BATCHES_OPEN: IntGauge = IntGauge::new(
        "creditledger_batches",
        "Credit batches held by the ledger"
    ).unwrap();
}

/// Initialize metrics registry
pub fn init_metrics() {
    info!("Initializing Prometheus metrics");

    METRICS_REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(UNITS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(OPERATION_DURATION.clone())).ok();
    METRICS_REGISTRY.register(Box::new(INVARIANT_VIOLATIONS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(COMMIT_BATCHES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(BATCHES_OPEN.clone())).ok();
}

/// Times one ledger operation and records its outcome on completion.
pub struct OperationTimer {
    op: &'static str,
    started: Instant,
}

impl OperationTimer {
    pub fn start(op: &'static str) -> Self {
        Self {
            op,
            started: Instant::now(),
        }
    }

    /// Records the outcome and passes the result through.
    pub fn finish<T>(self, result: Result<T>) -> Result<T> {
        let status = match &result {
            Ok(_) => "success",
            Err(e) if e.is_user_error() => "rejected",
            Err(e) if e.is_conflict() => "conflict",
            Err(_) => "error",
        };
        OPERATIONS_TOTAL.with_label_values(&[self.op, status]).inc();
        OPERATION_DURATION
            .with_label_values(&[self.op])
            .observe(self.started.elapsed().as_secs_f64());
        result
    }
}

pub fn record_units(op: &str, units: u64) {
    UNITS_TOTAL.with_label_values(&[op]).inc_by(units);
}

pub fn record_invariant_violation() {
    INVARIANT_VIOLATIONS.inc();
}

pub fn record_commit() {
    COMMIT_BATCHES.inc();
}

pub fn set_batches(count: usize) {
    BATCHES_OPEN.set(count as i64);
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
