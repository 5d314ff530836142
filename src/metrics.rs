// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for kubepipe.
//!
//! All metrics carry the namespace prefix `kubepipe_` and are registered in
//! [`METRICS_REGISTRY`]. kubepipe does not serve them itself; an embedding process
//! exposes [`gather_metrics`] on whatever endpoint it runs.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Outcomes and durations of watch reconciliations
//! - **Write Metrics** - Cluster writes performed by the output plugins
//! - **Processor Metrics** - Per-part operations performed by the processor
//!
//! # Example
//!
//! ```rust,no_run
//! use kubepipe::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("Deployment", std::time::Duration::from_millis(20));
//! ```

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all kubepipe metrics
const METRICS_NAMESPACE: &str = "kubepipe";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by kind and status
///
/// Labels:
/// - `kind`: Kind of the watched object (e.g., `Deployment`)
/// - `status`: Outcome (`success`, `error`, `deleted`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by kind and status",
    );
    let counter = CounterVec::new(opts, &["kind", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds, including the wait for the pipeline outcome
///
/// Labels:
/// - `kind`: Kind of the watched object
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by kind",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeues scheduled by the watch mechanism
///
/// Labels:
/// - `kind`: Kind of the watched object
/// - `reason`: `requested` (pipeline asked for it) or `error` (backoff after failure)
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by kind and reason",
    );
    let counter = CounterVec::new(opts, &["kind", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Write Metrics
// ============================================================================

/// Total number of cluster writes performed by the output plugins
///
/// Labels:
/// - `operation`: `create`, `update`, `update_status`, `delete`
/// - `status`: `success` or `error`
pub static WRITES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_writes_total"),
        "Total number of cluster writes by operation and status",
    );
    let counter = CounterVec::new(opts, &["operation", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Processor Metrics
// ============================================================================

/// Total number of part operations performed by the processor
///
/// Labels:
/// - `operator`: `get`, `create`, `update`, `delete`
/// - `status`: `success` or `error`
pub static PROCESSOR_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_processor_operations_total"),
        "Total number of processor part operations by operator and status",
    );
    let counter = CounterVec::new(opts, &["operator", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

fn status_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Record a reconciliation whose message was committed
pub fn record_reconciliation_success(kind: &str, duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&[kind, "success"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation that published a deleted-object marker
pub fn record_reconciliation_deleted(kind: &str, duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&[kind, "deleted"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(kind: &str, duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&[kind, "error"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record a requeue
///
/// # Arguments
/// * `kind` - Kind of the watched object
/// * `reason` - `requested` or `error`
pub fn record_requeue(kind: &str, reason: &str) {
    REQUEUE_TOTAL.with_label_values(&[kind, reason]).inc();
}

/// Record a cluster write made by an output plugin
pub fn record_write(operation: &str, success: bool) {
    WRITES_TOTAL
        .with_label_values(&[operation, status_label(success)])
        .inc();
}

/// Record one processor part operation
pub fn record_processor_operation(operator: &str, success: bool) {
    PROCESSOR_OPERATIONS_TOTAL
        .with_label_values(&[operator, status_label(success)])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
