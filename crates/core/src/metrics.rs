//! Prometheus metrics for fate ticket generation, deletion and drawing.
//!
//! The collectors are process-wide statics; the server registers them via
//! [`all_metrics`] and exposes them on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Batch generation
// =============================================================================

/// Generation runs by outcome.
pub static BATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fate_batches_total", "Total fate batch generation runs"),
        &["result"], // "completed", "invalid_request", "not_found", "no_valid_weight", "store_error"
    )
    .expect("valid metric definition")
});

/// Wall time of a generation run.
pub static BATCH_GENERATION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "fate_batch_generation_duration_seconds",
            "Duration of fate batch generation",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    )
    .expect("valid metric definition")
});

pub static TICKETS_GENERATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fate_tickets_generated_total",
        "Total fate tickets created and activated",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Shuffle
// =============================================================================

/// Arrangements that fell back to a plain uniform shuffle.
pub static SHUFFLE_RECOVERIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fate_shuffle_recoveries_total",
        "Non-adjacent arrangements replaced by a uniform shuffle",
    )
    .expect("valid metric definition")
});

/// Same-vendor neighbours left in activated batches.
pub static SHUFFLE_ADJACENT_REPEATS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fate_shuffle_adjacent_repeats_total",
        "Adjacent same-vendor pairs in activated batches",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Ticket operations
// =============================================================================

pub static TICKETS_DELETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("fate_tickets_deleted_total", "Total fate tickets soft-deleted")
        .expect("valid metric definition")
});

pub static TICKETS_DRAWN: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("fate_tickets_drawn_total", "Total fate tickets drawn")
        .expect("valid metric definition")
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(BATCHES_TOTAL.clone()),
        Box::new(BATCH_GENERATION_DURATION.clone()),
        Box::new(TICKETS_GENERATED.clone()),
        Box::new(SHUFFLE_RECOVERIES.clone()),
        Box::new(SHUFFLE_ADJACENT_REPEATS.clone()),
        Box::new(TICKETS_DELETED.clone()),
        Box::new(TICKETS_DRAWN.clone()),
    ]
}
