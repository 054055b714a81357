// Prometheus metrics definitions for the pitchside backend.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Matches currently sitting in DISPUTED.
    pub static ref OPEN_DISPUTES: IntGauge =
        IntGauge::new("pitchside_open_disputes", "Matches currently disputed").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Join attempts, by result (placed, idempotent, slot_taken, no_preferred_slot, ...).
    pub static ref SLOT_JOINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pitchside_slot_joins_total", "Join attempts by result"),
        &["result"],
    )
    .unwrap();

    /// Players removed from a roster.
    pub static ref SLOT_LEAVES_TOTAL: IntCounter = IntCounter::new(
        "pitchside_slot_leaves_total",
        "Players removed from a roster",
    )
    .unwrap();

    /// Match reports accepted.
    pub static ref REPORTS_SUBMITTED_TOTAL: IntCounter = IntCounter::new(
        "pitchside_reports_submitted_total",
        "Match reports accepted",
    )
    .unwrap();

    /// Reports accepted while the reporting team was in the warning band.
    pub static ref REPORTS_FLAGGED_TOTAL: IntCounter = IntCounter::new(
        "pitchside_reports_flagged_total",
        "Reports accepted with a reputation warning",
    )
    .unwrap();

    /// Matches that reached VERIFIED, by path (agreement, resolution, expiry).
    pub static ref MATCHES_VERIFIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pitchside_matches_verified_total", "Matches verified"),
        &["path"],
    )
    .unwrap();

    /// Disagreeing report pairs.
    pub static ref DISPUTES_OPENED_TOTAL: IntCounter = IntCounter::new(
        "pitchside_disputes_opened_total",
        "Disputes opened",
    )
    .unwrap();

    /// Disputes closed, by resolution (agree_a, agree_b, invalid).
    pub static ref DISPUTES_RESOLVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pitchside_disputes_resolved_total", "Disputes resolved"),
        &["resolution"],
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("pitchside_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Applied rating deltas.
    pub static ref RATING_DELTA: Histogram = Histogram::with_opts(
        HistogramOpts::new("pitchside_rating_delta", "Applied rating deltas")
            .buckets(vec![-60.0, -40.0, -20.0, -10.0, -5.0, 0.0, 5.0, 10.0, 20.0, 40.0, 60.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "pitchside_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

static REGISTER: Once = Once::new();

/// Register all metrics with the custom registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(OPEN_DISPUTES.clone()),
            Box::new(SLOT_JOINS_TOTAL.clone()),
            Box::new(SLOT_LEAVES_TOTAL.clone()),
            Box::new(REPORTS_SUBMITTED_TOTAL.clone()),
            Box::new(REPORTS_FLAGGED_TOTAL.clone()),
            Box::new(MATCHES_VERIFIED_TOTAL.clone()),
            Box::new(DISPUTES_OPENED_TOTAL.clone()),
            Box::new(DISPUTES_RESOLVED_TOTAL.clone()),
            Box::new(API_REQUESTS_TOTAL.clone()),
            Box::new(RATING_DELTA.clone()),
            Box::new(API_REQUEST_DURATION_SECONDS.clone()),
        ];

        for c in collectors {
            if let Err(e) = REGISTRY.register(c) {
                tracing::error!("Failed to register metric: {e}");
            }
        }
    });
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Normalize a URL path for metric labels: replace numeric path segments with `:id`
/// to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
