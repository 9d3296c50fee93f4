//! Prometheus metrics for the head broadcaster.
//!
//! Counters, gauges and a histogram covering head intake and per-subscriber
//! delivery. [`BroadcasterMetrics`] owns a dedicated [`Registry`] that an
//! embedding service can encode into the Prometheus text exposition format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge,
    Opts, Registry, TextEncoder,
};

/// Central collection of all broadcaster metrics.
pub struct BroadcasterMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Heads handed to `broadcast_new_longest_chain`, stale ones included.
    pub heads_received: IntCounter,
    /// Heads that replaced the latest head and were fanned out.
    pub heads_broadcast: IntCounter,
    /// Heads ignored because their number did not advance the chain.
    pub stale_heads: IntCounter,
    /// Subscriber callbacks that ran to completion.
    pub deliveries: IntCounter,
    /// Times a subscriber's backlog reached the warning threshold.
    pub backlog_warnings: IntCounter,
    /// Subscriber callbacks abandoned after the callback timeout.
    pub delivery_timeouts: IntCounter,
    /// Subscriber callbacks that panicked.
    pub subscriber_panics: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Currently registered subscribers.
    pub subscribers: IntGauge,
    /// Number of the latest broadcast head.
    pub latest_head_number: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Time spent inside a single subscriber callback, in milliseconds.
    pub delivery_duration_ms: Histogram,
}

impl BroadcasterMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        // Counters
        let heads_received = register_int_counter_with_registry!(
            Opts::new(
                "headcast_heads_received_total",
                "Total heads submitted for broadcast"
            ),
            registry
        )
        .expect("failed to register heads_received counter");

        let heads_broadcast = register_int_counter_with_registry!(
            Opts::new(
                "headcast_heads_broadcast_total",
                "Total heads fanned out to subscribers"
            ),
            registry
        )
        .expect("failed to register heads_broadcast counter");

        let stale_heads = register_int_counter_with_registry!(
            Opts::new(
                "headcast_stale_heads_total",
                "Total heads ignored for not advancing the latest head"
            ),
            registry
        )
        .expect("failed to register stale_heads counter");

        let deliveries = register_int_counter_with_registry!(
            Opts::new(
                "headcast_deliveries_total",
                "Total completed subscriber callbacks"
            ),
            registry
        )
        .expect("failed to register deliveries counter");

        let backlog_warnings = register_int_counter_with_registry!(
            Opts::new(
                "headcast_subscriber_backlog_warnings_total",
                "Total times a subscriber backlog reached the warning threshold"
            ),
            registry
        )
        .expect("failed to register backlog_warnings counter");

        let delivery_timeouts = register_int_counter_with_registry!(
            Opts::new(
                "headcast_delivery_timeouts_total",
                "Total subscriber callbacks abandoned after timing out"
            ),
            registry
        )
        .expect("failed to register delivery_timeouts counter");

        let subscriber_panics = register_int_counter_with_registry!(
            Opts::new(
                "headcast_subscriber_panics_total",
                "Total subscriber callbacks that panicked"
            ),
            registry
        )
        .expect("failed to register subscriber_panics counter");

        // Gauges
        let subscribers = register_int_gauge_with_registry!(
            Opts::new("headcast_subscribers", "Current number of subscribers"),
            registry
        )
        .expect("failed to register subscribers gauge");

        let latest_head_number = register_int_gauge_with_registry!(
            Opts::new(
                "headcast_latest_head_number",
                "Block number of the latest broadcast head"
            ),
            registry
        )
        .expect("failed to register latest_head_number gauge");

        // Histogram – exponential buckets covering 0.1 ms → ~1.6 s.
        let delivery_duration_ms = register_histogram_with_registry!(
            HistogramOpts::new(
                "headcast_delivery_duration_ms",
                "Subscriber callback duration in milliseconds"
            )
            .buckets(
                prometheus::exponential_buckets(0.1, 2.0, 15)
                    .expect("static bucket layout is valid")
            ),
            registry
        )
        .expect("failed to register delivery_duration_ms histogram");

        Self {
            registry,
            heads_received,
            heads_broadcast,
            stale_heads,
            deliveries,
            backlog_warnings,
            delivery_timeouts,
            subscriber_panics,
            subscribers,
            latest_head_number,
            delivery_duration_ms,
        }
    }

    /// Encode every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for BroadcasterMetrics {
    fn default() -> Self {
        Self::new()
    }
}
