//! Metric names and instruments for the request lifecycle

use std::{sync::OnceLock, time::Instant};

use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

pub const REQUEST_COUNT: &str = "relay.request.count";
pub const REQUEST_DURATION: &str = "relay.request.duration";
pub const SETTLEMENT_COUNT: &str = "relay.settlement.count";
pub const CHANNEL_RETRY_COUNT: &str = "relay.channel.retry.count";
pub const RECONCILE_COUNT: &str = "relay.reconcile.count";

/// Instruments shared by the pipeline and reconciler
pub struct Instruments {
    pub request_count: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub settlement_count: Counter<u64>,
    pub channel_retry_count: Counter<u64>,
    pub reconcile_count: Counter<u64>,
}

/// Lazily created instruments bound to the global meter provider
///
/// Call after [`crate::init`] so the exporting provider is installed.
pub fn instruments() -> &'static Instruments {
    static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("relay");

        Instruments {
            request_count: meter
                .u64_counter(REQUEST_COUNT)
                .with_description("Requests reaching a terminal stage")
                .build(),
            request_duration: meter
                .f64_histogram(REQUEST_DURATION)
                .with_unit("s")
                .with_description("Time from admission to terminal stage")
                .build(),
            settlement_count: meter
                .u64_counter(SETTLEMENT_COUNT)
                .with_description("Ledger settlements by result")
                .build(),
            channel_retry_count: meter
                .u64_counter(CHANNEL_RETRY_COUNT)
                .with_description("Channel retries after upstream failures")
                .build(),
            reconcile_count: meter
                .u64_counter(RECONCILE_COUNT)
                .with_description("Asynchronous jobs converged by the reconciler")
                .build(),
        }
    })
}

/// Record a duration measurement on a histogram
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[KeyValue]) {
    histogram.record(start.elapsed().as_secs_f64(), attributes);
}
