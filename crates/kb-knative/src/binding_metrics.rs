//! Metrics for the broker binding
//!
//! Recorded through the `metrics` facade; the hosting process decides
//! whether and how they are exported.

use metrics::{counter, histogram};
use std::time::Duration;

/// Record the outcome of one invocation: "delivered" or the error kind
pub fn record_event_sent(outcome: &str) {
    counter!(
        "kb_events_sent_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record time spent in the transport for one event
pub fn record_delivery_latency(duration: Duration) {
    histogram!("kb_delivery_duration_seconds").record(duration.as_secs_f64());
}

/// Record a broker lookup that did not yield an address
pub fn record_resolution_failure(reason: &str) {
    counter!(
        "kb_broker_resolution_failures_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}
