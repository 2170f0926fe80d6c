//! Prometheus Metrics Module
//!
//! Exposes dispatch metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Events received and dropped per category
//! - **Handlers**: Invocations and failures by mode and role
//! - **Streams**: Stream state, subscription sizes and reconnects
//! - **Resolution**: Ticker lookups issued, coalesced and failed
//! - **Latency**: Per-event dispatch duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::registration::{ExecutionMode, OrderingRole};
use crate::domain::streaming::{Category, StreamState};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "dispatch_events_received_total",
        "Total events received from category streams"
    );
    describe_counter!(
        "dispatch_events_dropped_total",
        "Total events dropped before dispatch, by reason"
    );

    describe_counter!(
        "dispatch_handler_invocations_total",
        "Total handler invocations by mode and role"
    );
    describe_counter!(
        "dispatch_handler_failures_total",
        "Total handler failures by kind"
    );
    describe_counter!(
        "dispatch_after_barrier_timeouts_total",
        "Total events whose normal handlers outlived the after-barrier timeout"
    );

    describe_gauge!(
        "dispatch_stream_state",
        "Stream state per category (0 closed, 1 connecting, 2 streaming, 3 reconnecting, 4 closing, -1 degraded)"
    );
    describe_gauge!(
        "dispatch_subscriptions",
        "Subscribed instruments or accounts per category"
    );
    describe_counter!(
        "dispatch_reconnects_total",
        "Total resubscription attempts per category"
    );

    describe_counter!(
        "dispatch_resolver_lookups_total",
        "Ticker resolutions by outcome"
    );

    describe_histogram!(
        "dispatch_event_seconds",
        "Time the dispatch loop spends on one event"
    );
}

// =============================================================================
// Labels
// =============================================================================

/// Why an event was not dispatched.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Arrived before the subscription was acknowledged.
    Unacknowledged,
    /// No handler matched.
    Unrouted,
    /// Delivered on the wrong category stream.
    WrongCategory,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Unacknowledged => "unacknowledged",
            Self::Unrouted => "unrouted",
            Self::WrongCategory => "wrong_category",
        }
    }
}

/// How a handler invocation failed.
#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    /// Returned an error.
    Error,
    /// Panicked.
    Panic,
    /// Cancelled on shutdown.
    Cancelled,
}

impl FailureKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Panic => "panic",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of a ticker resolution request.
#[derive(Debug, Clone, Copy)]
pub enum LookupOutcome {
    /// A new lookup was issued.
    Issued,
    /// Joined an existing lookup or reused its result.
    Coalesced,
    /// The lookup failed.
    Failed,
}

impl LookupOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Coalesced => "coalesced",
            Self::Failed => "failed",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an event received on a category stream.
pub fn record_event_received(category: Category) {
    counter!(
        "dispatch_events_received_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record an event that was not dispatched.
pub fn record_event_dropped(category: Category, reason: DropReason) {
    counter!(
        "dispatch_events_dropped_total",
        "category" => category.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a handler invocation.
pub fn record_handler_invocation(category: Category, mode: ExecutionMode, role: OrderingRole) {
    counter!(
        "dispatch_handler_invocations_total",
        "category" => category.as_str(),
        "mode" => mode.as_str(),
        "role" => role.as_str()
    )
    .increment(1);
}

/// Record a handler failure.
pub fn record_handler_failure(category: Category, kind: FailureKind) {
    counter!(
        "dispatch_handler_failures_total",
        "category" => category.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record an after-barrier timeout.
pub fn record_after_barrier_timeout(category: Category) {
    counter!(
        "dispatch_after_barrier_timeouts_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Update the stream state gauge.
pub fn set_stream_state(category: Category, state: StreamState) {
    gauge!(
        "dispatch_stream_state",
        "category" => category.as_str()
    )
    .set(state.as_gauge());
}

/// Update the subscription size gauge.
pub fn set_subscriptions(category: Category, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    gauge!(
        "dispatch_subscriptions",
        "category" => category.as_str()
    )
    .set(count);
}

/// Record a resubscription attempt.
pub fn record_reconnect(category: Category) {
    counter!(
        "dispatch_reconnects_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Record a ticker resolution request.
pub fn record_lookup(outcome: LookupOutcome) {
    counter!(
        "dispatch_resolver_lookups_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record time spent dispatching one event.
pub fn record_event_duration(category: Category, duration: Duration) {
    histogram!(
        "dispatch_event_seconds",
        "category" => category.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_names() {
        assert_eq!(DropReason::Unacknowledged.as_str(), "unacknowledged");
        assert_eq!(DropReason::Unrouted.as_str(), "unrouted");
        assert_eq!(FailureKind::Panic.as_str(), "panic");
        assert_eq!(FailureKind::Cancelled.as_str(), "cancelled");
        assert_eq!(LookupOutcome::Coalesced.as_str(), "coalesced");
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_event_received(Category::Trades);
        record_handler_failure(Category::Orders, FailureKind::Error);
        set_stream_state(Category::Candles, StreamState::Degraded);
        record_event_duration(Category::Trades, Duration::from_millis(3));
    }
}
