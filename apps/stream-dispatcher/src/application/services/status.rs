//! Category Stream Status
//!
//! Per-category counters and state shared between a dispatch loop and the
//! health endpoint. Counters are atomics; state and timestamps sit behind
//! `parking_lot` locks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::streaming::{Category, StreamState};
use crate::infrastructure::metrics;

/// Live status of one category stream.
#[derive(Debug)]
pub struct CategoryStatus {
    category: Category,
    state: RwLock<StreamState>,
    last_acknowledged_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    subscriptions: AtomicUsize,
    reconnect_attempts: AtomicU32,
    events_received: AtomicU64,
    events_dispatched: AtomicU64,
    handler_failures: AtomicU64,
}

impl CategoryStatus {
    /// Create a status in the connecting state.
    #[must_use]
    pub const fn new(category: Category) -> Self {
        Self {
            category,
            state: RwLock::new(StreamState::Connecting),
            last_acknowledged_at: RwLock::new(None),
            last_error: RwLock::new(None),
            subscriptions: AtomicUsize::new(0),
            reconnect_attempts: AtomicU32::new(0),
            events_received: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Transition to a new state.
    pub fn set_state(&self, state: StreamState) {
        *self.state.write() = state;
        if state == StreamState::Streaming {
            *self.last_acknowledged_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
        metrics::set_stream_state(self.category, state);
    }

    /// Record the most recent transport error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Record a resubscription attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the subscription size.
    pub fn set_subscriptions(&self, count: usize) {
        self.subscriptions.store(count, Ordering::Relaxed);
        metrics::set_subscriptions(self.category, count);
    }

    /// Count an event read from the stream.
    pub fn increment_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an event handed to at least one handler.
    pub fn increment_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a handler failure.
    pub fn increment_failures(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Events read from the stream.
    #[must_use]
    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    /// Events dispatched.
    #[must_use]
    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched.load(Ordering::Relaxed)
    }

    /// Handler failures.
    #[must_use]
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Attempts since the last acknowledgment.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> CategorySnapshot {
        CategorySnapshot {
            category: self.category,
            state: self.state(),
            last_acknowledged_at: *self.last_acknowledged_at.read(),
            last_error: self.last_error.read().clone(),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts(),
            events_received: self.events_received(),
            events_dispatched: self.events_dispatched(),
            handler_failures: self.handler_failures(),
        }
    }
}

/// Serializable copy of a [`CategoryStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct CategorySnapshot {
    /// Category.
    pub category: Category,
    /// State.
    pub state: StreamState,
    /// Last acknowledgment.
    pub last_acknowledged_at: Option<DateTime<Utc>>,
    /// Last transport error.
    pub last_error: Option<String>,
    /// Subscription size.
    pub subscriptions: usize,
    /// Attempts since the last acknowledgment.
    pub reconnect_attempts: u32,
    /// Events read.
    pub events_received: u64,
    /// Events dispatched.
    pub events_dispatched: u64,
    /// Handler failures.
    pub handler_failures: u64,
}

/// Statuses of every running category.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    statuses: BTreeMap<Category, Arc<CategoryStatus>>,
}

impl StatusBoard {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a category and return its status handle.
    pub fn track(&mut self, category: Category) -> Arc<CategoryStatus> {
        Arc::clone(
            self.statuses
                .entry(category)
                .or_insert_with(|| Arc::new(CategoryStatus::new(category))),
        )
    }

    /// Status of one category.
    #[must_use]
    pub fn get(&self, category: Category) -> Option<Arc<CategoryStatus>> {
        self.statuses.get(&category).cloned()
    }

    /// Snapshots of every category.
    #[must_use]
    pub fn snapshots(&self) -> Vec<CategorySnapshot> {
        self.statuses.values().map(|status| status.snapshot()).collect()
    }

    /// Whether every tracked category has stopped.
    #[must_use]
    pub fn all_terminal(&self) -> bool {
        self.statuses.values().all(|status| status.state().is_terminal())
    }

    /// Whether no category is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_clears_error_and_attempts() {
        let status = CategoryStatus::new(Category::Trades);
        status.set_state(StreamState::Reconnecting);
        status.set_error("reset by peer".to_string());
        status.increment_reconnect_attempts();
        assert_eq!(status.reconnect_attempts(), 1);

        status.set_state(StreamState::Streaming);
        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, StreamState::Streaming);
        assert!(snapshot.last_error.is_none());
        assert!(snapshot.last_acknowledged_at.is_some());
        assert_eq!(snapshot.reconnect_attempts, 0);
    }

    #[test]
    fn board_tracks_each_category_once() {
        let mut board = StatusBoard::new();
        let first = board.track(Category::Candles);
        let second = board.track(Category::Candles);
        first.increment_received();
        assert_eq!(second.events_received(), 1);
        assert_eq!(board.snapshots().len(), 1);
        assert!(!board.all_terminal());

        first.set_state(StreamState::Closed);
        assert!(board.all_terminal());
    }
}
