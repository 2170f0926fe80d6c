//! Category Dispatcher
//!
//! One dispatch loop per category. The loop owns the category's stream,
//! consumes events strictly in transport order and fans each one out to
//! the handlers the [`DispatchPlan`] selects.
//!
//! # State machine
//!
//! ```text
//! Connecting ──ack──► Streaming ──error/disconnect/end──► Reconnecting ──backoff──► Connecting
//!      │                  │                                     │
//!      └──────────────────┴──────────── shutdown ───────────────┴──► Closing ──► Closed
//!
//! Reconnecting ──budget exhausted──► Degraded
//! ```
//!
//! Events read before a subscription is acknowledged are dropped, so
//! delivery is at most once per connection epoch. Shutdown interrupts the
//! event being dispatched: handlers it already started are drained or
//! cancelled with the rest, and its remaining before/after handlers are
//! skipped.
//!
//! # Per-event dispatch
//!
//! 1. Before handlers, one at a time, awaited.
//! 2. Normal handlers, fanned out by the execution adapter.
//! 3. When after handlers matched: wait for the normal handlers (bounded by
//!    the after-barrier timeout), then run the after handlers one at a time.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use super::executor::{EventContext, ExecutionAdapter};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::status::CategoryStatus;
use crate::application::ports::{StreamTransportPort, TransportError, TransportMessage};
use crate::domain::plan::{DispatchPlan, PlannedHandler};
use crate::domain::streaming::{Category, StreamEvent, StreamState};
use crate::domain::subscription::SubscriptionGroup;
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Per-category dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Resubscription backoff.
    pub reconnect: ReconnectConfig,
    /// Drain in-flight handlers on shutdown instead of cancelling them.
    pub wait_close: bool,
    /// Upper bound on the drain.
    pub shutdown_grace: Duration,
    /// Upper bound on waiting for normal handlers before after handlers run.
    pub after_barrier_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            wait_close: false,
            shutdown_grace: Duration::from_secs(30),
            after_barrier_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a streaming epoch ended.
#[derive(Debug, Error)]
pub enum StreamFailure {
    /// The transport reported an error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The venue closed the stream.
    #[error("venue disconnected: {reason}")]
    Disconnected {
        /// Reason given by the venue.
        reason: String,
    },

    /// The stream ended without a disconnect notice.
    #[error("stream ended unexpectedly")]
    Ended,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Dispatch loop for one category.
pub struct CategoryDispatcher {
    category: Category,
    group: SubscriptionGroup,
    plan: Arc<DispatchPlan>,
    transport: Arc<dyn StreamTransportPort>,
    config: DispatcherConfig,
    status: Arc<CategoryStatus>,
    shutdown: CancellationToken,
    executor: ExecutionAdapter,
}

impl CategoryDispatcher {
    /// Create a dispatcher for one subscription group.
    ///
    /// Handler cancellation follows `shutdown` immediately unless
    /// `config.wait_close` is set, in which case it fires only once the
    /// drain grace period has elapsed.
    #[must_use]
    pub fn new(
        group: SubscriptionGroup,
        plan: Arc<DispatchPlan>,
        transport: Arc<dyn StreamTransportPort>,
        config: DispatcherConfig,
        status: Arc<CategoryStatus>,
        shutdown: CancellationToken,
    ) -> Self {
        let category = group.category;
        let handlers_cancel = if config.wait_close {
            CancellationToken::new()
        } else {
            shutdown.child_token()
        };
        let executor = ExecutionAdapter::new(
            category,
            TaskTracker::new(),
            handlers_cancel,
            Arc::clone(&status),
        );
        Self {
            category,
            group,
            plan,
            transport,
            config,
            status,
            shutdown,
            executor,
        }
    }

    /// Run until shutdown or until the retry budget is exhausted.
    ///
    /// Returns the terminal state: [`StreamState::Closed`] or
    /// [`StreamState::Degraded`].
    pub async fn run(self) -> StreamState {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());
        self.status.set_subscriptions(self.group.params.len());

        let terminal = loop {
            if self.shutdown.is_cancelled() {
                break StreamState::Closed;
            }

            self.status.set_state(StreamState::Connecting);
            match self.connect_and_stream(&mut policy).await {
                Ok(()) => break StreamState::Closed,
                Err(failure) => {
                    warn!(category = %self.category, error = %failure, "Category stream lost");
                    self.status.set_error(failure.to_string());

                    let Some(delay) = policy.next_delay() else {
                        error!(
                            category = %self.category,
                            attempts = policy.attempt_count(),
                            "Retry budget exhausted, category degraded"
                        );
                        break StreamState::Degraded;
                    };

                    self.status.set_state(StreamState::Reconnecting);
                    self.status.increment_reconnect_attempts();
                    metrics::record_reconnect(self.category);
                    info!(
                        category = %self.category,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Resubscribing"
                    );

                    tokio::select! {
                        () = self.shutdown.cancelled() => break StreamState::Closed,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        self.close(terminal).await;
        terminal
    }

    /// One connection epoch: subscribe, wait for the acknowledgment, dispatch.
    ///
    /// Returns `Ok` only on shutdown.
    async fn connect_and_stream(&self, policy: &mut ReconnectPolicy) -> Result<(), StreamFailure> {
        info!(category = %self.category, subscription = %self.group, "Subscribing");

        let mut stream = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Ok(()),
            opened = self.transport.open(&self.group) => opened?,
        };
        let mut acknowledged = false;

        loop {
            let message = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(()),
                message = stream.next() => message,
            };

            match message {
                Some(Ok(TransportMessage::Acknowledged { subscribed })) => {
                    if !acknowledged {
                        acknowledged = true;
                        policy.reset();
                        self.status.set_state(StreamState::Streaming);
                        info!(category = %self.category, subscribed, "Subscription acknowledged");
                    }
                }
                Some(Ok(TransportMessage::Event(event))) => {
                    if acknowledged {
                        tokio::select! {
                            biased;
                            () = self.shutdown.cancelled() => return Ok(()),
                            () = self.dispatch(event) => {}
                        }
                    } else {
                        debug!(
                            category = %self.category,
                            identity = %event.identity(),
                            "Dropping event received before acknowledgment"
                        );
                        metrics::record_event_dropped(self.category, DropReason::Unacknowledged);
                    }
                }
                Some(Ok(TransportMessage::Disconnected { reason })) => {
                    return Err(StreamFailure::Disconnected { reason });
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(StreamFailure::Ended),
            }
        }
    }

    async fn dispatch(&self, event: StreamEvent) {
        let started = Instant::now();
        self.status.increment_received();
        metrics::record_event_received(self.category);

        if event.category() != self.category {
            warn!(
                category = %self.category,
                received = %event.category(),
                "Event delivered on the wrong category stream"
            );
            metrics::record_event_dropped(self.category, DropReason::WrongCategory);
            return;
        }

        let matched = self.plan.matching(&event);
        if matched.is_empty() {
            trace!(category = %self.category, identity = %event.identity(), "No handler matched");
            metrics::record_event_dropped(self.category, DropReason::Unrouted);
            return;
        }

        let ctx = EventContext::new(event);
        self.status.increment_dispatched();
        trace!(
            category = %self.category,
            identity = %ctx.identity,
            event_id = %ctx.event_id,
            before = matched.before.len(),
            normal = matched.normal.len(),
            after = matched.after.len(),
            "Dispatching event"
        );

        if self.run_in_order(&matched.before, &ctx).await.is_break() {
            metrics::record_event_duration(self.category, started.elapsed());
            return;
        }

        let jobs = self.executor.spawn_normal(&matched.normal, &ctx);

        if !matched.after.is_empty() {
            self.await_barrier(jobs, &ctx).await;
            let _ = self.run_in_order(&matched.after, &ctx).await;
        }

        metrics::record_event_duration(self.category, started.elapsed());
    }

    /// Run handlers one at a time; break if a halting handler fails.
    async fn run_in_order(
        &self,
        handlers: &[Arc<PlannedHandler>],
        ctx: &EventContext,
    ) -> ControlFlow<()> {
        for handler in handlers {
            let outcome = self.executor.run_inline(handler, ctx).await;
            if !outcome.is_success() && handler.options().halt_on_failure {
                warn!(
                    category = %self.category,
                    identity = %ctx.identity,
                    event_id = %ctx.event_id,
                    handler = %handler.name(),
                    "Halting handler failed, skipping the rest of the event"
                );
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn await_barrier(&self, jobs: Vec<JoinHandle<()>>, ctx: &EventContext) {
        if jobs.is_empty() {
            return;
        }
        if tokio::time::timeout(self.config.after_barrier_timeout, join_all(jobs))
            .await
            .is_err()
        {
            warn!(
                category = %self.category,
                identity = %ctx.identity,
                event_id = %ctx.event_id,
                timeout_ms = self.config.after_barrier_timeout.as_millis(),
                "Normal handlers still running at the after-barrier, running after handlers anyway"
            );
            metrics::record_after_barrier_timeout(self.category);
        }
    }

    async fn close(&self, terminal: StreamState) {
        let tracker = self.executor.tracker();
        tracker.close();

        if terminal == StreamState::Degraded {
            self.status.set_state(StreamState::Degraded);
            return;
        }

        self.status.set_state(StreamState::Closing);
        if let Err(e) = self.transport.unsubscribe(&self.group).await {
            warn!(category = %self.category, error = %e, "Unsubscribe failed");
        }

        if self.config.wait_close {
            info!(
                category = %self.category,
                in_flight = tracker.len(),
                grace_secs = self.config.shutdown_grace.as_secs(),
                "Draining in-flight handlers"
            );
            if tokio::time::timeout(self.config.shutdown_grace, tracker.wait())
                .await
                .is_err()
            {
                warn!(
                    category = %self.category,
                    remaining = tracker.len(),
                    "Drain grace period elapsed, cancelling remaining handlers"
                );
                self.executor.cancel_token().cancel();
            }
        } else {
            self.executor.cancel_token().cancel();
        }

        self.status.set_state(StreamState::Closed);
        info!(category = %self.category, "Category stream closed");
    }
}
