//! Execution Adapter
//!
//! Runs handlers under their execution contract and isolates failures.
//!
//! - Async handlers are spawned on the runtime and never awaited by the
//!   dispatch loop, except at the after-barrier.
//! - Blocking handlers run on the blocking pool. The sequential ones of an
//!   event share one blocking job and run in registration order; a handler
//!   that opted into parallel blocking gets a job of its own.
//!
//! Every invocation is tracked by the category's [`TaskTracker`] so that
//! shutdown can drain it, and observes the category's handler
//! [`CancellationToken`] so that shutdown can cancel it. Errors and panics
//! stop at this boundary: they are logged, counted and never reach sibling
//! handlers or the dispatch loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};
use uuid::Uuid;

use super::status::CategoryStatus;
use crate::domain::plan::PlannedHandler;
use crate::domain::registration::{BlockingHandler, HandlerExecutor, HandlerResult};
use crate::domain::streaming::{Category, StreamEvent};
use crate::infrastructure::metrics::{self, FailureKind};

// =============================================================================
// Types
// =============================================================================

/// The event being dispatched, with its correlation id.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// The event.
    pub event: Arc<StreamEvent>,
    /// Correlation id for logs.
    pub event_id: Uuid,
    /// Routing identity for logs.
    pub identity: Arc<str>,
}

impl EventContext {
    /// Wrap an event with a fresh correlation id.
    #[must_use]
    pub fn new(event: StreamEvent) -> Self {
        let identity = event.identity().into();
        Self {
            event: Arc::new(event),
            event_id: Uuid::new_v4(),
            identity,
        }
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// Returned `Ok`.
    Completed,
    /// Returned an error.
    Failed(String),
    /// Panicked.
    Panicked(String),
    /// Cancelled before completion.
    Cancelled,
}

impl InvocationOutcome {
    /// Whether the handler completed successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn from_result(result: HandlerResult) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(e) => Self::Failed(format!("{e:#}")),
        }
    }

    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::Panicked(message)
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Per-category handler executor.
#[derive(Debug, Clone)]
pub struct ExecutionAdapter {
    category: Category,
    tracker: TaskTracker,
    cancel: CancellationToken,
    status: Arc<CategoryStatus>,
}

impl ExecutionAdapter {
    /// Create an adapter for a category.
    #[must_use]
    pub const fn new(
        category: Category,
        tracker: TaskTracker,
        cancel: CancellationToken,
        status: Arc<CategoryStatus>,
    ) -> Self {
        Self {
            category,
            tracker,
            cancel,
            status,
        }
    }

    /// Tracker of in-flight invocations.
    #[must_use]
    pub const fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Token cancelling in-flight invocations.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one handler to completion. Used for before and after handlers.
    ///
    /// The invocation runs as a tracked job that reports its own outcome,
    /// so a wait-close drain covers it even when the caller stops awaiting.
    /// Returns [`InvocationOutcome::Cancelled`] as soon as the cancel token
    /// fires; a blocking handler already running finishes on its own thread.
    pub async fn run_inline(
        &self,
        handler: &Arc<PlannedHandler>,
        ctx: &EventContext,
    ) -> InvocationOutcome {
        metrics::record_handler_invocation(self.category, handler.mode(), handler.role());

        let adapter = self.clone();
        let handler = Arc::clone(handler);
        let ctx = ctx.clone();
        let job = match handler.executor().clone() {
            HandlerExecutor::Async(_) => self.tracker.spawn(async move {
                let outcome = adapter.invoke_async(&handler, &ctx).await;
                adapter.report(&handler, &ctx, &outcome);
                outcome
            }),
            HandlerExecutor::Blocking(callback) => self.tracker.spawn_blocking(move || {
                let outcome = invoke_blocking(callback.as_ref(), &ctx.event);
                adapter.report(&handler, &ctx, &outcome);
                outcome
            }),
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => InvocationOutcome::Cancelled,
            joined = job => joined.unwrap_or(InvocationOutcome::Cancelled),
        }
    }

    /// Start every normal handler of an event without awaiting them.
    ///
    /// Returns one join handle per spawned job.
    pub fn spawn_normal(
        &self,
        handlers: &[Arc<PlannedHandler>],
        ctx: &EventContext,
    ) -> Vec<JoinHandle<()>> {
        let mut jobs = Vec::new();
        let mut sequential: Vec<Arc<PlannedHandler>> = Vec::new();

        for handler in handlers {
            metrics::record_handler_invocation(self.category, handler.mode(), handler.role());
            match handler.executor() {
                HandlerExecutor::Async(_) => jobs.push(self.spawn_async(handler, ctx)),
                HandlerExecutor::Blocking(_) if handler.options().parallel_blocking => {
                    jobs.push(self.spawn_blocking_group(vec![Arc::clone(handler)], ctx));
                }
                HandlerExecutor::Blocking(_) => sequential.push(Arc::clone(handler)),
            }
        }

        if !sequential.is_empty() {
            jobs.push(self.spawn_blocking_group(sequential, ctx));
        }
        jobs
    }

    fn spawn_async(&self, handler: &Arc<PlannedHandler>, ctx: &EventContext) -> JoinHandle<()> {
        let adapter = self.clone();
        let handler = Arc::clone(handler);
        let ctx = ctx.clone();

        self.tracker.spawn(async move {
            let outcome = adapter.invoke_async(&handler, &ctx).await;
            adapter.report(&handler, &ctx, &outcome);
        })
    }

    /// Await an async handler unless the cancel token fires first.
    async fn invoke_async(&self, handler: &PlannedHandler, ctx: &EventContext) -> InvocationOutcome {
        let HandlerExecutor::Async(callback) = handler.executor() else {
            return InvocationOutcome::Cancelled;
        };
        let invocation = AssertUnwindSafe(callback.handle(Arc::clone(&ctx.event))).catch_unwind();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => InvocationOutcome::Cancelled,
            result = invocation => match result {
                Ok(result) => InvocationOutcome::from_result(result),
                Err(payload) => InvocationOutcome::from_panic(payload.as_ref()),
            },
        }
    }

    /// Run blocking handlers one after another inside one blocking job.
    fn spawn_blocking_group(
        &self,
        handlers: Vec<Arc<PlannedHandler>>,
        ctx: &EventContext,
    ) -> JoinHandle<()> {
        let adapter = self.clone();
        let ctx = ctx.clone();

        self.tracker.spawn_blocking(move || {
            for handler in &handlers {
                let HandlerExecutor::Blocking(callback) = handler.executor() else {
                    continue;
                };
                let outcome = if adapter.cancel.is_cancelled() {
                    InvocationOutcome::Cancelled
                } else {
                    invoke_blocking(callback.as_ref(), &ctx.event)
                };
                adapter.report(handler, &ctx, &outcome);
            }
        })
    }

    fn report(&self, handler: &PlannedHandler, ctx: &EventContext, outcome: &InvocationOutcome) {
        let kind = match outcome {
            InvocationOutcome::Completed => return,
            InvocationOutcome::Failed(message) => {
                warn!(
                    category = %self.category,
                    identity = %ctx.identity,
                    event_id = %ctx.event_id,
                    handler = %handler.name(),
                    mode = %handler.mode(),
                    role = %handler.role(),
                    error = %message,
                    "Handler failed"
                );
                FailureKind::Error
            }
            InvocationOutcome::Panicked(message) => {
                error!(
                    category = %self.category,
                    identity = %ctx.identity,
                    event_id = %ctx.event_id,
                    handler = %handler.name(),
                    mode = %handler.mode(),
                    role = %handler.role(),
                    panic = %message,
                    "Handler panicked"
                );
                FailureKind::Panic
            }
            InvocationOutcome::Cancelled => {
                warn!(
                    category = %self.category,
                    identity = %ctx.identity,
                    event_id = %ctx.event_id,
                    handler = %handler.name(),
                    "Handler cancelled on shutdown"
                );
                FailureKind::Cancelled
            }
        };
        metrics::record_handler_failure(self.category, kind);
        self.status.increment_failures();
    }
}

fn invoke_blocking(callback: &dyn BlockingHandler, event: &StreamEvent) -> InvocationOutcome {
    match catch_unwind(AssertUnwindSafe(|| callback.handle_blocking(event))) {
        Ok(result) => InvocationOutcome::from_result(result),
        Err(payload) => InvocationOutcome::from_panic(payload.as_ref()),
    }
}

// =============================================================================
// Tests
// =============================================================================
