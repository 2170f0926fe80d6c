//! Handler contracts.
//!
//! A handler is either async (spawned on the runtime, never awaited by the
//! dispatch loop unless an after-barrier is required) or blocking (run on
//! the blocking pool).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::streaming::StreamEvent;

/// Result returned by every handler invocation.
pub type HandlerResult = anyhow::Result<()>;

/// Handler invoked as a spawned future.
#[async_trait]
pub trait AsyncHandler: Send + Sync + 'static {
    /// Handle one event.
    async fn handle(&self, event: Arc<StreamEvent>) -> HandlerResult;
}

/// Handler invoked synchronously on the blocking pool.
pub trait BlockingHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is reported by the execution adapter and does not affect
    /// sibling handlers.
    fn handle_blocking(&self, event: &StreamEvent) -> HandlerResult;
}

// =============================================================================
// Closure Adapters
// =============================================================================

/// Async handler backed by a closure. Created by [`async_fn`].
pub struct AsyncFn<F> {
    f: F,
}

/// Wrap a closure returning a future as an [`AsyncHandler`].
pub const fn async_fn<F, Fut>(f: F) -> AsyncFn<F>
where
    F: Fn(Arc<StreamEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    AsyncFn { f }
}

#[async_trait]
impl<F, Fut> AsyncHandler for AsyncFn<F>
where
    F: Fn(Arc<StreamEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, event: Arc<StreamEvent>) -> HandlerResult {
        (self.f)(event).await
    }
}

/// Blocking handler backed by a closure. Created by [`blocking_fn`].
pub struct BlockingFn<F> {
    f: F,
}

/// Wrap a synchronous closure as a [`BlockingHandler`].
pub const fn blocking_fn<F>(f: F) -> BlockingFn<F>
where
    F: Fn(&StreamEvent) -> HandlerResult + Send + Sync + 'static,
{
    BlockingFn { f }
}

impl<F> BlockingHandler for BlockingFn<F>
where
    F: Fn(&StreamEvent) -> HandlerResult + Send + Sync + 'static,
{
    fn handle_blocking(&self, event: &StreamEvent) -> HandlerResult {
        (self.f)(event)
    }
}

// =============================================================================
// Executor
// =============================================================================

/// How a handler is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Spawned future.
    Async,
    /// Blocking pool.
    Blocking,
}

impl ExecutionMode {
    /// Get the mode name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Async => "async",
            Self::Blocking => "blocking",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type-erased handler together with its execution contract.
#[derive(Clone)]
pub enum HandlerExecutor {
    /// Async handler.
    Async(Arc<dyn AsyncHandler>),
    /// Blocking handler.
    Blocking(Arc<dyn BlockingHandler>),
}

impl HandlerExecutor {
    /// Execution mode of the wrapped handler.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        match self {
            Self::Async(_) => ExecutionMode::Async,
            Self::Blocking(_) => ExecutionMode::Blocking,
        }
    }
}

impl fmt::Debug for HandlerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerExecutor").field(&self.mode()).finish()
    }
}
