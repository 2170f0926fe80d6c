//! Dispatch Engine
//!
//! Wires startup and runtime together:
//!
//! 1. [`DispatchEngine::prepare`] resolves every declared ticker (one lookup
//!    per distinct query), builds the [`DispatchPlan`] and the
//!    [`SubscriptionPlan`]. Any failure here aborts startup.
//! 2. [`DispatchEngine::start`] spawns one [`CategoryDispatcher`] per
//!    subscription group and returns a [`RunningEngine`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{CategoryDispatcher, DispatcherConfig};
use super::reconnect::ReconnectConfig;
use super::resolver::{InstrumentKeyResolver, ResolveError};
use super::status::StatusBoard;
use crate::application::ports::{InstrumentLookupPort, StreamTransportPort};
use crate::domain::instrument::{InstrumentKey, InstrumentType};
use crate::domain::plan::{DispatchPlan, PlanError, ResolvedKeys};
use crate::domain::registration::{DeclarationError, RegistrySnapshot};
use crate::domain::streaming::{Category, StreamState};
use crate::domain::subscription::{SubscriptionPlan, SubscriptionPlanner};
use crate::infrastructure::config::{DispatchSettings, EngineConfig};

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A registration is malformed.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// A declared ticker could not be resolved.
    #[error("handler '{handler}': cannot resolve ticker '{ticker}': {source}")]
    Resolution {
        /// First handler declaring the ticker.
        handler: String,
        /// The ticker.
        ticker: String,
        /// Underlying failure.
        source: ResolveError,
    },

    /// The routing table could not be built.
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Output of [`DispatchEngine::prepare`].
#[derive(Debug)]
pub struct PreparedDispatch {
    /// Routing table shared by every dispatch loop.
    pub plan: Arc<DispatchPlan>,
    /// Subscriptions to open.
    pub subscriptions: SubscriptionPlan,
}

/// Startup orchestration.
pub struct DispatchEngine {
    resolver: InstrumentKeyResolver,
    transport: Arc<dyn StreamTransportPort>,
    dispatch: DispatchSettings,
    reconnect: ReconnectConfig,
}

impl DispatchEngine {
    /// Create an engine over the given ports.
    #[must_use]
    pub fn new(
        lookup: Arc<dyn InstrumentLookupPort>,
        transport: Arc<dyn StreamTransportPort>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            resolver: InstrumentKeyResolver::new(lookup),
            transport,
            dispatch: config.dispatch.clone(),
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
        }
    }

    /// Replace the backoff parameters.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The resolver, for inspecting its cache.
    #[must_use]
    pub const fn resolver(&self) -> &InstrumentKeyResolver {
        &self.resolver
    }

    /// Resolve declared tickers and plan subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if a ticker cannot be resolved or the plan
    /// references an unresolved key.
    pub async fn prepare(&self, snapshot: &RegistrySnapshot) -> Result<PreparedDispatch, StartupError> {
        if snapshot.is_empty() {
            warn!("No handlers registered, nothing will be subscribed");
        }

        let pending = pending_lookups(snapshot);
        debug!(lookups = pending.len(), "Resolving declared tickers");

        let results = join_all(
            pending
                .iter()
                .map(|lookup| self.resolver.resolve_ticker(&lookup.ticker, lookup.hint)),
        )
        .await;

        let mut resolved = ResolvedKeys::new();
        for (lookup, result) in pending.into_iter().zip(results) {
            let PendingLookup {
                ticker,
                hint,
                handler,
            } = lookup;
            match result {
                Ok(info) => {
                    let key = InstrumentKey::Ticker {
                        ticker,
                        instrument_type: hint,
                    };
                    debug!(key = %key, instrument_uid = %info.instrument_uid, "Ticker resolved");
                    resolved.insert_instrument(key, &info);
                }
                Err(source) => {
                    error!(handler = %handler, ticker = %ticker, error = %source, "Startup aborted");
                    return Err(StartupError::Resolution {
                        handler,
                        ticker,
                        source,
                    });
                }
            }
        }

        let plan = DispatchPlan::build(snapshot, &resolved)?
            .with_ordering_scope(self.dispatch.ordering_scope);
        let subscriptions = SubscriptionPlanner::plan(&plan);

        for (category, reason) in &subscriptions.idle {
            debug!(category = %category, reason = ?reason, "Category stays idle");
        }

        Ok(PreparedDispatch {
            plan: Arc::new(plan),
            subscriptions,
        })
    }

    /// Spawn one dispatch loop per planned subscription.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(&self, prepared: PreparedDispatch, shutdown: CancellationToken) -> RunningEngine {
        let mut board = StatusBoard::new();
        let mut tasks = Vec::with_capacity(prepared.subscriptions.groups.len());

        for (category, group) in prepared.subscriptions.groups {
            let status = board.track(category);
            let dispatcher = CategoryDispatcher::new(
                group,
                Arc::clone(&prepared.plan),
                Arc::clone(&self.transport),
                self.dispatcher_config(category, &prepared.plan),
                status,
                shutdown.clone(),
            );
            tasks.push((category, tokio::spawn(dispatcher.run())));
        }

        info!(categories = tasks.len(), "Dispatch loops started");

        RunningEngine {
            board,
            tasks,
            shutdown,
        }
    }

    fn dispatcher_config(&self, category: Category, plan: &DispatchPlan) -> DispatcherConfig {
        DispatcherConfig {
            reconnect: self.reconnect.clone(),
            wait_close: plan.waits_on_close(category)
                || self.dispatch.wait_close_categories.contains(&category),
            shutdown_grace: self.dispatch.shutdown_grace,
            after_barrier_timeout: self.dispatch.after_barrier_timeout,
        }
    }
}

/// A ticker query and the first handler declaring it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingLookup {
    ticker: String,
    hint: Option<InstrumentType>,
    handler: String,
}

/// Distinct ticker queries in registration order.
fn pending_lookups(snapshot: &RegistrySnapshot) -> Vec<PendingLookup> {
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    for registered in snapshot.handlers() {
        let registration = &registered.registration;
        for key in registration.scope().instrument_keys() {
            let InstrumentKey::Ticker {
                ticker,
                instrument_type,
            } = key
            else {
                continue;
            };
            if seen.insert(key.clone()) {
                pending.push(PendingLookup {
                    ticker: ticker.clone(),
                    hint: *instrument_type,
                    handler: registration.name().to_string(),
                });
            }
        }
    }
    pending
}

/// Handle to the running dispatch loops.
pub struct RunningEngine {
    board: StatusBoard,
    tasks: Vec<(Category, JoinHandle<StreamState>)>,
    shutdown: CancellationToken,
}

impl RunningEngine {
    /// Per-category status.
    #[must_use]
    pub const fn status(&self) -> &StatusBoard {
        &self.board
    }

    /// Token that stops every loop.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every loop and wait for them to close.
    pub async fn shutdown(self) -> BTreeMap<Category, StreamState> {
        info!("Shutting down dispatch loops");
        self.shutdown.cancel();
        self.join().await
    }

    /// Wait for every loop to stop on its own.
    pub async fn join(self) -> BTreeMap<Category, StreamState> {
        let mut terminal = BTreeMap::new();
        for (category, task) in self.tasks {
            let state = match task.await {
                Ok(state) => state,
                Err(e) => {
                    error!(category = %category, error = %e, "Dispatch loop task failed");
                    StreamState::Degraded
                }
            };
            terminal.insert(category, state);
        }
        terminal
    }
}
