#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Stream Dispatcher - Handler Registration & Ordered Event Fan-out
//!
//! Collects market-data and account handlers declared in two styles,
//! resolves their instrument tickers once at startup, opens the minimal set
//! of per-category stream subscriptions and dispatches every incoming event
//! to the handlers that asked for it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types with no I/O
//!   - `instrument`: Declared and canonical instrument keys
//!   - `streaming`: Categories, intervals, event payloads
//!   - `registration`: Handler contracts, declarations, registry
//!   - `plan`: Resolved routing table
//!   - `subscription`: Per-category subscription planning
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Instrument lookup and stream transport interfaces
//!   - `services`: Resolver, execution adapter, dispatch loops, engine
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `memory`: In-process transport and instrument catalog
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!  declarations ──► HandlerRegistry ──► resolver ──► DispatchPlan ──► SubscriptionPlanner
//!                                                         │                    │
//!                                                         ▼                    ▼
//!  transport ── events ──► CategoryDispatcher (one per category) ──► before → normal → after
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Declarations, routing and planning types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{
    CanonicalId, InstrumentInfo, InstrumentKey, InstrumentRef, InstrumentType,
};
pub use domain::plan::{
    DispatchPlan, MatchedHandlers, OrderingScope, PlanError, PlannedHandler, Target,
};
pub use domain::registration::{
    AsyncHandler, BlockingHandler, Declaration, DeclarationError, DeclaredHandler, ExecutionMode,
    HandlerAdapter, HandlerRegistry, HandlerResult, InstrumentSelector, OrderingRole,
    RegistrationBuilder, RegistrySnapshot, async_fn, blocking_fn,
};
pub use domain::streaming::{Category, StreamEvent, StreamState, SubscriptionInterval};
pub use domain::subscription::{
    SubscriptionGroup, SubscriptionParams, SubscriptionPlan, SubscriptionPlanner,
};

// Ports and services
pub use application::ports::{
    InstrumentLookupPort, LookupError, StreamTransportPort, TransportError, TransportMessage,
};
pub use application::services::{
    DispatchEngine, PreparedDispatch, ReconnectConfig, ResolveError, RunningEngine, StartupError,
    StatusBoard,
};

// Infrastructure
pub use infrastructure::config::{ConfigError, EngineConfig};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::memory::{InMemoryTransport, StaticInstrumentLookup};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
