//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the dispatch services (resolution, execution,
//! per-category dispatch loops, the engine that wires them) and the port
//! interfaces they drive.

/// Port interfaces for the instrument lookup service and stream transport.
pub mod ports;

/// Resolver, execution adapter, dispatcher and engine.
pub mod services;
