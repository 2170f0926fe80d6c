//! Domain Layer - Handler declarations, routing and subscription planning.
//!
//! This layer contains the pure types the dispatch engine is built from:
//! instrument identities, stream events, handler registrations, the
//! resolved dispatch plan and the subscription planner. Nothing here
//! performs I/O.

/// Instrument identifiers and canonical keys.
pub mod instrument;

/// Stream categories, intervals and event payloads.
pub mod streaming;

/// Handler contracts, declarations and the registry.
pub mod registration;

/// Resolved routing table built once at startup.
pub mod plan;

/// Subscription planning per category.
pub mod subscription;
