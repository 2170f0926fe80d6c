//! Registration records produced by the builder.

use std::fmt;

use thiserror::Error;

use super::handler::{ExecutionMode, HandlerExecutor};
use crate::domain::instrument::InstrumentKey;
use crate::domain::streaming::{Category, SubscriptionInterval};

// =============================================================================
// Ordering
// =============================================================================

/// Execution precedence among handlers matching the same event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum OrderingRole {
    /// Runs before every normal handler, one at a time.
    Before,
    /// Fans out according to its execution mode.
    #[default]
    Normal,
    /// Runs after every normal handler has finished, one at a time.
    After,
}

impl OrderingRole {
    /// Get the role name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Normal => "normal",
            Self::After => "after",
        }
    }
}

impl fmt::Display for OrderingRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Scope
// =============================================================================

/// What a registration wants to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Explicit instruments.
    Instruments(Vec<InstrumentKey>),
    /// Every instrument subscribed on the connection.
    AllInstruments,
    /// Explicit accounts. Order registrations may narrow by instrument.
    Accounts {
        /// Account ids.
        accounts: Vec<String>,
        /// Instruments to surface; empty means all.
        instrument_filter: Vec<InstrumentKey>,
    },
}

impl Scope {
    /// Every declared instrument key, including order filters.
    #[must_use]
    pub fn instrument_keys(&self) -> &[InstrumentKey] {
        match self {
            Self::Instruments(keys)
            | Self::Accounts {
                instrument_filter: keys,
                ..
            } => keys,
            Self::AllInstruments => &[],
        }
    }

    /// Whether this is a wildcard scope.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::AllInstruments)
    }
}

/// Per-registration knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistrationOptions {
    /// Ordering role.
    pub role: OrderingRole,
    /// Candle interval (candles only).
    pub interval: Option<SubscriptionInterval>,
    /// Drain in-flight executions on shutdown instead of cancelling.
    pub wait_close: bool,
    /// Give this blocking handler its own blocking job.
    pub parallel_blocking: bool,
    /// Skip remaining before/after handlers for the event when this one fails.
    pub halt_on_failure: bool,
}

// =============================================================================
// Registration
// =============================================================================

/// A validated handler registration for one category.
#[derive(Debug, Clone)]
pub struct Registration {
    name: String,
    category: Category,
    scope: Scope,
    options: RegistrationOptions,
    executor: HandlerExecutor,
}

impl Registration {
    pub(crate) const fn new(
        name: String,
        category: Category,
        scope: Scope,
        options: RegistrationOptions,
        executor: HandlerExecutor,
    ) -> Self {
        Self {
            name,
            category,
            scope,
            options,
            executor,
        }
    }

    /// Handler name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Target scope.
    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Options.
    #[must_use]
    pub const fn options(&self) -> &RegistrationOptions {
        &self.options
    }

    /// Ordering role.
    #[must_use]
    pub const fn role(&self) -> OrderingRole {
        self.options.role
    }

    /// Execution mode.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.executor.mode()
    }

    /// The handler.
    #[must_use]
    pub const fn executor(&self) -> &HandlerExecutor {
        &self.executor
    }
}

/// The registrations produced by one builder call.
///
/// A single callback may cover several categories (see
/// [`RegistrationBuilder::market_data`](super::RegistrationBuilder::market_data)).
#[derive(Debug, Clone)]
pub struct HandlerAdapter {
    registrations: Vec<Registration>,
}

impl HandlerAdapter {
    pub(crate) const fn new(registrations: Vec<Registration>) -> Self {
        Self { registrations }
    }

    /// Registrations in declaration order.
    #[must_use]
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    /// Consume into registrations.
    #[must_use]
    pub fn into_registrations(self) -> Vec<Registration> {
        self.registrations
    }

    /// Categories covered.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.registrations.iter().map(Registration::category).collect()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Invalid handler declaration. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeclarationError {
    /// Both before and after were requested.
    #[error("handler '{handler}' is marked both before-each and after-each")]
    ConflictingOrdering {
        /// Handler name.
        handler: String,
    },

    /// No target was given where one is required.
    #[error("handler '{handler}' declares no {expected} for {category}")]
    NoIdentifiers {
        /// Handler name.
        handler: String,
        /// Category.
        category: Category,
        /// What was expected (e.g. "accounts").
        expected: &'static str,
    },

    /// More than one identifier style was used.
    #[error("handler '{handler}' mixes identifier styles: {styles}")]
    ConflictingIdentifiers {
        /// Handler name.
        handler: String,
        /// Styles used, comma separated.
        styles: String,
    },

    /// An identifier was empty or whitespace.
    #[error("handler '{handler}' declares an empty {style}")]
    EmptyIdentifier {
        /// Handler name.
        handler: String,
        /// Identifier style.
        style: &'static str,
    },

    /// A candle registration without an interval.
    #[error("handler '{handler}' subscribes to candles without an interval")]
    MissingInterval {
        /// Handler name.
        handler: String,
    },

    /// An interval on a category that has none.
    #[error("handler '{handler}' sets an interval on {category}")]
    UnexpectedInterval {
        /// Handler name.
        handler: String,
        /// Category.
        category: Category,
    },

    /// A scope the category cannot express.
    #[error("handler '{handler}': {reason}")]
    UnsupportedScope {
        /// Handler name.
        handler: String,
        /// Why.
        reason: String,
    },
}

impl DeclarationError {
    /// Name of the offending handler.
    #[must_use]
    pub fn handler(&self) -> &str {
        match self {
            Self::ConflictingOrdering { handler }
            | Self::NoIdentifiers { handler, .. }
            | Self::ConflictingIdentifiers { handler, .. }
            | Self::EmptyIdentifier { handler, .. }
            | Self::MissingInterval { handler }
            | Self::UnexpectedInterval { handler, .. }
            | Self::UnsupportedScope { handler, .. } => handler,
        }
    }
}
