//! Subscription Planning
//!
//! Derives, per category, the minimal subscription that covers every
//! handler in the [`DispatchPlan`].
//!
//! # Design
//!
//! - Instrument categories subscribe to the union of their handlers'
//!   canonical ids. Wildcard handlers expand to every id referenced by any
//!   handler on the same connection group, so an "all trades" handler also
//!   sees instruments only named by a candle handler.
//! - Candles keep one id set per interval; each interval is a separate
//!   subscription inside the candle request.
//! - Account categories subscribe to the union of account ids. Order
//!   instrument filters never narrow the subscription.
//! - Categories without handlers, or whose wildcards have nothing to
//!   expand to, open nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::instrument::CanonicalId;
use crate::domain::plan::{DispatchPlan, Target};
use crate::domain::streaming::{Category, ConnectionGroup, SubscriptionInterval};

// =============================================================================
// Types
// =============================================================================

/// Subscription parameters for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionParams {
    /// Instrument ids.
    Instruments(BTreeSet<CanonicalId>),
    /// Instrument ids per candle interval.
    Candles(BTreeMap<SubscriptionInterval, BTreeSet<CanonicalId>>),
    /// Account ids.
    Accounts(BTreeSet<String>),
}

impl SubscriptionParams {
    /// Whether nothing would be subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Instruments(ids) => ids.is_empty(),
            Self::Candles(by_interval) => by_interval.values().all(BTreeSet::is_empty),
            Self::Accounts(accounts) => accounts.is_empty(),
        }
    }

    /// Number of (instrument, interval) or account entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Instruments(ids) => ids.len(),
            Self::Candles(by_interval) => by_interval.values().map(BTreeSet::len).sum(),
            Self::Accounts(accounts) => accounts.len(),
        }
    }
}

/// The subscription request for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGroup {
    /// Category.
    pub category: Category,
    /// Parameters.
    pub params: SubscriptionParams,
}

impl SubscriptionGroup {
    /// Instrument ids, for instrument categories other than candles.
    #[must_use]
    pub const fn instruments(&self) -> Option<&BTreeSet<CanonicalId>> {
        match &self.params {
            SubscriptionParams::Instruments(ids) => Some(ids),
            _ => None,
        }
    }

    /// Candle ids per interval.
    #[must_use]
    pub const fn candles(&self) -> Option<&BTreeMap<SubscriptionInterval, BTreeSet<CanonicalId>>> {
        match &self.params {
            SubscriptionParams::Candles(by_interval) => Some(by_interval),
            _ => None,
        }
    }

    /// Account ids.
    #[must_use]
    pub const fn accounts(&self) -> Option<&BTreeSet<String>> {
        match &self.params {
            SubscriptionParams::Accounts(accounts) => Some(accounts),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            SubscriptionParams::Instruments(ids) => {
                write!(f, "{} instruments={}", self.category, ids.len())
            }
            SubscriptionParams::Candles(by_interval) => {
                write!(f, "{} ", self.category)?;
                let parts: Vec<String> = by_interval
                    .iter()
                    .map(|(interval, ids)| format!("{interval}={}", ids.len()))
                    .collect();
                f.write_str(&parts.join(","))
            }
            SubscriptionParams::Accounts(accounts) => {
                write!(f, "{} accounts={}", self.category, accounts.len())
            }
        }
    }
}

/// Why a category opens no subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// No handler is registered for it.
    NoHandlers,
    /// Only wildcard handlers, and no instrument is named anywhere on the connection.
    NothingToExpand,
}

/// Result of subscription planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// Subscriptions to open, one per category.
    pub groups: BTreeMap<Category, SubscriptionGroup>,
    /// Categories that open nothing.
    pub idle: BTreeMap<Category, IdleReason>,
}

impl SubscriptionPlan {
    /// The group for a category, if one is opened.
    #[must_use]
    pub fn group(&self, category: Category) -> Option<&SubscriptionGroup> {
        self.groups.get(&category)
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Computes subscriptions from a dispatch plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubscriptionPlanner;

impl SubscriptionPlanner {
    /// Plan every category.
    #[must_use]
    pub fn plan(plan: &DispatchPlan) -> SubscriptionPlan {
        let expansions = Self::explicit_by_connection(plan);
        let mut result = SubscriptionPlan::default();

        for &category in Category::all() {
            if plan.handlers(category).is_empty() {
                result.idle.insert(category, IdleReason::NoHandlers);
                continue;
            }

            let expansion = expansions
                .get(&category.connection_group())
                .cloned()
                .unwrap_or_default();
            let params = Self::plan_category(plan, category, &expansion);

            if params.is_empty() {
                tracing::warn!(
                    category = %category,
                    "Only wildcard handlers and no instrument named on the connection; not subscribing"
                );
                result.idle.insert(category, IdleReason::NothingToExpand);
                continue;
            }

            let group = SubscriptionGroup { category, params };
            tracing::info!(subscription = %group, "Planned subscription");
            result.groups.insert(category, group);
        }

        result
    }

    /// Every explicitly named instrument per connection group.
    fn explicit_by_connection(plan: &DispatchPlan) -> BTreeMap<ConnectionGroup, BTreeSet<CanonicalId>> {
        let mut expansions: BTreeMap<ConnectionGroup, BTreeSet<CanonicalId>> = BTreeMap::new();
        for category in plan.categories() {
            for handler in plan.handlers(category) {
                if let Target::Instruments(ids) = handler.target() {
                    expansions
                        .entry(category.connection_group())
                        .or_default()
                        .extend(ids.iter().cloned());
                }
            }
        }
        expansions
    }

    fn plan_category(
        plan: &DispatchPlan,
        category: Category,
        expansion: &BTreeSet<CanonicalId>,
    ) -> SubscriptionParams {
        let handlers = plan.handlers(category);

        if category.is_account_scoped() {
            let accounts = handlers
                .iter()
                .filter_map(|handler| match handler.target() {
                    Target::Accounts { accounts, .. } => Some(accounts.iter().cloned()),
                    _ => None,
                })
                .flatten()
                .collect();
            return SubscriptionParams::Accounts(accounts);
        }

        let ids_for = |target: &Target| -> BTreeSet<CanonicalId> {
            match target {
                Target::All => expansion.clone(),
                Target::Instruments(ids) => ids.clone(),
                Target::Accounts { .. } => BTreeSet::new(),
            }
        };

        if category == Category::Candles {
            let mut by_interval: BTreeMap<SubscriptionInterval, BTreeSet<CanonicalId>> =
                BTreeMap::new();
            for handler in handlers {
                let Some(interval) = handler.interval() else {
                    continue;
                };
                let ids = ids_for(handler.target());
                if !ids.is_empty() {
                    by_interval.entry(interval).or_default().extend(ids);
                }
            }
            return SubscriptionParams::Candles(by_interval);
        }

        SubscriptionParams::Instruments(
            handlers
                .iter()
                .flat_map(|handler| ids_for(handler.target()))
                .collect(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
