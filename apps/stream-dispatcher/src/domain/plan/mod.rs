//! Dispatch Plan
//!
//! The resolved routing table: (category, canonical identity or account)
//! to the ordered before / normal / after handler lists.
//!
//! # Design
//!
//! The plan is built once from a [`RegistrySnapshot`] and the resolved
//! instrument keys, then shared by `Arc` across every dispatch loop.
//! Nothing in it is mutated after construction, so lookups take no locks.
//!
//! Ordering is scoped to the event by default: a before handler declared
//! for one instrument only precedes normal handlers for events of that
//! instrument. Wildcard handlers match every event of their category.
//! [`OrderingScope::Category`] widens every before and after handler to the
//! whole category.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::domain::instrument::{CanonicalId, InstrumentInfo, InstrumentKey, InstrumentRef};
use crate::domain::registration::{
    ExecutionMode, HandlerExecutor, HandlerId, OrderingRole, RegistrationOptions, RegistrySnapshot,
    Scope,
};
use crate::domain::streaming::{Category, RoutingKey, StreamEvent, SubscriptionInterval};

// =============================================================================
// Errors
// =============================================================================

/// Error building a dispatch plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    /// A declared ticker has no resolution.
    #[error("handler '{handler}' references unresolved instrument {key}")]
    Unresolved {
        /// Handler name.
        handler: String,
        /// The declared key.
        key: String,
    },
}

/// Resolved declared keys, plus the identifier aliases learned from
/// lookups.
///
/// A looked-up instrument is known by both its figi and its uid; the figi
/// is recorded as an alias of the uid so that one instrument maps to a
/// single canonical id however its handlers declared it.
#[derive(Debug, Clone, Default)]
pub struct ResolvedKeys {
    keys: HashMap<InstrumentKey, CanonicalId>,
    aliases: HashMap<CanonicalId, CanonicalId>,
}

impl ResolvedKeys {
    /// Empty resolution table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key resolved to a bare canonical id.
    pub fn insert(&mut self, key: InstrumentKey, canonical: CanonicalId) {
        self.keys.insert(key, canonical);
    }

    /// Record a key resolved by lookup, and alias the instrument's figi to
    /// its uid.
    pub fn insert_instrument(&mut self, key: InstrumentKey, info: &InstrumentInfo) {
        let canonical = info.canonical_id();
        self.aliases
            .insert(CanonicalId::Figi(info.figi.clone()), canonical.clone());
        self.keys.insert(key, canonical);
    }

    /// Canonical id of a resolved key.
    #[must_use]
    pub fn get(&self, key: &InstrumentKey) -> Option<&CanonicalId> {
        self.keys.get(key)
    }

    /// Number of resolved keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn aliases(&self) -> Aliases {
        Aliases(self.aliases.clone())
    }
}

/// Figi to uid aliases of looked-up instruments.
#[derive(Debug, Clone, Default)]
struct Aliases(HashMap<CanonicalId, CanonicalId>);

impl Aliases {
    fn canonicalize(&self, id: CanonicalId) -> CanonicalId {
        self.0.get(&id).cloned().unwrap_or(id)
    }

    fn ids_of(&self, instrument: &InstrumentRef) -> Vec<CanonicalId> {
        let mut ids: Vec<CanonicalId> = instrument
            .canonical_ids()
            .into_iter()
            .map(|id| self.canonicalize(id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Events a before or after handler is ordered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingScope {
    /// Events of the handler's own instruments or accounts.
    #[default]
    Identity,
    /// Every event of the handler's category.
    Category,
}

impl OrderingScope {
    /// Get the scope name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Category => "category",
        }
    }

    /// Parse a scope name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Some(Self::Identity),
            "category" => Some(Self::Category),
            _ => None,
        }
    }
}

// =============================================================================
// Planned Handler
// =============================================================================

/// Resolved target of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every instrument of the category.
    All,
    /// Explicit instruments.
    Instruments(BTreeSet<CanonicalId>),
    /// Explicit accounts, optionally narrowed to instruments.
    Accounts {
        /// Account ids.
        accounts: BTreeSet<String>,
        /// Instrument filter; `None` means every instrument.
        instruments: Option<BTreeSet<CanonicalId>>,
    },
}

/// A handler ready for dispatch.
#[derive(Debug)]
pub struct PlannedHandler {
    id: HandlerId,
    name: String,
    category: Category,
    target: Target,
    options: RegistrationOptions,
    executor: HandlerExecutor,
}

impl PlannedHandler {
    /// Registration order id.
    #[must_use]
    pub const fn id(&self) -> HandlerId {
        self.id
    }

    /// Handler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Resolved target.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Ordering role.
    #[must_use]
    pub const fn role(&self) -> OrderingRole {
        self.options.role
    }

    /// Candle interval.
    #[must_use]
    pub const fn interval(&self) -> Option<SubscriptionInterval> {
        self.options.interval
    }

    /// Options.
    #[must_use]
    pub const fn options(&self) -> &RegistrationOptions {
        &self.options
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

    fn accepts(&self, event: &StreamEvent, aliases: &Aliases) -> bool {
        if let Some(interval) = self.options.interval
            && event.interval() != Some(interval)
        {
            return false;
        }
        match (&self.target, event.routing_key()) {
            (
                Target::Accounts {
                    instruments: Some(filter),
                    ..
                },
                RoutingKey::Account { instrument, .. },
            ) => instrument.is_some_and(|instrument| {
                aliases
                    .ids_of(instrument)
                    .iter()
                    .any(|id| filter.contains(id))
            }),
            _ => true,
        }
    }
}

/// Handlers matching one event, partitioned by role, each in registration order.
#[derive(Debug, Default, Clone)]
pub struct MatchedHandlers {
    /// Before handlers.
    pub before: Vec<Arc<PlannedHandler>>,
    /// Normal handlers.
    pub normal: Vec<Arc<PlannedHandler>>,
    /// After handlers.
    pub after: Vec<Arc<PlannedHandler>>,
}

impl MatchedHandlers {
    /// Total number of matched handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.before.len() + self.normal.len() + self.after.len()
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Category Routes
// =============================================================================

#[derive(Debug, Default)]
struct CategoryRoutes {
    handlers: Vec<Arc<PlannedHandler>>,
    by_instrument: HashMap<CanonicalId, Vec<usize>>,
    by_account: HashMap<String, Vec<usize>>,
    wildcard: Vec<usize>,
    ordered: Vec<usize>,
}

impl CategoryRoutes {
    fn insert(&mut self, handler: PlannedHandler) {
        let index = self.handlers.len();
        if handler.role() != OrderingRole::Normal {
            self.ordered.push(index);
        }
        match &handler.target {
            Target::All => self.wildcard.push(index),
            Target::Instruments(ids) => {
                for id in ids {
                    self.by_instrument.entry(id.clone()).or_default().push(index);
                }
            }
            Target::Accounts { accounts, .. } => {
                for account in accounts {
                    self.by_account.entry(account.clone()).or_default().push(index);
                }
            }
        }
        self.handlers.push(Arc::new(handler));
    }

    fn matching(
        &self,
        event: &StreamEvent,
        scope: OrderingScope,
        aliases: &Aliases,
    ) -> MatchedHandlers {
        let mut indices: Vec<usize> = match event.routing_key() {
            RoutingKey::Instrument(instrument) => {
                let mut indices = self.wildcard.clone();
                for id in aliases.ids_of(instrument) {
                    if let Some(found) = self.by_instrument.get(&id) {
                        indices.extend_from_slice(found);
                    }
                }
                indices
            }
            RoutingKey::Account { account_id, .. } => self
                .by_account
                .get(account_id)
                .cloned()
                .unwrap_or_default(),
        };
        if scope == OrderingScope::Category {
            indices.extend_from_slice(&self.ordered);
        }
        indices.sort_unstable();
        indices.dedup();

        let mut matched = MatchedHandlers::default();
        for handler in indices.into_iter().map(|index| &self.handlers[index]) {
            if !handler.accepts(event, aliases) {
                continue;
            }
            let bucket = match handler.role() {
                OrderingRole::Before => &mut matched.before,
                OrderingRole::Normal => &mut matched.normal,
                OrderingRole::After => &mut matched.after,
            };
            bucket.push(Arc::clone(handler));
        }
        matched
    }
}

// =============================================================================
// Dispatch Plan
// =============================================================================

/// Immutable routing table shared by every dispatch loop.
#[derive(Debug, Default)]
pub struct DispatchPlan {
    routes: BTreeMap<Category, CategoryRoutes>,
    ordering: OrderingScope,
    aliases: Aliases,
}

impl DispatchPlan {
    /// Build the plan from a registry snapshot and resolved ticker keys.
    ///
    /// Figi and instrument-uid keys need no entry in `resolved`. A figi
    /// of a looked-up instrument is replaced by that instrument's uid.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Unresolved`] if a ticker key is missing from
    /// `resolved`.
    pub fn build(snapshot: &RegistrySnapshot, resolved: &ResolvedKeys) -> Result<Self, PlanError> {
        let mut routes: BTreeMap<Category, CategoryRoutes> = BTreeMap::new();
        let aliases = resolved.aliases();

        for registered in snapshot.handlers() {
            let registration = &registered.registration;
            let canonical = |keys: &[InstrumentKey]| -> Result<BTreeSet<CanonicalId>, PlanError> {
                keys.iter()
                    .map(|key| {
                        key.as_canonical()
                            .map(|id| aliases.canonicalize(id))
                            .or_else(|| resolved.get(key).cloned())
                            .ok_or_else(|| PlanError::Unresolved {
                                handler: registration.name().to_string(),
                                key: key.to_string(),
                            })
                    })
                    .collect()
            };

            let target = match registration.scope() {
                Scope::AllInstruments => Target::All,
                Scope::Instruments(keys) => Target::Instruments(canonical(keys)?),
                Scope::Accounts {
                    accounts,
                    instrument_filter,
                } => Target::Accounts {
                    accounts: accounts.iter().cloned().collect(),
                    instruments: if instrument_filter.is_empty() {
                        None
                    } else {
                        Some(canonical(instrument_filter)?)
                    },
                },
            };

            routes
                .entry(registration.category())
                .or_default()
                .insert(PlannedHandler {
                    id: registered.id,
                    name: registration.name().to_string(),
                    category: registration.category(),
                    target,
                    options: *registration.options(),
                    executor: registration.executor().clone(),
                });
        }

        Ok(Self {
            routes,
            ordering: OrderingScope::default(),
            aliases,
        })
    }

    /// Set how far before and after handlers reach.
    #[must_use]
    pub const fn with_ordering_scope(mut self, scope: OrderingScope) -> Self {
        self.ordering = scope;
        self
    }

    /// How far before and after handlers reach.
    #[must_use]
    pub const fn ordering_scope(&self) -> OrderingScope {
        self.ordering
    }

    /// Handlers matching an event.
    #[must_use]
    pub fn matching(&self, event: &StreamEvent) -> MatchedHandlers {
        self.routes
            .get(&event.category())
            .map(|routes| routes.matching(event, self.ordering, &self.aliases))
            .unwrap_or_default()
    }

    /// Categories with at least one handler.
    pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.routes.keys().copied()
    }

    /// Handlers of a category in registration order.
    #[must_use]
    pub fn handlers(&self, category: Category) -> &[Arc<PlannedHandler>] {
        self.routes
            .get(&category)
            .map_or(&[], |routes| routes.handlers.as_slice())
    }

    /// Whether any handler of the category asked to drain on shutdown.
    #[must_use]
    pub fn waits_on_close(&self, category: Category) -> bool {
        self.handlers(category)
            .iter()
            .any(|handler| handler.options().wait_close)
    }

    /// Whether any handler of the category runs after each event.
    #[must_use]
    pub fn has_after_handlers(&self, category: Category) -> bool {
        self.handlers(category)
            .iter()
            .any(|handler| handler.role() == OrderingRole::After)
    }

    /// Total handler count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(|routes| routes.handlers.len()).sum()
    }

    /// Whether the plan has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
