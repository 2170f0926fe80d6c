//! Handler registry.
//!
//! Collects registrations from both declaration styles in registration
//! order. No deduplication happens across styles. [`HandlerRegistry::freeze`]
//! consumes the registry, so nothing can be registered once a snapshot
//! exists.

use std::fmt;
use std::sync::Arc;

use super::declaration::{DeclarationError, HandlerAdapter, Registration};
use super::declared::DeclaredHandler;
use super::handler::{AsyncHandler, BlockingHandler};
use crate::domain::streaming::Category;

/// Registration order index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(usize);

impl HandlerId {
    /// Position in registration order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// A registration with its registration-order id.
#[derive(Debug, Clone)]
pub struct RegisteredHandler {
    /// Registration order id.
    pub id: HandlerId,
    /// The registration.
    pub registration: Registration,
}

/// Mutable registry used during startup.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: Vec<RegisteredHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every registration of a builder-produced adapter.
    pub fn register(&mut self, adapter: HandlerAdapter) -> &mut Self {
        for registration in adapter.into_registrations() {
            let id = HandlerId(self.handlers.len());
            tracing::debug!(
                handler = %registration.name(),
                category = %registration.category(),
                role = %registration.role(),
                mode = %registration.mode(),
                %id,
                "Registered handler"
            );
            self.handlers.push(RegisteredHandler { id, registration });
        }
        self
    }

    /// Register a declared async handler.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError`] if the handler's declaration is invalid.
    pub fn declare_async<H>(&mut self, handler: H) -> Result<&mut Self, DeclarationError>
    where
        H: DeclaredHandler + AsyncHandler,
    {
        let name = handler.name();
        let adapter = handler
            .declaration()
            .into_builder()
            .name_or(|| name)
            .create_async_handler(handler)?;
        Ok(self.register(adapter))
    }

    /// Register a declared blocking handler.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError`] if the handler's declaration is invalid.
    pub fn declare_blocking<H>(&mut self, handler: H) -> Result<&mut Self, DeclarationError>
    where
        H: DeclaredHandler + BlockingHandler,
    {
        let name = handler.name();
        let adapter = handler
            .declaration()
            .into_builder()
            .name_or(|| name)
            .create_blocking_handler(handler)?;
        Ok(self.register(adapter))
    }

    /// Number of registrations so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Close the registry and take a read-only snapshot.
    #[must_use]
    pub fn freeze(self) -> RegistrySnapshot {
        tracing::info!(handlers = self.handlers.len(), "Handler registry frozen");
        RegistrySnapshot {
            handlers: self.handlers.into(),
        }
    }
}

/// Read-only view of every registration, in registration order.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    handlers: Arc<[RegisteredHandler]>,
}

impl RegistrySnapshot {
    /// Every registration.
    #[must_use]
    pub fn handlers(&self) -> &[RegisteredHandler] {
        &self.handlers
    }

    /// Registrations of one category.
    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &RegisteredHandler> {
        self.handlers
            .iter()
            .filter(move |handler| handler.registration.category() == category)
    }

    /// Categories with at least one registration.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self
            .handlers
            .iter()
            .map(|handler| handler.registration.category())
            .collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registration::{
        Declaration, HandlerResult, InstrumentSelector, RegistrationBuilder, blocking_fn,
    };
    use crate::domain::streaming::StreamEvent;

    struct SberTrades;

    impl DeclaredHandler for SberTrades {
        fn declaration(&self) -> Declaration {
            Declaration::trade(InstrumentSelector::ticker("SBER"))
        }
    }

    impl BlockingHandler for SberTrades {
        fn handle_blocking(&self, _event: &StreamEvent) -> HandlerResult {
            Ok(())
        }
    }

    struct Confused;

    impl DeclaredHandler for Confused {
        fn declaration(&self) -> Declaration {
            Declaration::all_trades().before_each().after_each()
        }
    }

    impl BlockingHandler for Confused {
        fn handle_blocking(&self, _event: &StreamEvent) -> HandlerResult {
            Ok(())
        }
    }

    #[test]
    fn registry_aggregates_both_styles_in_order() {
        let mut registry = HandlerRegistry::new();
        registry.declare_blocking(SberTrades).unwrap();
        registry.register(
            RegistrationBuilder::trades()
                .named("all-trades")
                .create_blocking_handler(blocking_fn(|_| Ok(())))
                .unwrap(),
        );
        registry.register(
            RegistrationBuilder::market_data()
                .with_tickers(["SBER"])
                .create_blocking_handler(blocking_fn(|_| Ok(())))
                .unwrap(),
        );

        let snapshot = registry.freeze();
        assert_eq!(snapshot.len(), 6);
        assert_eq!(snapshot.handlers()[0].registration.name(), "SberTrades");
        assert_eq!(snapshot.handlers()[1].registration.name(), "all-trades");
        assert_eq!(snapshot.by_category(Category::Trades).count(), 3);
        for (index, handler) in snapshot.handlers().iter().enumerate() {
            assert_eq!(handler.id.index(), index);
        }
        assert_eq!(
            snapshot.categories(),
            vec![
                Category::Trades,
                Category::OrderBooks,
                Category::LastPrices,
                Category::TradingStatuses,
            ]
        );
    }

    #[test]
    fn invalid_declaration_names_the_handler() {
        let mut registry = HandlerRegistry::new();
        let err = registry.declare_blocking(Confused).unwrap_err();
        assert_eq!(err.handler(), "Confused");
        assert!(registry.is_empty());
    }
}
