//! Programmatic handler registration.
//!
//! ```ignore
//! let adapter = RegistrationBuilder::trades()
//!     .with_tickers(["SBER", "LKOH"])
//!     .run_before_each()
//!     .named("trade-audit")
//!     .create_blocking_handler(blocking_fn(|event| {
//!         tracing::info!(identity = %event.identity(), "trade");
//!         Ok(())
//!     }))?;
//! registry.register(adapter);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use super::declaration::{
    DeclarationError, HandlerAdapter, OrderingRole, Registration, RegistrationOptions, Scope,
};
use super::handler::{AsyncHandler, BlockingHandler, HandlerExecutor};
use crate::domain::instrument::{InstrumentKey, InstrumentType};
use crate::domain::streaming::{Category, SubscriptionInterval};

/// Builder for one or more [`Registration`]s sharing a callback.
///
/// Instrument categories without identifiers subscribe to every instrument
/// on the connection. Account categories require accounts.
#[derive(Debug, Clone)]
#[must_use]
pub struct RegistrationBuilder {
    categories: Vec<Category>,
    name: Option<String>,
    tickers: Vec<String>,
    figis: Vec<String>,
    instrument_uids: Vec<String>,
    accounts: Vec<String>,
    instrument_type: Option<InstrumentType>,
    interval: Option<SubscriptionInterval>,
    before_each: bool,
    after_each: bool,
    before_for: BTreeSet<Category>,
    after_for: BTreeSet<Category>,
    wait_close: bool,
    parallel_blocking: bool,
    halt_on_failure: bool,
}

impl RegistrationBuilder {
    fn for_categories(categories: Vec<Category>) -> Self {
        Self {
            categories,
            name: None,
            tickers: Vec::new(),
            figis: Vec::new(),
            instrument_uids: Vec::new(),
            accounts: Vec::new(),
            instrument_type: None,
            interval: None,
            before_each: false,
            after_each: false,
            before_for: BTreeSet::new(),
            after_for: BTreeSet::new(),
            wait_close: false,
            parallel_blocking: false,
            halt_on_failure: false,
        }
    }

    /// Builder for a single category.
    pub fn new(category: Category) -> Self {
        Self::for_categories(vec![category])
    }

    /// Anonymous trades.
    pub fn trades() -> Self {
        Self::new(Category::Trades)
    }

    /// Candles. Requires [`with_subscription_interval`](Self::with_subscription_interval).
    pub fn candles() -> Self {
        Self::new(Category::Candles)
    }

    /// Order books.
    pub fn order_books() -> Self {
        Self::new(Category::OrderBooks)
    }

    /// Last prices.
    pub fn last_prices() -> Self {
        Self::new(Category::LastPrices)
    }

    /// Trading statuses.
    pub fn trading_statuses() -> Self {
        Self::new(Category::TradingStatuses)
    }

    /// Portfolio updates.
    pub fn portfolios() -> Self {
        Self::new(Category::Portfolios)
    }

    /// Position updates.
    pub fn positions() -> Self {
        Self::new(Category::Positions)
    }

    /// Own order fills.
    pub fn orders() -> Self {
        Self::new(Category::Orders)
    }

    /// Every market-data category with one callback.
    ///
    /// Candles are included only when an interval is set.
    pub fn market_data() -> Self {
        Self::for_categories(Category::market_data().to_vec())
    }

    /// Handler name used in logs and errors.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Target instruments by ticker.
    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tickers.extend(tickers.into_iter().map(Into::into));
        self
    }

    /// Target instruments by figi.
    pub fn with_figis<I, S>(mut self, figis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.figis.extend(figis.into_iter().map(Into::into));
        self
    }

    /// Target instruments by instrument uid.
    pub fn with_instrument_uids<I, S>(mut self, uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instrument_uids.extend(uids.into_iter().map(Into::into));
        self
    }

    /// Target accounts.
    pub fn with_accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accounts.extend(accounts.into_iter().map(Into::into));
        self
    }

    /// Instrument type hint for ticker lookups.
    pub const fn with_instrument_type(mut self, instrument_type: InstrumentType) -> Self {
        self.instrument_type = Some(instrument_type);
        self
    }

    /// Candle interval.
    pub const fn with_subscription_interval(mut self, interval: SubscriptionInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Run before every normal handler of the event.
    pub const fn run_before_each(mut self) -> Self {
        self.before_each = true;
        self
    }

    /// Run after every normal handler of the event has finished.
    pub const fn run_after_each(mut self) -> Self {
        self.after_each = true;
        self
    }

    /// Run before every normal handler, for one category of a multi-category
    /// builder only.
    pub fn run_before_each_for(mut self, category: Category) -> Self {
        self.before_for.insert(category);
        self
    }

    /// Run after every normal handler, for one category of a multi-category
    /// builder only.
    pub fn run_after_each_for(mut self, category: Category) -> Self {
        self.after_for.insert(category);
        self
    }

    /// Drain in-flight executions on shutdown instead of cancelling them.
    pub const fn wait_close(mut self) -> Self {
        self.wait_close = true;
        self
    }

    /// Give this blocking handler its own blocking job per event.
    pub const fn parallel_blocking(mut self) -> Self {
        self.parallel_blocking = true;
        self
    }

    /// Skip the remaining before/after handlers of an event when this one fails.
    pub const fn halt_on_failure(mut self) -> Self {
        self.halt_on_failure = true;
        self
    }

    pub(crate) fn name_or(mut self, default: impl FnOnce() -> String) -> Self {
        if self.name.is_none() {
            self.name = Some(default());
        }
        self
    }

    /// Finish with an async callback.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError`] if the declaration is invalid.
    pub fn create_async_handler<H: AsyncHandler>(
        self,
        handler: H,
    ) -> Result<HandlerAdapter, DeclarationError> {
        self.build(HandlerExecutor::Async(Arc::new(handler)))
    }

    /// Finish with a blocking callback.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError`] if the declaration is invalid.
    pub fn create_blocking_handler<H: BlockingHandler>(
        self,
        handler: H,
    ) -> Result<HandlerAdapter, DeclarationError> {
        self.build(HandlerExecutor::Blocking(Arc::new(handler)))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn default_name(&self) -> String {
        let categories: Vec<&str> = self.categories.iter().map(Category::as_str).collect();
        format!("{}-handler", categories.join("+"))
    }

    fn build(self, executor: HandlerExecutor) -> Result<HandlerAdapter, DeclarationError> {
        let handler = self.name.clone().unwrap_or_else(|| self.default_name());

        if let Some(stray) = self
            .before_for
            .iter()
            .chain(&self.after_for)
            .find(|category| !self.categories.contains(category))
        {
            return Err(DeclarationError::UnsupportedScope {
                handler,
                reason: format!("ordering set for {stray}, which the handler is not registered for"),
            });
        }
        for &category in &self.categories {
            self.role_for(&handler, category)?;
        }

        let keys = self.instrument_keys(&handler)?;
        let categories = self.effective_categories(&handler)?;

        let mut registrations = Vec::with_capacity(categories.len());
        for category in categories {
            let scope = self.scope_for(&handler, category, &keys)?;
            let options = RegistrationOptions {
                role: self.role_for(&handler, category)?,
                interval: if category == Category::Candles {
                    self.interval
                } else {
                    None
                },
                wait_close: self.wait_close,
                parallel_blocking: self.parallel_blocking,
                halt_on_failure: self.halt_on_failure,
            };
            registrations.push(Registration::new(
                handler.clone(),
                category,
                scope,
                options,
                executor.clone(),
            ));
        }

        Ok(HandlerAdapter::new(registrations))
    }

    fn role_for(&self, handler: &str, category: Category) -> Result<OrderingRole, DeclarationError> {
        let before = self.before_each || self.before_for.contains(&category);
        let after = self.after_each || self.after_for.contains(&category);
        match (before, after) {
            (true, true) => Err(DeclarationError::ConflictingOrdering {
                handler: handler.to_string(),
            }),
            (true, false) => Ok(OrderingRole::Before),
            (false, true) => Ok(OrderingRole::After),
            (false, false) => Ok(OrderingRole::Normal),
        }
    }

    /// Categories this builder produces registrations for.
    fn effective_categories(&self, handler: &str) -> Result<Vec<Category>, DeclarationError> {
        if let [category] = self.categories.as_slice() {
            let category = *category;
            match (category, self.interval) {
                (Category::Candles, None) => {
                    return Err(DeclarationError::MissingInterval {
                        handler: handler.to_string(),
                    });
                }
                (Category::Candles, Some(_)) | (_, None) => {}
                (other, Some(_)) => {
                    return Err(DeclarationError::UnexpectedInterval {
                        handler: handler.to_string(),
                        category: other,
                    });
                }
            }
            return Ok(vec![category]);
        }

        Ok(self
            .categories
            .iter()
            .copied()
            .filter(|category| *category != Category::Candles || self.interval.is_some())
            .collect())
    }

    /// Declared instrument keys, enforcing a single identifier style.
    fn instrument_keys(&self, handler: &str) -> Result<Vec<InstrumentKey>, DeclarationError> {
        let styles: Vec<&str> = [
            ("tickers", self.tickers.is_empty()),
            ("figis", self.figis.is_empty()),
            ("instrument uids", self.instrument_uids.is_empty()),
        ]
        .into_iter()
        .filter_map(|(style, empty)| (!empty).then_some(style))
        .collect();

        if styles.len() > 1 {
            return Err(DeclarationError::ConflictingIdentifiers {
                handler: handler.to_string(),
                styles: styles.join(", "),
            });
        }

        let empty = |style: &'static str| DeclarationError::EmptyIdentifier {
            handler: handler.to_string(),
            style,
        };

        let mut keys = Vec::new();
        for ticker in &self.tickers {
            let ticker = ticker.trim();
            if ticker.is_empty() {
                return Err(empty("ticker"));
            }
            keys.push(InstrumentKey::Ticker {
                ticker: ticker.to_string(),
                instrument_type: self.instrument_type,
            });
        }
        for figi in &self.figis {
            let figi = figi.trim();
            if figi.is_empty() {
                return Err(empty("figi"));
            }
            keys.push(InstrumentKey::Figi(figi.to_string()));
        }
        for uid in &self.instrument_uids {
            let uid = uid.trim();
            if uid.is_empty() {
                return Err(empty("instrument uid"));
            }
            keys.push(InstrumentKey::InstrumentUid(uid.to_string()));
        }
        if self.accounts.iter().any(|account| account.trim().is_empty()) {
            return Err(empty("account"));
        }

        dedup_preserving_order(&mut keys);
        Ok(keys)
    }

    fn scope_for(
        &self,
        handler: &str,
        category: Category,
        keys: &[InstrumentKey],
    ) -> Result<Scope, DeclarationError> {
        if category.is_instrument_scoped() {
            if !self.accounts.is_empty() {
                return Err(DeclarationError::UnsupportedScope {
                    handler: handler.to_string(),
                    reason: format!("{category} is not scoped by account"),
                });
            }
            return Ok(if keys.is_empty() {
                Scope::AllInstruments
            } else {
                Scope::Instruments(keys.to_vec())
            });
        }

        if self.accounts.is_empty() {
            return Err(DeclarationError::NoIdentifiers {
                handler: handler.to_string(),
                category,
                expected: "accounts",
            });
        }
        if category != Category::Orders && !keys.is_empty() {
            return Err(DeclarationError::UnsupportedScope {
                handler: handler.to_string(),
                reason: format!("{category} does not accept an instrument filter"),
            });
        }

        let mut accounts: Vec<String> = self
            .accounts
            .iter()
            .map(|account| account.trim().to_string())
            .collect();
        dedup_preserving_order(&mut accounts);

        Ok(Scope::Accounts {
            accounts,
            instrument_filter: keys.to_vec(),
        })
    }
}

fn dedup_preserving_order<T: PartialEq + Clone>(items: &mut Vec<T>) {
    let mut seen: Vec<T> = Vec::with_capacity(items.len());
    items.retain(|item| {
        if seen.contains(item) {
            false
        } else {
            seen.push(item.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::registration::handler::{async_fn, blocking_fn};

    fn noop() -> impl BlockingHandler {
        blocking_fn(|_| Ok(()))
    }

    #[test]
    fn tickers_produce_instrument_scope() {
        let adapter = RegistrationBuilder::trades()
            .with_tickers(["SBER", "LKOH", "SBER"])
            .with_instrument_type(InstrumentType::Share)
            .create_blocking_handler(noop())
            .unwrap();

        let registration = &adapter.registrations()[0];
        assert_eq!(registration.category(), Category::Trades);
        assert_eq!(registration.role(), OrderingRole::Normal);
        assert_eq!(registration.name(), "trades-handler");
        match registration.scope() {
            Scope::Instruments(keys) => {
                assert_eq!(keys.len(), 2);
                assert_eq!(
                    keys[0],
                    InstrumentKey::Ticker {
                        ticker: "SBER".to_string(),
                        instrument_type: Some(InstrumentType::Share),
                    }
                );
            }
            other => panic!("unexpected scope {other:?}"),
        }
    }

    #[test]
    fn no_identifiers_means_all_instruments() {
        let adapter = RegistrationBuilder::last_prices()
            .run_after_each()
            .create_blocking_handler(noop())
            .unwrap();
        let registration = &adapter.registrations()[0];
        assert!(registration.scope().is_wildcard());
        assert_eq!(registration.role(), OrderingRole::After);
    }

    #[test]
    fn before_and_after_conflict() {
        let err = RegistrationBuilder::trades()
            .named("confused")
            .run_before_each()
            .run_after_each()
            .create_blocking_handler(noop())
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::ConflictingOrdering {
                handler: "confused".to_string()
            }
        );
        assert_eq!(err.handler(), "confused");
    }

    #[test]
    fn mixed_identifier_styles_are_rejected() {
        let err = RegistrationBuilder::order_books()
            .with_tickers(["SBER"])
            .with_figis(["BBG004730N88"])
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(err, DeclarationError::ConflictingIdentifiers { .. }));
    }

    #[test_case(RegistrationBuilder::trades().with_tickers([" "]) ; "blank ticker")]
    #[test_case(RegistrationBuilder::trades().with_figis([""]) ; "empty figi")]
    #[test_case(RegistrationBuilder::trades().with_instrument_uids([""]) ; "empty uid")]
    #[test_case(RegistrationBuilder::portfolios().with_accounts([""]) ; "empty account")]
    fn empty_identifiers_are_rejected(builder: RegistrationBuilder) {
        let err = builder.create_blocking_handler(noop()).unwrap_err();
        assert!(matches!(err, DeclarationError::EmptyIdentifier { .. }));
    }

    #[test_case(Category::Portfolios)]
    #[test_case(Category::Positions)]
    #[test_case(Category::Orders)]
    fn account_categories_require_accounts(category: Category) {
        let err = RegistrationBuilder::new(category)
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(
            err,
            DeclarationError::NoIdentifiers { expected: "accounts", .. }
        ));
    }

    #[test]
    fn candles_require_an_interval() {
        let err = RegistrationBuilder::candles()
            .with_tickers(["SiH4"])
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(err, DeclarationError::MissingInterval { .. }));
    }

    #[test]
    fn interval_on_trades_is_rejected() {
        let err = RegistrationBuilder::trades()
            .with_subscription_interval(SubscriptionInterval::OneMinute)
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(
            err,
            DeclarationError::UnexpectedInterval {
                category: Category::Trades,
                ..
            }
        ));
    }

    #[test]
    fn accounts_on_instrument_category_are_rejected() {
        let err = RegistrationBuilder::trades()
            .with_accounts(["acc"])
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(err, DeclarationError::UnsupportedScope { .. }));
    }

    #[test]
    fn instrument_filter_only_on_orders() {
        let err = RegistrationBuilder::positions()
            .with_accounts(["acc"])
            .with_tickers(["SBER"])
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(err, DeclarationError::UnsupportedScope { .. }));

        let adapter = RegistrationBuilder::orders()
            .with_accounts(["acc", "acc2"])
            .with_tickers(["SBER"])
            .create_blocking_handler(noop())
            .unwrap();
        match adapter.registrations()[0].scope() {
            Scope::Accounts {
                accounts,
                instrument_filter,
            } => {
                assert_eq!(accounts, &["acc".to_string(), "acc2".to_string()]);
                assert_eq!(instrument_filter, &[InstrumentKey::ticker("SBER")]);
            }
            other => panic!("unexpected scope {other:?}"),
        }
    }

    #[test]
    fn market_data_skips_candles_without_interval() {
        let adapter = RegistrationBuilder::market_data()
            .with_tickers(["CRH4", "BRG4"])
            .create_blocking_handler(noop())
            .unwrap();
        assert_eq!(
            adapter.categories(),
            vec![
                Category::Trades,
                Category::OrderBooks,
                Category::LastPrices,
                Category::TradingStatuses,
            ]
        );
    }

    #[test]
    fn market_data_with_interval_covers_candles() {
        let adapter = RegistrationBuilder::market_data()
            .with_tickers(["CRH4"])
            .with_subscription_interval(SubscriptionInterval::OneMinute)
            .create_blocking_handler(noop())
            .unwrap();
        assert_eq!(adapter.registrations().len(), 5);
        for registration in adapter.registrations() {
            let expected = (registration.category() == Category::Candles)
                .then_some(SubscriptionInterval::OneMinute);
            assert_eq!(registration.options().interval, expected);
        }
    }

    #[test]
    fn market_data_orders_each_category_separately() {
        let adapter = RegistrationBuilder::market_data()
            .with_tickers(["CRH4", "BRG4", "SBER", "LKOH"])
            .with_subscription_interval(SubscriptionInterval::OneMinute)
            .run_after_each_for(Category::Trades)
            .run_before_each_for(Category::Candles)
            .run_after_each_for(Category::LastPrices)
            .run_before_each_for(Category::OrderBooks)
            .create_async_handler(async_fn(|_event| async { anyhow::Ok(()) }))
            .unwrap();

        let roles: Vec<(Category, OrderingRole)> = adapter
            .registrations()
            .iter()
            .map(|registration| (registration.category(), registration.role()))
            .collect();
        assert_eq!(
            roles,
            vec![
                (Category::Trades, OrderingRole::After),
                (Category::Candles, OrderingRole::Before),
                (Category::OrderBooks, OrderingRole::Before),
                (Category::LastPrices, OrderingRole::After),
                (Category::TradingStatuses, OrderingRole::Normal),
            ]
        );
    }

    #[test_case(
        RegistrationBuilder::market_data()
            .run_before_each_for(Category::Trades)
            .run_after_each_for(Category::Trades) ;
        "same category both ways"
    )]
    #[test_case(
        RegistrationBuilder::market_data()
            .run_after_each()
            .run_before_each_for(Category::LastPrices) ;
        "override against a builder-wide role"
    )]
    fn per_category_ordering_conflicts_are_rejected(builder: RegistrationBuilder) {
        let err = builder
            .named("torn")
            .create_blocking_handler(noop())
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::ConflictingOrdering {
                handler: "torn".to_string()
            }
        );
    }

    #[test]
    fn ordering_for_an_unregistered_category_is_rejected() {
        let err = RegistrationBuilder::trades()
            .run_before_each_for(Category::Candles)
            .create_blocking_handler(noop())
            .unwrap_err();
        assert!(matches!(err, DeclarationError::UnsupportedScope { .. }));
    }

    #[test]
    fn flags_are_carried_into_options() {
        let adapter = RegistrationBuilder::candles()
            .with_figis(["BBG004730N88"])
            .with_subscription_interval(SubscriptionInterval::TwoMinutes)
            .wait_close()
            .parallel_blocking()
            .run_before_each()
            .halt_on_failure()
            .create_blocking_handler(noop())
            .unwrap();
        let options = adapter.registrations()[0].options();
        assert!(options.wait_close);
        assert!(options.parallel_blocking);
        assert!(options.halt_on_failure);
        assert_eq!(options.role, OrderingRole::Before);
        assert_eq!(options.interval, Some(SubscriptionInterval::TwoMinutes));
    }
}
