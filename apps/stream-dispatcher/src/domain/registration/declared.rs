//! Declarative handler registration.
//!
//! A handler type implements [`DeclaredHandler`] and returns the
//! [`Declaration`] describing what it listens to, alongside its
//! [`AsyncHandler`](super::AsyncHandler) or
//! [`BlockingHandler`](super::BlockingHandler) implementation.
//! Declarations are sugar over [`RegistrationBuilder`].

use super::builder::RegistrationBuilder;
use crate::domain::instrument::InstrumentType;
use crate::domain::streaming::SubscriptionInterval;

/// A single instrument named by ticker, figi or instrument uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSelector {
    id: SelectorId,
    instrument_type: Option<InstrumentType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorId {
    Ticker(String),
    Figi(String),
    Uid(String),
}

impl InstrumentSelector {
    /// Select by ticker.
    #[must_use]
    pub fn ticker(ticker: impl Into<String>) -> Self {
        Self {
            id: SelectorId::Ticker(ticker.into()),
            instrument_type: None,
        }
    }

    /// Select by figi.
    #[must_use]
    pub fn figi(figi: impl Into<String>) -> Self {
        Self {
            id: SelectorId::Figi(figi.into()),
            instrument_type: None,
        }
    }

    /// Select by instrument uid.
    #[must_use]
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            id: SelectorId::Uid(uid.into()),
            instrument_type: None,
        }
    }

    /// Add an instrument type hint for the ticker lookup.
    #[must_use]
    pub const fn with_type(mut self, instrument_type: InstrumentType) -> Self {
        self.instrument_type = Some(instrument_type);
        self
    }

    fn apply(self, builder: RegistrationBuilder) -> RegistrationBuilder {
        let builder = match self.instrument_type {
            Some(instrument_type) => builder.with_instrument_type(instrument_type),
            None => builder,
        };
        match self.id {
            SelectorId::Ticker(ticker) => builder.with_tickers([ticker]),
            SelectorId::Figi(figi) => builder.with_figis([figi]),
            SelectorId::Uid(uid) => builder.with_instrument_uids([uid]),
        }
    }
}

impl From<&str> for InstrumentSelector {
    fn from(ticker: &str) -> Self {
        Self::ticker(ticker)
    }
}

/// What a declared handler listens to.
#[derive(Debug, Clone)]
#[must_use]
pub struct Declaration {
    builder: RegistrationBuilder,
}

impl Declaration {
    const fn from_builder(builder: RegistrationBuilder) -> Self {
        Self { builder }
    }

    fn single(builder: RegistrationBuilder, selector: impl Into<InstrumentSelector>) -> Self {
        Self::from_builder(selector.into().apply(builder))
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// Trades of one instrument.
    pub fn trade(selector: impl Into<InstrumentSelector>) -> Self {
        Self::single(RegistrationBuilder::trades(), selector)
    }

    /// Trades of every subscribed instrument.
    pub fn all_trades() -> Self {
        Self::from_builder(RegistrationBuilder::trades())
    }

    /// Candles of one instrument.
    pub fn candle(selector: impl Into<InstrumentSelector>, interval: SubscriptionInterval) -> Self {
        Self::single(
            RegistrationBuilder::candles().with_subscription_interval(interval),
            selector,
        )
    }

    /// Candles of every subscribed instrument.
    pub fn all_candles(interval: SubscriptionInterval) -> Self {
        Self::from_builder(RegistrationBuilder::candles().with_subscription_interval(interval))
    }

    /// Order book of one instrument.
    pub fn order_book(selector: impl Into<InstrumentSelector>) -> Self {
        Self::single(RegistrationBuilder::order_books(), selector)
    }

    /// Order books of every subscribed instrument.
    pub fn all_order_books() -> Self {
        Self::from_builder(RegistrationBuilder::order_books())
    }

    /// Last price of one instrument.
    pub fn last_price(selector: impl Into<InstrumentSelector>) -> Self {
        Self::single(RegistrationBuilder::last_prices(), selector)
    }

    /// Last prices of every subscribed instrument.
    pub fn all_last_prices() -> Self {
        Self::from_builder(RegistrationBuilder::last_prices())
    }

    /// Trading status of one instrument.
    pub fn trading_status(selector: impl Into<InstrumentSelector>) -> Self {
        Self::single(RegistrationBuilder::trading_statuses(), selector)
    }

    /// Trading statuses of every subscribed instrument.
    pub fn all_trading_statuses() -> Self {
        Self::from_builder(RegistrationBuilder::trading_statuses())
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Portfolio of one account.
    pub fn portfolio(account: impl Into<String>) -> Self {
        Self::from_builder(RegistrationBuilder::portfolios().with_accounts([account.into()]))
    }

    /// Portfolios of several accounts.
    pub fn all_portfolios<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_builder(RegistrationBuilder::portfolios().with_accounts(accounts))
    }

    /// Positions of one account.
    pub fn position(account: impl Into<String>) -> Self {
        Self::from_builder(RegistrationBuilder::positions().with_accounts([account.into()]))
    }

    /// Positions of several accounts.
    pub fn all_positions<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_builder(RegistrationBuilder::positions().with_accounts(accounts))
    }

    /// Order fills of one account, narrowed to one instrument.
    pub fn order(account: impl Into<String>, selector: impl Into<InstrumentSelector>) -> Self {
        Self::single(
            RegistrationBuilder::orders().with_accounts([account.into()]),
            selector,
        )
    }

    /// Order fills of several accounts.
    pub fn all_orders<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_builder(RegistrationBuilder::orders().with_accounts(accounts))
    }

    // -------------------------------------------------------------------------
    // Modifiers
    // -------------------------------------------------------------------------

    /// Narrow an "all" declaration to explicit tickers.
    pub fn with_tickers<I, S>(self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_builder(self.builder.with_tickers(tickers))
    }

    /// Instrument type hint for ticker lookups.
    pub fn with_instrument_type(self, instrument_type: InstrumentType) -> Self {
        Self::from_builder(self.builder.with_instrument_type(instrument_type))
    }

    /// Run before every normal handler.
    pub fn before_each(self) -> Self {
        Self::from_builder(self.builder.run_before_each())
    }

    /// Run after every normal handler.
    pub fn after_each(self) -> Self {
        Self::from_builder(self.builder.run_after_each())
    }

    /// Drain in-flight executions on shutdown.
    pub fn wait_close(self) -> Self {
        Self::from_builder(self.builder.wait_close())
    }

    /// Give this blocking handler its own blocking job.
    pub fn parallel_blocking(self) -> Self {
        Self::from_builder(self.builder.parallel_blocking())
    }

    /// Skip remaining before/after handlers of the event on failure.
    pub fn halt_on_failure(self) -> Self {
        Self::from_builder(self.builder.halt_on_failure())
    }

    /// The equivalent builder.
    pub fn into_builder(self) -> RegistrationBuilder {
        self.builder
    }
}

/// A handler type that declares its own subscription.
pub trait DeclaredHandler {
    /// What this handler listens to.
    fn declaration(&self) -> Declaration;

    /// Name used in logs. Defaults to the type name.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instrument::InstrumentKey;
    use crate::domain::registration::{OrderingRole, Scope, blocking_fn};
    use crate::domain::streaming::Category;

    struct DollarHandler;

    impl DeclaredHandler for DollarHandler {
        fn declaration(&self) -> Declaration {
            Declaration::trade(InstrumentSelector::ticker("SiH4").with_type(InstrumentType::Future))
        }
    }

    #[test]
    fn default_name_is_type_name() {
        assert_eq!(DollarHandler.name(), "DollarHandler");
    }

    #[test]
    fn single_trade_declaration() {
        let adapter = DollarHandler
            .declaration()
            .into_builder()
            .create_blocking_handler(blocking_fn(|_| Ok(())))
            .unwrap();
        let registration = &adapter.registrations()[0];
        assert_eq!(registration.category(), Category::Trades);
        assert_eq!(
            registration.scope(),
            &Scope::Instruments(vec![InstrumentKey::Ticker {
                ticker: "SiH4".to_string(),
                instrument_type: Some(InstrumentType::Future),
            }])
        );
    }

    #[test]
    fn all_trades_with_tickers_after_each() {
        let adapter = Declaration::all_trades()
            .with_tickers(["CRH4", "BRG4", "SBER", "LKOH"])
            .after_each()
            .into_builder()
            .create_blocking_handler(blocking_fn(|_| Ok(())))
            .unwrap();
        let registration = &adapter.registrations()[0];
        assert_eq!(registration.role(), OrderingRole::After);
        assert_eq!(registration.scope().instrument_keys().len(), 4);
    }

    #[test]
    fn order_declaration_filters_by_instrument() {
        let adapter = Declaration::order("accountId", "SiH4")
            .into_builder()
            .create_blocking_handler(blocking_fn(|_| Ok(())))
            .unwrap();
        assert_eq!(
            adapter.registrations()[0].scope(),
            &Scope::Accounts {
                accounts: vec!["accountId".to_string()],
                instrument_filter: vec![InstrumentKey::ticker("SiH4")],
            }
        );
    }

    #[test]
    fn candle_declaration_carries_interval() {
        let adapter = Declaration::all_candles(SubscriptionInterval::OneMinute)
            .into_builder()
            .create_blocking_handler(blocking_fn(|_| Ok(())))
            .unwrap();
        assert_eq!(
            adapter.registrations()[0].options().interval,
            Some(SubscriptionInterval::OneMinute)
        );
    }
}
