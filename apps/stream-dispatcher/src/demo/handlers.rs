//! Demo handlers.
//!
//! Every handler logs the event it receives. The declared ones mirror the
//! two declaration styles side by side: a handler type with its own
//! [`Declaration`], and builder registrations wrapping closures.

use std::sync::Arc;

use async_trait::async_trait;
use stream_dispatcher::domain::registration::{
    AsyncHandler, BlockingHandler, Declaration, DeclarationError, DeclaredHandler, HandlerRegistry,
    HandlerResult, InstrumentSelector, RegistrationBuilder, async_fn, blocking_fn,
};
use stream_dispatcher::{Category, InstrumentType, StreamEvent, SubscriptionInterval};

use super::{ACCOUNTS, WATCHLIST};

fn log_event(handler: &str, event: &StreamEvent) {
    tracing::info!(
        handler,
        category = %event.category(),
        identity = %event.identity(),
        "Handled {:?}",
        event
    );
}

// =============================================================================
// Declared Handlers
// =============================================================================

/// Blocking trade handler for the dollar future.
struct BlockingDollarHandler;

impl DeclaredHandler for BlockingDollarHandler {
    fn declaration(&self) -> Declaration {
        Declaration::trade(InstrumentSelector::ticker("SiH4").with_type(InstrumentType::Future))
    }
}

impl BlockingHandler for BlockingDollarHandler {
    fn handle_blocking(&self, event: &StreamEvent) -> HandlerResult {
        log_event(&self.name(), event);
        Ok(())
    }
}

/// Async trade handler for the same ticker, declared without a type hint.
struct AsyncDollarHandler;

impl DeclaredHandler for AsyncDollarHandler {
    fn declaration(&self) -> Declaration {
        Declaration::trade("SiH4")
    }
}

#[async_trait]
impl AsyncHandler for AsyncDollarHandler {
    async fn handle(&self, event: Arc<StreamEvent>) -> HandlerResult {
        log_event(&self.name(), &event);
        Ok(())
    }
}

/// Generic logging handler for the remaining declarations.
struct Logged {
    name: &'static str,
    declaration: fn() -> Declaration,
}

impl DeclaredHandler for Logged {
    fn declaration(&self) -> Declaration {
        (self.declaration)()
    }

    fn name(&self) -> String {
        self.name.to_string()
    }
}

#[async_trait]
impl AsyncHandler for Logged {
    async fn handle(&self, event: Arc<StreamEvent>) -> HandlerResult {
        log_event(self.name, &event);
        Ok(())
    }
}

fn declared() -> Vec<Logged> {
    vec![
        Logged {
            name: "CommonBeforeEachTradesHandler",
            declaration: || Declaration::all_trades().before_each(),
        },
        Logged {
            name: "CommonAfterEachTradesHandler",
            declaration: || Declaration::all_trades().with_tickers(WATCHLIST).after_each(),
        },
        Logged {
            name: "DollarLastPriceHandler",
            declaration: || Declaration::last_price("SiH4"),
        },
        Logged {
            name: "CommonBeforeEachLastPriceHandler",
            declaration: || Declaration::all_last_prices().before_each(),
        },
        Logged {
            name: "CommonAfterEachLastPriceHandler",
            declaration: || Declaration::all_last_prices().after_each(),
        },
        Logged {
            name: "DollarOrderBookHandler",
            declaration: || Declaration::order_book("SiH4"),
        },
        Logged {
            name: "CommonBeforeEachOrderBookHandler",
            declaration: || Declaration::all_order_books().before_each(),
        },
        Logged {
            name: "CommonAfterEachOrderBookHandler",
            declaration: || Declaration::all_order_books().after_each(),
        },
        Logged {
            name: "DollarCandleHandler",
            declaration: || Declaration::candle("SiH4", SubscriptionInterval::OneMinute),
        },
        Logged {
            name: "WatchedCandleHandler",
            declaration: || {
                Declaration::all_candles(SubscriptionInterval::OneMinute).with_tickers(["SiH4", "SBER"])
            },
        },
        Logged {
            name: "CommonAfterEachCandleHandler",
            declaration: || Declaration::all_candles(SubscriptionInterval::OneMinute).after_each(),
        },
        Logged {
            name: "DollarTradingStatusHandler",
            declaration: || Declaration::trading_status("SiH4"),
        },
        Logged {
            name: "CommonBeforeEachTradingStatusHandler",
            declaration: || Declaration::all_trading_statuses().before_each(),
        },
        Logged {
            name: "CommonAfterEachTradingStatusHandler",
            declaration: || Declaration::all_trading_statuses().after_each(),
        },
        Logged {
            name: "PortfolioHandler",
            declaration: || Declaration::portfolio(ACCOUNTS[0]),
        },
        Logged {
            name: "AllPortfolioHandler",
            declaration: || Declaration::all_portfolios(ACCOUNTS),
        },
        Logged {
            name: "PositionHandler",
            declaration: || Declaration::position(ACCOUNTS[0]),
        },
        Logged {
            name: "AllPositionHandler",
            declaration: || Declaration::all_positions(ACCOUNTS),
        },
        Logged {
            name: "OrderHandler",
            declaration: || Declaration::order(ACCOUNTS[0], "SiH4"),
        },
        Logged {
            name: "AllOrderHandler",
            declaration: || Declaration::all_orders(ACCOUNTS),
        },
    ]
}

// =============================================================================
// Builder Registrations
// =============================================================================

fn logging_async(name: &'static str) -> impl AsyncHandler {
    async_fn(move |event: Arc<StreamEvent>| async move {
        log_event(name, &event);
        anyhow::Ok(())
    })
}

fn logging_blocking(name: &'static str) -> impl BlockingHandler {
    blocking_fn(move |event: &StreamEvent| {
        log_event(name, event);
        Ok(())
    })
}

/// Register every demo handler.
///
/// # Errors
///
/// Returns [`DeclarationError`] if a declaration is invalid.
pub fn register_all(registry: &mut HandlerRegistry) -> Result<(), DeclarationError> {
    registry
        .declare_blocking(BlockingDollarHandler)?
        .declare_async(AsyncDollarHandler)?;

    for logged in declared() {
        registry.declare_async(logged)?;
    }

    registry
        .register(
            RegistrationBuilder::market_data()
                .named("marketDataStreamProcessorAdapter")
                .with_tickers(WATCHLIST)
                .run_after_each_for(Category::Trades)
                .run_before_each_for(Category::OrderBooks)
                .create_async_handler(logging_async("marketDataStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::last_prices()
                .with_tickers(WATCHLIST)
                .create_blocking_handler(logging_blocking("LastPriceStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::trades()
                .with_tickers(WATCHLIST)
                .create_blocking_handler(logging_blocking("TradeStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::trading_statuses()
                .with_tickers(WATCHLIST)
                .create_blocking_handler(logging_blocking("TradingStatusStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::candles()
                .with_subscription_interval(SubscriptionInterval::TwoMinutes)
                .wait_close()
                .with_tickers(WATCHLIST)
                .create_blocking_handler(logging_blocking("CandleStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::order_books()
                .with_tickers(WATCHLIST)
                .create_blocking_handler(logging_blocking("OrderBookStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::portfolios()
                .with_accounts(ACCOUNTS)
                .create_blocking_handler(logging_blocking("PortfolioStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::positions()
                .with_accounts(ACCOUNTS)
                .create_blocking_handler(logging_blocking("PositionsStreamProcessorAdapter"))?,
        )
        .register(
            RegistrationBuilder::orders()
                .with_tickers(["SBER"])
                .with_accounts(ACCOUNTS)
                .create_blocking_handler(logging_blocking("OrdersStreamProcessorAdapter"))?,
        );

    Ok(())
}
