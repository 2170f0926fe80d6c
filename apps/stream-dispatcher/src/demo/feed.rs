//! Synthetic event feed for the demo transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;
use rust_decimal::Decimal;
use stream_dispatcher::domain::streaming::{
    Candle, LastPrice, MoneyPosition, OrderBook, OrderBookLevel, OrderTrade, OrderTrades,
    PortfolioUpdate, PositionUpdate, SecurityPosition, Trade, TradeDirection, TradingStatus,
};
use stream_dispatcher::{
    Category, InMemoryTransport, InstrumentInfo, InstrumentRef, StreamEvent, SubscriptionInterval,
};
use tokio_util::sync::CancellationToken;

use super::ACCOUNTS;

/// Publish a random event every `interval` until cancelled.
pub async fn run(
    transport: Arc<InMemoryTransport>,
    catalog: Vec<InstrumentInfo>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut published: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(event) = random_event(&catalog) else {
            continue;
        };
        if transport.publish(event) {
            published += 1;
        }
    }

    tracing::info!(published, "Demo feed stopped");
}

fn random_event(catalog: &[InstrumentInfo]) -> Option<StreamEvent> {
    let mut rng = rand::rng();
    let info = catalog.choose(&mut rng)?;
    let instrument = InstrumentRef::new(info.figi.clone(), info.instrument_uid.clone());
    let account = (*ACCOUNTS.choose(&mut rng)?).to_string();
    let price = Decimal::new(rng.random_range(10_000..100_000), 2);
    let direction = if rng.random_bool(0.5) {
        TradeDirection::Buy
    } else {
        TradeDirection::Sell
    };
    let time = Utc::now();

    let category = *Category::all().choose(&mut rng)?;
    let event = match category {
        Category::Trades => StreamEvent::Trade(Trade {
            instrument,
            direction,
            price,
            quantity: rng.random_range(1..50),
            time,
        }),
        Category::Candles => StreamEvent::Candle(Candle {
            instrument,
            interval: if rng.random_bool(0.5) {
                SubscriptionInterval::OneMinute
            } else {
                SubscriptionInterval::TwoMinutes
            },
            open: price,
            high: price + Decimal::ONE,
            low: price - Decimal::ONE,
            close: price,
            volume: rng.random_range(100..10_000),
            time,
        }),
        Category::OrderBooks => StreamEvent::OrderBook(OrderBook {
            instrument,
            depth: 1,
            bids: vec![OrderBookLevel {
                price: price - Decimal::ONE,
                quantity: rng.random_range(1..100),
            }],
            asks: vec![OrderBookLevel {
                price: price + Decimal::ONE,
                quantity: rng.random_range(1..100),
            }],
            time,
        }),
        Category::LastPrices => StreamEvent::LastPrice(LastPrice {
            instrument,
            price,
            time,
        }),
        Category::TradingStatuses => StreamEvent::TradingStatus(TradingStatus {
            instrument,
            status: "normal_trading".to_string(),
            limit_order_available: true,
            market_order_available: true,
            time,
        }),
        Category::Portfolios => StreamEvent::Portfolio(PortfolioUpdate {
            account_id: account,
            total_amount: price * Decimal::from(100),
            expected_yield: Decimal::new(rng.random_range(-500..500), 2),
            time,
        }),
        Category::Positions => StreamEvent::Position(PositionUpdate {
            account_id: account,
            money: vec![MoneyPosition {
                currency: "rub".to_string(),
                amount: price * Decimal::from(10),
            }],
            securities: vec![SecurityPosition {
                instrument,
                balance: rng.random_range(0..20),
                blocked: 0,
            }],
            time,
        }),
        Category::Orders => StreamEvent::Order(OrderTrades {
            order_id: uuid::Uuid::new_v4().to_string(),
            account_id: account,
            instrument,
            direction,
            trades: vec![OrderTrade {
                trade_id: uuid::Uuid::new_v4().to_string(),
                price,
                quantity: 1,
                time,
            }],
            time,
        }),
    };
    Some(event)
}
