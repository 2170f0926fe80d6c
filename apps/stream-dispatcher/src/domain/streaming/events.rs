//! Typed stream payloads.
//!
//! These are codec-agnostic; a transport adapter decodes its wire format
//! into [`StreamEvent`] before handing it to the dispatcher.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Category, SubscriptionInterval};
use crate::domain::instrument::InstrumentRef;

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// Buy side.
    Buy,
    /// Sell side.
    Sell,
}

/// Anonymous trade on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Traded instrument.
    pub instrument: InstrumentRef,
    /// Aggressor side.
    pub direction: TradeDirection,
    /// Price per lot.
    pub price: Decimal,
    /// Quantity in lots.
    pub quantity: i64,
    /// Exchange timestamp.
    pub time: DateTime<Utc>,
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument.
    pub instrument: InstrumentRef,
    /// Candle interval.
    pub interval: SubscriptionInterval,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume in lots.
    pub volume: i64,
    /// Candle start time.
    pub time: DateTime<Utc>,
}

/// A single order book price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    /// Price.
    pub price: Decimal,
    /// Quantity in lots.
    pub quantity: i64,
}

/// Order book snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Instrument.
    pub instrument: InstrumentRef,
    /// Book depth.
    pub depth: u32,
    /// Bid levels, best first.
    pub bids: Vec<OrderBookLevel>,
    /// Ask levels, best first.
    pub asks: Vec<OrderBookLevel>,
    /// Snapshot time.
    pub time: DateTime<Utc>,
}

/// Last traded price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPrice {
    /// Instrument.
    pub instrument: InstrumentRef,
    /// Last price.
    pub price: Decimal,
    /// Time of the last trade.
    pub time: DateTime<Utc>,
}

/// Instrument trading status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingStatus {
    /// Instrument.
    pub instrument: InstrumentRef,
    /// Venue status code (e.g. `normal_trading`, `break_in_trading`).
    pub status: String,
    /// Whether limit orders are accepted.
    pub limit_order_available: bool,
    /// Whether market orders are accepted.
    pub market_order_available: bool,
    /// Status change time.
    pub time: DateTime<Utc>,
}

/// Portfolio valuation update for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioUpdate {
    /// Account id.
    pub account_id: String,
    /// Total portfolio value.
    pub total_amount: Decimal,
    /// Expected yield in percent.
    pub expected_yield: Decimal,
    /// Valuation time.
    pub time: DateTime<Utc>,
}

/// Cash balance in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyPosition {
    /// ISO currency code.
    pub currency: String,
    /// Available amount.
    pub amount: Decimal,
}

/// Security balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPosition {
    /// Instrument.
    pub instrument: InstrumentRef,
    /// Free balance in units.
    pub balance: i64,
    /// Blocked balance in units.
    pub blocked: i64,
}

/// Position change for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Account id.
    pub account_id: String,
    /// Cash balances.
    pub money: Vec<MoneyPosition>,
    /// Security balances.
    pub securities: Vec<SecurityPosition>,
    /// Change time.
    pub time: DateTime<Utc>,
}

/// A single fill of an own order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTrade {
    /// Venue trade id.
    pub trade_id: String,
    /// Fill price.
    pub price: Decimal,
    /// Fill quantity in units.
    pub quantity: i64,
    /// Fill time.
    pub time: DateTime<Utc>,
}

/// Fills of an own order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTrades {
    /// Venue order id.
    pub order_id: String,
    /// Account id.
    pub account_id: String,
    /// Instrument.
    pub instrument: InstrumentRef,
    /// Order side.
    pub direction: TradeDirection,
    /// Fills.
    pub trades: Vec<OrderTrade>,
    /// Event time.
    pub time: DateTime<Utc>,
}

/// Routing identity extracted from an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingKey<'a> {
    /// Instrument-scoped event.
    Instrument(&'a InstrumentRef),
    /// Account-scoped event, optionally concerning an instrument.
    Account {
        /// Account id.
        account_id: &'a str,
        /// Instrument the event concerns, if any.
        instrument: Option<&'a InstrumentRef>,
    },
}

/// An event delivered by a category stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Anonymous trade.
    Trade(Trade),
    /// Candle.
    Candle(Candle),
    /// Order book.
    OrderBook(OrderBook),
    /// Last price.
    LastPrice(LastPrice),
    /// Trading status.
    TradingStatus(TradingStatus),
    /// Portfolio update.
    Portfolio(PortfolioUpdate),
    /// Position update.
    Position(PositionUpdate),
    /// Own order fills.
    Order(OrderTrades),
}

impl StreamEvent {
    /// The category stream this event belongs to.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Trade(_) => Category::Trades,
            Self::Candle(_) => Category::Candles,
            Self::OrderBook(_) => Category::OrderBooks,
            Self::LastPrice(_) => Category::LastPrices,
            Self::TradingStatus(_) => Category::TradingStatuses,
            Self::Portfolio(_) => Category::Portfolios,
            Self::Position(_) => Category::Positions,
            Self::Order(_) => Category::Orders,
        }
    }

    /// The identity used to route this event.
    #[must_use]
    pub fn routing_key(&self) -> RoutingKey<'_> {
        match self {
            Self::Trade(e) => RoutingKey::Instrument(&e.instrument),
            Self::Candle(e) => RoutingKey::Instrument(&e.instrument),
            Self::OrderBook(e) => RoutingKey::Instrument(&e.instrument),
            Self::LastPrice(e) => RoutingKey::Instrument(&e.instrument),
            Self::TradingStatus(e) => RoutingKey::Instrument(&e.instrument),
            Self::Portfolio(e) => RoutingKey::Account {
                account_id: &e.account_id,
                instrument: None,
            },
            Self::Position(e) => RoutingKey::Account {
                account_id: &e.account_id,
                instrument: None,
            },
            Self::Order(e) => RoutingKey::Account {
                account_id: &e.account_id,
                instrument: Some(&e.instrument),
            },
        }
    }

    /// Candle interval, for candle events.
    #[must_use]
    pub const fn interval(&self) -> Option<SubscriptionInterval> {
        match self {
            Self::Candle(candle) => Some(candle.interval),
            _ => None,
        }
    }

    /// Human-readable identity for logs.
    #[must_use]
    pub fn identity(&self) -> String {
        match self.routing_key() {
            RoutingKey::Instrument(instrument) => instrument.to_string(),
            RoutingKey::Account {
                account_id,
                instrument: Some(instrument),
            } => format!("account:{account_id}/{instrument}"),
            RoutingKey::Account { account_id, .. } => format!("account:{account_id}"),
        }
    }

    /// The trade payload, if this is a trade.
    #[must_use]
    pub const fn as_trade(&self) -> Option<&Trade> {
        match self {
            Self::Trade(trade) => Some(trade),
            _ => None,
        }
    }

    /// The candle payload, if this is a candle.
    #[must_use]
    pub const fn as_candle(&self) -> Option<&Candle> {
        match self {
            Self::Candle(candle) => Some(candle),
            _ => None,
        }
    }

    /// The order book payload, if this is an order book.
    #[must_use]
    pub const fn as_order_book(&self) -> Option<&OrderBook> {
        match self {
            Self::OrderBook(book) => Some(book),
            _ => None,
        }
    }

    /// The last price payload, if this is a last price.
    #[must_use]
    pub const fn as_last_price(&self) -> Option<&LastPrice> {
        match self {
            Self::LastPrice(price) => Some(price),
            _ => None,
        }
    }

    /// The trading status payload, if this is a trading status.
    #[must_use]
    pub const fn as_trading_status(&self) -> Option<&TradingStatus> {
        match self {
            Self::TradingStatus(status) => Some(status),
            _ => None,
        }
    }

    /// The portfolio payload, if this is a portfolio update.
    #[must_use]
    pub const fn as_portfolio(&self) -> Option<&PortfolioUpdate> {
        match self {
            Self::Portfolio(portfolio) => Some(portfolio),
            _ => None,
        }
    }

    /// The position payload, if this is a position update.
    #[must_use]
    pub const fn as_position(&self) -> Option<&PositionUpdate> {
        match self {
            Self::Position(position) => Some(position),
            _ => None,
        }
    }

    /// The order fills payload, if this is an order event.
    #[must_use]
    pub const fn as_order(&self) -> Option<&OrderTrades> {
        match self {
            Self::Order(order) => Some(order),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade() -> StreamEvent {
        StreamEvent::Trade(Trade {
            instrument: InstrumentRef::new("FUTSI0324000", "si-uid"),
            direction: TradeDirection::Buy,
            price: Decimal::new(91_250, 0),
            quantity: 3,
            time: Utc::now(),
        })
    }

    #[test]
    fn trade_routes_by_instrument() {
        let event = trade();
        assert_eq!(event.category(), Category::Trades);
        assert!(matches!(event.routing_key(), RoutingKey::Instrument(_)));
        assert!(event.interval().is_none());
        assert!(event.as_trade().is_some());
        assert!(event.as_candle().is_none());
    }

    #[test]
    fn order_routes_by_account_and_instrument() {
        let event = StreamEvent::Order(OrderTrades {
            order_id: "ord-1".to_string(),
            account_id: "acc-1".to_string(),
            instrument: InstrumentRef::uid("sber-uid"),
            direction: TradeDirection::Sell,
            trades: vec![],
            time: Utc::now(),
        });

        assert_eq!(event.category(), Category::Orders);
        assert_eq!(event.identity(), "account:acc-1/uid:sber-uid");
        match event.routing_key() {
            RoutingKey::Account {
                account_id,
                instrument,
            } => {
                assert_eq!(account_id, "acc-1");
                assert!(instrument.is_some());
            }
            RoutingKey::Instrument(_) => panic!("orders are account scoped"),
        }
    }

    #[test]
    fn candle_exposes_interval() {
        let event = StreamEvent::Candle(Candle {
            instrument: InstrumentRef::figi("BBG004730N88"),
            interval: SubscriptionInterval::TwoMinutes,
            open: Decimal::ONE,
            high: Decimal::TWO,
            low: Decimal::ONE,
            close: Decimal::TWO,
            volume: 10,
            time: Utc::now(),
        });
        assert_eq!(event.interval(), Some(SubscriptionInterval::TwoMinutes));
        assert_eq!(event.identity(), "figi:BBG004730N88");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(trade()).unwrap();
        assert_eq!(json["type"], "trade");
        assert_eq!(json["payload"]["quantity"], 3);
    }
}
