//! Stream Categories and Event Types
//!
//! Core domain types for the event streams handlers subscribe to:
//! categories, candle intervals, connection groups and the typed
//! payloads delivered by the transport.

mod events;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use events::{
    Candle, LastPrice, MoneyPosition, OrderBook, OrderBookLevel, OrderTrade, OrderTrades,
    PortfolioUpdate, PositionUpdate, RoutingKey, SecurityPosition, StreamEvent, Trade,
    TradeDirection, TradingStatus,
};

// =============================================================================
// Category
// =============================================================================

/// Event stream category.
///
/// Each category is served by its own logical stream and dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Anonymous trades.
    Trades,
    /// OHLCV candles.
    Candles,
    /// Order book snapshots.
    OrderBooks,
    /// Last traded prices.
    LastPrices,
    /// Instrument trading statuses.
    TradingStatuses,
    /// Account portfolio updates.
    Portfolios,
    /// Account position updates.
    Positions,
    /// Own order executions.
    Orders,
}

impl Category {
    /// Get all categories.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Trades,
            Self::Candles,
            Self::OrderBooks,
            Self::LastPrices,
            Self::TradingStatuses,
            Self::Portfolios,
            Self::Positions,
            Self::Orders,
        ]
    }

    /// Categories multiplexed over the market data connection.
    #[must_use]
    pub const fn market_data() -> &'static [Self] {
        &[
            Self::Trades,
            Self::Candles,
            Self::OrderBooks,
            Self::LastPrices,
            Self::TradingStatuses,
        ]
    }

    /// Whether events of this category are routed by instrument.
    #[must_use]
    pub const fn is_instrument_scoped(&self) -> bool {
        matches!(self.connection_group(), ConnectionGroup::MarketData)
    }

    /// Whether events of this category are routed by account.
    #[must_use]
    pub const fn is_account_scoped(&self) -> bool {
        !self.is_instrument_scoped()
    }

    /// The upstream connection this category is multiplexed on.
    #[must_use]
    pub const fn connection_group(&self) -> ConnectionGroup {
        match self {
            Self::Trades
            | Self::Candles
            | Self::OrderBooks
            | Self::LastPrices
            | Self::TradingStatuses => ConnectionGroup::MarketData,
            Self::Portfolios => ConnectionGroup::Portfolio,
            Self::Positions => ConnectionGroup::Positions,
            Self::Orders => ConnectionGroup::Orders,
        }
    }

    /// Get the category name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Candles => "candles",
            Self::OrderBooks => "order_books",
            Self::LastPrices => "last_prices",
            Self::TradingStatuses => "trading_statuses",
            Self::Portfolios => "portfolios",
            Self::Positions => "positions",
            Self::Orders => "orders",
        }
    }

    /// Parse a category name, ignoring case.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|category| category.as_str() == normalized)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream connection shared by one or more categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionGroup {
    /// Market data stream (trades, candles, order books, last prices, statuses).
    MarketData,
    /// Portfolio stream.
    Portfolio,
    /// Positions stream.
    Positions,
    /// Order trades stream.
    Orders,
}

// =============================================================================
// Subscription Interval
// =============================================================================

/// Candle subscription interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionInterval {
    /// 1 minute.
    OneMinute,
    /// 2 minutes.
    TwoMinutes,
    /// 3 minutes.
    ThreeMinutes,
    /// 5 minutes.
    FiveMinutes,
    /// 10 minutes.
    TenMinutes,
    /// 15 minutes.
    FifteenMinutes,
    /// 30 minutes.
    ThirtyMinutes,
    /// 1 hour.
    OneHour,
    /// 2 hours.
    TwoHours,
    /// 4 hours.
    FourHours,
    /// 1 day.
    OneDay,
    /// 1 week.
    OneWeek,
    /// 1 month.
    OneMonth,
}

impl SubscriptionInterval {
    /// Get the interval name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::TwoMinutes => "2m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::TenMinutes => "10m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1mo",
        }
    }
}

impl fmt::Display for SubscriptionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stream State
// =============================================================================

/// Lifecycle state of a category stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Subscription sent, awaiting acknowledgment.
    Connecting,
    /// Acknowledged and dispatching events.
    Streaming,
    /// Waiting out the backoff before resubscribing.
    Reconnecting,
    /// Shutdown requested, draining or cancelling handlers.
    Closing,
    /// Stream closed.
    Closed,
    /// Retry budget exhausted; the category no longer dispatches.
    Degraded,
}

impl StreamState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Degraded => "degraded",
        }
    }

    /// Numeric encoding for the state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Connecting => 1.0,
            Self::Streaming => 2.0,
            Self::Reconnecting => 3.0,
            Self::Closing => 4.0,
            Self::Closed => 0.0,
            Self::Degraded => -1.0,
        }
    }

    /// Whether the stream has stopped for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Degraded)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_data_categories_share_a_connection() {
        for category in Category::market_data() {
            assert_eq!(category.connection_group(), ConnectionGroup::MarketData);
            assert!(category.is_instrument_scoped());
        }
        assert!(Category::Portfolios.is_account_scoped());
        assert!(Category::Positions.is_account_scoped());
        assert!(Category::Orders.is_account_scoped());
        assert_ne!(
            Category::Portfolios.connection_group(),
            Category::Positions.connection_group()
        );
    }

    #[test]
    fn category_all_returns_every_category() {
        assert_eq!(Category::all().len(), 8);
        assert_eq!(Category::market_data().len(), 5);
    }

    #[test]
    fn category_parsing() {
        assert_eq!(
            Category::from_str_case_insensitive("Candles"),
            Some(Category::Candles)
        );
        assert_eq!(
            Category::from_str_case_insensitive("order-books"),
            Some(Category::OrderBooks)
        );
        assert_eq!(
            Category::from_str_case_insensitive(" last_prices "),
            Some(Category::LastPrices)
        );
        assert_eq!(Category::from_str_case_insensitive("quotes"), None);
    }

    #[test]
    fn intervals_order_by_duration() {
        assert!(SubscriptionInterval::OneMinute < SubscriptionInterval::TwoMinutes);
        assert!(SubscriptionInterval::OneHour < SubscriptionInterval::OneDay);
        assert_eq!(SubscriptionInterval::TwoMinutes.to_string(), "2m");
    }

    #[test]
    fn terminal_states() {
        assert!(StreamState::Closed.is_terminal());
        assert!(StreamState::Degraded.is_terminal());
        assert!(!StreamState::Reconnecting.is_terminal());
        assert_eq!(
            serde_json::to_string(&StreamState::Streaming).unwrap(),
            "\"streaming\""
        );
    }
}
