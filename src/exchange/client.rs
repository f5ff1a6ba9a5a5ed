// src/exchange/client.rs
use crate::domain::errors::{ExchangeResult, MarketDataResult};
use crate::domain::models::{MarketSnapshot, PositionState};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supplies bar series for an instrument. A fetch failure means the caller
/// skips the cycle; it is never fatal.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> MarketDataResult<MarketSnapshot>;
}

/// The trading venue. All calls are fire-and-confirm; failures are logged
/// and surfaced, never silently retried mid-decision.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn get_position(&self, symbol: &str) -> ExchangeResult<PositionState>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<()>;

    /// Stop-market trigger order; with `close_all` it flattens the whole
    /// position when touched.
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger_price: Decimal,
        close_all: bool,
    ) -> ExchangeResult<()>;

    async fn place_take_profit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trigger_price: Decimal,
        close_all: bool,
    ) -> ExchangeResult<()>;

    async fn cancel_all_open_orders(&self, symbol: &str) -> ExchangeResult<()>;

    /// Unconditional flatten, used by both normal close decisions and the
    /// emergency path.
    async fn close_all_positions(&self, symbol: &str) -> ExchangeResult<()>;
}
