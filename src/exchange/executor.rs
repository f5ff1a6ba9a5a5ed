// src/exchange/executor.rs
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::{DecisionRecord, TradeAction};
use crate::exchange::client::{ExecutionVenue, OrderSide};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sizing and protective-order parameters for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub symbol: String,
    /// Quantity placed at confidence 10. Scaled down for lower confidence.
    pub base_quantity: f64,
    /// Hard cap on absolute position size.
    pub max_position: f64,
    /// Fallback stop distance when the decision carries no usable level.
    pub stop_loss_pct: f64,
    /// Fallback take-profit distance when the decision carries no usable level.
    pub take_profit_pct: f64,
}

/// Turns decision records into venue orders. All position-mutating paths run
/// under a shared lock so the pipeline and the emergency monitor never act on
/// the position concurrently.
pub struct TradeExecutor {
    venue: Arc<dyn ExecutionVenue>,
    position_lock: Arc<Mutex<()>>,
    config: ExecutorConfig,
}

impl TradeExecutor {
    pub fn new(
        venue: Arc<dyn ExecutionVenue>,
        position_lock: Arc<Mutex<()>>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            venue,
            position_lock,
            config,
        }
    }

    /// Execute one decision at the given mark price. Hold is a no-op; Close
    /// cancels open orders and flattens; open actions place a market order
    /// plus protective stop and take-profit trigger orders.
    pub async fn execute(&self, decision: &DecisionRecord, current_price: f64) -> ExchangeResult<()> {
        match decision.action {
            TradeAction::Hold => Ok(()),
            TradeAction::Close => self.flatten().await,
            TradeAction::OpenLong => self.open(decision, current_price, OrderSide::Buy).await,
            TradeAction::OpenShort => self.open(decision, current_price, OrderSide::Sell).await,
        }
    }

    /// Immediate flatten, used by the emergency monitor path.
    pub async fn emergency_flatten(&self) -> ExchangeResult<()> {
        self.flatten().await
    }

    async fn flatten(&self) -> ExchangeResult<()> {
        let _guard = self.position_lock.lock().await;
        self.venue.cancel_all_open_orders(&self.config.symbol).await?;
        self.venue.close_all_positions(&self.config.symbol).await?;
        log::info!("Closed all positions on {}", self.config.symbol);
        Ok(())
    }

    async fn open(
        &self,
        decision: &DecisionRecord,
        current_price: f64,
        side: OrderSide,
    ) -> ExchangeResult<()> {
        let _guard = self.position_lock.lock().await;

        let position = self.venue.get_position(&self.config.symbol).await?;
        let quantity = self.sized_quantity(decision, position.size);
        if quantity <= 0.0 {
            log::warn!(
                "Skipping {} on {}: position cap reached (size {})",
                decision.action,
                self.config.symbol,
                position.size
            );
            return Ok(());
        }

        let qty = to_decimal(quantity)?;
        self.venue
            .place_market_order(&self.config.symbol, side, qty)
            .await?;
        log::info!(
            "Placed {} market order: {} {} @ ~{}",
            side,
            quantity,
            self.config.symbol,
            current_price
        );

        let (stop, take_profit) = self.protective_levels(decision, current_price, side);
        let exit_side = side.opposite();
        self.venue
            .place_stop_order(&self.config.symbol, exit_side, to_decimal(stop)?, true)
            .await?;
        self.venue
            .place_take_profit_order(&self.config.symbol, exit_side, to_decimal(take_profit)?, true)
            .await?;
        log::info!("Protective orders set: stop {} / take-profit {}", stop, take_profit);
        Ok(())
    }

    /// Confidence-scaled size, capped by remaining room under max_position.
    fn sized_quantity(&self, decision: &DecisionRecord, current_size: f64) -> f64 {
        let scale = 0.5 + 0.05 * f64::from(decision.confidence);
        let desired = if decision.quantity > 0.0 {
            decision.quantity.min(self.config.base_quantity * scale)
        } else {
            self.config.base_quantity * scale
        };
        let room = (self.config.max_position - current_size.abs()).max(0.0);
        desired.min(room)
    }

    /// Decision-provided levels when they sit on the correct side of the
    /// entry price, otherwise config percentages.
    fn protective_levels(
        &self,
        decision: &DecisionRecord,
        price: f64,
        side: OrderSide,
    ) -> (f64, f64) {
        let (fallback_stop, fallback_tp) = match side {
            OrderSide::Buy => (
                price * (1.0 - self.config.stop_loss_pct / 100.0),
                price * (1.0 + self.config.take_profit_pct / 100.0),
            ),
            OrderSide::Sell => (
                price * (1.0 + self.config.stop_loss_pct / 100.0),
                price * (1.0 - self.config.take_profit_pct / 100.0),
            ),
        };

        let stop_ok = decision.stop_loss > 0.0
            && match side {
                OrderSide::Buy => decision.stop_loss < price,
                OrderSide::Sell => decision.stop_loss > price,
            };
        let tp_ok = decision.take_profit > 0.0
            && match side {
                OrderSide::Buy => decision.take_profit > price,
                OrderSide::Sell => decision.take_profit < price,
            };

        (
            if stop_ok { decision.stop_loss } else { fallback_stop },
            if tp_ok { decision.take_profit } else { fallback_tp },
        )
    }
}

fn to_decimal(value: f64) -> ExchangeResult<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(8))
        .ok_or_else(|| ExchangeError::InvalidQuantity(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{RegimeSnapshot, Trend, Volatility};
    use crate::exchange::paper::PaperVenue;
    use approx::assert_relative_eq;

    fn regime() -> RegimeSnapshot {
        RegimeSnapshot {
            trend: Trend::Sideways,
            volatility: Volatility::Medium,
            momentum: crate::domain::models::Momentum::Neutral,
        }
    }

    fn decision(action: TradeAction, confidence: u8) -> DecisionRecord {
        DecisionRecord {
            id: 1,
            timestamp: chrono::Utc::now(),
            action,
            price: "market".to_string(),
            quantity: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            confidence,
            reason: "test".to_string(),
            regime: regime(),
        }
    }

    fn executor(venue: Arc<PaperVenue>) -> TradeExecutor {
        TradeExecutor::new(
            venue,
            Arc::new(Mutex::new(())),
            ExecutorConfig {
                symbol: "BTCUSDT".to_string(),
                base_quantity: 1.0,
                max_position: 2.0,
                stop_loss_pct: 2.0,
                take_profit_pct: 4.0,
            },
        )
    }

    #[tokio::test]
    async fn hold_touches_nothing() {
        let venue = Arc::new(PaperVenue::new(5.0));
        venue.update_mark(100.0);
        let exec = executor(venue.clone());

        exec.execute(&decision(TradeAction::Hold, 8), 100.0)
            .await
            .unwrap();
        assert!(venue.get_position("BTCUSDT").await.unwrap().is_flat());
    }

    #[tokio::test]
    async fn open_long_scales_by_confidence() {
        let venue = Arc::new(PaperVenue::new(5.0));
        venue.update_mark(100.0);
        let exec = executor(venue.clone());

        exec.execute(&decision(TradeAction::OpenLong, 6), 100.0)
            .await
            .unwrap();
        let position = venue.get_position("BTCUSDT").await.unwrap();
        assert_relative_eq!(position.size, 0.8);
    }

    #[tokio::test]
    async fn position_cap_blocks_further_entries() {
        let venue = Arc::new(PaperVenue::new(5.0));
        venue.update_mark(100.0);
        let exec = executor(venue.clone());

        for _ in 0..4 {
            exec.execute(&decision(TradeAction::OpenLong, 10), 100.0)
                .await
                .unwrap();
        }
        let position = venue.get_position("BTCUSDT").await.unwrap();
        assert_relative_eq!(position.size, 2.0);
    }

    #[tokio::test]
    async fn close_flattens_and_cancels() {
        let venue = Arc::new(PaperVenue::new(5.0));
        venue.update_mark(100.0);
        let exec = executor(venue.clone());

        exec.execute(&decision(TradeAction::OpenShort, 10), 100.0)
            .await
            .unwrap();
        exec.execute(&decision(TradeAction::Close, 10), 100.0)
            .await
            .unwrap();
        assert!(venue.get_position("BTCUSDT").await.unwrap().is_flat());
    }

    #[tokio::test]
    async fn bad_stop_level_falls_back_to_percentage() {
        let venue = Arc::new(PaperVenue::new(5.0));
        venue.update_mark(100.0);
        let exec = executor(venue.clone());

        // stop above entry on a long is nonsense; fallback is 2% below
        let mut d = decision(TradeAction::OpenLong, 10);
        d.stop_loss = 150.0;
        exec.execute(&d, 100.0).await.unwrap();

        venue.update_mark(97.9);
        assert!(venue.get_position("BTCUSDT").await.unwrap().is_flat());
    }

    #[tokio::test]
    async fn decision_levels_used_when_sane() {
        let venue = Arc::new(PaperVenue::new(5.0));
        venue.update_mark(100.0);
        let exec = executor(venue.clone());

        let mut d = decision(TradeAction::OpenLong, 10);
        d.stop_loss = 99.0;
        d.take_profit = 101.5;
        exec.execute(&d, 100.0).await.unwrap();

        venue.update_mark(101.6);
        assert!(venue.get_position("BTCUSDT").await.unwrap().is_flat());
        let realized = venue.drain_realized();
        assert_relative_eq!(realized[0], 1.5, max_relative = 1e-9);
    }
}
