// src/exchange/paper.rs
use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::PositionState;
use crate::exchange::client::{ExecutionVenue, OrderSide};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerKind {
    Stop,
    TakeProfit,
}

#[derive(Debug, Clone, Copy)]
struct TriggerOrder {
    kind: TriggerKind,
    trigger: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    position: PositionState,
    triggers: Vec<TriggerOrder>,
    mark: f64,
    realized: Vec<f64>,
}

/// Simulated execution venue: fills market orders at the last mark price,
/// tracks one net position per instance, and fires close-all trigger orders
/// on mark updates. Used by the binary when live trading is disabled and by
/// the executor tests.
pub struct PaperVenue {
    leverage: f64,
    state: Mutex<PaperState>,
}

impl PaperVenue {
    pub fn new(leverage: f64) -> Self {
        Self {
            leverage: leverage.max(1.0),
            state: Mutex::new(PaperState::default()),
        }
    }

    /// Feed the latest mark price: refreshes unrealized P&L and evaluates
    /// pending trigger orders.
    pub fn update_mark(&self, price: f64) {
        let mut state = self.state.lock().expect("paper venue lock poisoned");
        state.mark = price;
        refresh(&mut state.position, price);

        if state.position.is_flat() {
            return;
        }

        let long = state.position.size > 0.0;
        let fired = state.triggers.iter().copied().find(|t| match t.kind {
            TriggerKind::Stop => {
                if long {
                    price <= t.trigger
                } else {
                    price >= t.trigger
                }
            }
            TriggerKind::TakeProfit => {
                if long {
                    price >= t.trigger
                } else {
                    price <= t.trigger
                }
            }
        });

        if let Some(order) = fired {
            log::info!(
                "Paper trigger fired ({:?} at {}); flattening",
                order.kind,
                order.trigger
            );
            flatten(&mut state, order.trigger);
        }
    }

    /// Realized profits of positions closed since the last drain.
    pub fn drain_realized(&self) -> Vec<f64> {
        let mut state = self.state.lock().expect("paper venue lock poisoned");
        std::mem::take(&mut state.realized)
    }

    fn liquidation_price(&self, entry: f64, long: bool) -> f64 {
        if long {
            entry * (1.0 - 1.0 / self.leverage)
        } else {
            entry * (1.0 + 1.0 / self.leverage)
        }
    }
}

fn refresh(position: &mut PositionState, mark: f64) {
    if position.is_flat() {
        return;
    }
    position.mark_price = mark;
    position.unrealized_pnl = (mark - position.entry_price) * position.size;
}

fn flatten(state: &mut PaperState, price: f64) {
    if !state.position.is_flat() {
        let profit = (price - state.position.entry_price) * state.position.size;
        state.realized.push(profit);
    }
    state.position = PositionState::flat();
    state.triggers.clear();
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn get_position(&self, _symbol: &str) -> ExchangeResult<PositionState> {
        Ok(self.state.lock().expect("paper venue lock poisoned").position)
    }

    async fn place_market_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<()> {
        let qty = quantity
            .to_f64()
            .filter(|q| *q > 0.0)
            .ok_or_else(|| ExchangeError::InvalidQuantity(quantity.to_string()))?;

        let mut state = self.state.lock().expect("paper venue lock poisoned");
        let mark = state.mark;
        if mark <= 0.0 {
            return Err(ExchangeError::OrderRejected("no mark price yet".to_string()));
        }

        let signed = match side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };
        let old = state.position;

        if old.is_flat() || old.size.signum() == signed.signum() {
            // open or add: volume-weighted entry
            let total = old.size.abs() + qty;
            let entry = if old.is_flat() {
                mark
            } else {
                (old.entry_price * old.size.abs() + mark * qty) / total
            };
            let size = old.size + signed;
            state.position = PositionState {
                size,
                entry_price: entry,
                mark_price: mark,
                unrealized_pnl: (mark - entry) * size,
                leverage: self.leverage,
                liquidation_price: self.liquidation_price(entry, size > 0.0),
            };
        } else if qty >= old.size.abs() {
            // close fully, flip with the remainder
            flatten(&mut state, mark);
            let remainder = qty - old.size.abs();
            if remainder > 0.0 {
                let size = remainder * signed.signum();
                state.position = PositionState {
                    size,
                    entry_price: mark,
                    mark_price: mark,
                    unrealized_pnl: 0.0,
                    leverage: self.leverage,
                    liquidation_price: self.liquidation_price(mark, size > 0.0),
                };
            }
        } else {
            // partial close; realize the closed share
            let profit = (mark - old.entry_price) * old.size.signum() * qty;
            state.realized.push(profit);
            state.position.size = old.size + signed;
            refresh(&mut state.position, mark);
        }

        Ok(())
    }

    async fn place_stop_order(
        &self,
        _symbol: &str,
        _side: OrderSide,
        trigger_price: Decimal,
        _close_all: bool,
    ) -> ExchangeResult<()> {
        let trigger = trigger_price
            .to_f64()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ExchangeError::InvalidQuantity(trigger_price.to_string()))?;
        let mut state = self.state.lock().expect("paper venue lock poisoned");
        state.triggers.push(TriggerOrder {
            kind: TriggerKind::Stop,
            trigger,
        });
        Ok(())
    }

    async fn place_take_profit_order(
        &self,
        _symbol: &str,
        _side: OrderSide,
        trigger_price: Decimal,
        _close_all: bool,
    ) -> ExchangeResult<()> {
        let trigger = trigger_price
            .to_f64()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| ExchangeError::InvalidQuantity(trigger_price.to_string()))?;
        let mut state = self.state.lock().expect("paper venue lock poisoned");
        state.triggers.push(TriggerOrder {
            kind: TriggerKind::TakeProfit,
            trigger,
        });
        Ok(())
    }

    async fn cancel_all_open_orders(&self, _symbol: &str) -> ExchangeResult<()> {
        let mut state = self.state.lock().expect("paper venue lock poisoned");
        state.triggers.clear();
        Ok(())
    }

    async fn close_all_positions(&self, _symbol: &str) -> ExchangeResult<()> {
        let mut state = self.state.lock().expect("paper venue lock poisoned");
        let mark = state.mark;
        flatten(&mut state, mark);
        Ok(())
    }
}
