// src/risk/mod.rs
use crate::domain::models::{
    EmergencyAction, EmergencyAssessment, MarketSnapshot, PositionState, RiskLevel,
};
use crate::market::stats;
use crate::reasoning::{extract, ReasoningClient, StageRole};
use std::sync::Arc;

/// Derive a qualitative risk level from live position state.
///
/// First match wins: liquidation proximity dominates unrealized loss.
pub fn risk_level(position: &PositionState) -> RiskLevel {
    if position.is_flat() {
        return RiskLevel::Safe;
    }

    let pnl_pct = position.pnl_percentage();
    let liquidation_distance = position.liquidation_distance();

    if liquidation_distance <= 5.0 {
        RiskLevel::Extreme
    } else if liquidation_distance <= 10.0 {
        RiskLevel::High
    } else if pnl_pct < -10.0 {
        RiskLevel::Medium
    } else if pnl_pct < -5.0 {
        RiskLevel::Low
    } else {
        RiskLevel::Safe
    }
}

/// Position-aware watchdog, independent of the deliberation pipeline.
///
/// Combines four statistical triggers with a reasoning-service risk score by
/// OR: any tripped trigger or a score over the cutoff fires the monitor. On
/// firing, `action = Close` must translate to an unconditional flatten.
pub struct EmergencyMonitor {
    reasoning: Arc<dyn ReasoningClient>,
    /// Short-window realized volatility, percent.
    volatility_threshold: f64,
    /// Recent vs. prior average volume ratio.
    volume_surge_threshold: f64,
    /// Absolute short-window price change, percent.
    price_change_threshold: f64,
    /// Unrealized P&L percent of entry notional; below this is an emergency.
    pnl_threshold: f64,
    /// Reasoning-service risk score cutoff, 0-1.
    risk_score_cutoff: f64,
}

impl EmergencyMonitor {
    pub fn new(reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self {
            reasoning,
            volatility_threshold: 5.0,
            volume_surge_threshold: 3.0,
            price_change_threshold: 3.0,
            pnl_threshold: -15.0,
            risk_score_cutoff: 0.8,
        }
    }

    /// Assess the current situation. Flat positions are never an emergency.
    pub async fn assess(
        &self,
        snapshot: &MarketSnapshot,
        position: &PositionState,
    ) -> EmergencyAssessment {
        if position.is_flat() {
            return EmergencyAssessment::all_clear();
        }

        let volatility_trigger = self.volatility_trigger(snapshot);
        let volume_trigger = self.volume_trigger(snapshot);
        let price_trigger = self.price_trigger(snapshot);
        let pnl_trigger = position.pnl_percentage() < self.pnl_threshold;

        let risk_score = self.risk_score(snapshot, position).await;
        let score_trigger = risk_score > self.risk_score_cutoff;

        let mut reasons = Vec::new();
        if volatility_trigger {
            reasons.push("realized volatility over threshold".to_string());
        }
        if volume_trigger {
            reasons.push("volume surge".to_string());
        }
        if price_trigger {
            reasons.push("sharp short-window price move".to_string());
        }
        if pnl_trigger {
            reasons.push(format!(
                "unrealized pnl {:.1}% below {:.1}% threshold",
                position.pnl_percentage(),
                self.pnl_threshold
            ));
        }
        if score_trigger {
            reasons.push(format!("reasoning risk score {:.2}", risk_score));
        }

        if reasons.is_empty() {
            return EmergencyAssessment::all_clear();
        }

        // liquidation-adjacent conditions always demand maximum urgency
        let urgency = if pnl_trigger || score_trigger {
            10
        } else {
            (6 + 2 * (reasons.len() as u8 - 1)).min(10)
        };

        EmergencyAssessment {
            is_emergency: true,
            reason: reasons.join("; "),
            action: EmergencyAction::Close,
            urgency,
        }
    }

    fn volatility_trigger(&self, snapshot: &MarketSnapshot) -> bool {
        let closes = snapshot.closes_tail(20);
        if closes.len() < 20 {
            return false;
        }
        let returns = stats::log_returns(&closes);
        stats::std_dev(&returns) * (20.0f64).sqrt() * 100.0 > self.volatility_threshold
    }

    fn volume_trigger(&self, snapshot: &MarketSnapshot) -> bool {
        let candles = snapshot.candles();
        if candles.len() < 20 {
            return false;
        }
        let volumes: Vec<f64> = candles[candles.len() - 20..].iter().map(|c| c.volume).collect();
        let recent = stats::mean(&volumes[15..]);
        let previous = stats::mean(&volumes[..15]);
        if previous <= 0.0 {
            return false;
        }
        recent / previous > self.volume_surge_threshold
    }

    fn price_trigger(&self, snapshot: &MarketSnapshot) -> bool {
        let closes = snapshot.closes_tail(5);
        if closes.len() < 5 || closes[0] == 0.0 {
            return false;
        }
        let change = (closes[closes.len() - 1] - closes[0]) / closes[0] * 100.0;
        change.abs() > self.price_change_threshold
    }

    /// Risk score 0-1 from the reasoning service. Any failure degrades to
    /// 0.0; the statistical triggers still protect the position.
    async fn risk_score(&self, snapshot: &MarketSnapshot, position: &PositionState) -> f64 {
        let prompt = risk_score_prompt(snapshot, position);
        match self.reasoning.complete(StageRole::Emergency, &prompt).await {
            Ok(text) => match extract::parse_scalar(&text) {
                Ok(score) => score.clamp(0.0, 1.0),
                Err(e) => {
                    log::warn!("Unparseable emergency risk score ({}); using 0.0", e);
                    0.0
                }
            },
            Err(e) => {
                log::warn!("Emergency risk score unavailable ({}); using 0.0", e);
                0.0
            }
        }
    }
}

fn risk_score_prompt(snapshot: &MarketSnapshot, position: &PositionState) -> String {
    let closes = snapshot.closes_tail(20);
    let current = closes.last().copied().unwrap_or(0.0);
    let direction = if position.size > 0.0 { "long" } else { "short" };

    format!(
        "You are a risk management specialist for cryptocurrency trading.\n\
         Assess the danger of the current situation.\n\n\
         Position:\n\
         direction: {}\n\
         size: {}\n\
         entry price: {}\n\
         mark price: {}\n\
         unrealized pnl: {} ({:.2}%)\n\
         leverage: {}x\n\
         liquidation price: {} (distance {:.2}%)\n\n\
         Market ({} {}):\n\
         current price: {}\n\
         last 20 closes: {:?}\n\n\
         Consider proximity to liquidation, adverse momentum and abnormal\n\
         volatility.\n\
         Rate the risk from 0 (safe) to 1 (extreme risk).\n\
         Provide only the numerical risk score.",
        direction,
        position.size.abs(),
        position.entry_price,
        position.mark_price,
        position.unrealized_pnl,
        position.pnl_percentage(),
        position.leverage,
        position.liquidation_price,
        position.liquidation_distance(),
        snapshot.symbol,
        snapshot.interval,
        current,
        closes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ReasoningError, ReasoningResult};
    use crate::domain::models::Candle;
    use async_trait::async_trait;

    struct CannedReasoner(Option<String>);

    #[async_trait]
    impl ReasoningClient for CannedReasoner {
        async fn complete(&self, role: StageRole, _prompt: &str) -> ReasoningResult<String> {
            match &self.0 {
                Some(text) => Ok(text.clone()),
                None => Err(ReasoningError::Timeout {
                    role: role.to_string(),
                }),
            }
        }
    }

    fn snapshot(closes: &[f64], volumes: &[f64]) -> MarketSnapshot {
        let candles: Vec<Candle> = closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&close, &volume))| Candle {
                open_time: i as i64 * 60_000,
                open: close,
                high: close,
                low: close,
                close,
                volume,
            })
            .collect();
        MarketSnapshot::new("BTCUSDT", "1m", candles).unwrap()
    }

    fn calm_snapshot() -> MarketSnapshot {
        snapshot(&[100.0; 30], &[10.0; 30])
    }

    fn position(pnl_pct: f64) -> PositionState {
        // size 1 at entry 100: pnl_pct equals unrealized_pnl
        PositionState {
            size: 1.0,
            entry_price: 100.0,
            mark_price: 100.0 + pnl_pct,
            unrealized_pnl: pnl_pct,
            leverage: 5.0,
            liquidation_price: 0.0,
        }
    }

    #[test]
    fn risk_gate_rule_order() {
        // liquidation distance ~5.6% -> high
        let p = PositionState {
            size: 1.0,
            entry_price: 100.0,
            mark_price: 90.0,
            unrealized_pnl: -10.0,
            leverage: 10.0,
            liquidation_price: 85.0,
        };
        assert_eq!(risk_level(&p), RiskLevel::High);

        let extreme = PositionState {
            mark_price: 86.0,
            ..p
        };
        assert!(extreme.liquidation_distance() <= 5.0);
        assert_eq!(risk_level(&extreme), RiskLevel::Extreme);

        let medium = PositionState {
            liquidation_price: 0.0,
            unrealized_pnl: -12.0,
            mark_price: 88.0,
            ..p
        };
        assert_eq!(risk_level(&medium), RiskLevel::Medium);

        let low = PositionState {
            liquidation_price: 0.0,
            unrealized_pnl: -7.0,
            mark_price: 93.0,
            ..p
        };
        assert_eq!(risk_level(&low), RiskLevel::Low);

        assert_eq!(risk_level(&PositionState::flat()), RiskLevel::Safe);
    }

    #[tokio::test]
    async fn deep_drawdown_fires_even_with_zero_risk_score() {
        let monitor = EmergencyMonitor::new(Arc::new(CannedReasoner(Some("0".to_string()))));
        let assessment = monitor.assess(&calm_snapshot(), &position(-20.0)).await;

        assert!(assessment.is_emergency);
        assert_eq!(assessment.action, EmergencyAction::Close);
        assert_eq!(assessment.urgency, 10);
        assert!(assessment.reason.contains("unrealized pnl"));
    }

    #[tokio::test]
    async fn calm_market_and_healthy_position_is_all_clear() {
        let monitor = EmergencyMonitor::new(Arc::new(CannedReasoner(Some("0.1".to_string()))));
        let assessment = monitor.assess(&calm_snapshot(), &position(2.0)).await;
        assert!(!assessment.is_emergency);
        assert_eq!(assessment.action, EmergencyAction::None);
    }

    #[tokio::test]
    async fn flat_position_never_fires() {
        let monitor = EmergencyMonitor::new(Arc::new(CannedReasoner(Some("1.0".to_string()))));
        let assessment = monitor
            .assess(&calm_snapshot(), &PositionState::flat())
            .await;
        assert!(!assessment.is_emergency);
    }

    #[tokio::test]
    async fn risk_score_over_cutoff_fires_alone() {
        let monitor = EmergencyMonitor::new(Arc::new(CannedReasoner(Some("0.95".to_string()))));
        let assessment = monitor.assess(&calm_snapshot(), &position(1.0)).await;
        assert!(assessment.is_emergency);
        assert!(assessment.reason.contains("risk score"));
    }

    #[tokio::test]
    async fn reasoning_failure_degrades_to_statistical_triggers() {
        let monitor = EmergencyMonitor::new(Arc::new(CannedReasoner(None)));

        // healthy position, calm market: nothing to fire on
        let assessment = monitor.assess(&calm_snapshot(), &position(1.0)).await;
        assert!(!assessment.is_emergency);

        // but a price shock still fires without the reasoning service
        let mut closes = vec![100.0; 30];
        closes[29] = 95.0;
        let shocked = snapshot(&closes, &[10.0; 30]);
        let assessment = monitor.assess(&shocked, &position(1.0)).await;
        assert!(assessment.is_emergency);
    }

    #[tokio::test]
    async fn volume_surge_fires() {
        let mut volumes = vec![10.0; 30];
        for v in volumes.iter_mut().skip(25) {
            *v = 50.0;
        }
        let surged = snapshot(&[100.0; 30], &volumes);
        let monitor = EmergencyMonitor::new(Arc::new(CannedReasoner(Some("0".to_string()))));
        let assessment = monitor.assess(&surged, &position(1.0)).await;
        assert!(assessment.is_emergency);
        assert!(assessment.reason.contains("volume surge"));
    }
}
