// src/domain/models.rs
use crate::domain::errors::{MarketDataError, MarketDataResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market Data Structures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time in epoch milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// An ordered price/volume time series for one symbol and interval.
///
/// Timestamps are strictly increasing with a fixed bar interval. Built fresh
/// each cycle from the latest feed and immutable afterwards.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub interval: String,
    candles: Vec<Candle>,
}

impl MarketSnapshot {
    pub fn new(symbol: &str, interval: &str, candles: Vec<Candle>) -> MarketDataResult<Self> {
        if candles.windows(2).any(|w| w[1].open_time <= w[0].open_time) {
            return Err(MarketDataError::UnorderedSeries(symbol.to_string()));
        }

        Ok(Self {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            candles,
        })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Last `n` closing prices, oldest first. Fewer if the series is short.
    pub fn closes_tail(&self, n: usize) -> Vec<f64> {
        let start = self.candles.len().saturating_sub(n);
        self.candles[start..].iter().map(|c| c.close).collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

/// Derived scalar summary of the current market, computed against fixed bar
/// lookbacks from the series end.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketContext {
    pub current_price: f64,
    pub price_change_1h: f64,
    pub price_change_24h: f64,
    pub volatility_1h: f64,
    pub volatility_24h: f64,
    pub volume_change: f64,
}

/// Key statistics over a recent window of bars, used as chart context for the
/// analysis stage.
#[derive(Debug, Clone)]
pub struct ChartSummary {
    pub start_time: i64,
    pub end_time: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub price_change: f64,
    pub volatility: f64,
    pub recent_highs: Vec<f64>,
    pub recent_lows: Vec<f64>,
    pub volume_weighted_price: f64,
    pub bars: usize,
}

/// Market Regime Classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Uptrend,
    StrongUptrend,
    Downtrend,
    StrongDowntrend,
    Sideways,
    Pullback,
    Correction,
    Mixed,
    Unknown,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Trend::Uptrend => "uptrend",
            Trend::StrongUptrend => "strong_uptrend",
            Trend::Downtrend => "downtrend",
            Trend::StrongDowntrend => "strong_downtrend",
            Trend::Sideways => "sideways",
            Trend::Pullback => "pullback",
            Trend::Correction => "correction",
            Trend::Mixed => "mixed",
            Trend::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    Low,
    Medium,
    High,
    Unknown,
}

impl fmt::Display for Volatility {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Volatility::Low => "low",
            Volatility::Medium => "medium",
            Volatility::High => "high",
            Volatility::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Overbought,
    Oversold,
    Strong,
    Weak,
    Neutral,
    Unknown,
}

impl fmt::Display for Momentum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Momentum::Overbought => "overbought",
            Momentum::Oversold => "oversold",
            Momentum::Strong => "strong",
            Momentum::Weak => "weak",
            Momentum::Neutral => "neutral",
            Momentum::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A named price marker (period high, moving average, round number, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalLevel {
    pub name: String,
    pub value: f64,
}

/// Full market-regime classification.
///
/// Unknown-safe: below the minimum history length the classifier returns
/// [`RegimeClassification::unknown`] rather than guessing.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeClassification {
    pub trend: Trend,
    pub volatility: Volatility,
    pub momentum: Momentum,
    /// Support levels below current price, nearest first.
    pub support: Vec<f64>,
    /// Resistance levels above current price, nearest first.
    pub resistance: Vec<f64>,
    pub critical_levels: Vec<CriticalLevel>,
    pub classified_at: DateTime<Utc>,
}

impl RegimeClassification {
    pub fn unknown() -> Self {
        Self {
            trend: Trend::Unknown,
            volatility: Volatility::Unknown,
            momentum: Momentum::Unknown,
            support: Vec::new(),
            resistance: Vec::new(),
            critical_levels: Vec::new(),
            classified_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> RegimeSnapshot {
        RegimeSnapshot {
            trend: self.trend,
            volatility: self.volatility,
            momentum: self.momentum,
        }
    }
}

/// The regime fields recorded alongside each decision, used later for
/// similarity-conditioned performance lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub trend: Trend,
    pub volatility: Volatility,
    pub momentum: Momentum,
}

impl RegimeSnapshot {
    pub fn unknown() -> Self {
        Self {
            trend: Trend::Unknown,
            volatility: Volatility::Unknown,
            momentum: Momentum::Unknown,
        }
    }

    /// Loose similarity: any one shared field counts as a match.
    pub fn is_similar(&self, other: &RegimeSnapshot) -> bool {
        self.trend == other.trend
            || self.volatility == other.volatility
            || self.momentum == other.momentum
    }
}

/// Position State
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    /// Signed size; positive long, negative short, zero flat.
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub liquidation_price: f64,
}

impl Default for PositionState {
    fn default() -> Self {
        Self::flat()
    }
}

impl PositionState {
    pub fn flat() -> Self {
        Self {
            size: 0.0,
            entry_price: 0.0,
            mark_price: 0.0,
            unrealized_pnl: 0.0,
            leverage: 0.0,
            liquidation_price: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }

    /// Unrealized P&L as a percentage of entry notional. Zero when flat.
    pub fn pnl_percentage(&self) -> f64 {
        let entry_value = self.size.abs() * self.entry_price;
        if entry_value > 0.0 {
            self.unrealized_pnl / entry_value * 100.0
        } else {
            0.0
        }
    }

    /// Percentage distance from mark price to the liquidation price.
    /// 100 when no liquidation price is set.
    pub fn liquidation_distance(&self) -> f64 {
        if self.liquidation_price > 0.0 && self.mark_price > 0.0 {
            ((self.mark_price - self.liquidation_price) / self.mark_price * 100.0).abs()
        } else {
            100.0
        }
    }
}

/// Qualitative position risk, ordered from safest to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Extreme,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Extreme => "extreme",
        };
        write!(f, "{}", s)
    }
}

/// Trading Decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TradeAction::OpenLong => "open_long",
            TradeAction::OpenShort => "open_short",
            TradeAction::Close => "close",
            TradeAction::Hold => "hold",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TradeAction {
    type Err = String;

    /// Lenient parse covering the aliases reasoning models actually emit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open_long" | "long" | "buy" | "open long" => Ok(TradeAction::OpenLong),
            "open_short" | "short" | "sell" | "open short" => Ok(TradeAction::OpenShort),
            "close" | "exit" | "close_position" => Ok(TradeAction::Close),
            "hold" | "wait" | "none" | "observe" => Ok(TradeAction::Hold),
            other => Err(format!("unrecognized trade action: {}", other)),
        }
    }
}

/// A completed pipeline run, immutable once created except for the outcome
/// attached by the ledger after the resulting position closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    /// Price instruction as emitted by the decision stage: "market", a
    /// single price, or a band.
    pub price: String,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Self-reported confidence, 0 (safe default) to 10.
    pub confidence: u8,
    pub reason: String,
    pub regime: RegimeSnapshot,
}

impl DecisionRecord {
    /// The fixed fallback emitted when a cycle cannot complete normally.
    /// Never retried within the same cycle.
    pub fn safe_default(reason: &str, regime: RegimeSnapshot) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            action: TradeAction::Hold,
            price: "market".to_string(),
            quantity: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            confidence: 0,
            reason: reason.to_string(),
            regime,
        }
    }
}

/// Realized result of one decision, attached to exactly one record by id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub profit: f64,
    pub closed_at: DateTime<Utc>,
}

/// Aggregate performance over a sliding window of outcome-bearing decisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceMetrics {
    /// Decisions with an attached outcome. Outcome-less records never count.
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_profit: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    /// Gross profit over gross loss; 0 when there are no losing trades.
    pub profit_factor: f64,
    pub long_win_rate: f64,
    pub short_win_rate: f64,
}

/// Emergency Detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyAction {
    Close,
    AdjustStop,
    None,
}

impl fmt::Display for EmergencyAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            EmergencyAction::Close => "close",
            EmergencyAction::AdjustStop => "adjust_stop",
            EmergencyAction::None => "none",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAssessment {
    pub is_emergency: bool,
    pub reason: String,
    pub action: EmergencyAction,
    /// 1 (routine) to 10 (act immediately).
    pub urgency: u8,
}

impl EmergencyAssessment {
    pub fn all_clear() -> Self {
        Self {
            is_emergency: false,
            reason: String::new(),
            action: EmergencyAction::None,
            urgency: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(t: i64, close: f64) -> Candle {
        Candle {
            open_time: t,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn snapshot_rejects_unordered_timestamps() {
        let candles = vec![candle(1000, 1.0), candle(500, 2.0)];
        assert!(MarketSnapshot::new("BTCUSDT", "1m", candles).is_err());
    }

    #[test]
    fn snapshot_rejects_duplicate_timestamps() {
        let candles = vec![candle(1000, 1.0), candle(1000, 2.0)];
        assert!(MarketSnapshot::new("BTCUSDT", "1m", candles).is_err());
    }

    #[test]
    fn trade_action_parses_aliases() {
        assert_eq!("buy".parse::<TradeAction>().unwrap(), TradeAction::OpenLong);
        assert_eq!("SHORT".parse::<TradeAction>().unwrap(), TradeAction::OpenShort);
        assert_eq!("exit".parse::<TradeAction>().unwrap(), TradeAction::Close);
        assert_eq!("wait".parse::<TradeAction>().unwrap(), TradeAction::Hold);
        assert!("moon".parse::<TradeAction>().is_err());
    }

    #[test]
    fn regime_similarity_is_any_field_match() {
        let a = RegimeSnapshot {
            trend: Trend::Uptrend,
            volatility: Volatility::Low,
            momentum: Momentum::Neutral,
        };
        let b = RegimeSnapshot {
            trend: Trend::Downtrend,
            volatility: Volatility::Low,
            momentum: Momentum::Overbought,
        };
        let c = RegimeSnapshot {
            trend: Trend::Downtrend,
            volatility: Volatility::High,
            momentum: Momentum::Overbought,
        };
        assert!(a.is_similar(&b));
        assert!(!a.is_similar(&c));
    }

    #[test]
    fn pnl_percentage_of_entry_notional() {
        let position = PositionState {
            size: 2.0,
            entry_price: 100.0,
            mark_price: 90.0,
            unrealized_pnl: -20.0,
            leverage: 5.0,
            liquidation_price: 80.0,
        };
        assert!((position.pnl_percentage() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Extreme > RiskLevel::High);
        assert!(RiskLevel::Safe < RiskLevel::Low);
    }
}
