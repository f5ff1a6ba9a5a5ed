// src/market/classifier.rs
use crate::domain::models::{
    CriticalLevel, MarketSnapshot, Momentum, RegimeClassification, Trend, Volatility,
};
use crate::market::stats;
use chrono::Utc;

/// Classifies the current market regime from a bar series: trend, volatility,
/// momentum, support/resistance levels and critical price markers.
///
/// Unknown-safe: with fewer bars than the long trend lookback it returns the
/// explicit unknown classification and never errors. Retains the last
/// classification as an owned, timestamped cache.
pub struct MarketRegimeClassifier {
    trend_lookback_short: usize,
    trend_lookback_medium: usize,
    trend_lookback_long: usize,
    /// Price change fraction treated as a trend.
    trend_threshold: f64,
    volatility_lookback: usize,
    high_volatility_threshold: f64,
    low_volatility_threshold: f64,
    rsi_period: usize,
    level_lookback: usize,
    level_merge_threshold: f64,
    levels_per_side: usize,
    last: Option<RegimeClassification>,
}

impl Default for MarketRegimeClassifier {
    fn default() -> Self {
        Self {
            trend_lookback_short: 5,
            trend_lookback_medium: 20,
            trend_lookback_long: 50,
            trend_threshold: 0.03,
            volatility_lookback: 20,
            high_volatility_threshold: 0.04,
            low_volatility_threshold: 0.015,
            rsi_period: 14,
            level_lookback: 100,
            level_merge_threshold: 0.005,
            levels_per_side: 3,
            last: None,
        }
    }
}

impl MarketRegimeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent classification, if any.
    pub fn last_classification(&self) -> Option<&RegimeClassification> {
        self.last.as_ref()
    }

    pub fn classify(&mut self, snapshot: &MarketSnapshot) -> RegimeClassification {
        if snapshot.len() < self.trend_lookback_long {
            return RegimeClassification::unknown();
        }

        let closes: Vec<f64> = snapshot.candles().iter().map(|c| c.close).collect();
        let highs: Vec<f64> = snapshot.candles().iter().map(|c| c.high).collect();
        let lows: Vec<f64> = snapshot.candles().iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = snapshot.candles().iter().map(|c| c.volume).collect();
        let current_price = *closes.last().expect("non-empty by length check");

        let (support, resistance) = self.support_resistance(&highs, &lows, current_price);

        let classification = RegimeClassification {
            trend: self.identify_trend(&closes),
            volatility: self.identify_volatility(&closes),
            momentum: self.identify_momentum(&closes),
            support,
            resistance,
            critical_levels: self.critical_levels(&closes, &highs, &lows, &volumes),
            classified_at: Utc::now(),
        };

        self.last = Some(classification.clone());
        classification
    }

    /// Ordered trend rules; the first match wins. The ordering is the
    /// tie-break, so a short-window surge beats the all-window checks and a
    /// single-window reversal against an established medium-term move is a
    /// pullback/correction rather than "mixed".
    fn identify_trend(&self, closes: &[f64]) -> Trend {
        let short = lookback_change(closes, self.trend_lookback_short);
        let medium = lookback_change(closes, self.trend_lookback_medium);
        let long = lookback_change(closes, self.trend_lookback_long);

        if short > self.trend_threshold && medium > 0.0 {
            Trend::Uptrend
        } else if short < -self.trend_threshold && medium < 0.0 {
            Trend::Downtrend
        } else if medium.abs() < self.trend_threshold / 2.0 {
            Trend::Sideways
        } else if short > 0.0 && medium > 0.0 && long > 0.0 {
            Trend::StrongUptrend
        } else if short < 0.0 && medium < 0.0 && long < 0.0 {
            Trend::StrongDowntrend
        } else if short > 0.0 && medium < 0.0 {
            Trend::Pullback
        } else if short < 0.0 && medium > 0.0 {
            Trend::Correction
        } else {
            Trend::Mixed
        }
    }

    fn identify_volatility(&self, closes: &[f64]) -> Volatility {
        let returns = stats::pct_returns(closes);
        let start = returns.len().saturating_sub(self.volatility_lookback);
        let annualized = stats::std_dev(&returns[start..]) * (365.0f64).sqrt();

        if annualized > self.high_volatility_threshold {
            Volatility::High
        } else if annualized < self.low_volatility_threshold {
            Volatility::Low
        } else {
            Volatility::Medium
        }
    }

    fn identify_momentum(&self, closes: &[f64]) -> Momentum {
        let rsi = match stats::rsi_last(closes, self.rsi_period) {
            Some(rsi) => rsi,
            None => return Momentum::Unknown,
        };

        if rsi > 70.0 {
            Momentum::Overbought
        } else if rsi < 30.0 {
            Momentum::Oversold
        } else if rsi > 60.0 {
            Momentum::Strong
        } else if rsi < 40.0 {
            Momentum::Weak
        } else {
            Momentum::Neutral
        }
    }

    /// Local extrema over the level lookback: a bar is a pivot low/high if it
    /// is strictly below/above its two neighbors on each side. Nearby levels
    /// merge by averaging; the N nearest to current price survive, ordered by
    /// proximity.
    fn support_resistance(
        &self,
        highs: &[f64],
        lows: &[f64],
        current_price: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        let lookback = self.level_lookback.min(lows.len());
        let start = lows.len() - lookback;

        let mut support_levels = Vec::new();
        let mut resistance_levels = Vec::new();

        for i in (start + 2)..lows.len().saturating_sub(2) {
            let l = lows[i];
            if l < lows[i - 1] && l < lows[i - 2] && l < lows[i + 1] && l < lows[i + 2] {
                support_levels.push(l);
            }
            let h = highs[i];
            if h > highs[i - 1] && h > highs[i - 2] && h > highs[i + 1] && h > highs[i + 2] {
                resistance_levels.push(h);
            }
        }

        let support_levels = self.merge_close_levels(support_levels);
        let resistance_levels = self.merge_close_levels(resistance_levels);

        let support = nearest_levels(
            support_levels.into_iter().filter(|&l| l < current_price),
            current_price,
            self.levels_per_side,
        );
        let resistance = nearest_levels(
            resistance_levels.into_iter().filter(|&l| l > current_price),
            current_price,
            self.levels_per_side,
        );

        (support, resistance)
    }

    /// Average together levels within the relative merge threshold of the
    /// running group mean.
    fn merge_close_levels(&self, mut levels: Vec<f64>) -> Vec<f64> {
        if levels.is_empty() {
            return levels;
        }

        levels.sort_by(|a, b| a.partial_cmp(b).expect("finite prices"));
        let mut merged = Vec::new();
        let mut group = vec![levels[0]];

        for &level in &levels[1..] {
            let group_avg = stats::mean(&group);
            if group_avg != 0.0 && ((level - group_avg) / group_avg).abs() < self.level_merge_threshold {
                group.push(level);
            } else {
                merged.push(stats::mean(&group));
                group = vec![level];
            }
        }
        merged.push(stats::mean(&group));

        merged
    }

    fn critical_levels(
        &self,
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
        volumes: &[f64],
    ) -> Vec<CriticalLevel> {
        let current_price = *closes.last().expect("non-empty");
        let period_high = highs.iter().cloned().fold(f64::MIN, f64::max);
        let period_low = lows.iter().cloned().fold(f64::MAX, f64::min);

        let total_volume: f64 = volumes.iter().sum();
        let vwap = if total_volume > 0.0 {
            closes
                .iter()
                .zip(volumes)
                .map(|(c, v)| c * v)
                .sum::<f64>()
                / total_volume
        } else {
            current_price
        };

        let mut levels = vec![
            CriticalLevel { name: "current_price".into(), value: current_price },
            CriticalLevel { name: "period_high".into(), value: period_high },
            CriticalLevel { name: "period_low".into(), value: period_low },
            CriticalLevel {
                name: "psychological_level".into(),
                value: psychological_level(current_price),
            },
            CriticalLevel { name: "vwap".into(), value: vwap },
        ];

        if let Some(ma20) = stats::sma_last(closes, 20) {
            levels.push(CriticalLevel { name: "ma20".into(), value: ma20 });
        }
        if let Some(ma50) = stats::sma_last(closes, 50) {
            levels.push(CriticalLevel { name: "ma50".into(), value: ma50 });
        }
        if let Some(ma200) = stats::sma_last(closes, 200) {
            levels.push(CriticalLevel { name: "ma200".into(), value: ma200 });
        }

        levels
    }
}

/// Fractional price change from `lookback` bars ago to the last bar.
fn lookback_change(closes: &[f64], lookback: usize) -> f64 {
    let base = closes[closes.len() - lookback];
    if base != 0.0 {
        closes[closes.len() - 1] / base - 1.0
    } else {
        0.0
    }
}

fn nearest_levels(levels: impl Iterator<Item = f64>, current_price: f64, n: usize) -> Vec<f64> {
    let mut by_distance: Vec<f64> = levels.collect();
    by_distance.sort_by(|a, b| {
        (a - current_price)
            .abs()
            .partial_cmp(&(b - current_price).abs())
            .expect("finite prices")
    });
    by_distance.truncate(n);
    by_distance
}

/// Nearest round-number price at the magnitude of the price itself
/// (e.g. 68_432 -> 70_000).
fn psychological_level(price: f64) -> f64 {
    let digits = (price.abs().max(1.0)).log10().floor() as i32;
    let magnitude = 10f64.powi(digits);
    (price / magnitude).round() * magnitude
}
