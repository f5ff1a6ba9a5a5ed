// src/market/context.rs
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::{ChartSummary, MarketContext, MarketSnapshot};
use crate::market::stats;

/// Turns a raw bar series into summarized scalar statistics.
///
/// Stateless; all changes are computed against fixed lookbacks counted from
/// the series end, and building fails explicitly when the series is shorter
/// than the daily lookback.
#[derive(Debug, Clone, Copy)]
pub struct MarketContextBuilder {
    bars_per_hour: usize,
}

impl MarketContextBuilder {
    pub fn new(bars_per_hour: usize) -> Self {
        Self { bars_per_hour }
    }

    /// Builder for one-minute bars, the cadence the bot trades on.
    pub fn one_minute() -> Self {
        Self::new(60)
    }

    pub fn hour_bars(&self) -> usize {
        self.bars_per_hour
    }

    pub fn day_bars(&self) -> usize {
        self.bars_per_hour * 24
    }

    pub fn build(&self, snapshot: &MarketSnapshot) -> MarketDataResult<MarketContext> {
        let day_bars = self.day_bars();
        let hour_bars = self.hour_bars();
        if snapshot.len() < day_bars {
            return Err(MarketDataError::InsufficientData {
                needed: day_bars,
                have: snapshot.len(),
            });
        }

        let candles = snapshot.candles();
        let closes_day = snapshot.closes_tail(day_bars);
        let closes_hour = snapshot.closes_tail(hour_bars);
        let current_price = *closes_day.last().expect("non-empty by length check");

        let hour_ago = closes_day[closes_day.len() - hour_bars];
        let day_ago = closes_day[0];

        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let vol_hour = stats::mean(&volumes[volumes.len() - hour_bars..]);
        let vol_day = stats::mean(&volumes[volumes.len() - day_bars..]);

        Ok(MarketContext {
            current_price,
            price_change_1h: change_pct(current_price, hour_ago),
            price_change_24h: change_pct(current_price, day_ago),
            volatility_1h: stats::std_dev(&stats::pct_returns(&closes_hour)) * 100.0,
            volatility_24h: stats::std_dev(&stats::pct_returns(&closes_day)) * 100.0,
            volume_change: change_pct(vol_hour, vol_day),
        })
    }

    /// Summarize the most recent bars for the analysis prompt. The window
    /// widens with realized volatility so choppy markets get more history.
    pub fn chart_summary(&self, snapshot: &MarketSnapshot) -> MarketDataResult<ChartSummary> {
        if snapshot.is_empty() {
            return Err(MarketDataError::NoData(snapshot.symbol.clone()));
        }

        let closes: Vec<f64> = snapshot.candles().iter().map(|c| c.close).collect();
        let recent_volatility = stats::std_dev(&stats::pct_returns(&closes));
        let lookback = if recent_volatility > 0.02 {
            50
        } else if recent_volatility > 0.01 {
            30
        } else {
            20
        };
        let lookback = lookback.min(snapshot.len());

        let window = &snapshot.candles()[snapshot.len() - lookback..];
        let window_closes: Vec<f64> = window.iter().map(|c| c.close).collect();

        let open = window[0].open;
        let close = window[window.len() - 1].close;

        let mut highs: Vec<f64> = window.iter().map(|c| c.high).collect();
        let mut lows: Vec<f64> = window.iter().map(|c| c.low).collect();
        highs.sort_by(|a, b| b.partial_cmp(a).expect("finite prices"));
        lows.sort_by(|a, b| a.partial_cmp(b).expect("finite prices"));

        let total_volume: f64 = window.iter().map(|c| c.volume).sum();
        let volume_weighted_price = if total_volume > 0.0 {
            window.iter().map(|c| c.close * c.volume).sum::<f64>() / total_volume
        } else {
            close
        };

        Ok(ChartSummary {
            start_time: window[0].open_time,
            end_time: window[window.len() - 1].open_time,
            open,
            close,
            high: highs[0],
            low: lows[0],
            volume: total_volume,
            price_change: change_pct(close, open),
            volatility: stats::std_dev(&stats::pct_returns(&window_closes)) * 100.0,
            recent_highs: highs.into_iter().take(3).collect(),
            recent_lows: lows.into_iter().take(3).collect(),
            volume_weighted_price,
            bars: lookback,
        })
    }
}

fn change_pct(current: f64, base: f64) -> f64 {
    if base != 0.0 {
        (current / base - 1.0) * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::MarketDataError;
    use crate::domain::models::Candle;
    use approx::assert_relative_eq;

    fn series(closes: &[f64]) -> MarketSnapshot {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: i as i64 * 60_000,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            })
            .collect();
        MarketSnapshot::new("BTCUSDT", "1m", candles).unwrap()
    }

    #[test]
    fn build_fails_explicitly_on_short_series() {
        let builder = MarketContextBuilder::new(2);
        let snapshot = series(&[1.0; 10]);
        match builder.build(&snapshot) {
            Err(MarketDataError::InsufficientData { needed, have }) => {
                assert_eq!(needed, 48);
                assert_eq!(have, 10);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn changes_computed_against_fixed_lookbacks() {
        // 48 bars at 2 bars/hour: day lookback 48, hour lookback 2
        let mut closes = vec![100.0; 48];
        closes[46] = 100.0; // one hour ago
        closes[47] = 110.0; // now
        let builder = MarketContextBuilder::new(2);
        let ctx = builder.build(&series(&closes)).unwrap();

        assert_relative_eq!(ctx.current_price, 110.0);
        assert_relative_eq!(ctx.price_change_1h, 10.0);
        assert_relative_eq!(ctx.price_change_24h, 10.0);
    }

    #[test]
    fn chart_summary_window_and_vwap() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i % 3) as f64 * 0.01).collect();
        let builder = MarketContextBuilder::one_minute();
        let summary = builder.chart_summary(&series(&closes)).unwrap();

        // flat series: narrowest window
        assert_eq!(summary.bars, 20);
        assert_eq!(summary.recent_highs.len(), 3);
        assert_eq!(summary.recent_lows.len(), 3);
        // equal volumes: vwap equals mean close of the window
        let window = &closes[40..];
        let expected = window.iter().sum::<f64>() / window.len() as f64;
        assert_relative_eq!(summary.volume_weighted_price, expected, epsilon = 1e-9);
    }

    #[test]
    fn chart_summary_widens_with_volatility() {
        let closes: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 100.0 } else { 110.0 })
            .collect();
        let builder = MarketContextBuilder::one_minute();
        let summary = builder.chart_summary(&series(&closes)).unwrap();
        assert_eq!(summary.bars, 50);
    }
}
