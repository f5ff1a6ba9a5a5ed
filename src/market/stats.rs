// src/market/stats.rs
// Small numeric helpers shared by the context builder, the regime classifier
// and the emergency monitor.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). Zero for fewer than two
/// observations.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Bar-over-bar percentage returns. One element shorter than the input.
pub fn pct_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Bar-over-bar log returns. One element shorter than the input.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Simple moving average of the last `period` values. None if not enough data.
pub fn sma_last(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }
    Some(mean(&prices[prices.len() - period..]))
}

/// Relative Strength Index over the last `period` deltas, 0-100 bounded.
/// None if not enough data.
pub fn rsi_last(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = prices[prices.len() - period - 1..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect();

    let avg_gain = mean(&deltas.iter().map(|d| d.max(0.0)).collect::<Vec<_>>());
    let avg_loss = mean(&deltas.iter().map(|d| (-d).max(0.0)).collect::<Vec<_>>());

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_and_std_dev() {
        assert_relative_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert_relative_eq!(std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.138, epsilon = 1e-3);
        assert_eq!(std_dev(&[1.0]), 0.0);
    }

    #[test]
    fn returns_drop_one_element() {
        let r = pct_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r[0], 0.10);
        assert_relative_eq!(r[1], -0.10);
    }

    #[test]
    fn rsi_all_gains_saturates() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_relative_eq!(rsi_last(&prices, 14).unwrap(), 100.0);
    }

    #[test]
    fn rsi_needs_enough_data() {
        assert!(rsi_last(&[1.0, 2.0], 14).is_none());
    }

    #[test]
    fn rsi_balanced_series_near_fifty() {
        // alternate equal-size up and down moves
        let mut prices = vec![100.0];
        for i in 0..30 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let rsi = rsi_last(&prices, 14).unwrap();
        assert!(rsi > 40.0 && rsi < 60.0, "rsi = {}", rsi);
    }
}
