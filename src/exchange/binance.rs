// src/exchange/binance.rs
use crate::domain::errors::{MarketDataError, MarketDataResult};
use crate::domain::models::{Candle, MarketSnapshot};
use crate::exchange::client::MarketDataSource;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

/// Binance USDT-margined futures market data over the public REST API.
pub struct BinanceFuturesClient {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new(timeout: Duration) -> MarketDataResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> MarketDataResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::Fetch(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketDataSource for BinanceFuturesClient {
    async fn get_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> MarketDataResult<MarketSnapshot> {
        let response = self
            .http
            .get(format!("{}/fapi/v1/klines", self.base_url))
            .query(&[
                ("symbol", symbol),
                ("interval", interval),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| MarketDataError::Fetch(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(MarketDataError::Fetch("rate limited".to_string()));
        }
        if !status.is_success() {
            return Err(MarketDataError::Fetch(format!("HTTP {}", status)));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| MarketDataError::InvalidFormat(e.to_string()))?;

        let candles = rows
            .iter()
            .map(parse_kline_row)
            .collect::<MarketDataResult<Vec<Candle>>>()?;

        if candles.is_empty() {
            return Err(MarketDataError::NoData(symbol.to_string()));
        }

        MarketSnapshot::new(symbol, interval, candles)
    }
}

/// Klines come back as positional arrays:
/// [open_time, open, high, low, close, volume, close_time, ...]
/// with prices and volume as strings.
fn parse_kline_row(row: &Value) -> MarketDataResult<Candle> {
    let fields = row
        .as_array()
        .ok_or_else(|| MarketDataError::InvalidFormat("kline row is not an array".to_string()))?;
    if fields.len() < 6 {
        return Err(MarketDataError::InvalidFormat(format!(
            "kline row has {} fields",
            fields.len()
        )));
    }

    let open_time = fields[0]
        .as_i64()
        .ok_or_else(|| MarketDataError::InvalidFormat("open_time is not an integer".to_string()))?;

    let number = |idx: usize, name: &str| -> MarketDataResult<f64> {
        match &fields[idx] {
            Value::String(s) => s
                .parse()
                .map_err(|_| MarketDataError::InvalidFormat(format!("bad {}: {}", name, s))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| MarketDataError::InvalidFormat(format!("bad {}", name))),
            other => Err(MarketDataError::InvalidFormat(format!(
                "bad {}: {}",
                name, other
            ))),
        }
    };

    Ok(Candle {
        open_time,
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_kline_row_with_string_prices() {
        let row: Value = serde_json::from_str(
            r#"[1693300000000, "26000.1", "26100.5", "25950.0", "26050.2", "1234.5",
                1693300059999, "0", 10, "0", "0", "0"]"#,
        )
        .unwrap();
        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.open_time, 1693300000000);
        assert_relative_eq!(candle.open, 26000.1);
        assert_relative_eq!(candle.close, 26050.2);
        assert_relative_eq!(candle.volume, 1234.5);
    }

    #[test]
    fn rejects_short_or_malformed_rows() {
        let short: Value = serde_json::from_str("[1, \"2\"]").unwrap();
        assert!(parse_kline_row(&short).is_err());

        let bad_price: Value =
            serde_json::from_str(r#"[1693300000000, "x", "1", "1", "1", "1"]"#).unwrap();
        assert!(parse_kline_row(&bad_price).is_err());

        let not_array: Value = serde_json::from_str("{}").unwrap();
        assert!(parse_kline_row(&not_array).is_err());
    }
}
