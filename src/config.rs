// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use crate::reasoning::StageRole;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs::File;

/// Trading agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Market data and cadence settings
    pub trading: TradingConfig,

    /// Reasoning service settings
    pub reasoning: ReasoningConfig,

    /// Order sizing and protective levels
    pub execution: ExecutionConfig,

    /// Decision ledger settings
    pub ledger: LedgerConfig,

    /// Optional news feed settings
    pub news: NewsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: String,

    /// Candle interval (e.g., "1m", "5m", "1h")
    pub interval: String,

    /// Candles fetched per snapshot
    pub snapshot_limit: usize,

    /// Seconds between deliberation cycles
    pub decision_interval_secs: u64,

    /// Seconds between emergency checks
    pub emergency_interval_secs: u64,

    /// Route orders to the simulated venue instead of the exchange
    pub paper_trading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// API key
    pub api_key: String,

    /// Model used when a role has no override
    pub default_model: String,

    /// Per-role model overrides
    pub analyst_model: Option<String>,
    pub strategist_model: Option<String>,
    pub decision_model: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ReasoningConfig {
    pub fn role_models(&self) -> HashMap<StageRole, String> {
        let mut models = HashMap::new();
        if let Some(m) = &self.analyst_model {
            models.insert(StageRole::Analyst, m.clone());
        }
        if let Some(m) = &self.strategist_model {
            models.insert(StageRole::Strategist, m.clone());
        }
        if let Some(m) = &self.decision_model {
            models.insert(StageRole::DecisionMaker, m.clone());
        }
        models
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Account leverage, used for the simulated liquidation price
    pub leverage: f64,

    /// Quantity placed at full confidence
    pub base_quantity: f64,

    /// Maximum absolute position size
    pub max_position: f64,

    /// Fallback stop loss percentage
    pub stop_loss_pct: f64,

    /// Fallback take profit percentage
    pub take_profit_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Path of the JSON decision history file
    pub path: String,

    /// Sliding window in days for performance metrics
    pub window_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    /// newsapi.org key; news context is skipped when absent
    pub api_key: Option<String>,

    /// Search query for headlines
    pub query: String,

    /// Headlines per cycle
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let trading = TradingConfig {
            symbol: env::var("TRADING_SYMBOL").unwrap_or_else(|_| "BTCUSDT".to_string()),
            interval: env::var("TRADING_INTERVAL").unwrap_or_else(|_| "5m".to_string()),
            snapshot_limit: parse_or("SNAPSHOT_LIMIT", 500),
            decision_interval_secs: parse_or("DECISION_INTERVAL_SECS", 300),
            emergency_interval_secs: parse_or("EMERGENCY_INTERVAL_SECS", 60),
            paper_trading: env::var("PAPER_TRADING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        };

        let reasoning = ReasoningConfig {
            base_url: env::var("REASONING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: env::var("REASONING_API_KEY").map_err(|_| {
                AppError::Config("Missing REASONING_API_KEY environment variable".to_string())
            })?,
            default_model: env::var("REASONING_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            analyst_model: env::var("ANALYST_MODEL").ok(),
            strategist_model: env::var("STRATEGIST_MODEL").ok(),
            decision_model: env::var("DECISION_MODEL").ok(),
            timeout_secs: parse_or("REASONING_TIMEOUT_SECS", 60),
        };

        let execution = ExecutionConfig {
            leverage: parse_or("LEVERAGE", 5.0),
            base_quantity: parse_or("BASE_QUANTITY", 0.01),
            max_position: parse_or("MAX_POSITION", 0.05),
            stop_loss_pct: parse_or("STOP_LOSS_PERCENT", 2.0),
            take_profit_pct: parse_or("TAKE_PROFIT_PERCENT", 4.0),
        };

        let ledger = LedgerConfig {
            path: env::var("LEDGER_PATH").unwrap_or_else(|_| "data/decisions.json".to_string()),
            window_days: parse_or("LEDGER_WINDOW_DAYS", 7),
        };

        let news = NewsConfig {
            api_key: env::var("NEWS_API_KEY").ok(),
            query: env::var("NEWS_QUERY").unwrap_or_else(|_| "bitcoin".to_string()),
            limit: parse_or("NEWS_LIMIT", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            to_file: env::var("LOG_TO_FILE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config {
            trading,
            reasoning,
            execution,
            ledger,
            news,
            logging,
        })
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path)
                    .map_err(|e| AppError::Config(format!("Failed to create log file: {}", e)))?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder.init();

        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
