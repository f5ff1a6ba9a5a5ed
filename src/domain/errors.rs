// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Market data error: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures talking to the trading venue. Execution failures are logged and
/// surfaced, never silently retried mid-decision.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request error: {0}")]
    Request(String),
}

/// Upstream market data problems. A failed snapshot fetch means the cycle is
/// skipped, no decision produced.
#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Non-monotonic timestamps in series for {0}")]
    UnorderedSeries(String),

    #[error("Insufficient data: need {needed} bars, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("No data available for: {0}")]
    NoData(String),

    #[error("Fetch error: {0}")]
    Fetch(String),
}

/// Failures of the external reasoning service. Each one aborts the stage that
/// issued the call; retry is deferred to the next scheduled cycle.
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("Request failed for role {role}: {cause}")]
    Request { role: String, cause: String },

    #[error("Request timed out for role {role}")]
    Timeout { role: String },

    #[error("Empty completion for role {0}")]
    EmptyResponse(String),

    #[error("No JSON object found in response")]
    NoJsonFound,

    #[error("Malformed JSON in response: {0}")]
    MalformedJson(String),

    #[error("Missing field in structured response: {0}")]
    MissingField(&'static str),
}

/// Deliberation pipeline failures. Any of these terminates the cycle with the
/// safe-default decision.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: ReasoningError,
    },

    #[error("Decision parse failure: {0}")]
    DecisionParse(ReasoningError),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown decision id: {0}")]
    UnknownId(u64),
}

// Result type aliases for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type ExchangeResult<T> = Result<T, ExchangeError>;
pub type MarketDataResult<T> = Result<T, MarketDataError>;
pub type ReasoningResult<T> = Result<T, ReasoningError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
