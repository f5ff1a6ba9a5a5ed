// src/main.rs
mod config;
mod domain;
mod exchange;
mod ledger;
mod market;
mod news;
mod pipeline;
mod reasoning;
mod risk;

use crate::config::Config;
use crate::domain::errors::AppResult;
use crate::domain::models::{EmergencyAction, TradeAction, TradeOutcome};
use crate::exchange::binance::BinanceFuturesClient;
use crate::exchange::client::{ExecutionVenue, MarketDataSource};
use crate::exchange::executor::{ExecutorConfig, TradeExecutor};
use crate::exchange::paper::PaperVenue;
use crate::ledger::PerformanceLedger;
use crate::market::classifier::MarketRegimeClassifier;
use crate::market::context::MarketContextBuilder;
use crate::news::{sentiment_score, NewsApiClient, NewsContext, NewsProvider};
use crate::pipeline::{CycleInputs, DeliberationPipeline};
use crate::reasoning::{OpenAiClient, ReasoningClient};
use crate::risk::EmergencyMonitor;

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::signal::ctrl_c;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    config.init_logging()?;

    log::info!("Starting agent_trade v{}", env!("CARGO_PKG_VERSION"));
    log::info!(
        "Trading {} on {} candles, paper={}",
        config.trading.symbol,
        config.trading.interval,
        config.trading.paper_trading
    );

    // Reasoning service client shared by the pipeline and the monitor
    let reasoning: Arc<dyn ReasoningClient> = Arc::new(OpenAiClient::new(
        &config.reasoning.base_url,
        &config.reasoning.api_key,
        &config.reasoning.default_model,
        config.reasoning.role_models(),
        Duration::from_secs(config.reasoning.timeout_secs),
    )?);

    // Market data over the public futures API
    let market_data = Arc::new(BinanceFuturesClient::new(Duration::from_secs(30))?);

    // Execution venue. Live order routing is intentionally not wired up;
    // everything settles against the simulated venue.
    if !config.trading.paper_trading {
        log::warn!("Live execution is not configured; falling back to paper trading");
    }
    let venue = Arc::new(PaperVenue::new(config.execution.leverage));

    // Decision history, restored from disk when present
    let ledger = Arc::new(PerformanceLedger::open(&config.ledger.path));
    log::info!(
        "Loaded {} past decisions from {}",
        ledger.len(),
        config.ledger.path
    );

    let pipeline = Arc::new(DeliberationPipeline::new(reasoning.clone(), ledger.clone()));
    let monitor = Arc::new(EmergencyMonitor::new(reasoning.clone()));

    // Shared by the pipeline and emergency paths so position mutations never
    // interleave
    let position_lock = Arc::new(tokio::sync::Mutex::new(()));
    let executor = Arc::new(TradeExecutor::new(
        venue.clone() as Arc<dyn ExecutionVenue>,
        position_lock,
        ExecutorConfig {
            symbol: config.trading.symbol.clone(),
            base_quantity: config.execution.base_quantity,
            max_position: config.execution.max_position,
            stop_loss_pct: config.execution.stop_loss_pct,
            take_profit_pct: config.execution.take_profit_pct,
        },
    ));

    let news_client = match &config.news.api_key {
        Some(key) => Some(Arc::new(NewsApiClient::new(key, Duration::from_secs(15))?)),
        None => {
            log::info!("NEWS_API_KEY not set; deliberating without news context");
            None
        }
    };

    // Id of the decision that opened the current position, for attaching the
    // realized outcome once it closes
    let open_decision: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));

    // Deliberation loop
    {
        let config = config.clone();
        let market_data = market_data.clone();
        let venue = venue.clone();
        let ledger = ledger.clone();
        let pipeline = pipeline.clone();
        let executor = executor.clone();
        let reasoning = reasoning.clone();
        let open_decision = open_decision.clone();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(config.trading.decision_interval_secs));
            // a slow cycle drops overlapping ticks instead of queueing them
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let builder = MarketContextBuilder::new(bars_per_hour(&config.trading.interval));
            let mut classifier = MarketRegimeClassifier::new();

            loop {
                ticker.tick().await;

                let snapshot = match market_data
                    .get_snapshot(
                        &config.trading.symbol,
                        &config.trading.interval,
                        config.trading.snapshot_limit,
                    )
                    .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("Market data unavailable, skipping cycle: {}", e);
                        continue;
                    }
                };
                let price = match snapshot.last() {
                    Some(candle) => candle.close,
                    None => continue,
                };
                venue.update_mark(price);
                settle_outcomes(&venue, &ledger, &open_decision);

                let regime = classifier.classify(&snapshot);
                let market = match builder.build(&snapshot) {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("Cannot build market context, skipping cycle: {}", e);
                        continue;
                    }
                };
                let chart = match builder.chart_summary(&snapshot) {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("Cannot summarize chart, skipping cycle: {}", e);
                        continue;
                    }
                };
                let position = match venue.get_position(&config.trading.symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        log::error!("Cannot read position, skipping cycle: {}", e);
                        continue;
                    }
                };

                let inputs = CycleInputs {
                    symbol: config.trading.symbol.clone(),
                    market,
                    chart,
                    position_risk: risk::risk_level(&position),
                    position,
                    performance_summary: ledger.performance_summary(config.ledger.window_days),
                    regime_metrics: ledger
                        .metrics_by_regime_similarity(&regime.snapshot(), config.ledger.window_days),
                    regime,
                    news: fetch_news(&news_client, &config, &reasoning).await,
                };

                let decision = pipeline.deliberate(&inputs).await;

                if let Err(e) = executor.execute(&decision, price).await {
                    log::error!("Execution failed for decision {}: {}", decision.id, e);
                    continue;
                }
                match decision.action {
                    TradeAction::OpenLong | TradeAction::OpenShort => {
                        *open_decision.lock().expect("decision id lock poisoned") =
                            Some(decision.id);
                    }
                    TradeAction::Close => {
                        settle_outcomes(&venue, &ledger, &open_decision);
                    }
                    TradeAction::Hold => {}
                }
            }
        });
    }

    // Emergency monitoring loop, independent cadence
    {
        let config = config.clone();
        let market_data = market_data.clone();
        let venue = venue.clone();
        let ledger = ledger.clone();
        let monitor = monitor.clone();
        let executor = executor.clone();
        let open_decision = open_decision.clone();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(config.trading.emergency_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let position = match venue.get_position(&config.trading.symbol).await {
                    Ok(p) => p,
                    Err(e) => {
                        log::error!("Emergency check cannot read position: {}", e);
                        continue;
                    }
                };
                if position.is_flat() {
                    continue;
                }

                let snapshot = match market_data
                    .get_snapshot(&config.trading.symbol, &config.trading.interval, 100)
                    .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("Emergency check skipped, market data unavailable: {}", e);
                        continue;
                    }
                };
                if let Some(candle) = snapshot.last() {
                    venue.update_mark(candle.close);
                    settle_outcomes(&venue, &ledger, &open_decision);
                }

                // a trigger order may have flattened on the mark update
                let position = match venue.get_position(&config.trading.symbol).await {
                    Ok(p) if !p.is_flat() => p,
                    _ => continue,
                };

                let assessment = monitor.assess(&snapshot, &position).await;
                if !assessment.is_emergency {
                    continue;
                }

                log::warn!(
                    "EMERGENCY (urgency {}): {}",
                    assessment.urgency,
                    assessment.reason
                );
                if assessment.action == EmergencyAction::Close {
                    if let Err(e) = executor.emergency_flatten().await {
                        log::error!("Emergency close failed: {}", e);
                        continue;
                    }
                    settle_outcomes(&venue, &ledger, &open_decision);
                }
            }
        });
    }

    log::info!("Agent is running. Press Ctrl+C to stop.");
    ctrl_c().await.map_err(crate::domain::errors::AppError::Io)?;

    log::info!("Shutting down");
    Ok(())
}

/// Attach realized profits from closed positions to the decision that opened
/// them.
fn settle_outcomes(
    venue: &PaperVenue,
    ledger: &PerformanceLedger,
    open_decision: &Mutex<Option<u64>>,
) {
    let realized = venue.drain_realized();
    if realized.is_empty() {
        return;
    }

    let id = open_decision
        .lock()
        .expect("decision id lock poisoned")
        .take();
    let Some(id) = id else {
        log::warn!("Realized {} trade(s) with no recorded opening decision", realized.len());
        return;
    };

    let profit: f64 = realized.iter().sum();
    let outcome = TradeOutcome {
        profit,
        closed_at: Utc::now(),
    };
    match ledger.attach_outcome(id, outcome) {
        Ok(true) => log::info!("Recorded outcome for decision {}: {:+.2}", id, profit),
        Ok(false) => log::warn!("No ledger entry found for decision {}", id),
        Err(e) => log::error!("Failed to record outcome for decision {}: {}", id, e),
    }
}

async fn fetch_news(
    client: &Option<Arc<NewsApiClient>>,
    config: &Config,
    reasoning: &Arc<dyn ReasoningClient>,
) -> Option<NewsContext> {
    let client = client.as_ref()?;
    match client
        .recent_headlines(&config.news.query, config.news.limit)
        .await
    {
        Ok(headlines) if !headlines.is_empty() => {
            let base = base_currency(&config.trading.symbol);
            let sentiment = sentiment_score(reasoning, base, &headlines).await;
            Some(NewsContext {
                headlines,
                sentiment,
            })
        }
        Ok(_) => None,
        Err(e) => {
            log::warn!("News fetch failed: {}", e);
            None
        }
    }
}

fn base_currency(symbol: &str) -> &str {
    for quote in ["USDT", "BUSD", "USDC", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            return base;
        }
    }
    symbol
}

/// Candle count per hour for the configured interval; defaults to 5m bars
/// when the interval is unrecognized.
fn bars_per_hour(interval: &str) -> usize {
    match interval {
        "1m" => 60,
        "3m" => 20,
        "5m" => 12,
        "15m" => 4,
        "30m" => 2,
        "1h" => 1,
        other => {
            log::warn!("Unrecognized interval '{}', assuming 5m bars", other);
            12
        }
    }
}
