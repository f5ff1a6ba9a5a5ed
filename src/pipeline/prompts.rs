// src/pipeline/prompts.rs
//
// Prompt builders for each deliberation stage. Kept together so the wording
// and the data each role sees can be reviewed in one place.

use crate::domain::models::{PositionState, RegimeClassification};
use crate::news::NewsContext;
use crate::pipeline::{CycleInputs, RiskReview, StrategyProposal};

fn position_block(position: &PositionState) -> String {
    if position.is_flat() {
        return "No open position.".to_string();
    }
    format!(
        "Current position:\n\
         direction: {}\n\
         size: {}\n\
         entry price: {}\n\
         mark price: {}\n\
         unrealized pnl: {} ({:.2}%)\n\
         leverage: {}x\n\
         liquidation price: {}",
        if position.size > 0.0 { "long" } else { "short" },
        position.size.abs(),
        position.entry_price,
        position.mark_price,
        position.unrealized_pnl,
        position.pnl_percentage(),
        position.leverage,
        position.liquidation_price,
    )
}

fn regime_block(regime: &RegimeClassification) -> String {
    let levels: Vec<String> = regime
        .critical_levels
        .iter()
        .map(|l| format!("{}: {:.2}", l.name, l.value))
        .collect();
    format!(
        "Market regime:\n\
         trend: {}\n\
         volatility: {}\n\
         momentum: {}\n\
         support levels (nearest first): {:?}\n\
         resistance levels (nearest first): {:?}\n\
         critical levels: {}",
        regime.trend,
        regime.volatility,
        regime.momentum,
        regime.support,
        regime.resistance,
        levels.join(", "),
    )
}

fn news_block(news: &Option<NewsContext>) -> String {
    match news {
        Some(ctx) if !ctx.headlines.is_empty() => {
            let mut block = String::from("Recent headlines:\n");
            for h in &ctx.headlines {
                block.push_str(&format!("- [{}] {}\n", h.source, h.title));
            }
            if let Some(sentiment) = ctx.sentiment {
                block.push_str(&format!(
                    "Aggregate news sentiment (-1 bearish .. 1 bullish): {:.2}\n",
                    sentiment
                ));
            }
            block
        }
        _ => "No recent news context available.".to_string(),
    }
}

pub fn analysis(inputs: &CycleInputs) -> String {
    format!(
        "You are a professional cryptocurrency market analyst. Analyze the\n\
         following market data and provide your insights.\n\n\
         Market data summary:\n\
         symbol: {}\n\
         current price: {}\n\
         1h price change: {:.2}%\n\
         24h price change: {:.2}%\n\
         1h volatility: {:.2}%\n\
         24h volatility: {:.2}%\n\
         volume change: {:.2}%\n\n\
         Price statistics over the last {} bars:\n\
         open: {} close: {} high: {} low: {}\n\
         recent highs: {:?}\n\
         recent lows: {:?}\n\
         volume-weighted price: {:.2}\n\n\
         {}\n\n\
         {}\n\n\
         How we performed in similar conditions:\n\
         {}\n\
         closed trades under similar regimes: {} (win rate {:.1}%)\n\n\
         Analyze the current market situation: identify the dominant trend,\n\
         support/resistance, volatility patterns and any notable market\n\
         structure. Focus on the likelihood of short-term moves across\n\
         timeframes. Provide your market analysis but do not give a specific\n\
         trade recommendation.",
        inputs.symbol,
        inputs.market.current_price,
        inputs.market.price_change_1h,
        inputs.market.price_change_24h,
        inputs.market.volatility_1h,
        inputs.market.volatility_24h,
        inputs.market.volume_change,
        inputs.chart.bars,
        inputs.chart.open,
        inputs.chart.close,
        inputs.chart.high,
        inputs.chart.low,
        inputs.chart.recent_highs,
        inputs.chart.recent_lows,
        inputs.chart.volume_weighted_price,
        regime_block(&inputs.regime),
        news_block(&inputs.news),
        inputs.performance_summary,
        inputs.regime_metrics.total_trades,
        inputs.regime_metrics.win_rate * 100.0,
    )
}

pub fn strategy(inputs: &CycleInputs, analysis: &str) -> String {
    format!(
        "You are an experienced cryptocurrency trading strategist. Based on\n\
         the market analysis and current position below, propose a concrete\n\
         trading strategy.\n\n\
         Market analysis:\n{}\n\n\
         Market data:\n\
         symbol: {}\n\
         current price: {}\n\
         24h price change: {:.2}%\n\
         24h volatility: {:.2}%\n\n\
         {}\n\
         Position risk level: {}\n\n\
         Respond with a JSON object with exactly these keys:\n\
         {{\n\
           \"action\": \"open_long/open_short/close/hold\",\n\
           \"entry_low\": <number>,\n\
           \"entry_high\": <number>,\n\
           \"stop_loss\": <number>,\n\
           \"take_profit\": <number>,\n\
           \"size_pct\": <fraction of account 0-1>,\n\
           \"confidence\": <1-10>\n\
         }}\n\
         Output only the JSON object.",
        analysis,
        inputs.symbol,
        inputs.market.current_price,
        inputs.market.price_change_24h,
        inputs.market.volatility_24h,
        position_block(&inputs.position),
        inputs.position_risk,
    )
}

pub fn validation(inputs: &CycleInputs, proposal: &StrategyProposal) -> String {
    format!(
        "You are a meticulous trade validator. Re-check the numeric\n\
         coherence of the proposed strategy below against the current price\n\
         of {}: stop-loss and take-profit must sit on the correct side of\n\
         price for the direction, the entry band must be plausible, and the\n\
         position size must be a sane fraction of the account.\n\n\
         Proposed strategy:\n{}\n\n\
         If everything is coherent, return the strategy unchanged. If not,\n\
         return a corrected version. Respond with the same JSON schema\n\
         (action, entry_low, entry_high, stop_loss, take_profit, size_pct,\n\
         confidence) and output only the JSON object.",
        inputs.market.current_price,
        proposal.to_json(),
    )
}

pub fn risk_assessment(inputs: &CycleInputs, proposal: &StrategyProposal) -> String {
    format!(
        "You are a cautious cryptocurrency risk manager. Evaluate the risk\n\
         of executing the validated strategy below.\n\n\
         Strategy:\n{}\n\n\
         Market data:\n\
         symbol: {}\n\
         current price: {}\n\
         24h price change: {:.2}%\n\
         24h volatility: {:.2}%\n\n\
         {}\n\
         Position risk level: {}\n\n\
         Respond with a JSON object with exactly these keys:\n\
         {{\n\
           \"score\": <overall risk 1-10>,\n\
           \"verdict\": \"proceed/adjust/reject\",\n\
           \"concerns\": \"main risk factors and how to mitigate them\"\n\
         }}\n\
         Output only the JSON object.",
        proposal.to_json(),
        inputs.symbol,
        inputs.market.current_price,
        inputs.market.price_change_24h,
        inputs.market.volatility_24h,
        position_block(&inputs.position),
        inputs.position_risk,
    )
}

pub fn reconciliation(
    inputs: &CycleInputs,
    proposal: &StrategyProposal,
    review: &RiskReview,
) -> String {
    format!(
        "You are moderating a disagreement between a trading strategist and\n\
         a risk manager. The strategist proposed:\n{}\n\n\
         The risk manager scored it {}/10 with verdict \"{}\" and these\n\
         concerns:\n{}\n\n\
         Current price: {}\n\
         {}\n\n\
         Produce one merged recommendation that balances the opportunity\n\
         against the concerns (smaller size, tighter stop, or standing\n\
         aside are all acceptable outcomes). Respond with the strategy JSON\n\
         schema (action, entry_low, entry_high, stop_loss, take_profit,\n\
         size_pct, confidence) and output only the JSON object.",
        proposal.to_json(),
        review.score,
        review.verdict,
        review.concerns,
        inputs.market.current_price,
        position_block(&inputs.position),
    )
}

pub fn final_decision(inputs: &CycleInputs, transcript: &[(String, String)]) -> String {
    let conversation: String = transcript
        .iter()
        .map(|(role, content)| format!("{}:\n{}\n", role, content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a decisive cryptocurrency trading decision-maker. Based on\n\
         the deliberation below, make the final call.\n\n\
         Deliberation so far:\n{}\n\
         Market data:\n\
         symbol: {}\n\
         current price: {}\n\
         24h price change: {:.2}%\n\n\
         {}\n\n\
         Respond with a JSON object with exactly these keys:\n\
         {{\n\
           \"action\": \"open_long/open_short/close/hold\",\n\
           \"price\": \"market, a price, or a price band\",\n\
           \"quantity\": <number>,\n\
           \"stop_loss\": <number>,\n\
           \"take_profit\": <number>,\n\
           \"confidence\": <1-10>,\n\
           \"reason\": \"the single most important reason\"\n\
         }}\n\
         Output only the JSON decision, no other explanation.",
        conversation,
        inputs.symbol,
        inputs.market.current_price,
        inputs.market.price_change_24h,
        position_block(&inputs.position),
    )
}
