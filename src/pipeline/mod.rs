// src/pipeline/mod.rs
pub mod prompts;

use crate::domain::errors::{PipelineError, PipelineResult, ReasoningError};
use crate::domain::models::{
    ChartSummary, DecisionRecord, MarketContext, PerformanceMetrics, PositionState,
    RegimeClassification, RiskLevel, TradeAction,
};
use crate::ledger::PerformanceLedger;
use crate::news::NewsContext;
use crate::reasoning::{extract, ReasoningClient, StageRole};
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// How many deliberation exchanges the decision-maker sees. Older exchanges
/// are dropped, not summarized.
const TRANSCRIPT_WINDOW: usize = 4;

/// Everything one deliberation cycle reads. Built fresh per cycle; the
/// pipeline holds no ambient state between cycles.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    pub symbol: String,
    pub market: MarketContext,
    pub chart: ChartSummary,
    pub regime: RegimeClassification,
    pub position: PositionState,
    pub position_risk: RiskLevel,
    pub performance_summary: String,
    /// Performance of past decisions recorded under a similar regime.
    pub regime_metrics: PerformanceMetrics,
    pub news: Option<NewsContext>,
}

/// Candidate strategy as proposed by the strategist and corrected by the
/// validator.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyProposal {
    pub action: TradeAction,
    pub entry_low: f64,
    pub entry_high: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Fraction of the account, 0-1.
    pub size_pct: f64,
    pub confidence: u8,
}

impl StrategyProposal {
    fn from_value(value: &Value) -> Result<Self, ReasoningError> {
        let action: TradeAction = extract::field_str(value, "action")?
            .parse()
            .map_err(|_| ReasoningError::MissingField("action"))?;
        Ok(Self {
            action,
            entry_low: extract::field_f64(value, "entry_low")?,
            entry_high: extract::field_f64(value, "entry_high")?,
            stop_loss: extract::field_f64(value, "stop_loss")?,
            take_profit: extract::field_f64(value, "take_profit")?,
            size_pct: extract::field_f64(value, "size_pct")?,
            confidence: extract::field_score(value, "confidence")?,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "action": self.action.to_string(),
            "entry_low": self.entry_low,
            "entry_high": self.entry_high,
            "stop_loss": self.stop_loss,
            "take_profit": self.take_profit,
            "size_pct": self.size_pct,
            "confidence": self.confidence,
        })
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskVerdict {
    Proceed,
    Adjust,
    Reject,
}

impl fmt::Display for RiskVerdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RiskVerdict::Proceed => "proceed",
            RiskVerdict::Adjust => "adjust",
            RiskVerdict::Reject => "reject",
        };
        write!(f, "{}", s)
    }
}

/// Risk assessor's judgment of the validated strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskReview {
    pub score: u8,
    pub verdict: RiskVerdict,
    pub concerns: String,
}

impl RiskReview {
    fn from_value(value: &Value) -> Result<Self, ReasoningError> {
        let verdict = match extract::field_str(value, "verdict")?.to_lowercase() {
            v if v.contains("proceed") || v.contains("approve") || v == "yes" => {
                RiskVerdict::Proceed
            }
            v if v.contains("adjust") => RiskVerdict::Adjust,
            _ => RiskVerdict::Reject,
        };
        Ok(Self {
            score: extract::field_score(value, "score")?,
            verdict,
            concerns: extract::field_str(value, "concerns").unwrap_or_default(),
        })
    }
}

/// Output of the reconciliation stage. When the risk assessor approves
/// outright, reconciliation is an explicit pass-through of the validated
/// strategy, so the decision-maker's input contract never varies.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    PassThrough(StrategyProposal),
    Merged(StrategyProposal),
}

impl Reconciled {
    pub fn proposal(&self) -> &StrategyProposal {
        match self {
            Reconciled::PassThrough(p) | Reconciled::Merged(p) => p,
        }
    }
}

/// Deterministic numeric coherence pass applied after the validator stage.
///
/// A detected mismatch produces a corrected proposal that supersedes the
/// original for all downstream stages; it is never an error.
pub fn enforce_coherence(mut proposal: StrategyProposal, current_price: f64) -> StrategyProposal {
    if proposal.size_pct > 1.0 {
        // models occasionally answer in percent instead of a fraction
        proposal.size_pct /= 100.0;
    }
    proposal.size_pct = proposal.size_pct.clamp(0.0, 1.0);

    if proposal.entry_low > proposal.entry_high {
        std::mem::swap(&mut proposal.entry_low, &mut proposal.entry_high);
    }

    match proposal.action {
        TradeAction::OpenLong => {
            if proposal.stop_loss >= current_price && proposal.take_profit <= current_price {
                std::mem::swap(&mut proposal.stop_loss, &mut proposal.take_profit);
            }
            if proposal.stop_loss >= current_price {
                proposal.stop_loss = current_price * 0.98;
            }
            if proposal.take_profit <= current_price {
                proposal.take_profit = current_price * 1.02;
            }
        }
        TradeAction::OpenShort => {
            if proposal.stop_loss <= current_price && proposal.take_profit >= current_price {
                std::mem::swap(&mut proposal.stop_loss, &mut proposal.take_profit);
            }
            if proposal.stop_loss <= current_price {
                proposal.stop_loss = current_price * 1.02;
            }
            if proposal.take_profit >= current_price {
                proposal.take_profit = current_price * 0.98;
            }
        }
        TradeAction::Close | TradeAction::Hold => {}
    }

    proposal
}

/// Orchestrates the ordered deliberation stages and turns their outputs into
/// one canonical, ledger-recorded decision.
///
/// Every stage delegates to the external reasoning capability and is
/// therefore fallible; any failure aborts the rest of the cycle and the
/// pipeline falls back to the terminal safe default (hold, quantity 0,
/// confidence 0). No partial decision ever escapes.
pub struct DeliberationPipeline {
    reasoning: Arc<dyn ReasoningClient>,
    ledger: Arc<PerformanceLedger>,
}

impl DeliberationPipeline {
    pub fn new(reasoning: Arc<dyn ReasoningClient>, ledger: Arc<PerformanceLedger>) -> Self {
        Self { reasoning, ledger }
    }

    /// Run one full deliberation cycle. Always yields a decision; failures
    /// are contained and surface as the safe default.
    pub async fn deliberate(&self, inputs: &CycleInputs) -> DecisionRecord {
        let mut decision = match self.try_deliberate(inputs).await {
            Ok(decision) => {
                log::info!(
                    "Deliberation complete: {} (confidence {}) - {}",
                    decision.action,
                    decision.confidence,
                    decision.reason
                );
                decision
            }
            Err(e) => {
                let reason = match &e {
                    PipelineError::DecisionParse(_) => "decision parse failure".to_string(),
                    PipelineError::Stage { stage, .. } => format!("{} stage failure", stage),
                };
                log::warn!("Deliberation aborted ({}); emitting safe default", e);
                DecisionRecord::safe_default(&reason, inputs.regime.snapshot())
            }
        };

        match self.ledger.append(decision.clone()) {
            Ok(id) => decision.id = id,
            Err(e) => log::error!("Failed to record decision: {}", e),
        }
        decision
    }

    async fn try_deliberate(&self, inputs: &CycleInputs) -> PipelineResult<DecisionRecord> {
        let mut transcript: Vec<(String, String)> = Vec::new();

        // Analysis
        let analysis = self
            .complete(StageRole::Analyst, "analysis", &prompts::analysis(inputs))
            .await?;
        push_exchange(&mut transcript, "market analyst", &analysis);

        // Strategy
        let strategy_text = self
            .complete(
                StageRole::Strategist,
                "strategy",
                &prompts::strategy(inputs, &analysis),
            )
            .await?;
        let proposal = parse_stage::<StrategyProposal>(
            "strategy",
            &strategy_text,
            StrategyProposal::from_value,
        )?;
        push_exchange(&mut transcript, "strategist", &strategy_text);

        // Validation, then the deterministic coherence pass; a corrected
        // proposal supersedes the original for all downstream stages
        let validation_text = self
            .complete(
                StageRole::Validator,
                "validation",
                &prompts::validation(inputs, &proposal),
            )
            .await?;
        let validated = parse_stage::<StrategyProposal>(
            "validation",
            &validation_text,
            StrategyProposal::from_value,
        )?;
        let validated = enforce_coherence(validated, inputs.market.current_price);
        if validated != proposal {
            log::info!("Validator corrected the strategy proposal");
        }

        // Risk assessment
        let risk_text = self
            .complete(
                StageRole::Risk,
                "risk_assessment",
                &prompts::risk_assessment(inputs, &validated),
            )
            .await?;
        let review = parse_stage::<RiskReview>("risk_assessment", &risk_text, RiskReview::from_value)?;
        push_exchange(&mut transcript, "risk manager", &risk_text);

        // Reconciliation: an explicit state either way
        let reconciled = match review.verdict {
            RiskVerdict::Proceed => Reconciled::PassThrough(validated.clone()),
            RiskVerdict::Adjust | RiskVerdict::Reject => {
                let text = self
                    .complete(
                        StageRole::Reconciler,
                        "reconciliation",
                        &prompts::reconciliation(inputs, &validated, &review),
                    )
                    .await?;
                let merged = parse_stage::<StrategyProposal>(
                    "reconciliation",
                    &text,
                    StrategyProposal::from_value,
                )?;
                Reconciled::Merged(enforce_coherence(merged, inputs.market.current_price))
            }
        };
        push_exchange(
            &mut transcript,
            "reconciler",
            &reconciled.proposal().to_json(),
        );

        // Final decision over the bounded transcript window
        let decision_text = self
            .complete(
                StageRole::DecisionMaker,
                "final_decision",
                &prompts::final_decision(inputs, &transcript),
            )
            .await?;
        self.parse_decision(&decision_text, inputs)
    }

    async fn complete(
        &self,
        role: StageRole,
        stage: &'static str,
        prompt: &str,
    ) -> PipelineResult<String> {
        self.reasoning
            .complete(role, prompt)
            .await
            .map_err(|source| PipelineError::Stage { stage, source })
    }

    fn parse_decision(
        &self,
        text: &str,
        inputs: &CycleInputs,
    ) -> PipelineResult<DecisionRecord> {
        let value = extract::extract_json_object(text).map_err(PipelineError::DecisionParse)?;

        let action: TradeAction = extract::field_str(&value, "action")
            .and_then(|s| {
                s.parse()
                    .map_err(|_| ReasoningError::MissingField("action"))
            })
            .map_err(PipelineError::DecisionParse)?;

        Ok(DecisionRecord {
            id: 0,
            timestamp: Utc::now(),
            action,
            price: extract::field_str(&value, "price").unwrap_or_else(|_| "market".to_string()),
            quantity: extract::field_f64(&value, "quantity")
                .map_err(PipelineError::DecisionParse)?,
            stop_loss: extract::field_f64_or(&value, "stop_loss", 0.0),
            take_profit: extract::field_f64_or(&value, "take_profit", 0.0),
            confidence: extract::field_score(&value, "confidence")
                .map_err(PipelineError::DecisionParse)?,
            reason: extract::field_str(&value, "reason").unwrap_or_default(),
            regime: inputs.regime.snapshot(),
        })
    }
}

fn push_exchange(transcript: &mut Vec<(String, String)>, role: &str, content: &str) {
    transcript.push((role.to_string(), content.to_string()));
    while transcript.len() > TRANSCRIPT_WINDOW {
        transcript.remove(0);
    }
}

fn parse_stage<T>(
    stage: &'static str,
    text: &str,
    from_value: impl Fn(&Value) -> Result<T, ReasoningError>,
) -> PipelineResult<T> {
    extract::extract_json_object(text)
        .and_then(|value| from_value(&value))
        .map_err(|source| PipelineError::Stage { stage, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ReasoningResult;
    use crate::domain::models::{Momentum, Trend, Volatility};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Scripted reasoner: canned responses per role, recording call order.
    struct ScriptedReasoner {
        responses: HashMap<StageRole, ReasoningResult<String>>,
        calls: Mutex<Vec<StageRole>>,
    }

    impl ScriptedReasoner {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn respond(mut self, role: StageRole, text: &str) -> Self {
            self.responses.insert(role, Ok(text.to_string()));
            self
        }

        fn fail(mut self, role: StageRole) -> Self {
            self.responses.insert(
                role,
                Err(ReasoningError::Timeout {
                    role: role.to_string(),
                }),
            );
            self
        }

        fn calls(&self) -> Vec<StageRole> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReasoningClient for ScriptedReasoner {
        async fn complete(&self, role: StageRole, _prompt: &str) -> ReasoningResult<String> {
            self.calls.lock().unwrap().push(role);
            match self.responses.get(&role) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(_)) => Err(ReasoningError::Timeout {
                    role: role.to_string(),
                }),
                None => Ok("unscripted".to_string()),
            }
        }
    }

    const PROPOSAL: &str = r#"```json
{"action": "open_long", "entry_low": 99.0, "entry_high": 101.0,
 "stop_loss": 95.0, "take_profit": 110.0, "size_pct": 0.1, "confidence": 7}
```"#;

    const APPROVE: &str = r#"{"score": 3, "verdict": "proceed", "concerns": "minor"}"#;
    const REJECT: &str = r#"{"score": 9, "verdict": "reject", "concerns": "overexposed"}"#;

    const DECISION: &str = r#"```json
{"action": "open_long", "price": "market", "quantity": "0.02",
 "stop_loss": 95.0, "take_profit": 110.0, "confidence": 7,
 "reason": "uptrend intact"}
```"#;

    fn inputs() -> CycleInputs {
        CycleInputs {
            symbol: "BTCUSDT".to_string(),
            market: MarketContext {
                current_price: 100.0,
                price_change_1h: 0.5,
                price_change_24h: 2.0,
                volatility_1h: 0.3,
                volatility_24h: 1.1,
                volume_change: 5.0,
            },
            chart: ChartSummary {
                start_time: 0,
                end_time: 19 * 60_000,
                open: 99.0,
                close: 100.0,
                high: 101.0,
                low: 98.5,
                volume: 200.0,
                price_change: 1.0,
                volatility: 0.3,
                recent_highs: vec![101.0, 100.8, 100.5],
                recent_lows: vec![98.5, 98.7, 99.0],
                volume_weighted_price: 99.8,
                bars: 20,
            },
            regime: RegimeClassification {
                trend: Trend::Uptrend,
                volatility: Volatility::Medium,
                momentum: Momentum::Strong,
                support: vec![98.5],
                resistance: vec![101.0],
                critical_levels: vec![],
                classified_at: Utc::now(),
            },
            position: PositionState::flat(),
            position_risk: RiskLevel::Safe,
            performance_summary: "no history".to_string(),
            regime_metrics: PerformanceMetrics::default(),
            news: None,
        }
    }

    fn pipeline(reasoner: ScriptedReasoner) -> (DeliberationPipeline, Arc<ScriptedReasoner>, Arc<PerformanceLedger>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(PerformanceLedger::open(dir.path().join("trades.json")));
        let reasoner = Arc::new(reasoner);
        let pipeline = DeliberationPipeline::new(reasoner.clone(), ledger.clone());
        (pipeline, reasoner, ledger, dir)
    }

    fn full_script() -> ScriptedReasoner {
        ScriptedReasoner::new()
            .respond(StageRole::Analyst, "The market looks constructive.")
            .respond(StageRole::Strategist, PROPOSAL)
            .respond(StageRole::Validator, PROPOSAL)
            .respond(StageRole::Risk, APPROVE)
            .respond(StageRole::Reconciler, PROPOSAL)
            .respond(StageRole::DecisionMaker, DECISION)
    }

    #[tokio::test]
    async fn happy_path_produces_recorded_decision() {
        let (pipeline, reasoner, ledger, _dir) = pipeline(full_script());
        let decision = pipeline.deliberate(&inputs()).await;

        assert_eq!(decision.action, TradeAction::OpenLong);
        assert_eq!(decision.quantity, 0.02);
        assert_eq!(decision.confidence, 7);
        assert_eq!(decision.id, 1);
        assert_eq!(ledger.len(), 1);
        // approved outright: the reconciler must not be consulted
        assert!(!reasoner.calls().contains(&StageRole::Reconciler));
    }

    #[tokio::test]
    async fn rejection_routes_through_reconciler() {
        let script = full_script().respond(StageRole::Risk, REJECT);
        let (pipeline, reasoner, _ledger, _dir) = pipeline(script);
        let decision = pipeline.deliberate(&inputs()).await;

        assert_eq!(decision.action, TradeAction::OpenLong);
        assert!(reasoner.calls().contains(&StageRole::Reconciler));
    }

    #[tokio::test]
    async fn stage_timeout_falls_back_to_safe_default() {
        let script = full_script().fail(StageRole::Analyst);
        let (pipeline, reasoner, ledger, _dir) = pipeline(script);
        let decision = pipeline.deliberate(&inputs()).await;

        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.quantity, 0.0);
        assert_eq!(decision.confidence, 0);
        // the cycle aborted: no later stage was attempted
        assert_eq!(reasoner.calls(), vec![StageRole::Analyst]);
        // the safe default is still recorded for audit
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn malformed_strategy_falls_back_to_safe_default() {
        let script = full_script().respond(StageRole::Strategist, "I would simply buy low.");
        let (pipeline, reasoner, _ledger, _dir) = pipeline(script);
        let decision = pipeline.deliberate(&inputs()).await;

        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.confidence, 0);
        assert!(!reasoner.calls().contains(&StageRole::Validator));
    }

    #[tokio::test]
    async fn unparseable_decision_yields_parse_failure_reason() {
        let script = full_script().respond(StageRole::DecisionMaker, "LGTM, send it");
        let (pipeline, _reasoner, _ledger, _dir) = pipeline(script);
        let decision = pipeline.deliberate(&inputs()).await;

        assert_eq!(decision.action, TradeAction::Hold);
        assert_eq!(decision.quantity, 0.0);
        assert_eq!(decision.confidence, 0);
        assert_eq!(decision.reason, "decision parse failure");
    }

    #[tokio::test]
    async fn reconciliation_pass_through_equals_validated_strategy() {
        let validated = StrategyProposal {
            action: TradeAction::OpenLong,
            entry_low: 99.0,
            entry_high: 101.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            size_pct: 0.1,
            confidence: 7,
        };
        let reconciled = Reconciled::PassThrough(validated.clone());
        assert_eq!(reconciled.proposal(), &validated);
    }

    #[test]
    fn coherence_fixes_inverted_long_levels() {
        let proposal = StrategyProposal {
            action: TradeAction::OpenLong,
            entry_low: 101.0,
            entry_high: 99.0,
            stop_loss: 110.0,
            take_profit: 95.0,
            size_pct: 25.0,
            confidence: 6,
        };
        let fixed = enforce_coherence(proposal, 100.0);

        assert!(fixed.entry_low <= fixed.entry_high);
        assert!(fixed.stop_loss < 100.0);
        assert!(fixed.take_profit > 100.0);
        assert!((fixed.size_pct - 0.25).abs() < 1e-9);
    }

    #[test]
    fn coherence_fixes_inverted_short_levels() {
        let proposal = StrategyProposal {
            action: TradeAction::OpenShort,
            entry_low: 99.0,
            entry_high: 101.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            size_pct: 0.2,
            confidence: 6,
        };
        let fixed = enforce_coherence(proposal, 100.0);

        assert!(fixed.stop_loss > 100.0);
        assert!(fixed.take_profit < 100.0);
    }

    #[test]
    fn coherence_leaves_sane_proposals_alone() {
        let proposal = StrategyProposal {
            action: TradeAction::OpenLong,
            entry_low: 99.0,
            entry_high: 101.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            size_pct: 0.1,
            confidence: 7,
        };
        assert_eq!(enforce_coherence(proposal.clone(), 100.0), proposal);
    }

    #[test]
    fn transcript_window_drops_oldest_exchanges() {
        let mut transcript = Vec::new();
        for i in 0..6 {
            push_exchange(&mut transcript, "role", &format!("message {}", i));
        }
        assert_eq!(transcript.len(), TRANSCRIPT_WINDOW);
        assert_eq!(transcript[0].1, "message 2");
        assert_eq!(transcript[3].1, "message 5");
    }
}
