// src/ledger/mod.rs
use crate::domain::errors::LedgerResult;
use crate::domain::models::{
    DecisionRecord, PerformanceMetrics, RegimeSnapshot, TradeAction, TradeOutcome, Trend,
    Volatility,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One ledger row: a decision and, once the resulting position has closed,
/// its realized outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub decision: DecisionRecord,
    pub outcome: Option<TradeOutcome>,
}

/// Append-only, durable store of past decisions and outcomes.
///
/// Persists the full history as a human-readable JSON array on every
/// mutation; each mutation is a single serialized read-modify-write-persist
/// under the internal lock. An unreadable file at startup is treated as empty
/// history, never a fatal error.
pub struct PerformanceLedger {
    path: PathBuf,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl PerformanceLedger {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<LedgerEntry>>(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!(
                        "Ledger file {} is unreadable ({}); starting with empty history",
                        path.display(),
                        e
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Append a decision, assigning it the next monotonic id. Returns the id.
    pub fn append(&self, mut decision: DecisionRecord) -> LedgerResult<u64> {
        let mut entries = self.entries.lock().expect("ledger lock poisoned");
        let id = entries
            .iter()
            .map(|e| e.decision.id)
            .max()
            .unwrap_or(0)
            + 1;
        decision.id = id;
        entries.push(LedgerEntry {
            decision,
            outcome: None,
        });
        self.persist(&entries)?;
        Ok(id)
    }

    /// Attach a realized outcome to the decision with the given id.
    /// Returns Ok(false) when the id is unknown.
    pub fn attach_outcome(&self, id: u64, outcome: TradeOutcome) -> LedgerResult<bool> {
        let mut entries = self.entries.lock().expect("ledger lock poisoned");
        match entries.iter_mut().find(|e| e.decision.id == id) {
            Some(entry) => {
                entry.outcome = Some(outcome);
                self.persist(&entries)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// All entries whose decision falls within the last `days` days.
    pub fn recent_window(&self, days: i64) -> Vec<LedgerEntry> {
        let cutoff = Utc::now() - Duration::days(days);
        let entries = self.entries.lock().expect("ledger lock poisoned");
        entries
            .iter()
            .filter(|e| e.decision.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate metrics over the sliding window. Only decisions with an
    /// attached outcome count toward totals.
    pub fn metrics(&self, days: i64) -> PerformanceMetrics {
        compute_metrics(&self.recent_window(days))
    }

    /// Metrics restricted to decisions recorded under a similar regime (any
    /// one of trend/volatility/momentum matching).
    pub fn metrics_by_regime_similarity(
        &self,
        regime: &RegimeSnapshot,
        days: i64,
    ) -> PerformanceMetrics {
        let similar: Vec<LedgerEntry> = self
            .recent_window(days)
            .into_iter()
            .filter(|e| e.decision.regime.is_similar(regime))
            .collect();
        compute_metrics(&similar)
    }

    /// Textual performance digest for the analysis prompt, including how past
    /// decisions fared under each recorded trend and volatility bucket.
    pub fn performance_summary(&self, days: i64) -> String {
        let window = self.recent_window(days);
        let metrics = compute_metrics(&window);

        let mut summary = format!(
            "Performance over the last {} days:\n\
             total closed trades: {}\n\
             win rate: {:.1}%\n\
             average profit: {:.2}\n\
             max profit: {:.2}\n\
             max loss: {:.2}\n\
             profit factor: {:.2}\n\
             long win rate: {:.1}% / short win rate: {:.1}%\n",
            days,
            metrics.total_trades,
            metrics.win_rate * 100.0,
            metrics.avg_profit,
            metrics.max_profit,
            metrics.max_loss,
            metrics.profit_factor,
            metrics.long_win_rate * 100.0,
            metrics.short_win_rate * 100.0,
        );

        let trends = [
            Trend::Uptrend,
            Trend::StrongUptrend,
            Trend::Downtrend,
            Trend::StrongDowntrend,
            Trend::Sideways,
            Trend::Pullback,
            Trend::Correction,
            Trend::Mixed,
        ];
        for trend in trends {
            let subset: Vec<LedgerEntry> = window
                .iter()
                .filter(|e| e.decision.regime.trend == trend)
                .cloned()
                .collect();
            let m = compute_metrics(&subset);
            if m.total_trades > 0 {
                summary.push_str(&format!(
                    "in {} markets: {} trades, win rate {:.1}%, avg profit {:.2}\n",
                    trend,
                    m.total_trades,
                    m.win_rate * 100.0,
                    m.avg_profit
                ));
            }
        }

        for volatility in [Volatility::Low, Volatility::Medium, Volatility::High] {
            let subset: Vec<LedgerEntry> = window
                .iter()
                .filter(|e| e.decision.regime.volatility == volatility)
                .cloned()
                .collect();
            let m = compute_metrics(&subset);
            if m.total_trades > 0 {
                summary.push_str(&format!(
                    "in {} volatility: {} trades, win rate {:.1}%, avg profit {:.2}\n",
                    volatility,
                    m.total_trades,
                    m.win_rate * 100.0,
                    m.avg_profit
                ));
            }
        }

        summary
    }

    fn persist(&self, entries: &[LedgerEntry]) -> LedgerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

fn compute_metrics(entries: &[LedgerEntry]) -> PerformanceMetrics {
    let closed: Vec<(&DecisionRecord, f64)> = entries
        .iter()
        .filter_map(|e| e.outcome.map(|o| (&e.decision, o.profit)))
        .collect();

    if closed.is_empty() {
        return PerformanceMetrics::default();
    }

    let total_trades = closed.len();
    let wins = closed.iter().filter(|(_, p)| *p > 0.0).count();
    let gross_profit: f64 = closed.iter().map(|(_, p)| p.max(0.0)).sum();
    let gross_loss: f64 = closed.iter().map(|(_, p)| (-p).max(0.0)).sum();
    let profits: Vec<f64> = closed.iter().map(|(_, p)| *p).collect();

    let direction_win_rate = |action: TradeAction| {
        let total = closed.iter().filter(|(d, _)| d.action == action).count();
        if total == 0 {
            return 0.0;
        }
        let wins = closed
            .iter()
            .filter(|(d, p)| d.action == action && *p > 0.0)
            .count();
        wins as f64 / total as f64
    };

    PerformanceMetrics {
        total_trades,
        win_rate: wins as f64 / total_trades as f64,
        avg_profit: profits.iter().sum::<f64>() / total_trades as f64,
        max_profit: profits.iter().cloned().fold(f64::MIN, f64::max),
        max_loss: profits.iter().cloned().fold(f64::MAX, f64::min),
        profit_factor: if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        },
        long_win_rate: direction_win_rate(TradeAction::OpenLong),
        short_win_rate: direction_win_rate(TradeAction::OpenShort),
    }
}
