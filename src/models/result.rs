//! Evaluation results and run summaries.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::MetricIdentifier;

/// Outcome of evaluating one metric against one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl EvaluationStatus {
    /// Whether this status triggers the skip-on-failure cascade.
    pub fn is_failure(&self) -> bool {
        matches!(self, EvaluationStatus::Fail | EvaluationStatus::Error)
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationStatus::Pass => write!(f, "PASS"),
            EvaluationStatus::Fail => write!(f, "FAIL"),
            EvaluationStatus::Error => write!(f, "ERROR"),
            EvaluationStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// One immutable evaluation result row.
///
/// Created exactly once per (unit, resolved metric) pair and only ever
/// appended to the run's result collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub group_id: String,
    /// Turn identifier; `None` for conversation-level results.
    pub turn_id: Option<String>,
    pub metric: MetricIdentifier,
    pub status: EvaluationStatus,
    /// Score in 0.0..=1.0; `None` for ERROR and SKIPPED rows.
    pub score: Option<f64>,
    /// Threshold the score was judged against; `None` when no scoring ran.
    pub threshold: Option<f64>,
    pub reason: String,
    /// Wall-clock duration of the evaluation.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl EvaluationResult {
    /// ERROR placeholder: no score, no threshold.
    pub fn error(
        group_id: impl Into<String>,
        turn_id: Option<String>,
        metric: MetricIdentifier,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            turn_id,
            metric,
            status: EvaluationStatus::Error,
            score: None,
            threshold: None,
            reason: reason.into(),
            duration: Duration::ZERO,
        }
    }

    /// SKIPPED placeholder: no external call was made.
    pub fn skipped(
        group_id: impl Into<String>,
        turn_id: Option<String>,
        metric: MetricIdentifier,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            turn_id,
            metric,
            status: EvaluationStatus::Skipped,
            score: None,
            threshold: None,
            reason: reason.into(),
            duration: Duration::ZERO,
        }
    }
}

/// Descriptive statistics for one metric across a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub skipped: usize,
    /// Fraction of rows that passed (0.0..=1.0).
    pub pass_rate: f64,
    /// Fraction of rows that errored (0.0..=1.0).
    pub error_rate: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation of scores; 0.0 below two samples.
    pub std_dev: f64,
    /// Number of rows carrying a score.
    pub sample_count: usize,
}

impl MetricStats {
    fn from_rows(rows: &[&EvaluationResult]) -> Self {
        let mut stats = MetricStats::default();
        let mut scores: Vec<f64> = Vec::new();
        for row in rows {
            match row.status {
                EvaluationStatus::Pass => stats.pass += 1,
                EvaluationStatus::Fail => stats.fail += 1,
                EvaluationStatus::Error => stats.error += 1,
                EvaluationStatus::Skipped => stats.skipped += 1,
            }
            if let Some(score) = row.score {
                scores.push(score);
            }
        }
        let total = rows.len();
        if total > 0 {
            stats.pass_rate = stats.pass as f64 / total as f64;
            stats.error_rate = stats.error as f64 / total as f64;
        }
        stats.sample_count = scores.len();
        if !scores.is_empty() {
            stats.mean = crate::comparison::stats::mean(&scores);
            stats.median = crate::comparison::stats::median(&scores);
            stats.std_dev = crate::comparison::stats::sample_std(&scores);
        }
        stats
    }
}

/// Immutable summary of one completed evaluation run.
///
/// Built once, at the end of a run, from the full result collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run label, typically `provider/model`.
    pub label: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    /// Fraction of rows that passed (0.0..=1.0).
    pub pass_rate: f64,
    /// Fraction of rows that errored (0.0..=1.0).
    pub error_rate: f64,
    /// Per-metric statistics keyed by metric identifier.
    pub by_metric: BTreeMap<String, MetricStats>,
    pub results: Vec<EvaluationResult>,
}

impl RunSummary {
    pub fn from_results(label: impl Into<String>, results: Vec<EvaluationResult>) -> Self {
        let total = results.len();
        let passed = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Pass)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Fail)
            .count();
        let errored = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Error)
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.status == EvaluationStatus::Skipped)
            .count();

        let mut grouped: BTreeMap<String, Vec<&EvaluationResult>> = BTreeMap::new();
        for result in &results {
            grouped.entry(result.metric.to_string()).or_default().push(result);
        }
        let by_metric = grouped
            .into_iter()
            .map(|(metric, rows)| (metric, MetricStats::from_rows(&rows)))
            .collect();

        Self {
            label: label.into(),
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total,
            passed,
            failed,
            errored,
            skipped,
            pass_rate: if total > 0 { passed as f64 / total as f64 } else { 0.0 },
            error_rate: if total > 0 { errored as f64 / total as f64 } else { 0.0 },
            by_metric,
            results,
        }
    }

    /// Metric identifiers present in this summary, in sorted order.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.by_metric.keys().map(String::as_str)
    }

    /// Scores recorded for one metric, in result order.
    pub fn scores_for(&self, metric: &str) -> Vec<f64> {
        self.results
            .iter()
            .filter(|r| r.metric.to_string() == metric)
            .filter_map(|r| r.score)
            .collect()
    }

    /// All scores recorded in this run, in result order.
    pub fn all_scores(&self) -> Vec<f64> {
        self.results.iter().filter_map(|r| r.score).collect()
    }

    /// Mean over every scored row in the run; 0.0 with no scores.
    pub fn mean_score(&self) -> f64 {
        let scores = self.all_scores();
        if scores.is_empty() {
            0.0
        } else {
            crate::comparison::stats::mean(&scores)
        }
    }

    /// (pass, total) counts for one metric.
    pub fn pass_counts_for(&self, metric: &str) -> (usize, usize) {
        let rows: Vec<_> = self
            .results
            .iter()
            .filter(|r| r.metric.to_string() == metric)
            .collect();
        let pass = rows
            .iter()
            .filter(|r| r.status == EvaluationStatus::Pass)
            .count();
        (pass, rows.len())
    }
}
