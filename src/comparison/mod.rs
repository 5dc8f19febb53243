//! Statistical comparison and ranking of completed evaluation runs.
//!
//! Two completed [`RunSummary`] values are compared per shared metric:
//! continuous scores get both a parametric (Welch's t) and a
//! non-parametric (Mann-Whitney U) test, pass/fail counts get a
//! contingency-table test with an exact-test fallback for small samples.
//! An N-way ranking orders runs by a weighted composite of pass rate,
//! mean score, and non-error rate.

pub mod stats;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::result::RunSummary;
use self::stats::{ConfidenceInterval, TestOutcome};

/// Weights of the composite ranking score.
///
/// Pass rate dominates, mean score refines, and the error rate is
/// penalized through its complement. The terms sum to one by default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub pass_rate: f64,
    pub mean_score: f64,
    pub non_error: f64,
}

/// Default weight of the pass rate term.
pub const DEFAULT_PASS_RATE_WEIGHT: f64 = 0.5;
/// Default weight of the mean score term.
pub const DEFAULT_MEAN_SCORE_WEIGHT: f64 = 0.3;
/// Default weight of the (1 - error rate) term.
pub const DEFAULT_NON_ERROR_WEIGHT: f64 = 0.2;

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            pass_rate: DEFAULT_PASS_RATE_WEIGHT,
            mean_score: DEFAULT_MEAN_SCORE_WEIGHT,
            non_error: DEFAULT_NON_ERROR_WEIGHT,
        }
    }
}

impl CompositeWeights {
    pub fn composite(&self, pass_rate: f64, mean_score: f64, error_rate: f64) -> f64 {
        self.pass_rate * pass_rate
            + self.mean_score * mean_score
            + self.non_error * (1.0 - error_rate)
    }
}

/// Which run pairs get pairwise tests in an N-way ranking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairwisePolicy {
    /// Adjacent runs in ranked order.
    #[default]
    Adjacent,
    AllPairs,
}

/// One significance test as reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceTest {
    pub test: String,
    pub statistic: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// Pairwise comparison of one metric across two runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub run_a: String,
    pub run_b: String,
    pub samples_a: usize,
    pub samples_b: usize,
    pub mean_a: f64,
    pub mean_b: f64,
    /// Mean-difference and rank-sum tests over the score distributions.
    pub score_tests: Vec<SignificanceTest>,
    /// Contingency-table test over pass/fail counts; the exact test
    /// replaces the approximation for small expected cells.
    pub pass_rate_test: Option<SignificanceTest>,
}

impl MetricComparison {
    /// Whether any reported test is significant.
    pub fn significant(&self) -> bool {
        self.score_tests
            .iter()
            .chain(self.pass_rate_test.iter())
            .any(|t| t.significant)
    }
}

/// One entry of the composite ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRun {
    /// 1-based rank.
    pub rank: usize,
    pub label: String,
    pub composite_score: f64,
    pub pass_rate: f64,
    pub mean_score: f64,
    pub error_rate: f64,
    pub confidence_interval: Option<ConfidenceInterval>,
    /// Set when the interval was omitted for lack of samples.
    pub insufficient_data: bool,
}

/// Comparison output: the ranking plus pairwise per-metric tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub alpha: f64,
    pub rankings: Vec<RankedRun>,
    pub metric_comparisons: Vec<MetricComparison>,
}

impl ComparisonReport {
    /// Metrics with at least one significant difference.
    pub fn significant_metrics(&self) -> Vec<&str> {
        self.metric_comparisons
            .iter()
            .filter(|c| c.significant())
            .map(|c| c.metric.as_str())
            .collect()
    }
}

/// Compares and ranks completed evaluation runs.
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    alpha: f64,
    weights: CompositeWeights,
    pairwise: PairwisePolicy,
    confidence: f64,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl ComparisonEngine {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            weights: CompositeWeights::default(),
            pairwise: PairwisePolicy::default(),
            confidence: 0.95,
        }
    }

    pub fn with_weights(mut self, weights: CompositeWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_pairwise(mut self, policy: PairwisePolicy) -> Self {
        self.pairwise = policy;
        self
    }

    /// Compare two completed runs: pairwise tests for every shared metric
    /// plus a two-entry ranking.
    pub fn compare(&self, a: &RunSummary, b: &RunSummary) -> ComparisonReport {
        ComparisonReport {
            alpha: self.alpha,
            rankings: self.rank_entries(&[a, b]),
            metric_comparisons: self.compare_shared_metrics(a, b),
        }
    }

    /// Rank N runs by composite score and attach pairwise tests per the
    /// configured policy.
    pub fn rank(&self, summaries: &[RunSummary]) -> ComparisonReport {
        let refs: Vec<&RunSummary> = summaries.iter().collect();
        let rankings = self.rank_entries(&refs);

        let mut metric_comparisons = Vec::new();
        let by_label = |label: &str| {
            summaries
                .iter()
                .find(|s| s.label == label)
                .expect("ranking labels come from the input summaries")
        };
        match self.pairwise {
            PairwisePolicy::Adjacent => {
                for pair in rankings.windows(2) {
                    metric_comparisons.extend(
                        self.compare_shared_metrics(by_label(&pair[0].label), by_label(&pair[1].label)),
                    );
                }
            }
            PairwisePolicy::AllPairs => {
                for (i, first) in rankings.iter().enumerate() {
                    for second in &rankings[i + 1..] {
                        metric_comparisons.extend(
                            self.compare_shared_metrics(by_label(&first.label), by_label(&second.label)),
                        );
                    }
                }
            }
        }

        ComparisonReport {
            alpha: self.alpha,
            rankings,
            metric_comparisons,
        }
    }

    /// Composite score for one run under this engine's weights.
    pub fn composite_score(&self, summary: &RunSummary) -> f64 {
        self.weights
            .composite(summary.pass_rate, summary.mean_score(), summary.error_rate)
    }

    fn rank_entries(&self, summaries: &[&RunSummary]) -> Vec<RankedRun> {
        let mut entries: Vec<RankedRun> = summaries
            .iter()
            .map(|summary| {
                let scores = summary.all_scores();
                let interval = stats::normal_ci(&scores, self.confidence);
                RankedRun {
                    rank: 0,
                    label: summary.label.clone(),
                    composite_score: self.composite_score(summary),
                    pass_rate: summary.pass_rate,
                    mean_score: summary.mean_score(),
                    error_rate: summary.error_rate,
                    insufficient_data: interval.is_none(),
                    confidence_interval: interval,
                }
            })
            .collect();

        // Composite descending, ties by pass rate descending then error
        // rate ascending. The sort is stable, so fully tied runs keep
        // their input order.
        entries.sort_by(|a, b| {
            b.composite_score
                .total_cmp(&a.composite_score)
                .then(b.pass_rate.total_cmp(&a.pass_rate))
                .then(a.error_rate.total_cmp(&b.error_rate))
        });
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.rank = index + 1;
        }
        entries
    }

    fn compare_shared_metrics(&self, a: &RunSummary, b: &RunSummary) -> Vec<MetricComparison> {
        let metrics_a: BTreeSet<&str> = a.metric_names().collect();
        let metrics_b: BTreeSet<&str> = b.metric_names().collect();

        metrics_a
            .intersection(&metrics_b)
            .map(|metric| self.compare_metric(metric, a, b))
            .collect()
    }

    fn compare_metric(&self, metric: &str, a: &RunSummary, b: &RunSummary) -> MetricComparison {
        let scores_a = a.scores_for(metric);
        let scores_b = b.scores_for(metric);

        let mut score_tests = Vec::new();
        if let Some(outcome) = stats::welch_t_test(&scores_a, &scores_b) {
            score_tests.push(self.report("welch_t", outcome));
        }
        if let Some(outcome) = stats::mann_whitney_u(&scores_a, &scores_b) {
            score_tests.push(self.report("mann_whitney_u", outcome));
        }

        let (pass_a, total_a) = a.pass_counts_for(metric);
        let (pass_b, total_b) = b.pass_counts_for(metric);
        let (fail_a, fail_b) = (total_a - pass_a, total_b - pass_b);

        let pass_rate_test = if total_a == 0 || total_b == 0 {
            None
        } else if stats::min_expected_cell(pass_a, fail_a, pass_b, fail_b)
            < stats::SMALL_SAMPLE_CELL_THRESHOLD
        {
            stats::fisher_exact_2x2(pass_a, fail_a, pass_b, fail_b)
                .map(|outcome| self.report("fisher_exact", outcome))
        } else {
            stats::chi_square_2x2(pass_a, fail_a, pass_b, fail_b)
                .map(|outcome| self.report("chi_square", outcome))
        };

        MetricComparison {
            metric: metric.to_string(),
            run_a: a.label.clone(),
            run_b: b.label.clone(),
            samples_a: scores_a.len(),
            samples_b: scores_b.len(),
            mean_a: stats::mean(&scores_a),
            mean_b: stats::mean(&scores_b),
            score_tests,
            pass_rate_test,
        }
    }

    fn report(&self, test: &str, outcome: TestOutcome) -> SignificanceTest {
        SignificanceTest {
            test: test.to_string(),
            statistic: outcome.statistic,
            p_value: outcome.p_value,
            significant: outcome.p_value < self.alpha,
        }
    }
}
