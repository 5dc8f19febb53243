//! Statistical primitives for the comparison engine.
//!
//! Descriptive statistics plus the significance tests the engine selects
//! between: Welch's t-test and Mann-Whitney U for score distributions,
//! chi-squared and Fisher's exact for pass/fail contingency tables, and a
//! normal-approximation confidence interval for mean scores.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Discrete, Hypergeometric, Normal, StudentsT};

/// Statistic and two-sided p-value of one significance test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestOutcome {
    pub statistic: f64,
    pub p_value: f64,
}

/// Confidence interval for a run's mean score, clamped to the score range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
    pub mean: f64,
    /// Confidence level as a fraction, e.g. 0.95.
    pub confidence: f64,
}

impl ConfidenceInterval {
    /// Whether two intervals overlap. Non-overlap at matching confidence
    /// levels indicates a significant difference.
    pub fn overlaps(&self, other: &ConfidenceInterval) -> bool {
        self.low.max(other.low) <= self.high.min(other.high)
    }
}

/// Fewest samples for which an interval is reported; below this the
/// interval is omitted and flagged as insufficient data.
pub const MIN_SAMPLES_FOR_INTERVAL: usize = 2;

/// Expected-cell threshold below which the exact test replaces the
/// chi-squared approximation.
pub const SMALL_SAMPLE_CELL_THRESHOLD: f64 = 5.0;

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

pub fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample variance (ddof = 1); 0.0 below two samples.
pub fn sample_variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (xs.len() - 1) as f64
}

pub fn sample_std(xs: &[f64]) -> f64 {
    sample_variance(xs).sqrt()
}

fn two_sided_normal_p(z: f64) -> f64 {
    // Normal::new with unit parameters cannot fail.
    let normal = Normal::new(0.0, 1.0).expect("unit normal is a valid distribution");
    (2.0 * (1.0 - normal.cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Welch's unequal-variance t-test over two score samples.
///
/// Returns `None` when either sample has fewer than two observations.
/// With zero pooled variance the p-value degenerates to 0 or 1 depending
/// on whether the means differ.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<TestOutcome> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (va, vb) = (sample_variance(a), sample_variance(b));
    let diff = mean(a) - mean(b);
    let se2 = va / na + vb / nb;

    if se2 <= f64::EPSILON {
        return Some(TestOutcome {
            statistic: if diff == 0.0 { 0.0 } else { diff.signum() * f64::INFINITY },
            p_value: if diff == 0.0 { 1.0 } else { 0.0 },
        });
    }

    let t = diff / se2.sqrt();
    // Welch-Satterthwaite degrees of freedom.
    let df = se2 * se2
        / ((va / na) * (va / na) / (na - 1.0) + (vb / nb) * (vb / nb) / (nb - 1.0));
    let dist = StudentsT::new(0.0, 1.0, df.max(1.0))
        .expect("positive degrees of freedom yield a valid t distribution");
    let p = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);
    Some(TestOutcome { statistic: t, p_value: p })
}

/// Average ranks over the concatenated samples, with ties sharing their
/// mean rank. Returns the ranks and the tie-correction term Σ(t³ − t).
fn average_ranks(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut ranks = vec![0.0; values.len()];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let shared = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = shared;
        }
        let t = (j - i + 1) as f64;
        if t > 1.0 {
            tie_term += t * t * t - t;
        }
        i = j + 1;
    }
    (ranks, tie_term)
}

/// Two-sided Mann-Whitney U test using the tie-corrected normal
/// approximation with continuity correction. The reported statistic is
/// the z-score, whose magnitude is symmetric under sample swap.
///
/// Returns `None` when either sample is empty.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Option<TestOutcome> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let n = na + nb;

    let mut pooled = Vec::with_capacity(a.len() + b.len());
    pooled.extend_from_slice(a);
    pooled.extend_from_slice(b);
    let (ranks, tie_term) = average_ranks(&pooled);

    let rank_sum_a: f64 = ranks[..a.len()].iter().sum();
    let u = rank_sum_a - na * (na + 1.0) / 2.0;
    let mu = na * nb / 2.0;
    let sigma2 = na * nb / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));

    if sigma2 <= f64::EPSILON {
        return Some(TestOutcome { statistic: 0.0, p_value: 1.0 });
    }

    let d = u - mu;
    let corrected = if d > 0.0 {
        d - 0.5
    } else if d < 0.0 {
        d + 0.5
    } else {
        0.0
    };
    let z = corrected / sigma2.sqrt();
    Some(TestOutcome { statistic: z, p_value: two_sided_normal_p(z) })
}

/// Smallest expected cell count of the 2×2 table, used to select between
/// the chi-squared approximation and the exact test.
pub fn min_expected_cell(a_pass: usize, a_fail: usize, b_pass: usize, b_fail: usize) -> f64 {
    let row_a = (a_pass + a_fail) as f64;
    let row_b = (b_pass + b_fail) as f64;
    let col_pass = (a_pass + b_pass) as f64;
    let col_fail = (a_fail + b_fail) as f64;
    let total = row_a + row_b;
    if total == 0.0 {
        return 0.0;
    }
    [
        row_a * col_pass,
        row_a * col_fail,
        row_b * col_pass,
        row_b * col_fail,
    ]
    .into_iter()
    .fold(f64::INFINITY, f64::min)
        / total
}

/// Chi-squared test for a 2×2 contingency table, with the Yates
/// continuity correction.
///
/// Returns `None` when any marginal total is zero (the statistic is
/// undefined there).
pub fn chi_square_2x2(
    a_pass: usize,
    a_fail: usize,
    b_pass: usize,
    b_fail: usize,
) -> Option<TestOutcome> {
    let (a, b, c, d) = (a_pass as f64, a_fail as f64, b_pass as f64, b_fail as f64);
    let total = a + b + c + d;
    let (row_a, row_b) = (a + b, c + d);
    let (col_pass, col_fail) = (a + c, b + d);
    if row_a == 0.0 || row_b == 0.0 || col_pass == 0.0 || col_fail == 0.0 {
        return None;
    }

    let numerator = ((a * d - b * c).abs() - total / 2.0).max(0.0);
    let statistic = total * numerator * numerator / (row_a * row_b * col_pass * col_fail);
    let dist = ChiSquared::new(1.0).expect("one degree of freedom is valid");
    let p = (1.0 - dist.cdf(statistic)).clamp(0.0, 1.0);
    Some(TestOutcome { statistic, p_value: p })
}

/// Fisher's exact test for a 2×2 contingency table, two-sided.
///
/// The reported statistic is the odds ratio (infinite when the off
/// diagonal contains a zero).
pub fn fisher_exact_2x2(
    a_pass: usize,
    a_fail: usize,
    b_pass: usize,
    b_fail: usize,
) -> Option<TestOutcome> {
    let population = (a_pass + a_fail + b_pass + b_fail) as u64;
    if population == 0 {
        return None;
    }
    let successes = (a_pass + b_pass) as u64;
    let draws = (a_pass + a_fail) as u64;
    let dist = Hypergeometric::new(population, successes, draws).ok()?;

    let support_low = successes.saturating_sub(population - draws);
    let support_high = successes.min(draws);
    let observed = dist.pmf(a_pass as u64);

    // Two-sided p: total probability of tables no more likely than the
    // observed one. The relative epsilon absorbs floating-point noise in
    // the pmf comparison.
    let cutoff = observed * (1.0 + 1e-7);
    let p: f64 = (support_low..=support_high)
        .map(|k| dist.pmf(k))
        .filter(|&prob| prob <= cutoff)
        .sum();

    let odds_ratio = if a_fail == 0 || b_pass == 0 {
        f64::INFINITY
    } else {
        (a_pass as f64 * b_fail as f64) / (a_fail as f64 * b_pass as f64)
    };
    Some(TestOutcome {
        statistic: odds_ratio,
        p_value: p.clamp(0.0, 1.0),
    })
}

/// Normal-approximation confidence interval over per-unit scores, clamped
/// to the 0.0..=1.0 score range. `None` below [`MIN_SAMPLES_FOR_INTERVAL`]
/// samples.
pub fn normal_ci(scores: &[f64], confidence: f64) -> Option<ConfidenceInterval> {
    if scores.len() < MIN_SAMPLES_FOR_INTERVAL {
        return None;
    }
    let m = mean(scores);
    let se = sample_std(scores) / (scores.len() as f64).sqrt();
    let normal = Normal::new(0.0, 1.0).expect("unit normal is a valid distribution");
    let z = normal.inverse_cdf(0.5 + confidence / 2.0);
    let margin = z * se;
    Some(ConfidenceInterval {
        low: (m - margin).max(0.0),
        high: (m + margin).min(1.0),
        mean: m,
        confidence,
    })
}
