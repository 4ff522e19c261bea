//! Supervised clustering metrics against ground-truth columns.
//!
//! 自然対数で計算する。AMI の正規化は算術平均。

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use super::labels::{ClusterLabels, label_col};
use crate::store::{Column, StoreError, Table};
use crate::util::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisedMetric {
    AdjustedMutualInfo,
    AdjustedRand,
    Homogeneity,
}

impl SupervisedMetric {
    pub const ALL: [SupervisedMetric; 3] = [
        SupervisedMetric::AdjustedMutualInfo,
        SupervisedMetric::AdjustedRand,
        SupervisedMetric::Homogeneity,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SupervisedMetric::AdjustedMutualInfo => "adjusted_mutual_info_score",
            SupervisedMetric::AdjustedRand => "adjusted_rand_score",
            SupervisedMetric::Homogeneity => "homogeneity_score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub predicted_col: String,
    pub truth_col: String,
    pub k: usize,
    pub metric: SupervisedMetric,
    pub value: f64,
}

/// Rows for every (k, truth column, metric) plus the failures that were
/// replaced by zero.
#[derive(Debug, Default)]
pub struct SupervisedReport {
    pub rows: Vec<MetricRow>,
    pub failures: Vec<PipelineError>,
}

/// Contingency counts between two densely encoded labelings.
struct Contingency {
    n: usize,
    /// `(class, cluster, count)` for every non-empty cell.
    cells: Vec<(usize, usize, usize)>,
    row_sums: Vec<usize>,
    col_sums: Vec<usize>,
}

impl Contingency {
    fn new(truth: &[usize], pred: &[usize]) -> Self {
        let mut pairs: HashMap<(usize, usize), usize> = HashMap::new();
        for (t, p) in truth.iter().zip(pred) {
            *pairs.entry((*t, *p)).or_default() += 1;
        }
        let classes = truth.iter().max().map_or(0, |m| m + 1);
        let clusters = pred.iter().max().map_or(0, |m| m + 1);
        let mut row_sums = vec![0; classes];
        let mut col_sums = vec![0; clusters];
        let mut cells: Vec<(usize, usize, usize)> = pairs
            .into_iter()
            .map(|((i, j), count)| {
                row_sums[i] += count;
                col_sums[j] += count;
                (i, j, count)
            })
            .collect();
        cells.sort_unstable();
        Self {
            n: truth.len().min(pred.len()),
            cells,
            row_sums,
            col_sums,
        }
    }
}

fn comb2(n: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = n as f64;
    n * (n - 1.0) / 2.0
}

#[allow(clippy::cast_precision_loss)]
fn entropy(counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Indexes labels densely so contingency rows and columns line up.
fn encode<T: Eq + std::hash::Hash + Clone>(values: &[T]) -> Vec<usize> {
    let mut ix: HashMap<T, usize> = HashMap::new();
    values
        .iter()
        .map(|v| {
            let next = ix.len();
            *ix.entry(v.clone()).or_insert(next)
        })
        .collect()
}

fn prepared(truth: &[String], pred: &[usize]) -> Contingency {
    Contingency::new(&encode(truth), &encode(pred))
}

/// Adjusted Rand index.
#[must_use]
pub fn adjusted_rand(truth: &[String], pred: &[usize]) -> f64 {
    let c = prepared(truth, pred);
    let (classes, clusters) = (c.row_sums.len(), c.col_sums.len());
    if classes == clusters && (classes <= 1 || classes == c.n) {
        return 1.0;
    }
    let sum_cells: f64 = c.cells.iter().map(|&(_, _, v)| comb2(v)).sum();
    let sum_a: f64 = c.row_sums.iter().map(|&v| comb2(v)).sum();
    let sum_b: f64 = c.col_sums.iter().map(|&v| comb2(v)).sum();
    let expected = sum_a * sum_b / comb2(c.n);
    let max = (sum_a + sum_b) / 2.0;
    let denominator = max - expected;
    if denominator == 0.0 {
        return f64::NAN;
    }
    (sum_cells - expected) / denominator
}

/// Homogeneity: each cluster holds members of a single class.
#[must_use]
pub fn homogeneity(truth: &[String], pred: &[usize]) -> f64 {
    let c = prepared(truth, pred);
    let h_truth = entropy(&c.row_sums, c.n);
    if h_truth == 0.0 {
        return 1.0;
    }
    let mi = mutual_info(&c);
    mi / h_truth
}

#[allow(clippy::cast_precision_loss)]
fn mutual_info(c: &Contingency) -> f64 {
    let n = c.n as f64;
    c.cells
        .iter()
        .map(|&(i, j, nij)| {
            let (a, b) = (c.row_sums[i], c.col_sums[j]);
            let nij = nij as f64;
            (nij / n) * (n * nij / (a as f64 * b as f64)).ln()
        })
        .sum::<f64>()
        .max(0.0)
}

/// `ln(k!)` for `k = 0..=n`.
fn log_factorials(n: usize) -> Vec<f64> {
    let mut table = Vec::with_capacity(n + 1);
    table.push(0.0);
    let mut acc = 0.0;
    for k in 1..=n {
        #[allow(clippy::cast_precision_loss)]
        {
            acc += (k as f64).ln();
        }
        table.push(acc);
    }
    table
}

/// Expected mutual information under the hypergeometric model.
#[allow(clippy::cast_precision_loss)]
fn expected_mutual_info(c: &Contingency) -> f64 {
    let n = c.n;
    let nf = n as f64;
    let lf = log_factorials(n);
    c.row_sums
        .par_iter()
        .map(|&a| {
            let mut total = 0.0;
            for &b in &c.col_sums {
                let start = (a + b).saturating_sub(n).max(1);
                let end = a.min(b);
                for nij in start..=end {
                    let nijf = nij as f64;
                    let term = (nijf / nf) * (nf * nijf / (a as f64 * b as f64)).ln();
                    let log_p = lf[a] + lf[b] + lf[n - a] + lf[n - b]
                        - lf[n]
                        - lf[nij]
                        - lf[a - nij]
                        - lf[b - nij]
                        - lf[n + nij - a - b];
                    total += term * log_p.exp();
                }
            }
            total
        })
        .sum()
}

/// Adjusted mutual information with arithmetic normalization.
#[must_use]
pub fn adjusted_mutual_info(truth: &[String], pred: &[usize]) -> f64 {
    let c = prepared(truth, pred);
    let (classes, clusters) = (c.row_sums.len(), c.col_sums.len());
    if (classes == 1 && clusters == 1) || (classes == 0 && clusters == 0) {
        return 1.0;
    }
    let mi = mutual_info(&c);
    let emi = expected_mutual_info(&c);
    let normalizer = (entropy(&c.row_sums, c.n) + entropy(&c.col_sums, c.n)) / 2.0;
    let mut denominator = normalizer - emi;
    denominator = if denominator < 0.0 {
        denominator.min(-f64::EPSILON)
    } else {
        denominator.max(f64::EPSILON)
    };
    (mi - emi) / denominator
}

fn score(metric: SupervisedMetric, truth: &[String], pred: &[usize]) -> f64 {
    match metric {
        SupervisedMetric::AdjustedMutualInfo => adjusted_mutual_info(truth, pred),
        SupervisedMetric::AdjustedRand => adjusted_rand(truth, pred),
        SupervisedMetric::Homogeneity => homogeneity(truth, pred),
    }
}

/// Scores every depth against every ground-truth column on its non-null rows.
/// Undefined values become 0 and are reported as [`PipelineError::MetricFailure`].
#[must_use]
pub fn evaluate(labels: &ClusterLabels) -> SupervisedReport {
    let mut report = SupervisedReport::default();
    for depth in &labels.depths {
        let predicted_col = label_col(depth.k);
        for (truth_col, truth) in &labels.truths {
            let (t, p): (Vec<String>, Vec<usize>) = truth
                .iter()
                .zip(&depth.labels)
                .filter_map(|(t, p)| t.clone().map(|t| (t, *p)))
                .unzip();
            for metric in SupervisedMetric::ALL {
                let raw = if t.is_empty() { f64::NAN } else { score(metric, &t, &p) };
                let value = if raw.is_finite() {
                    raw
                } else {
                    let scope = format!("{predicted_col} vs {truth_col}");
                    warn!(
                        metric = metric.as_str(),
                        %scope,
                        non_null = t.len(),
                        "metric undefined; using 0"
                    );
                    report.failures.push(PipelineError::MetricFailure {
                        metric: metric.as_str().to_string(),
                        scope,
                    });
                    0.0
                };
                report.rows.push(MetricRow {
                    predicted_col: predicted_col.clone(),
                    truth_col: truth_col.clone(),
                    k: depth.k,
                    metric,
                    value,
                });
            }
        }
    }
    report
}

/// The `df_supervised_metrics` long table.
///
/// # Errors
/// Table assembly fails.
pub fn metrics_to_table(rows: &[MetricRow]) -> Result<Table, StoreError> {
    let text =
        |f: fn(&MetricRow) -> String| Column::Utf8(rows.iter().map(|r| Some(f(r))).collect());
    Table::new()
        .with_column("predicted_col", text(|r| r.predicted_col.clone()))?
        .with_column("truth_col", text(|r| r.truth_col.clone()))?
        .with_column("k", Column::Int64(rows.iter().map(|r| i64::try_from(r.k).ok()).collect()))?
        .with_column("metric", text(|r| r.metric.as_str().to_string()))?
        .with_column("value", Column::Float64(rows.iter().map(|r| Some(r.value)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[rstest]
    #[case(SupervisedMetric::AdjustedMutualInfo)]
    #[case(SupervisedMetric::AdjustedRand)]
    #[case(SupervisedMetric::Homogeneity)]
    fn perfect_match_scores_one(#[case] metric: SupervisedMetric) {
        let truth = s(&["a", "a", "b", "b", "c", "c"]);
        let pred = [7, 7, 3, 3, 9, 9];
        assert!((score(metric, &truth, &pred) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ari_matches_known_value() {
        // sklearn: adjusted_rand_score([0,0,1,1],[0,0,1,2]) == 0.5714285714285715
        let value = adjusted_rand(&s(&["0", "0", "1", "1"]), &[0, 0, 1, 2]);
        assert!((value - 0.571_428_571_428_571_5).abs() < 1e-9);
    }

    #[test]
    fn splitting_classes_keeps_homogeneity() {
        let value = homogeneity(&s(&["a", "a", "b", "b"]), &[0, 1, 2, 3]);
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn partial_match_lies_between_chance_and_perfect() {
        let value = adjusted_mutual_info(&s(&["0", "0", "1", "1"]), &[0, 0, 1, 2]);
        assert!(value > 0.0 && value < 1.0);
    }

    #[test]
    fn independent_labels_score_near_zero() {
        let truth = s(&["a", "b", "a", "b", "a", "b", "a", "b"]);
        let pred = [0, 0, 1, 1, 0, 0, 1, 1];
        assert!(adjusted_rand(&truth, &pred) <= 0.0 + 1e-9);
        assert!(adjusted_mutual_info(&truth, &pred) < 0.05);
    }
}
