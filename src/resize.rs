//! Dynamic cluster assignment across depths.
//!
//! 各サブレディットに一つの深さ（クラスタ粒度）を割り当てる。

mod nested;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clustering::{ClusterLabels, label_col};
use crate::store::{Column, StoreError, Table};

pub use nested::{TOPIC_MIX_SEPARATOR, nested_col, nested_labels, topic_mix};

pub const CLUSTER_LABEL: &str = "cluster_label";
pub const CLUSTER_LABEL_K: &str = "cluster_label_k";
pub const CLUSTER_MAJORITY_TOPIC: &str = "cluster_majority_primary_topic";
pub const CLUSTER_TOPIC_MIX: &str = "cluster_topic_mix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeStrategy {
    /// Climb from the deepest depth while a cluster has `<= min` members.
    AggregateSmallClusters,
    /// Descend from the root while a cluster has `> 2 * min` members.
    SplitLargeClusters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeOptions {
    /// Ground-truth column whose majority values build the topic columns.
    pub topic_col: String,
    /// First depth (1-based) that contributes to the topic mix.
    pub n_mix_start: usize,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            topic_col: "primary_topic".to_string(),
            n_mix_start: 1,
        }
    }
}

/// Chosen cluster for one subreddit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// 0-based index into the probed depths.
    pub depth: usize,
    pub k: usize,
    pub cluster_label: String,
    pub majority_topic: Option<String>,
    pub topic_mix: Option<String>,
}

impl Assignment {
    /// Label column of the chosen depth, e.g. `k_0050_label`.
    #[must_use]
    pub fn cluster_label_k(&self) -> String {
        label_col(self.k)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicClusters {
    pub ids: Vec<String>,
    pub names: Vec<Option<String>>,
    pub assignments: Vec<Assignment>,
    pub ks: Vec<usize>,
    nested: Vec<Vec<String>>,
}

impl DynamicClusters {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Members per dynamic cluster label.
    #[must_use]
    pub fn cluster_sizes(&self) -> BTreeMap<&str, usize> {
        let mut sizes = BTreeMap::new();
        for a in &self.assignments {
            *sizes.entry(a.cluster_label.as_str()).or_insert(0) += 1;
        }
        sizes
    }

    /// Clusters left with a single member.
    #[must_use]
    pub fn orphan_count(&self) -> usize {
        self.cluster_sizes().values().filter(|&&size| size == 1).count()
    }

    /// Row positions grouped by dynamic cluster, in label order.
    #[must_use]
    pub fn members(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (row, a) in self.assignments.iter().enumerate() {
            members.entry(a.cluster_label.as_str()).or_default().push(row);
        }
        members
    }

    /// Per-subreddit table with every nested depth plus the chosen cluster.
    ///
    /// # Errors
    /// Table assembly fails.
    pub fn to_table(&self) -> Result<Table, StoreError> {
        let mut table = Table::new()
            .with_column("subreddit_id", required_text(&self.ids))?
            .with_column("subreddit_name", Column::Utf8(self.names.clone()))?;
        for (k, column) in self.ks.iter().zip(&self.nested) {
            table.push_column(nested_col(*k), required_text(column))?;
        }
        let text = |f: &dyn Fn(&Assignment) -> Option<String>| {
            Column::Utf8(self.assignments.iter().map(f).collect())
        };
        table.push_column(CLUSTER_LABEL, text(&|a| Some(a.cluster_label.clone())))?;
        table.push_column(CLUSTER_LABEL_K, text(&|a| Some(a.cluster_label_k())))?;
        table.push_column(CLUSTER_MAJORITY_TOPIC, text(&|a| a.majority_topic.clone()))?;
        table.push_column(CLUSTER_TOPIC_MIX, text(&|a| a.topic_mix.clone()))?;
        Ok(table.with_index("subreddit_id"))
    }
}

fn required_text(values: &[String]) -> Column {
    Column::Utf8(values.iter().cloned().map(Some).collect())
}

/// Members per cluster among the rows currently assigned to `depth`.
fn sizes_at<'a>(
    nested: &'a [Vec<String>],
    depth: usize,
    depth_of: &[usize],
) -> HashMap<&'a str, usize> {
    let mut sizes = HashMap::new();
    for (row, d) in depth_of.iter().enumerate() {
        if *d == depth {
            *sizes.entry(nested[depth][row].as_str()).or_insert(0) += 1;
        }
    }
    sizes
}

/// Assigns every subreddit one depth so cluster sizes respect `min_subs`.
///
/// Depths that do not exist are never visited: aggregation stops at the
/// root and splitting stops at the deepest probed k.
#[must_use]
pub fn resize(
    labels: &ClusterLabels,
    strategy: ResizeStrategy,
    min_subs: usize,
    options: &ResizeOptions,
) -> DynamicClusters {
    let nested = nested_labels(labels);
    let n_depths = nested.len();
    let n_rows = labels.len();
    if n_depths == 0 {
        return DynamicClusters {
            ids: labels.ids.clone(),
            names: labels.names.clone(),
            assignments: Vec::new(),
            ks: Vec::new(),
            nested,
        };
    }

    let mut depth_of: Vec<usize> = match strategy {
        ResizeStrategy::AggregateSmallClusters => vec![n_depths - 1; n_rows],
        ResizeStrategy::SplitLargeClusters => vec![0; n_rows],
    };
    match strategy {
        ResizeStrategy::AggregateSmallClusters => {
            for depth in (1..n_depths).rev() {
                let sizes = sizes_at(&nested, depth, &depth_of);
                let mut moved = 0;
                for row in 0..n_rows {
                    if depth_of[row] == depth && sizes[nested[depth][row].as_str()] <= min_subs {
                        depth_of[row] = depth - 1;
                        moved += 1;
                    }
                }
                debug!(k = labels.depths[depth].k, moved, "aggregated small clusters");
            }
        }
        ResizeStrategy::SplitLargeClusters => {
            let ceiling = 2 * min_subs;
            for depth in 0..n_depths - 1 {
                let sizes = sizes_at(&nested, depth, &depth_of);
                let mut moved = 0;
                for row in 0..n_rows {
                    if depth_of[row] == depth && sizes[nested[depth][row].as_str()] > ceiling {
                        depth_of[row] = depth + 1;
                        moved += 1;
                    }
                }
                debug!(k = labels.depths[depth].k, moved, "split large clusters");
            }
        }
    }

    let mix_start = options.n_mix_start.saturating_sub(1);
    let assignments = depth_of
        .iter()
        .enumerate()
        .map(|(row, &depth)| {
            let level = &labels.depths[depth];
            Assignment {
                depth,
                k: level.k,
                cluster_label: nested[depth][row].clone(),
                majority_topic: level
                    .majority
                    .get(&options.topic_col)
                    .and_then(|values| values[row].clone()),
                topic_mix: topic_mix(labels, &options.topic_col, row, mix_start, depth),
            }
        })
        .collect();

    DynamicClusters {
        ids: labels.ids.clone(),
        names: labels.names.clone(),
        assignments,
        ks: labels.ks(),
        nested,
    }
}
