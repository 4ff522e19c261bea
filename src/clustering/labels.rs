//! Flat labels at every probed k plus majority ground-truth values.

use std::collections::{BTreeMap, HashMap};

use super::ClusteringError;
use super::linkage::LinkageMatrix;
use crate::store::{Column, StoreError, Table};

#[must_use]
pub fn label_col(k: usize) -> String {
    format!("k_{k:04}_label")
}

#[must_use]
pub fn majority_col(k: usize, truth_col: &str) -> String {
    format!("k_{k:04}_majority_{truth_col}")
}

/// Parses `k_0050_label` into 50.
#[must_use]
pub fn parse_label_col(name: &str) -> Option<usize> {
    name.strip_prefix("k_")?.strip_suffix("_label")?.parse().ok()
}

/// Majority non-null value per row's cluster; ties resolve lexically.
#[must_use]
pub fn majority_by_label(labels: &[usize], truth: &[Option<String>]) -> Vec<Option<String>> {
    let mut counts: HashMap<usize, BTreeMap<&str, usize>> = HashMap::new();
    for (label, value) in labels.iter().zip(truth) {
        if let Some(value) = value {
            *counts.entry(*label).or_default().entry(value.as_str()).or_default() += 1;
        }
    }
    let winners: HashMap<usize, String> = counts
        .into_iter()
        .filter_map(|(label, values)| {
            let mut best: Option<(&str, usize)> = None;
            for (value, count) in values {
                if best.is_none_or(|(_, c)| count > c) {
                    best = Some((value, count));
                }
            }
            best.map(|(value, _)| (label, value.to_string()))
        })
        .collect();
    labels.iter().map(|label| winners.get(label).cloned()).collect()
}

/// Labels at one k.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthLabels {
    pub k: usize,
    pub labels: Vec<usize>,
    /// Ground-truth column → per-row majority value of the row's cluster.
    pub majority: BTreeMap<String, Vec<Option<String>>>,
}

/// Wide per-subreddit label frame, depths ordered by ascending k.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLabels {
    pub ids: Vec<String>,
    pub names: Vec<Option<String>>,
    pub depths: Vec<DepthLabels>,
    pub truths: BTreeMap<String, Vec<Option<String>>>,
}

impl ClusterLabels {
    /// Cuts `linkage` at every usable k (`1 <= k <= n`, deduplicated).
    ///
    /// # Errors
    /// Row count disagrees with the linkage, or no k is usable.
    pub fn from_linkage(
        ids: Vec<String>,
        names: Vec<Option<String>>,
        linkage: &LinkageMatrix,
        ks: &[usize],
        truths: BTreeMap<String, Vec<Option<String>>>,
    ) -> Result<Self, ClusteringError> {
        let n = linkage.n_observations();
        if ids.len() != n || names.len() != n || truths.values().any(|t| t.len() != n) {
            return Err(ClusteringError::InvalidLinkage(format!(
                "{} ids for {n} observations",
                ids.len()
            )));
        }
        let mut usable: Vec<usize> = ks.iter().copied().filter(|&k| k >= 1 && k <= n).collect();
        usable.sort_unstable();
        usable.dedup();
        if usable.is_empty() {
            return Err(ClusteringError::InvalidK {
                k: ks.iter().copied().max().unwrap_or(0),
                n,
            });
        }

        let mut depths = Vec::with_capacity(usable.len());
        for k in usable {
            let labels = linkage.flat_cluster(k)?;
            let majority = truths
                .iter()
                .map(|(col, truth)| (col.clone(), majority_by_label(&labels, truth)))
                .collect();
            depths.push(DepthLabels { k, labels, majority });
        }
        Ok(Self {
            ids,
            names,
            depths,
            truths,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn ks(&self) -> Vec<usize> {
        self.depths.iter().map(|d| d.k).collect()
    }

    /// Rows at `indices`, in that order. Majority values are carried, not
    /// recomputed.
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> ClusterLabels {
        let pick = |values: &[Option<String>]| indices.iter().map(|&i| values[i].clone()).collect();
        ClusterLabels {
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            names: pick(&self.names),
            depths: self
                .depths
                .iter()
                .map(|d| DepthLabels {
                    k: d.k,
                    labels: indices.iter().map(|&i| d.labels[i]).collect(),
                    majority: d
                        .majority
                        .iter()
                        .map(|(col, values)| (col.clone(), pick(values)))
                        .collect(),
                })
                .collect(),
            truths: self
                .truths
                .iter()
                .map(|(col, values)| (col.clone(), pick(values)))
                .collect(),
        }
    }

    /// Adds a ground-truth column that the labels do not carry yet and
    /// derives its per-depth majority. Existing columns are left alone.
    #[must_use]
    pub fn with_truth(mut self, col: &str, values: Vec<Option<String>>) -> Self {
        if self.truths.contains_key(col) || values.len() != self.ids.len() {
            return self;
        }
        for depth in &mut self.depths {
            depth
                .majority
                .entry(col.to_string())
                .or_insert_with(|| majority_by_label(&depth.labels, &values));
        }
        self.truths.insert(col.to_string(), values);
        self
    }

    /// The `df_labels` table.
    ///
    /// # Errors
    /// Table assembly fails.
    pub fn to_table(&self) -> Result<Table, StoreError> {
        let mut table = Table::new()
            .with_column(
                "subreddit_id",
                Column::Utf8(self.ids.iter().cloned().map(Some).collect()),
            )?
            .with_column("subreddit_name", Column::Utf8(self.names.clone()))?;
        for (col, values) in &self.truths {
            table.push_column(col.clone(), Column::Utf8(values.clone()))?;
        }
        for depth in &self.depths {
            table.push_column(
                label_col(depth.k),
                Column::Int64(depth.labels.iter().map(|&l| i64::try_from(l).ok()).collect()),
            )?;
            for (col, values) in &depth.majority {
                table.push_column(majority_col(depth.k, col), Column::Utf8(values.clone()))?;
            }
        }
        Ok(table.with_index("subreddit_id"))
    }

    /// Reads a labels table; every `k_NNNN_label` column becomes a depth and
    /// `truth_cols` that are present are carried along.
    ///
    /// # Errors
    /// Missing id column, null labels, or no label columns.
    pub fn from_table(table: &Table, truth_cols: &[String]) -> Result<Self, ClusteringError> {
        let ids: Vec<String> = table
            .utf8("subreddit_id")?
            .iter()
            .map(|v| {
                v.clone()
                    .ok_or_else(|| ClusteringError::InvalidLinkage("null subreddit_id".into()))
            })
            .collect::<Result<_, _>>()?;
        let names = match table.utf8_opt("subreddit_name")? {
            Some(values) => values.to_vec(),
            None => vec![None; ids.len()],
        };
        let mut truths = BTreeMap::new();
        for col in truth_cols {
            if let Some(values) = table.utf8_opt(col)? {
                truths.insert(col.clone(), values.to_vec());
            }
        }

        let mut ks: Vec<usize> = table
            .column_names()
            .iter()
            .filter_map(|c| parse_label_col(c))
            .collect();
        ks.sort_unstable();
        if ks.is_empty() {
            return Err(ClusteringError::InvalidK { k: 0, n: ids.len() });
        }
        let mut depths = Vec::with_capacity(ks.len());
        for k in ks {
            let labels: Vec<usize> = table
                .i64_values(&label_col(k))?
                .into_iter()
                .map(|v| {
                    v.and_then(|v| usize::try_from(v).ok()).ok_or_else(|| {
                        ClusteringError::InvalidLinkage(format!("null label at k={k}"))
                    })
                })
                .collect::<Result<_, _>>()?;
            let mut majority = BTreeMap::new();
            for col in truth_cols {
                let name = majority_col(k, col);
                if let Some(values) = table.utf8_opt(&name)? {
                    majority.insert(col.clone(), values.to_vec());
                } else if let Some(truth) = truths.get(col) {
                    majority.insert(col.clone(), majority_by_label(&labels, truth));
                }
            }
            depths.push(DepthLabels { k, labels, majority });
        }
        Ok(Self {
            ids,
            names,
            depths,
            truths,
        })
    }
}
