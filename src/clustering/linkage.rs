//! Linkage matrix and flat-cluster extraction.
//!
//! Node ids follow the usual convention: leaves are `0..n`, the node created
//! by step `i` is `n + i`.

use kodama::Dendrogram;
use serde::{Deserialize, Serialize};

use super::ClusteringError;
use crate::store::{Column, StoreError, Table};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkageStep {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub leaf_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkageMatrix {
    n_observations: usize,
    steps: Vec<LinkageStep>,
}

impl LinkageMatrix {
    /// # Errors
    /// [`ClusteringError::InvalidLinkage`] when the steps do not form one tree
    /// over `n_observations` leaves.
    pub fn new(n_observations: usize, steps: Vec<LinkageStep>) -> Result<Self, ClusteringError> {
        if n_observations > 0 && steps.len() != n_observations - 1 {
            return Err(ClusteringError::InvalidLinkage(format!(
                "{} steps for {n_observations} observations",
                steps.len()
            )));
        }
        for (i, step) in steps.iter().enumerate() {
            let limit = n_observations + i;
            if step.left >= limit || step.right >= limit || step.left == step.right {
                return Err(ClusteringError::InvalidLinkage(format!(
                    "step {i} references ({}, {}) before it exists",
                    step.left, step.right
                )));
            }
        }
        Ok(Self {
            n_observations,
            steps,
        })
    }

    /// Builds the matrix from merge children, counting descendant leaves.
    ///
    /// # Errors
    /// Same as [`LinkageMatrix::new`].
    pub fn from_children(
        n_observations: usize,
        children: &[(usize, usize)],
        distances: &[f64],
    ) -> Result<Self, ClusteringError> {
        if children.len() != distances.len() {
            return Err(ClusteringError::InvalidLinkage(format!(
                "{} merges but {} distances",
                children.len(),
                distances.len()
            )));
        }
        let mut counts: Vec<usize> = Vec::with_capacity(children.len());
        let leaves = |node: usize, counts: &[usize]| -> usize {
            if node < n_observations {
                1
            } else {
                counts.get(node - n_observations).copied().unwrap_or(0)
            }
        };
        let mut steps = Vec::with_capacity(children.len());
        for (&(left, right), &distance) in children.iter().zip(distances) {
            let leaf_count = leaves(left, &counts) + leaves(right, &counts);
            counts.push(leaf_count);
            steps.push(LinkageStep {
                left,
                right,
                distance,
                leaf_count,
            });
        }
        Self::new(n_observations, steps)
    }

    /// # Errors
    /// Same as [`LinkageMatrix::new`].
    pub fn from_dendrogram(dendrogram: &Dendrogram<f64>) -> Result<Self, ClusteringError> {
        let children: Vec<(usize, usize)> = dendrogram
            .steps()
            .iter()
            .map(|step| (step.cluster1, step.cluster2))
            .collect();
        let distances: Vec<f64> = dendrogram
            .steps()
            .iter()
            .map(|step| step.dissimilarity)
            .collect();
        Self::from_children(dendrogram.observations(), &children, &distances)
    }

    #[must_use]
    pub fn n_observations(&self) -> usize {
        self.n_observations
    }

    #[must_use]
    pub fn steps(&self) -> &[LinkageStep] {
        &self.steps
    }

    #[must_use]
    pub fn distances(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.distance).collect()
    }

    /// Cuts the top `k - 1` merges and labels the remaining subtrees.
    ///
    /// Labels start at 1 and are assigned in depth-first pre-order (left child
    /// first), so a fixed matrix always yields the same labels for a given `k`.
    ///
    /// # Errors
    /// [`ClusteringError::InvalidK`] unless `1 <= k <= n_observations`.
    pub fn flat_cluster(&self, k: usize) -> Result<Vec<usize>, ClusteringError> {
        let n = self.n_observations;
        if k == 0 || k > n {
            return Err(ClusteringError::InvalidK { k, n });
        }
        let mut labels = vec![0; n];
        if n == 1 {
            labels[0] = 1;
            return Ok(labels);
        }
        // 最後の k-1 回のマージを切る
        let first_cut = n - k;
        let is_cut = |node: usize| node >= n && node - n >= first_cut;

        let mut next_label = 0;
        let mut stack = vec![n + self.steps.len() - 1];
        while let Some(node) = stack.pop() {
            if is_cut(node) {
                let step = &self.steps[node - n];
                stack.push(step.right);
                stack.push(step.left);
                continue;
            }
            next_label += 1;
            let mut members = vec![node];
            while let Some(member) = members.pop() {
                if member < n {
                    labels[member] = next_label;
                } else {
                    let step = &self.steps[member - n];
                    members.push(step.right);
                    members.push(step.left);
                }
            }
        }
        Ok(labels)
    }

    /// # Errors
    /// Table assembly fails.
    pub fn to_table(&self) -> Result<Table, StoreError> {
        let index = |f: fn(&LinkageStep) -> usize| {
            Column::Int64(self.steps.iter().map(|s| i64::try_from(f(s)).ok()).collect())
        };
        Table::new()
            .with_column("left", index(|s| s.left))?
            .with_column("right", index(|s| s.right))?
            .with_column(
                "distance",
                Column::Float64(self.steps.iter().map(|s| Some(s.distance)).collect()),
            )?
            .with_column("leaf_count", index(|s| s.leaf_count))
    }

    /// # Errors
    /// Missing or null columns, or an inconsistent tree.
    pub fn from_table(table: &Table) -> Result<Self, ClusteringError> {
        let ints = |name: &str| -> Result<Vec<usize>, ClusteringError> {
            table
                .i64_values(name)?
                .into_iter()
                .map(|v| {
                    v.and_then(|v| usize::try_from(v).ok())
                        .ok_or_else(|| ClusteringError::InvalidLinkage(format!("bad {name} value")))
                })
                .collect()
        };
        let left = ints("left")?;
        let right = ints("right")?;
        let distances: Vec<f64> = table
            .f64_values("distance")?
            .into_iter()
            .map(|v| v.ok_or_else(|| ClusteringError::InvalidLinkage("null distance".into())))
            .collect::<Result<_, _>>()?;
        let children: Vec<(usize, usize)> = left.into_iter().zip(right).collect();
        Self::from_children(children.len() + 1, &children, &distances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kodama::{Method, linkage};

    fn sample() -> LinkageMatrix {
        // leaves 0,1 merge first, then 2,3, then both pairs, then leaf 4.
        LinkageMatrix::from_children(5, &[(0, 1), (2, 3), (5, 6), (4, 7)], &[0.1, 0.2, 0.5, 0.9])
            .expect("linkage")
    }

    #[test]
    fn leaf_counts_accumulate() {
        let counts: Vec<usize> = sample().steps().iter().map(|s| s.leaf_count).collect();
        assert_eq!(counts, vec![2, 2, 4, 5]);
    }

    #[test]
    fn flat_cluster_labels_follow_preorder() {
        let m = sample();
        assert_eq!(m.flat_cluster(1).expect("k=1"), vec![1, 1, 1, 1, 1]);
        assert_eq!(m.flat_cluster(2).expect("k=2"), vec![2, 2, 2, 2, 1]);
        assert_eq!(m.flat_cluster(3).expect("k=3"), vec![2, 2, 3, 3, 1]);
        assert_eq!(m.flat_cluster(5).expect("k=5"), vec![2, 3, 4, 5, 1]);
        assert!(matches!(m.flat_cluster(6), Err(ClusteringError::InvalidK { .. })));
    }

    #[test]
    fn kodama_dendrogram_converts() {
        let mut condensed = vec![0.5, 3.0, 2.0, 3.5, 2.5, 1.0];
        let dendrogram = linkage(&mut condensed, 4, Method::Single);
        let m = LinkageMatrix::from_dendrogram(&dendrogram).expect("linkage");
        assert_eq!(m.steps().len(), 3);
        assert_eq!(m.steps().last().map(|s| s.leaf_count), Some(4));
        let distances = m.distances();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn table_round_trip_preserves_labels() {
        let m = sample();
        let back = LinkageMatrix::from_table(&m.to_table().expect("table")).expect("back");
        for k in 1..=5 {
            assert_eq!(back.flat_cluster(k).expect("k"), m.flat_cluster(k).expect("k"));
        }
    }
}
