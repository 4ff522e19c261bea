//! Random-projection forest for approximate nearest neighbors.
//!
//! Each tree splits on the hyperplane equidistant from two sampled items;
//! queries walk all trees through one priority queue ordered by margin and
//! rerank the collected candidates exactly. With the angular metric items are
//! stored unit-normalized, so the euclidean distance is `sqrt(2 - 2 cos)`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::dense::l2_normalize;
use crate::store::{Column, StoreError, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnMetric {
    Angular,
    Euclidean,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Vec<usize>),
    Split {
        normal: Vec<f32>,
        offset: f32,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeighborRow {
    pub seed_ix: usize,
    pub nn_ix: usize,
    pub distance: f32,
    /// 1 is the closest non-self item.
    pub distance_rank: usize,
    /// Only defined for the angular metric.
    pub cosine_similarity: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct AnnIndex {
    metric: AnnMetric,
    items: Array2<f32>,
    trees: Vec<Tree>,
    leaf_size: usize,
}

fn dot(a: ArrayView1<'_, f32>, b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn squared_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    priority: f32,
    tree: usize,
    node: usize,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.tree.cmp(&self.tree))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl AnnIndex {
    /// Builds `n_trees` trees; tree `t` draws from `StdRng::seed_from_u64(seed + t)`.
    #[must_use]
    pub fn build(
        vectors: ArrayView2<'_, f32>,
        metric: AnnMetric,
        n_trees: usize,
        seed: u64,
    ) -> Self {
        let items = match metric {
            AnnMetric::Angular => l2_normalize(vectors),
            AnnMetric::Euclidean => vectors.to_owned(),
        };
        let leaf_size = (items.ncols() + 2).max(16);
        let trees = (0..n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                build_tree(&items, leaf_size, &mut rng)
            })
            .collect();
        Self {
            metric,
            items,
            trees,
            leaf_size,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.nrows() == 0
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn metric(&self) -> AnnMetric {
        self.metric
    }

    /// `1 - d²/2` for the angular metric.
    #[must_use]
    pub fn cosine_from_distance(&self, distance: f32) -> Option<f32> {
        match self.metric {
            AnnMetric::Angular => Some(1.0 - distance * distance / 2.0),
            AnnMetric::Euclidean => None,
        }
    }

    /// Up to `k` items closest to stored item `item_ix`, nearest first.
    /// Ties in distance break on the lower index.
    #[must_use]
    pub fn nearest(&self, item_ix: usize, k: usize, search_k: Option<usize>) -> Vec<(usize, f32)> {
        if item_ix >= self.len() || k == 0 {
            return Vec::new();
        }
        let query = self.items.row(item_ix);
        let search_k = search_k.unwrap_or(self.trees.len() * k).max(k);

        let mut heap: BinaryHeap<Pending> = (0..self.trees.len())
            .map(|tree| Pending {
                priority: f32::INFINITY,
                tree,
                node: self.trees[tree].root,
            })
            .collect();
        let mut candidates: Vec<usize> = Vec::new();
        while candidates.len() < search_k {
            let Some(Pending { priority, tree, node }) = heap.pop() else {
                break;
            };
            match &self.trees[tree].nodes[node] {
                Node::Leaf(members) => candidates.extend(members.iter().copied()),
                Node::Split {
                    normal,
                    offset,
                    left,
                    right,
                } => {
                    let margin = dot(query, normal) + offset;
                    heap.push(Pending {
                        priority: priority.min(margin),
                        tree,
                        node: *right,
                    });
                    heap.push(Pending {
                        priority: priority.min(-margin),
                        tree,
                        node: *left,
                    });
                }
            }
        }

        let mut seen = HashSet::with_capacity(candidates.len());
        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .filter(|ix| seen.insert(*ix))
            .map(|ix| (ix, squared_distance(query, self.items.row(ix)).max(0.0).sqrt()))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// `k` neighbors of `item_ix` excluding itself; queries `k + 1` internally.
    #[must_use]
    pub fn top_n(
        &self,
        item_ix: usize,
        k: usize,
        search_k: Option<usize>,
        include_distances: bool,
    ) -> (Vec<usize>, Option<Vec<f32>>) {
        let mut found = self.nearest(item_ix, k + 1, search_k);
        found.retain(|(ix, _)| *ix != item_ix);
        found.truncate(k);
        let ids = found.iter().map(|(ix, _)| *ix).collect();
        let distances = include_distances.then(|| found.iter().map(|(_, d)| *d).collect());
        (ids, distances)
    }

    /// Neighbors of every item as one long frame.
    #[must_use]
    pub fn top_n_all_fast(&self, k: usize, search_k: Option<usize>) -> Vec<NeighborRow> {
        (0..self.len())
            .into_par_iter()
            .flat_map_iter(|seed_ix| {
                let (ids, distances) = self.top_n(seed_ix, k, search_k, true);
                let distances = distances.unwrap_or_default();
                ids.into_iter()
                    .zip(distances)
                    .enumerate()
                    .map(|(rank, (nn_ix, distance))| NeighborRow {
                        seed_ix,
                        nn_ix,
                        distance,
                        distance_rank: rank + 1,
                        cosine_similarity: self.cosine_from_distance(distance),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[must_use]
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }
}

fn build_tree(items: &Array2<f32>, leaf_size: usize, rng: &mut StdRng) -> Tree {
    let mut nodes: Vec<Node> = Vec::new();
    // (node slot, members)
    let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();
    nodes.push(Node::Leaf(Vec::new()));
    stack.push((0, (0..items.nrows()).collect()));

    while let Some((slot, members)) = stack.pop() {
        if members.len() <= leaf_size {
            nodes[slot] = Node::Leaf(members);
            continue;
        }
        let (normal, offset) = sample_hyperplane(items, &members, rng);
        let mut left = Vec::new();
        let mut right = Vec::new();
        for &ix in &members {
            if dot(items.row(ix), &normal) + offset > 0.0 {
                right.push(ix);
            } else {
                left.push(ix);
            }
        }
        if left.is_empty() || right.is_empty() {
            // 同一点が多い場合はランダムに二分する
            left.clear();
            right.clear();
            for &ix in &members {
                if rng.random_bool(0.5) {
                    right.push(ix);
                } else {
                    left.push(ix);
                }
            }
            if left.is_empty() || right.is_empty() {
                let mid = members.len() / 2;
                left = members[..mid].to_vec();
                right = members[mid..].to_vec();
            }
        }
        let left_slot = nodes.len();
        nodes.push(Node::Leaf(Vec::new()));
        let right_slot = nodes.len();
        nodes.push(Node::Leaf(Vec::new()));
        nodes[slot] = Node::Split {
            normal,
            offset,
            left: left_slot,
            right: right_slot,
        };
        stack.push((left_slot, left));
        stack.push((right_slot, right));
    }
    Tree { nodes, root: 0 }
}

fn sample_hyperplane(items: &Array2<f32>, members: &[usize], rng: &mut StdRng) -> (Vec<f32>, f32) {
    let i = members[rng.random_range(0..members.len())];
    let mut j = members[rng.random_range(0..members.len())];
    if i == j {
        j = members[(members.iter().position(|&m| m == i).unwrap_or(0) + 1) % members.len()];
    }
    let (a, b) = (items.row(i), items.row(j));
    let normal: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    let midpoint: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect();
    let offset = -normal.iter().zip(&midpoint).map(|(n, m)| n * m).sum::<f32>();
    (normal, offset)
}

/// # Errors
/// Table assembly fails.
pub fn neighbors_to_table(rows: &[NeighborRow], ids: &[String]) -> Result<Table, StoreError> {
    let ix = |f: fn(&NeighborRow) -> usize| {
        Column::Int64(rows.iter().map(|r| i64::try_from(f(r)).ok()).collect())
    };
    let id = |f: fn(&NeighborRow) -> usize| {
        Column::Utf8(rows.iter().map(|r| ids.get(f(r)).cloned()).collect())
    };
    Table::new()
        .with_column("seed_ix", ix(|r| r.seed_ix))?
        .with_column("nn_ix", ix(|r| r.nn_ix))?
        .with_column("seed_id", id(|r| r.seed_ix))?
        .with_column("nn_id", id(|r| r.nn_ix))?
        .with_column("distance", Column::Float32(rows.iter().map(|r| Some(r.distance)).collect()))?
        .with_column("distance_rank", ix(|r| r.distance_rank))?
        .with_column(
            "cosine_similarity",
            Column::Float32(rows.iter().map(|r| r.cosine_similarity).collect()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::dense::cosine_similarity;

    fn points(n: usize) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(7);
        Array2::from_shape_fn((n, 4), |_| rng.random_range(-1.0..1.0))
    }

    #[test]
    fn rank_one_matches_dense_argmax() {
        let data = points(60);
        let index = AnnIndex::build(data.view(), AnnMetric::Angular, 10, 3);
        let sim = cosine_similarity(data.view());
        for seed in 0..data.nrows() {
            let (ids, _) = index.top_n(seed, 1, Some(10_000), false);
            let best = (0..data.nrows())
                .filter(|&j| j != seed)
                .max_by(|&a, &b| sim[[seed, a]].total_cmp(&sim[[seed, b]]).then(b.cmp(&a)))
                .expect("neighbor");
            assert_eq!(ids, vec![best], "seed {seed}");
        }
    }

    #[test]
    fn all_fast_rows_are_ranked_and_exclude_self() {
        let data = points(30);
        let index = AnnIndex::build(data.view(), AnnMetric::Angular, 5, 1);
        let rows = index.top_n_all_fast(3, Some(10_000));
        assert_eq!(rows.len(), 90);
        for row in &rows {
            assert_ne!(row.seed_ix, row.nn_ix);
            let cos = row.cosine_similarity.expect("angular");
            assert!((cos - (1.0 - row.distance * row.distance / 2.0)).abs() < 1e-6);
        }
        assert!(rows.iter().filter(|r| r.seed_ix == 0).map(|r| r.distance_rank).eq(1..=3));
    }

    #[test]
    fn build_is_deterministic_for_a_seed() {
        let data = points(100);
        let a = AnnIndex::build(data.view(), AnnMetric::Euclidean, 4, 11);
        let b = AnnIndex::build(data.view(), AnnMetric::Euclidean, 4, 11);
        for seed in [0, 17, 99] {
            assert_eq!(a.nearest(seed, 5, None), b.nearest(seed, 5, None));
        }
    }
}
