//! Dense cosine similarity and top-N neighbor pairs.

use std::cmp::Ordering;

use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::embedding::EmbeddingFrame;
use crate::store::{Column, StoreError, Table};

/// Rows scaled to unit L2 norm; zero rows stay zero.
#[must_use]
pub fn l2_normalize(vectors: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = vectors.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let norm = row.iter().map(|v| f64::from(*v).powi(2)).sum::<f64>().sqrt();
        if norm > 0.0 {
            #[allow(clippy::cast_possible_truncation)]
            let inv = (1.0 / norm) as f32;
            row.mapv_inplace(|v| v * inv);
        }
    }
    out
}

/// Pairwise cosine similarity. The diagonal is 1 for every non-zero row.
#[must_use]
pub fn cosine_similarity(vectors: ArrayView2<'_, f32>) -> Array2<f32> {
    let normalized = l2_normalize(vectors);
    let mut sim = normalized.dot(&normalized.t());
    for (i, row) in normalized.axis_iter(Axis(0)).enumerate() {
        if row.iter().any(|v| *v != 0.0) {
            sim[[i, i]] = 1.0;
        }
    }
    sim.mapv_inplace(|v| v.clamp(-1.0, 1.0));
    sim
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityPair {
    pub sub_a: String,
    pub sub_b: String,
    pub cosine_similarity: f32,
}

/// Top `top_n` most similar other rows per source row, most similar first.
///
/// `labels` replaces the frame ids in the output (e.g. subreddit names).
#[must_use]
pub fn top_pairs(
    frame: &EmbeddingFrame,
    labels: Option<&[String]>,
    top_n: usize,
) -> Vec<SimilarityPair> {
    let sim = cosine_similarity(frame.vectors());
    let labels = labels.filter(|l| l.len() == frame.len()).unwrap_or(frame.ids());
    (0..frame.len())
        .into_par_iter()
        .flat_map_iter(|a| {
            let mut others: Vec<(usize, f32)> = (0..frame.len())
                .filter(|&b| b != a)
                .map(|b| (b, sim[[a, b]]))
                .collect();
            others.sort_by(|x, y| {
                y.1.partial_cmp(&x.1)
                    .unwrap_or(Ordering::Equal)
                    .then(x.0.cmp(&y.0))
            });
            others.truncate(top_n);
            others
                .into_iter()
                .map(|(b, value)| SimilarityPair {
                    sub_a: labels[a].clone(),
                    sub_b: labels[b].clone(),
                    cosine_similarity: value,
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Long frame `(sub_a, sub_b, cosine_distance)` where the distance is `1 - similarity`.
/// Row order is kept, so the nearest pair of each source still comes first.
///
/// # Errors
/// Table assembly fails.
pub fn pairs_to_table(pairs: &[SimilarityPair]) -> Result<Table, StoreError> {
    let text = |f: fn(&SimilarityPair) -> &str| {
        Column::Utf8(pairs.iter().map(|p| Some(f(p).to_string())).collect())
    };
    Table::new()
        .with_column("sub_a", text(|p| p.sub_a.as_str()))?
        .with_column("sub_b", text(|p| p.sub_b.as_str()))?
        .with_column(
            "cosine_distance",
            Column::Float32(pairs.iter().map(|p| Some(1.0 - p.cosine_similarity)).collect()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn similarity_is_symmetric_with_unit_diagonal() {
        let v = array![[1.0_f32, 0.0, 2.0], [0.5, 0.5, 0.0], [-1.0, 3.0, 1.0]];
        let sim = cosine_similarity(v.view());
        for i in 0..3 {
            assert!((sim[[i, i]] - 1.0).abs() < f32::EPSILON);
            for j in 0..3 {
                assert!((sim[[i, j]] - sim[[j, i]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn pairs_exclude_self_and_respect_top_n() {
        let frame = EmbeddingFrame::new(
            "subs",
            "subreddit_id",
            vec!["a".into(), "b".into(), "c".into()],
            array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]],
        )
        .expect("frame");
        let pairs = top_pairs(&frame, None, 1);
        assert_eq!(pairs.len(), 3);
        assert!(pairs.iter().all(|p| p.sub_a != p.sub_b));
        assert_eq!(pairs[0].sub_b, "b");
        assert_eq!(pairs[2].sub_b, "b");
    }

    #[test]
    fn pair_table_carries_distance_not_similarity() {
        let pairs = vec![
            SimilarityPair {
                sub_a: "a".into(),
                sub_b: "b".into(),
                cosine_similarity: 0.75,
            },
            SimilarityPair {
                sub_a: "a".into(),
                sub_b: "c".into(),
                cosine_similarity: -0.5,
            },
        ];
        let table = pairs_to_table(&pairs).expect("table");
        assert!(!table.has_column("cosine_similarity"));
        let distances = table.f64_values("cosine_distance").expect("distance");
        assert_eq!(distances, vec![Some(0.25), Some(1.5)]);
    }
}
