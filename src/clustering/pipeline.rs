//! normalize → reduce → agglomerative cluster.

use kodama::{Method, linkage};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ClusteringError;
use super::linkage::LinkageMatrix;
use super::svd::truncated_svd;
use crate::config::{ReduceConfig, RunConfig};
use crate::similarity::l2_normalize;

pub const AGGLOMERATIVE: &str = "AgglomerativeClustering";
const MIN_OBSERVATIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkageMethod {
    Ward,
    Average,
    Complete,
    Single,
}

impl LinkageMethod {
    fn method(self) -> Method {
        match self {
            LinkageMethod::Ward => Method::Ward,
            LinkageMethod::Average => Method::Average,
            LinkageMethod::Complete => Method::Complete,
            LinkageMethod::Single => Method::Single,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Euclidean,
    Cosine,
}

/// Configured clustering pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPipeline {
    normalize: bool,
    reduce: Option<ReduceConfig>,
    linkage: LinkageMethod,
    affinity: Affinity,
    seed: u64,
}

/// Result of [`ClusterPipeline::fit`].
#[derive(Debug, Clone)]
pub struct FittedClustering {
    pub linkage: LinkageMatrix,
    /// Feature count seen by the clustering step.
    pub fitted_dim: usize,
}

impl ClusterPipeline {
    /// # Errors
    /// [`ClusteringError::IncompatibleLinkage`] for ward with a non-euclidean
    /// affinity.
    pub fn new(
        normalize: bool,
        reduce: Option<ReduceConfig>,
        linkage: LinkageMethod,
        affinity: Affinity,
        seed: u64,
    ) -> Result<Self, ClusteringError> {
        if linkage == LinkageMethod::Ward && affinity != Affinity::Euclidean {
            return Err(ClusteringError::IncompatibleLinkage { linkage, affinity });
        }
        Ok(Self {
            normalize,
            reduce,
            linkage,
            affinity,
            seed,
        })
    }

    /// # Errors
    /// Unknown `model_name` or an incompatible linkage/affinity pair.
    pub fn from_config(config: &RunConfig) -> Result<Self, ClusteringError> {
        let algo = &config.clustering_algo;
        if algo.model_name != AGGLOMERATIVE {
            return Err(ClusteringError::UnsupportedModel(algo.model_name.clone()));
        }
        Self::new(
            config.pipeline.normalize,
            config.pipeline.reduce.clone(),
            algo.model_kwargs.linkage,
            algo.model_kwargs.affinity,
            config.seed,
        )
    }

    /// Applies the pre-clustering steps.
    #[must_use]
    pub fn transform(&self, vectors: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut x = if self.normalize {
            l2_normalize(vectors)
        } else {
            vectors.to_owned()
        };
        if let Some(reduce) = &self.reduce {
            x = truncated_svd(x.view(), reduce.n_components, reduce.n_iter, self.seed);
        }
        x
    }

    /// Fits the pipeline and returns the full merge tree.
    ///
    /// # Errors
    /// Fewer than two rows, or a malformed dendrogram.
    pub fn fit(&self, vectors: ArrayView2<'_, f32>) -> Result<FittedClustering, ClusteringError> {
        let n = vectors.nrows();
        if n < MIN_OBSERVATIONS {
            return Err(ClusteringError::TooFewObservations {
                n,
                min: MIN_OBSERVATIONS,
            });
        }
        let x = self.transform(vectors);
        debug!(
            n,
            dim = x.ncols(),
            linkage = ?self.linkage,
            affinity = ?self.affinity,
            "fitting agglomerative clustering"
        );

        let mut condensed = condensed_distances(x.view(), self.affinity);
        let dendrogram = linkage(&mut condensed, n, self.linkage.method());
        let matrix = LinkageMatrix::from_dendrogram(&dendrogram)?;
        info!(n, merges = matrix.steps().len(), "linkage matrix built");
        Ok(FittedClustering {
            linkage: matrix,
            fitted_dim: x.ncols(),
        })
    }
}

/// Upper-triangle pairwise distances in row-major order.
fn condensed_distances(x: ArrayView2<'_, f32>, affinity: Affinity) -> Vec<f64> {
    let n = x.nrows();
    let rows: Vec<Vec<f64>> = x
        .rows()
        .into_iter()
        .map(|r| r.iter().map(|&v| f64::from(v)).collect())
        .collect();
    let norms: Vec<f64> = rows
        .iter()
        .map(|r| r.iter().map(|v| v * v).sum::<f64>().sqrt())
        .collect();
    (0..n)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..n)
                .map(|j| match affinity {
                    Affinity::Euclidean => rows[i]
                        .iter()
                        .zip(&rows[j])
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        .sqrt(),
                    Affinity::Cosine => {
                        let denom = norms[i] * norms[j];
                        let cos = if denom > 0.0 {
                            rows[i].iter().zip(&rows[j]).map(|(a, b)| a * b).sum::<f64>() / denom
                        } else {
                            0.0
                        };
                        (1.0 - cos).max(0.0)
                    }
                })
                .collect::<Vec<f64>>()
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f32> {
        array![
            [1.0, 0.0],
            [0.95, 0.05],
            [0.9, 0.1],
            [0.0, 1.0],
            [0.05, 0.95],
            [0.1, 0.9]
        ]
    }

    #[test]
    fn ward_with_cosine_is_rejected() {
        let result = ClusterPipeline::new(true, None, LinkageMethod::Ward, Affinity::Cosine, 0);
        assert!(matches!(result, Err(ClusteringError::IncompatibleLinkage { .. })));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let mut config = RunConfig::default();
        config.clustering_algo.model_name = "KMeans".into();
        assert!(matches!(
            ClusterPipeline::from_config(&config),
            Err(ClusteringError::UnsupportedModel(name)) if name == "KMeans"
        ));
    }

    #[test]
    fn condensed_order_is_row_major() {
        let x = array![[0.0_f32, 0.0], [3.0, 4.0], [0.0, 1.0]];
        assert_eq!(
            condensed_distances(x.view(), Affinity::Euclidean),
            vec![5.0, 1.0, 18.0_f64.sqrt()]
        );
    }

    #[test]
    fn two_blobs_split_at_k2() {
        let pipeline = ClusterPipeline::new(true, None, LinkageMethod::Average, Affinity::Cosine, 0)
            .expect("pipeline");
        let fitted = pipeline.fit(two_blobs().view()).expect("fit");
        let distances = fitted.linkage.distances();
        assert!(distances.windows(2).all(|w| w[0] <= w[1] + 1e-12));
        let labels = fitted.linkage.flat_cluster(2).expect("k=2");
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn reduce_step_changes_fitted_dim() {
        let pipeline = ClusterPipeline::new(
            false,
            Some(ReduceConfig {
                n_components: 1,
                n_iter: 3,
            }),
            LinkageMethod::Ward,
            Affinity::Euclidean,
            7,
        )
        .expect("pipeline");
        let fitted = pipeline.fit(two_blobs().view()).expect("fit");
        assert_eq!(fitted.fitted_dim, 1);
        assert_eq!(fitted.linkage.n_observations(), 6);
    }

    #[test]
    fn single_row_is_too_few() {
        let pipeline =
            ClusterPipeline::new(false, None, LinkageMethod::Ward, Affinity::Euclidean, 0)
                .expect("pipeline");
        let x = array![[1.0_f32, 2.0]];
        assert!(matches!(
            pipeline.fit(x.view()),
            Err(ClusteringError::TooFewObservations { n: 1, .. })
        ));
    }
}
