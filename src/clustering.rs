//! Hierarchical clustering, k proposals and supervised evaluation.

pub mod kselect;
pub mod labels;
pub mod linkage;
pub mod metrics;
pub mod pipeline;
pub mod svd;

use thiserror::Error;

use crate::store::StoreError;

pub use kselect::{DEFAULT_K_INTERVALS, KProposal, propose_k, proposals_to_table};
pub use labels::{ClusterLabels, DepthLabels, label_col, majority_col};
pub use linkage::{LinkageMatrix, LinkageStep};
pub use metrics::{MetricRow, SupervisedMetric, SupervisedReport, evaluate, metrics_to_table};
pub use pipeline::{Affinity, ClusterPipeline, FittedClustering, LinkageMethod};

#[derive(Debug, Error)]
pub enum ClusteringError {
    #[error("need at least {min} observations to cluster, got {n}")]
    TooFewObservations { n: usize, min: usize },
    #[error("k={k} is outside 1..={n}")]
    InvalidK { k: usize, n: usize },
    #[error("unsupported clustering model: {0}")]
    UnsupportedModel(String),
    #[error("linkage {linkage:?} cannot be combined with affinity {affinity:?}")]
    IncompatibleLinkage {
        linkage: LinkageMethod,
        affinity: Affinity,
    },
    #[error("invalid linkage: {0}")]
    InvalidLinkage(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
