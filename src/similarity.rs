//! Cosine similarity and approximate nearest neighbors.

pub mod ann;
pub mod dense;

pub use ann::{AnnIndex, AnnMetric, NeighborRow, neighbors_to_table};
pub use dense::{SimilarityPair, cosine_similarity, l2_normalize, pairs_to_table, top_pairs};
