//! Embedding frames and sub-level aggregation.

pub mod aggregate;
pub mod frame;

pub use aggregate::{
    AggregationInput, AggregationOutput, AggregationReport, AggregationWeights, SubLevelEmbeddings,
    aggregate,
};
pub use frame::{EmbeddingFrame, embedding_columns, ensure_same_dim};
