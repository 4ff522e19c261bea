//! Artifact storage: columnar tables, parquet shards, object store, local cache.

pub mod artifacts;
pub mod object_store;
pub mod codec;
pub mod table;

use std::path::PathBuf;

use thiserror::Error;

pub use artifacts::{ArtifactFormat, ArtifactStore, ReadOptions, SaveOptions};
pub use object_store::{LocalObjectStore, ObjectStore};
pub use table::{Column, Table};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {path} (run_id={run_id:?})")]
    NotFound { run_id: Option<String>, path: String },
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing column: {column}")]
    MissingColumn { column: String },
    #[error("duplicate column: {column}")]
    DuplicateColumn { column: String },
    #[error("column {column} expected {expected}, found {actual}")]
    ColumnType {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("column {column} has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("shard schema drift: expected {expected:?}, found {actual:?}")]
    SchemaDrift {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("unsupported arrow type {data_type} for column {column}")]
    UnsupportedType { column: String, data_type: String },
    #[error("background task failed: {0}")]
    Join(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
