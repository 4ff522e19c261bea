//! パイプライン全体で共有するエラー分類。

use thiserror::Error;

use crate::store::StoreError;

/// Error taxonomy shared by every stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Artifact or table partition absent.
    #[error("missing input {path} (run_id={run_id:?})")]
    MissingInput { run_id: Option<String>, path: String },
    /// Embedding dimension or required column mismatch.
    #[error("schema mismatch in {frame}: {detail}")]
    SchemaMismatch { frame: String, detail: String },
    /// Duplicated ids in a frame that must be unique.
    #[error("duplicated ids in {frame}: {ids:?}")]
    UniquenessViolation { frame: String, ids: Vec<String> },
    /// A single group could not be aggregated.
    #[error("computation failed for {key}: {detail}")]
    ComputationFailure { key: String, detail: String },
    /// Stage produced nothing for a scope (e.g. a country).
    #[error("empty result for {scope}")]
    EmptyResult { scope: String },
    /// Supervised metric was undefined.
    #[error("metric {metric} undefined for {scope}")]
    MetricFailure { metric: String, scope: String },
}

/// エラーの回復方針。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// ステージ内でログを出して継続する
    Local,
    /// 実行を中断する
    Fatal,
}

impl PipelineError {
    /// Recovery policy for this error kind.
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            PipelineError::ComputationFailure { .. }
            | PipelineError::EmptyResult { .. }
            | PipelineError::MetricFailure { .. } => Recovery::Local,
            PipelineError::MissingInput { .. }
            | PipelineError::SchemaMismatch { .. }
            | PipelineError::UniquenessViolation { .. } => Recovery::Fatal,
        }
    }

    /// エラーがステージ内で回復可能か判定する。
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self.recovery(), Recovery::Local)
    }

    pub(crate) fn schema(frame: &str, detail: impl ToString) -> Self {
        PipelineError::SchemaMismatch {
            frame: frame.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Classifies a table access failure on `frame`.
    pub(crate) fn from_store(frame: &str, error: StoreError) -> Self {
        match error {
            StoreError::NotFound { run_id, path } => PipelineError::MissingInput { run_id, path },
            other => Self::schema(frame, other),
        }
    }
}
