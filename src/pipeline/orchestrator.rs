//! Pipeline orchestrator and builder for one clustering run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::run::{CONFIG_DIR, LOGS_DIR, METRICS_DIR, RunContext};
use super::stages::{
    AgglomerativeClusteringStage, AggregateEmbeddingStage, ClusteringStage, CosineSimilarityStage,
    CountryFprStage, EmbeddingStage, FprStage, MetadataStage, SimilarityStage, TableMetadataStage,
    resume_labels, table_labels,
};
use crate::clustering::ClusterLabels;
use crate::fpr::CountryFpr;
use crate::metadata::Metadata;

/// Where the run's cluster labels came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOrigin {
    Table,
    Resumed { run_id: String },
    Fitted,
}

/// What one run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub label_origin: LabelOrigin,
    pub subreddits_clustered: usize,
    pub ks: Vec<usize>,
    pub countries: Vec<CountrySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountrySummary {
    pub country: String,
    pub seeds_published: usize,
    pub orphan_clusters: usize,
    pub min_subs_in_cluster: Option<usize>,
}

impl CountrySummary {
    fn from_fpr(fpr: &CountryFpr) -> Self {
        Self {
            country: fpr.country.clone(),
            seeds_published: fpr.summary.seeds_published,
            orphan_clusters: fpr.summary.orphan_cluster_count,
            min_subs_in_cluster: fpr.summary.min_subs_in_cluster,
        }
    }
}

/// Container for all pipeline stages.
pub struct PipelineStages {
    pub(super) metadata: Arc<dyn MetadataStage>,
    pub(super) embedding: Arc<dyn EmbeddingStage>,
    pub(super) similarity: Arc<dyn SimilarityStage>,
    pub(super) clustering: Arc<dyn ClusteringStage>,
    pub(super) fpr: Arc<dyn FprStage>,
}

/// Runs the stages in order over one [`RunContext`].
pub struct PipelineOrchestrator {
    ctx: RunContext,
    stages: PipelineStages,
}

/// Builder pattern for constructing [`PipelineOrchestrator`].
pub struct PipelineBuilder {
    ctx: RunContext,
    metadata: Option<Arc<dyn MetadataStage>>,
    embedding: Option<Arc<dyn EmbeddingStage>>,
    similarity: Option<Arc<dyn SimilarityStage>>,
    clustering: Option<Arc<dyn ClusteringStage>>,
    fpr: Option<Arc<dyn FprStage>>,
}

impl PipelineOrchestrator {
    /// Orchestrator with the default stage implementations.
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        PipelineBuilder::new(ctx).build()
    }

    #[must_use]
    pub fn builder(ctx: RunContext) -> PipelineBuilder {
        PipelineBuilder::new(ctx)
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Executes the run. `_SUCCESS` is written only when every stage
    /// succeeded; logs and metrics are uploaded either way.
    ///
    /// # Errors
    /// Any fatal stage error.
    pub async fn execute(&self) -> Result<RunSummary> {
        let run_id = self.ctx.run_id().to_string();
        info!(
            run_id = %run_id,
            experiment = %self.ctx.config().mlflow_experiment_name,
            "run started"
        );

        let outcome = self.execute_stages().await;
        if let Err(err) = self.finalize(outcome.is_ok()).await {
            warn!(error = ?err, "failed to publish run logs and metrics");
        }
        match &outcome {
            Ok(summary) => info!(
                run_id = %run_id,
                subreddits = summary.subreddits_clustered,
                countries = summary.countries.len(),
                "run completed"
            ),
            Err(err) => {
                error!(run_id = %run_id, error = ?err, "run failed; no success marker written")
            }
        }
        outcome
    }

    async fn execute_stages(&self) -> Result<RunSummary> {
        let ctx = &self.ctx;
        let config_dir = ctx.run().save_config(ctx.config())?;
        debug!(path = %config_dir.display(), "config saved");
        ctx.upload_folder(CONFIG_DIR).await?;

        let metadata = Arc::new(
            ctx.timed("metadata", self.stages.metadata.load(ctx))
                .await
                .context("metadata stage failed")?,
        );
        let (labels, label_origin) = self.labels(Arc::clone(&metadata)).await?;

        let fprs = ctx
            .timed("fpr", self.stages.fpr.build(ctx, Arc::clone(&metadata), &labels))
            .await
            .context("fpr stage failed")?;

        Ok(RunSummary {
            run_id: ctx.run_id().to_string(),
            label_origin,
            subreddits_clustered: labels.len(),
            ks: labels.ks(),
            countries: fprs.iter().map(CountrySummary::from_fpr).collect(),
        })
    }

    /// Labels table first, then a prior clustering run, then a fresh fit.
    async fn labels(&self, metadata: Arc<Metadata>) -> Result<(ClusterLabels, LabelOrigin)> {
        let ctx = &self.ctx;
        let config = ctx.config();
        if let Some(source) = &config.cluster_labels_table {
            let labels = table_labels(ctx, &metadata, source).await?;
            return Ok((labels, LabelOrigin::Table));
        }
        if let Some(run_id) = &config.resume.clustering_run_id {
            let labels = resume_labels(ctx, &metadata, run_id).await?;
            return Ok((
                labels,
                LabelOrigin::Resumed {
                    run_id: run_id.clone(),
                },
            ));
        }

        let embeddings = ctx
            .timed("embedding", self.stages.embedding.embed(ctx, Arc::clone(&metadata)))
            .await
            .context("embedding stage failed")?;
        ctx.timed(
            "similarity",
            self.stages
                .similarity
                .relate(ctx, Arc::clone(&metadata), &embeddings),
        )
        .await
        .context("similarity stage failed")?;
        let labels = ctx
            .timed(
                "clustering",
                self.stages.clustering.cluster(ctx, metadata, &embeddings),
            )
            .await
            .context("clustering stage failed")?;
        Ok((labels, LabelOrigin::Fitted))
    }

    async fn finalize(&self, succeeded: bool) -> Result<()> {
        let ctx = &self.ctx;
        let rendered = ctx.telemetry().render()?;
        ctx.save_text(METRICS_DIR, "metrics.prom", rendered).await?;
        if succeeded {
            let marker = ctx.run().mark_success()?;
            ctx.store()
                .log_artifact_folder(ctx.run_id(), &marker, "")
                .await
                .context("failed to upload success marker")?;
        }
        ctx.upload_folder(LOGS_DIR).await?;
        Ok(())
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            metadata: None,
            embedding: None,
            similarity: None,
            clustering: None,
            fpr: None,
        }
    }

    #[must_use]
    pub fn with_metadata_stage(mut self, stage: Arc<dyn MetadataStage>) -> Self {
        self.metadata = Some(stage);
        self
    }

    #[must_use]
    pub fn with_embedding_stage(mut self, stage: Arc<dyn EmbeddingStage>) -> Self {
        self.embedding = Some(stage);
        self
    }

    #[must_use]
    pub fn with_similarity_stage(mut self, stage: Arc<dyn SimilarityStage>) -> Self {
        self.similarity = Some(stage);
        self
    }

    #[must_use]
    pub fn with_clustering_stage(mut self, stage: Arc<dyn ClusteringStage>) -> Self {
        self.clustering = Some(stage);
        self
    }

    #[must_use]
    pub fn with_fpr_stage(mut self, stage: Arc<dyn FprStage>) -> Self {
        self.fpr = Some(stage);
        self
    }

    /// Unset stages fall back to the defaults.
    #[must_use]
    pub fn build(self) -> PipelineOrchestrator {
        PipelineOrchestrator {
            ctx: self.ctx,
            stages: PipelineStages {
                metadata: self
                    .metadata
                    .unwrap_or_else(|| Arc::new(TableMetadataStage::new())),
                embedding: self
                    .embedding
                    .unwrap_or_else(|| Arc::new(AggregateEmbeddingStage::new())),
                similarity: self
                    .similarity
                    .unwrap_or_else(|| Arc::new(CosineSimilarityStage::new())),
                clustering: self
                    .clustering
                    .unwrap_or_else(|| Arc::new(AgglomerativeClusteringStage::new())),
                fpr: self.fpr.unwrap_or_else(|| Arc::new(CountryFprStage::new())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvSettings, RunConfig};
    use crate::embedding::SubLevelEmbeddings;
    use crate::observability::Telemetry;
    use crate::pipeline::run::RunDir;
    use crate::store::{ArtifactStore, LocalObjectStore};
    use async_trait::async_trait;

    struct FailingMetadata;

    #[async_trait]
    impl MetadataStage for FailingMetadata {
        async fn load(&self, _ctx: &RunContext) -> Result<Metadata> {
            anyhow::bail!("subreddit partition unavailable")
        }
    }

    struct UnreachableEmbedding;

    #[async_trait]
    impl EmbeddingStage for UnreachableEmbedding {
        async fn embed(
            &self,
            _ctx: &RunContext,
            _metadata: Arc<Metadata>,
        ) -> Result<SubLevelEmbeddings> {
            anyhow::bail!("embedding must not run after a metadata failure")
        }
    }

    fn context(root: &std::path::Path) -> RunContext {
        let env = EnvSettings::rooted_at(root);
        let run = RunDir::create(env.work_root()).expect("run dir");
        let store = ArtifactStore::new(
            Arc::new(LocalObjectStore::new(env.store_root(), env.bucket())),
            env.cache_root(),
            "test",
        );
        RunContext::new(
            Arc::new(RunConfig::default()),
            env,
            store,
            run,
            Telemetry::new().expect("telemetry"),
        )
    }

    #[tokio::test]
    async fn failed_stage_leaves_no_success_marker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = PipelineOrchestrator::builder(context(dir.path()))
            .with_metadata_stage(Arc::new(FailingMetadata))
            .with_embedding_stage(Arc::new(UnreachableEmbedding))
            .build();

        let err = orchestrator.execute().await.expect_err("run fails");
        assert!(format!("{err:#}").contains("subreddit partition unavailable"));

        let run = orchestrator.context().run();
        assert!(!run.is_complete());
        assert!(run.folder(METRICS_DIR).join("metrics.prom").is_file());
        assert!(run.folder(CONFIG_DIR).join("config.yaml").is_file());
    }
}
