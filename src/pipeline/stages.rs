//! Stage seams and their default implementations.
//!
//! 各ステージは `RunContext` から入力を読み、自分の成果物を書き出してから
//! 次のステージに型付きの値を渡す。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::run::RunContext;
use crate::clustering::{
    ClusterLabels, ClusterPipeline, LinkageMatrix, evaluate, metrics_to_table, propose_k,
    proposals_to_table,
};
use crate::embedding::aggregate::{
    POST_LEVEL_B, POST_LEVEL_C, SUB_LEVEL_A, SUB_LEVEL_B, SUB_LEVEL_C,
};
use crate::embedding::{
    AggregationInput, AggregationWeights, EmbeddingFrame, SubLevelEmbeddings, aggregate,
};
use crate::fpr::output::{DF_FPR, DF_FPR_CLUSTER_SUMMARY, DF_FPR_QA_SUMMARY, FPR_JSON};
use crate::fpr::{
    CountryFpr, FprBuilder, FprPolicy, GeoRelevanceRow, GeoThresholds, QaRow, build_subjects,
    clusters_to_table, effective_topic, qa_summary_to_table, relevant_ids, rows_to_table,
    to_json_lines,
};
use crate::metadata::{LoaderOptions, Metadata, load_metadata, profiles_to_table};
use crate::resize::ResizeOptions;
use crate::similarity::{AnnIndex, neighbors_to_table, pairs_to_table, top_pairs};
use crate::store::{Column, Table};
use crate::util::error::PipelineError;

pub const DF_SUBREDDIT_METADATA: &str = "df_subreddit_metadata";
pub const DF_LABELS: &str = "df_labels";
pub const DF_SUPERVISED_METRICS: &str = "df_supervised_metrics";
pub const DF_NEAREST_NEIGHBORS: &str = "df_nearest_neighbors";
pub const LINKAGE: &str = "linkage";
pub const OPTIMAL_K: &str = "optimal_k";
/// Column that always joins the ground truths; resize and FPR topics read it.
pub const PRIMARY_TOPIC: &str = "primary_topic";

/// Dense similarity is skipped above this many subreddits.
pub const DENSE_SIMILARITY_MAX_ROWS: usize = 50_000;

#[must_use]
pub fn similarity_pair_folder() -> String {
    format!("{SUB_LEVEL_C}_similarity_pair")
}

fn missing(path: &str) -> PipelineError {
    PipelineError::MissingInput {
        run_id: None,
        path: path.to_string(),
    }
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .with_context(|| format!("{what} task panicked"))
}

/// Posts table with only the key columns, for runs that resume past aggregation.
fn empty_posts() -> Result<Table> {
    Ok(Table::new()
        .with_column("post_id", Column::Utf8(Vec::new()))?
        .with_column("subreddit_id", Column::Utf8(Vec::new()))?)
}

#[async_trait]
pub trait MetadataStage: Send + Sync {
    async fn load(&self, ctx: &RunContext) -> Result<Metadata>;
}

#[async_trait]
pub trait EmbeddingStage: Send + Sync {
    async fn embed(&self, ctx: &RunContext, metadata: Arc<Metadata>) -> Result<SubLevelEmbeddings>;
}

#[async_trait]
pub trait SimilarityStage: Send + Sync {
    /// Returns the number of rows written across similarity artifacts.
    async fn relate(
        &self,
        ctx: &RunContext,
        metadata: Arc<Metadata>,
        embeddings: &SubLevelEmbeddings,
    ) -> Result<usize>;
}

#[async_trait]
pub trait ClusteringStage: Send + Sync {
    async fn cluster(
        &self,
        ctx: &RunContext,
        metadata: Arc<Metadata>,
        embeddings: &SubLevelEmbeddings,
    ) -> Result<ClusterLabels>;
}

#[async_trait]
pub trait FprStage: Send + Sync {
    async fn build(
        &self,
        ctx: &RunContext,
        metadata: Arc<Metadata>,
        labels: &ClusterLabels,
    ) -> Result<Vec<CountryFpr>>;
}

/// Reads the configured subreddit, post and comment tables.
#[derive(Debug, Default, Clone)]
pub struct TableMetadataStage;

impl TableMetadataStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataStage for TableMetadataStage {
    async fn load(&self, ctx: &RunContext) -> Result<Metadata> {
        let config = ctx.config();
        let inputs = &config.inputs;
        let partition = inputs.partition.as_deref();

        let subreddits_source = inputs
            .subreddits
            .as_ref()
            .ok_or_else(|| missing("inputs.subreddits"))?;
        let subreddits = ctx.load_table("subreddits", subreddits_source, partition).await?;

        let resuming = config.resume.embeddings_run_id.is_some()
            || config.resume.clustering_run_id.is_some()
            || config.cluster_labels_table.is_some();
        let posts = match &inputs.posts {
            Some(source) => ctx.load_table("posts", source, partition).await?,
            None if resuming => empty_posts()?,
            None => return Err(missing("inputs.posts").into()),
        };
        let comments = match &inputs.comments {
            Some(source) => Some(ctx.load_table("comments", source, partition).await?),
            None => None,
        };

        let options = LoaderOptions::from_config(config);
        let metadata = blocking("metadata", move || {
            load_metadata(&subreddits, &posts, comments.as_ref(), &options)
        })
        .await??;

        let metrics = ctx.metrics();
        metrics.posts_dropped.inc_by(metadata.report.posts_dropped as u64);
        metrics
            .comments_dropped
            .with_label_values(&["orphan"])
            .inc_by(metadata.report.comments_dropped_orphan as u64);
        metrics
            .comments_dropped
            .with_label_values(&["short"])
            .inc_by(metadata.report.comments_dropped_short as u64);

        ctx.save_artifact(DF_SUBREDDIT_METADATA, profiles_to_table(&metadata.profiles)?)
            .await?;
        info!(
            subreddits = metadata.subreddits.len(),
            posts = metadata.posts.len(),
            comments = metadata.comments.len(),
            "metadata loaded"
        );
        Ok(metadata)
    }
}

/// Three-pass weighted aggregation, or a prior run's variant-C frame.
#[derive(Debug, Default, Clone)]
pub struct AggregateEmbeddingStage;

impl AggregateEmbeddingStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn frame(
        ctx: &RunContext,
        name: &str,
        id_col: &str,
        source: Option<&crate::config::TableSource>,
    ) -> Result<Option<EmbeddingFrame>> {
        let Some(source) = source else {
            return Ok(None);
        };
        let partition = ctx.config().inputs.partition.as_deref();
        let table = ctx.load_table(name, source, partition).await?;
        Ok(Some(EmbeddingFrame::from_table(name, &table, id_col)?))
    }
}

#[async_trait]
impl EmbeddingStage for AggregateEmbeddingStage {
    async fn embed(&self, ctx: &RunContext, metadata: Arc<Metadata>) -> Result<SubLevelEmbeddings> {
        let config = ctx.config();
        if let Some(run_id) = &config.resume.embeddings_run_id {
            let table = ctx.load_artifact(run_id, SUB_LEVEL_C).await?;
            let embeddings = SubLevelEmbeddings::from_table(SUB_LEVEL_C, &table)?;
            info!(run_id, subreddits = embeddings.frame.len(), "reusing sub-level embeddings");
            ctx.metrics()
                .subreddits_embedded
                .inc_by(embeddings.frame.len() as u64);
            return Ok(embeddings);
        }

        let inputs = &config.inputs;
        let posts = Self::frame(ctx, "post_embeddings", "post_id", inputs.post_embeddings.as_ref())
            .await?
            .ok_or_else(|| missing("inputs.post_embeddings"))?;
        let comments =
            Self::frame(ctx, "comment_embeddings", "comment_id", inputs.comment_embeddings.as_ref())
                .await?;
        let descriptions = Self::frame(
            ctx,
            "subreddit_embeddings",
            "subreddit_id",
            inputs.subreddit_embeddings.as_ref(),
        )
        .await?;

        let weights = AggregationWeights::from_config(config);
        let weighted_comments = config.agg_comments_to_post_weight_col.is_some();
        let output = blocking("aggregation", move || {
            let input = AggregationInput {
                posts: &metadata.posts,
                comments: &metadata.comments,
                post_embeddings: &posts,
                comment_embeddings: comments.as_ref(),
                subreddit_embeddings: descriptions.as_ref(),
                weighted_comments,
            };
            aggregate(&input, weights)
        })
        .await??;

        let report = &output.report;
        if !report.failed_groups.is_empty() {
            warn!(
                failed = report.failed_groups.len(),
                "post groups skipped during aggregation"
            );
        }
        let metrics = ctx.metrics();
        metrics
            .aggregation_failures
            .inc_by(report.failed_groups.len() as u64);
        metrics
            .subreddits_embedded
            .inc_by(output.sub_level_c.frame.len() as u64);

        ctx.save_artifact(POST_LEVEL_B, output.post_level_b.to_table()?).await?;
        ctx.save_artifact(POST_LEVEL_C, output.post_level_c.to_table()?).await?;
        ctx.save_artifact(SUB_LEVEL_A, output.sub_level_a.to_table()?).await?;
        ctx.save_artifact(SUB_LEVEL_B, output.sub_level_b.to_table()?).await?;
        ctx.save_artifact(SUB_LEVEL_C, output.sub_level_c.to_table()?).await?;
        Ok(output.sub_level_c)
    }
}

/// Dense top-N pairs plus the optional neighbor index.
#[derive(Debug, Default, Clone)]
pub struct CosineSimilarityStage;

impl CosineSimilarityStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SimilarityStage for CosineSimilarityStage {
    async fn relate(
        &self,
        ctx: &RunContext,
        metadata: Arc<Metadata>,
        embeddings: &SubLevelEmbeddings,
    ) -> Result<usize> {
        let config = ctx.config();
        let frame = embeddings.frame.clone();
        if frame.len() < 2 {
            warn!(subreddits = frame.len(), "too few subreddits for similarity");
            return Ok(0);
        }
        let mut written = 0;
        let top_n = config.similarity_top_n;

        if frame.len() <= DENSE_SIMILARITY_MAX_ROWS {
            let dense_frame = frame.clone();
            let pairs = blocking("similarity", move || {
                let names_by_id = metadata.names_by_id();
                let names: Vec<String> = dense_frame
                    .ids()
                    .iter()
                    .map(|id| {
                        names_by_id
                            .get(id.as_str())
                            .map_or_else(|| id.clone(), |n| (*n).to_string())
                    })
                    .collect();
                top_pairs(&dense_frame, Some(&names), top_n)
            })
            .await?;
            written += ctx
                .save_artifact(&similarity_pair_folder(), pairs_to_table(&pairs)?)
                .await?;
        } else {
            warn!(
                subreddits = frame.len(),
                limit = DENSE_SIMILARITY_MAX_ROWS,
                "skipping dense similarity; use the neighbor index"
            );
        }

        if config.build_ann_index {
            let (metric, n_trees, seed, search_k) =
                (config.metric, config.n_trees, config.seed, config.ann_search_k);
            let (rows, ids) = blocking("ann index", move || {
                let index = AnnIndex::build(frame.vectors(), metric, n_trees, seed);
                (index.top_n_all_fast(top_n, search_k), frame.ids().to_vec())
            })
            .await?;
            written += ctx
                .save_artifact(DF_NEAREST_NEIGHBORS, neighbors_to_table(&rows, &ids)?)
                .await?;
        }
        Ok(written)
    }
}

/// Ground-truth columns to carry on the labels, `primary_topic` first.
#[must_use]
pub fn truth_cols(ground_truth_cols: &[String]) -> Vec<String> {
    let mut cols = vec![PRIMARY_TOPIC.to_string()];
    for col in ground_truth_cols {
        if !cols.contains(col) {
            cols.push(col.clone());
        }
    }
    cols
}

/// QA rows when a QA table is configured.
///
/// # Errors
/// The configured table cannot be read or lacks `subreddit_id`.
pub async fn load_qa(ctx: &RunContext) -> Result<Option<Vec<QaRow>>> {
    let config = ctx.config();
    let Some(source) = &config.qa_table else {
        return Ok(None);
    };
    let table = ctx
        .load_table("qa", source, config.qa_partition.as_deref())
        .await?;
    Ok(Some(QaRow::from_table(&table)?))
}

/// Per-id values of a metadata column usable as ground truth.
///
/// Topics fall back to the QA table's `predicted_topic`, as the FPR policy does.
#[must_use]
pub fn truth_values(
    metadata: &Metadata,
    qa: Option<&[QaRow]>,
    col: &str,
    ids: &[String],
) -> Option<Vec<Option<String>>> {
    let by_id: HashMap<&str, Option<String>> = match col {
        "primary_topic" | "topic" => {
            let qa_by_id: HashMap<&str, &QaRow> = qa
                .unwrap_or_default()
                .iter()
                .map(|r| (r.subreddit_id.as_str(), r))
                .collect();
            metadata
                .subreddits
                .iter()
                .map(|s| {
                    let qa_row = qa_by_id.get(s.subreddit_id.as_str()).copied();
                    (s.subreddit_id.as_str(), effective_topic(s, qa_row))
                })
                .collect()
        }
        "rating" => metadata
            .subreddits
            .iter()
            .map(|s| (s.subreddit_id.as_str(), s.rating.clone()))
            .collect(),
        "type" => metadata
            .subreddits
            .iter()
            .map(|s| (s.subreddit_id.as_str(), s.sub_type.clone()))
            .collect(),
        "primary_post_language" => metadata
            .profiles
            .iter()
            .map(|p| (p.subreddit_id.as_str(), p.primary_post_language.clone()))
            .collect(),
        "primary_post_type" => metadata
            .profiles
            .iter()
            .map(|p| (p.subreddit_id.as_str(), p.primary_post_type.clone()))
            .collect(),
        _ => return None,
    };
    Some(
        ids.iter()
            .map(|id| by_id.get(id.as_str()).cloned().flatten())
            .collect(),
    )
}

/// Fills ground truths the labels lack from metadata.
#[must_use]
pub fn attach_truths(
    mut labels: ClusterLabels,
    metadata: &Metadata,
    qa: Option<&[QaRow]>,
    cols: &[String],
) -> ClusterLabels {
    for col in cols {
        if labels.truths.contains_key(col) {
            continue;
        }
        match truth_values(metadata, qa, col, &labels.ids) {
            Some(values) => labels = labels.with_truth(col, values),
            None => warn!(column = %col, "ground truth column not available; skipped"),
        }
    }
    labels
}

/// Labels of a prior run, checked against its linkage.
///
/// # Errors
/// Missing artifacts or a linkage sized for different rows.
pub async fn resume_labels(
    ctx: &RunContext,
    metadata: &Metadata,
    run_id: &str,
) -> Result<ClusterLabels> {
    let cols = truth_cols(&ctx.config().ground_truth_cols);
    let table = ctx.load_artifact(run_id, DF_LABELS).await?;
    let labels = ClusterLabels::from_table(&table, &cols).context("invalid df_labels")?;
    let linkage = LinkageMatrix::from_table(&ctx.load_artifact(run_id, LINKAGE).await?)
        .context("invalid linkage")?;
    if linkage.n_observations() != labels.len() {
        return Err(PipelineError::schema(
            DF_LABELS,
            format!(
                "{} labelled rows but linkage has {} observations",
                labels.len(),
                linkage.n_observations()
            ),
        )
        .into());
    }
    info!(run_id, subreddits = labels.len(), ks = ?labels.ks(), "reusing cluster labels");
    let qa = load_qa(ctx).await?;
    Ok(attach_truths(labels, metadata, qa.as_deref(), &cols))
}

/// Labels from an external labels table.
///
/// # Errors
/// The table is missing or has no label columns.
pub async fn table_labels(
    ctx: &RunContext,
    metadata: &Metadata,
    source: &crate::config::TableSource,
) -> Result<ClusterLabels> {
    let cols = truth_cols(&ctx.config().ground_truth_cols);
    let table = ctx.load_table("cluster_labels", source, None).await?;
    let labels = ClusterLabels::from_table(&table, &cols).context("invalid cluster labels table")?;
    info!(subreddits = labels.len(), ks = ?labels.ks(), "cluster labels read from table");
    let qa = load_qa(ctx).await?;
    Ok(attach_truths(labels, metadata, qa.as_deref(), &cols))
}

/// Agglomerative clustering cut at every probed k.
#[derive(Debug, Default, Clone)]
pub struct AgglomerativeClusteringStage;

impl AgglomerativeClusteringStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusteringStage for AgglomerativeClusteringStage {
    async fn cluster(
        &self,
        ctx: &RunContext,
        metadata: Arc<Metadata>,
        embeddings: &SubLevelEmbeddings,
    ) -> Result<ClusterLabels> {
        let config = ctx.config();
        let kept = embeddings.with_min_posts(config.n_min_post_per_sub);
        if kept.frame.len() < embeddings.frame.len() {
            info!(
                dropped = embeddings.frame.len() - kept.frame.len(),
                min_posts = config.n_min_post_per_sub,
                "subreddits below the post minimum left out of clustering"
            );
        }
        let pipeline = ClusterPipeline::from_config(config)?;
        let frame = kept.frame;
        let (fitted, frame) = blocking("clustering", move || {
            let fitted = pipeline.fit(frame.vectors());
            (fitted, frame)
        })
        .await?;
        let fitted = fitted?;
        info!(subreddits = frame.len(), fitted_dim = fitted.fitted_dim, "clustering fitted");

        let proposals = propose_k(
            &fitted.linkage.distances(),
            config.last_n_merges,
            &config.k_intervals,
        );
        for proposal in &proposals {
            info!(
                interval = ?proposal.interval,
                k = proposal.k,
                acceleration = proposal.acceleration,
                "optimal k proposal"
            );
        }
        ctx.save_artifact(LINKAGE, fitted.linkage.to_table()?).await?;
        ctx.save_artifact(OPTIMAL_K, proposals_to_table(&proposals)?).await?;

        let ids = frame.ids().to_vec();
        let names_by_id = metadata.names_by_id();
        let names = ids
            .iter()
            .map(|id| names_by_id.get(id.as_str()).map(|n| (*n).to_string()))
            .collect();
        let qa = load_qa(ctx).await?;
        let mut truths = BTreeMap::new();
        for col in truth_cols(&config.ground_truth_cols) {
            match truth_values(&metadata, qa.as_deref(), &col, &ids) {
                Some(values) => {
                    truths.insert(col, values);
                }
                None => warn!(column = %col, "ground truth column not available; skipped"),
            }
        }
        let labels = ClusterLabels::from_linkage(
            ids,
            names,
            &fitted.linkage,
            &config.optimal_k_search,
            truths,
        )?;

        let report = evaluate(&labels);
        ctx.metrics()
            .metric_failures
            .inc_by(report.failures.len() as u64);
        ctx.save_artifact(DF_SUPERVISED_METRICS, metrics_to_table(&report.rows)?)
            .await?;
        ctx.save_artifact(DF_LABELS, labels.to_table()?).await?;
        Ok(labels)
    }
}

/// Per-country FPR construction over geo-relevance and QA tables.
#[derive(Debug, Default, Clone)]
pub struct CountryFprStage;

impl CountryFprStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FprStage for CountryFprStage {
    async fn build(
        &self,
        ctx: &RunContext,
        metadata: Arc<Metadata>,
        labels: &ClusterLabels,
    ) -> Result<Vec<CountryFpr>> {
        let config = ctx.config();
        if config.target_countries.is_empty() {
            return Ok(Vec::new());
        }
        let geo_source = config
            .geo_relevance_table
            .as_ref()
            .ok_or_else(|| missing("geo_relevance_table"))?;
        let geo_table = ctx.load_table("geo_relevance", geo_source, None).await?;
        let geo = GeoRelevanceRow::from_table(&geo_table)?;
        let qa = load_qa(ctx).await?;

        let subjects = build_subjects(&metadata.subreddits, qa.as_deref());
        let policy =
            FprPolicy::from_config(config).context("failed to build blocked keyword matcher")?;
        let options = ResizeOptions {
            topic_col: PRIMARY_TOPIC.to_string(),
            n_mix_start: config.n_mix_start,
        };
        let builder = FprBuilder::new(
            labels,
            &subjects,
            &policy,
            config.dynamic_agg_strategy,
            &config.min_subs_sweep,
            options,
        );
        let thresholds = GeoThresholds::from_config(config);
        let metrics = ctx.metrics();

        let mut fprs = Vec::with_capacity(config.target_countries.len());
        for country in &config.target_countries {
            let geo_ids = relevant_ids(&geo, country, &thresholds);
            let fpr = builder.build(country, &geo_ids);
            if fpr.is_empty() {
                let error = PipelineError::EmptyResult {
                    scope: format!("country {country}"),
                };
                warn!(%error, recoverable = error.is_recoverable(), "empty FPR");
                metrics.empty_results.inc();
            }
            metrics.fpr_seeds_published.inc_by(fpr.summary.seeds_published as u64);
            metrics
                .fpr_orphan_clusters
                .inc_by(fpr.summary.orphan_cluster_count as u64);
            fprs.push(fpr);
        }

        let rows: Vec<_> = fprs.iter().flat_map(|f| f.rows.iter().cloned()).collect();
        let clusters: Vec<_> = fprs.iter().flat_map(|f| f.clusters.iter().cloned()).collect();
        let summaries: Vec<_> = fprs.iter().map(|f| f.summary.clone()).collect();
        ctx.save_artifact(DF_FPR, rows_to_table(&rows)?).await?;
        ctx.save_artifact(DF_FPR_CLUSTER_SUMMARY, clusters_to_table(&clusters)?)
            .await?;
        ctx.save_artifact(DF_FPR_QA_SUMMARY, qa_summary_to_table(&summaries)?)
            .await?;
        let json = to_json_lines(&fprs).context("failed to serialize FPR json")?;
        ctx.save_text(FPR_JSON, &format!("{FPR_JSON}.json"), json).await?;
        Ok(fprs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{LoadReport, SubredditRecord};

    fn metadata() -> Metadata {
        let sub = |id: &str, topic: Option<&str>| SubredditRecord {
            subreddit_id: id.to_string(),
            subreddit_name: id.trim_start_matches("t5_").to_string(),
            description_text: None,
            topic: topic.map(str::to_string),
            rating: Some("E".into()),
            sub_type: Some("public".into()),
            over_18: Some(false),
            allow_discovery: Some(true),
        };
        Metadata {
            subreddits: vec![sub("t5_a", Some("Sports")), sub("t5_b", None)],
            posts: Vec::new(),
            comments: Vec::new(),
            profiles: Vec::new(),
            report: LoadReport::default(),
        }
    }

    #[test]
    fn primary_topic_always_leads_truth_columns() {
        assert_eq!(truth_cols(&["rating".into()]), vec!["primary_topic", "rating"]);
        assert_eq!(truth_cols(&["primary_topic".into()]), vec!["primary_topic"]);
    }

    #[test]
    fn truth_values_follow_requested_ids() {
        let ids = vec!["t5_b".to_string(), "t5_a".to_string(), "t5_z".to_string()];
        assert_eq!(
            truth_values(&metadata(), None, "primary_topic", &ids),
            Some(vec![None, Some("Sports".to_string()), None])
        );
        assert_eq!(truth_values(&metadata(), None, "karma", &ids), None);
    }

    #[test]
    fn topic_truth_falls_back_to_predicted_topic() {
        let qa = [QaRow {
            subreddit_id: "t5_b".into(),
            combined_filter: Some("recommend".into()),
            predicted_topic: Some("Food".into()),
            predicted_rating: None,
        }];
        let ids = vec!["t5_a".to_string(), "t5_b".to_string()];
        let truths = truth_values(&metadata(), Some(&qa), "primary_topic", &ids);
        assert_eq!(truths, Some(vec![Some("Sports".to_string()), Some("Food".to_string())]));

        let subjects = build_subjects(&metadata().subreddits, Some(&qa));
        let topics: Vec<Option<String>> =
            subjects.iter().map(|s| s.primary_topic.clone()).collect();
        assert_eq!(Some(topics), truths);
    }

    #[test]
    fn folder_names_match_artifact_contract() {
        assert_eq!(
            similarity_pair_folder(),
            "df_sub_level_agg_c_post_comments_and_sub_desc_similarity_pair"
        );
    }
}
