//! Prometheusメトリクス定義。

use prometheus::{
    HistogramVec, IntCounter, IntCounterVec, Registry, register_histogram_vec_with_registry,
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
};
use std::sync::Arc;

const STAGE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0];

/// 1 回の実行で集計するメトリクス。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub comments_dropped: IntCounterVec,
    pub posts_dropped: IntCounter,
    pub aggregation_failures: IntCounter,
    pub subreddits_embedded: IntCounter,
    pub metric_failures: IntCounter,
    pub empty_results: IntCounter,
    pub fpr_seeds_published: IntCounter,
    pub fpr_orphan_clusters: IntCounter,

    // ヒストグラム
    pub stage_duration: HistogramVec,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同じ名前のメトリクスが既に登録されている場合。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            comments_dropped: register_int_counter_vec_with_registry!(
                "subclu_comments_dropped_total",
                "Comments dropped before aggregation, by reason",
                &["reason"],
                registry
            )?,
            posts_dropped: register_int_counter_with_registry!(
                "subclu_posts_dropped_total",
                "Posts dropped because their subreddit is unknown or too small",
                registry
            )?,
            aggregation_failures: register_int_counter_with_registry!(
                "subclu_aggregation_failures_total",
                "Post or subreddit groups skipped by the weighted average",
                registry
            )?,
            subreddits_embedded: register_int_counter_with_registry!(
                "subclu_subreddits_embedded_total",
                "Subreddits with a sub-level embedding",
                registry
            )?,
            metric_failures: register_int_counter_with_registry!(
                "subclu_metric_failures_total",
                "Supervised metrics replaced by zero",
                registry
            )?,
            empty_results: register_int_counter_with_registry!(
                "subclu_empty_results_total",
                "Countries that produced an empty FPR",
                registry
            )?,
            fpr_seeds_published: register_int_counter_with_registry!(
                "subclu_fpr_seeds_published_total",
                "Seeds emitted with at least one counterpart",
                registry
            )?,
            fpr_orphan_clusters: register_int_counter_with_registry!(
                "subclu_fpr_orphan_clusters_total",
                "Orphan clusters across all countries",
                registry
            )?,
            stage_duration: register_histogram_vec_with_registry!(
                "subclu_stage_duration_seconds",
                "Wall time per pipeline stage",
                &["stage"],
                STAGE_BUCKETS.to_vec(),
                registry
            )?,
        })
    }
}
