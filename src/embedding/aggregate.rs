//! Three-pass roll-up of comment, post and description vectors into one
//! vector per subreddit.
//!
//! 1. comments → post (`ln(2 + w)` weighted mean)
//! 2. post + comments (variant B), then B + description (variant C)
//! 3. posts → subreddit (plain mean of A, B and C)

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::frame::{EmbeddingFrame, ensure_same_dim};
use crate::config::RunConfig;
use crate::metadata::{CommentRecord, PostRecord};
use crate::store::{Column, StoreError, Table};
use crate::util::error::PipelineError;
use crate::util::stats::{impute_median, log_damped};

pub const POST_LEVEL_B: &str = "df_post_level_agg_b_post_and_comments";
pub const POST_LEVEL_C: &str = "df_post_level_agg_c_post_comments_sub_desc";
pub const SUB_LEVEL_A: &str = "df_sub_level_agg_a_post_only";
pub const SUB_LEVEL_B: &str = "df_sub_level_agg_b_post_and_comments";
pub const SUB_LEVEL_C: &str = "df_sub_level_agg_c_post_comments_and_sub_desc";
pub const POSTS_COUNT_COL: &str = "posts_for_embeddings_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationWeights {
    pub post: u32,
    pub comment: u32,
    pub subreddit_desc: u32,
}

impl Default for AggregationWeights {
    fn default() -> Self {
        Self {
            post: 70,
            comment: 20,
            subreddit_desc: 10,
        }
    }
}

impl AggregationWeights {
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            post: config.agg_post_post_weight,
            comment: config.agg_post_comment_weight,
            subreddit_desc: config.agg_post_subreddit_desc_weight,
        }
    }
}

/// Embedding inputs. Comment and description frames are optional.
#[derive(Debug, Clone, Copy)]
pub struct AggregationInput<'a> {
    pub posts: &'a [PostRecord],
    pub comments: &'a [CommentRecord],
    pub post_embeddings: &'a EmbeddingFrame,
    pub comment_embeddings: Option<&'a EmbeddingFrame>,
    pub subreddit_embeddings: Option<&'a EmbeddingFrame>,
    /// Whether comment weights come from a column; `false` averages plainly.
    pub weighted_comments: bool,
}

/// Sub-level frame plus the number of posts behind each row.
#[derive(Debug, Clone, PartialEq)]
pub struct SubLevelEmbeddings {
    pub frame: EmbeddingFrame,
    pub posts_for_embeddings_count: Vec<usize>,
}

impl SubLevelEmbeddings {
    /// Rows with at least `min_posts` posts; `0` keeps everything.
    #[must_use]
    pub fn with_min_posts(&self, min_posts: usize) -> Self {
        if min_posts == 0 {
            return self.clone();
        }
        let counts: HashMap<&str, usize> = self
            .frame
            .ids()
            .iter()
            .map(String::as_str)
            .zip(self.posts_for_embeddings_count.iter().copied())
            .collect();
        let frame = self
            .frame
            .filter(|id| counts.get(id).is_some_and(|&n| n >= min_posts));
        let posts_for_embeddings_count = frame
            .ids()
            .iter()
            .map(|id| counts.get(id.as_str()).copied().unwrap_or(0))
            .collect();
        Self {
            frame,
            posts_for_embeddings_count,
        }
    }

    /// # Errors
    /// Table assembly fails.
    pub fn to_table(&self) -> Result<Table, StoreError> {
        let counts = self
            .posts_for_embeddings_count
            .iter()
            .map(|&n| i64::try_from(n).ok())
            .collect();
        let mut table = self.frame.to_table()?;
        table.push_column(POSTS_COUNT_COL, Column::Int64(counts))?;
        Ok(table)
    }

    /// # Errors
    /// Missing columns or duplicated ids.
    pub fn from_table(name: &str, table: &Table) -> Result<Self, PipelineError> {
        let frame = EmbeddingFrame::from_table(name, table, "subreddit_id")?;
        let posts_for_embeddings_count = if table.has_column(POSTS_COUNT_COL) {
            table
                .i64_values(POSTS_COUNT_COL)
                .map_err(|e| PipelineError::from_store(name, e))?
                .into_iter()
                .map(|n| n.and_then(|n| usize::try_from(n).ok()).unwrap_or(0))
                .collect()
        } else {
            vec![0; frame.len()]
        };
        Ok(Self {
            frame,
            posts_for_embeddings_count,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregationReport {
    /// Post ids whose comment group could not be averaged.
    pub failed_groups: Vec<String>,
    pub posts_without_embedding: usize,
    pub comments_without_embedding: usize,
    pub subreddits_description_only: usize,
}

#[derive(Debug, Clone)]
pub struct AggregationOutput {
    pub post_level_b: EmbeddingFrame,
    pub post_level_c: EmbeddingFrame,
    pub sub_level_a: SubLevelEmbeddings,
    pub sub_level_b: SubLevelEmbeddings,
    pub sub_level_c: SubLevelEmbeddings,
    pub report: AggregationReport,
}

/// Weighted mean of rows, accumulated in f64.
fn weighted_mean(rows: &[ArrayView1<'_, f32>], weights: &[f64]) -> Option<Array1<f32>> {
    let first = rows.first()?;
    if rows.len() != weights.len() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let mut acc = Array1::<f64>::zeros(first.len());
    for (row, &weight) in rows.iter().zip(weights) {
        if row.len() != acc.len() {
            return None;
        }
        acc.zip_mut_with(row, |slot, &value| *slot += f64::from(value) * weight);
    }
    if acc.iter().any(|v| !v.is_finite()) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(acc.mapv(|v| (v / total) as f32))
}

fn mean(rows: &[ArrayView1<'_, f32>]) -> Option<Array1<f32>> {
    weighted_mean(rows, &vec![1.0; rows.len()])
}

struct PostVectors {
    post_id: String,
    b: Array1<f32>,
    c: Array1<f32>,
}

struct SubResult {
    subreddit_id: String,
    posts: Vec<PostVectors>,
    a: Array1<f32>,
    b: Array1<f32>,
    c: Array1<f32>,
    count: usize,
}

/// Pass 1: one comments vector per post with at least one comment.
fn comments_to_post(
    input: &AggregationInput<'_>,
    report: &mut AggregationReport,
) -> HashMap<String, Array1<f32>> {
    let Some(comment_frame) = input.comment_embeddings else {
        return HashMap::new();
    };
    let mut present: Vec<(&CommentRecord, usize)> = Vec::new();
    for comment in input.comments {
        match comment_frame.position(&comment.comment_id) {
            Some(row) => present.push((comment, row)),
            None => report.comments_without_embedding += 1,
        }
    }

    let weights: Vec<f64> = if input.weighted_comments {
        let raw: Vec<Option<f64>> = present.iter().map(|(c, _)| c.weight).collect();
        impute_median(&raw).into_iter().map(log_damped).collect()
    } else {
        vec![1.0; present.len()]
    };

    let mut groups: BTreeMap<&str, Vec<(usize, f64)>> = BTreeMap::new();
    for ((comment, row), weight) in present.iter().zip(weights) {
        groups
            .entry(comment.post_id.as_str())
            .or_default()
            .push((*row, weight));
    }

    let vectors = comment_frame.vectors();
    let results: Vec<(String, Result<Array1<f32>, PipelineError>)> = groups
        .into_par_iter()
        .map(|(post_id, members)| {
            if let [(row, _)] = members.as_slice() {
                return (post_id.to_string(), Ok(vectors.row(*row).to_owned()));
            }
            let rows: Vec<ArrayView1<'_, f32>> =
                members.iter().map(|(row, _)| vectors.row(*row)).collect();
            let weights: Vec<f64> = members.iter().map(|(_, w)| *w).collect();
            let result =
                weighted_mean(&rows, &weights).ok_or_else(|| PipelineError::ComputationFailure {
                    key: post_id.to_string(),
                    detail: format!("comment group shape ({}, {})", rows.len(), vectors.ncols()),
                });
            (post_id.to_string(), result)
        })
        .collect();

    let mut out = HashMap::with_capacity(results.len());
    for (post_id, result) in results {
        match result {
            Ok(vector) => {
                out.insert(post_id, vector);
            }
            Err(error) => {
                warn!(post_id = %post_id, error = %error, "skipping comment group");
                report.failed_groups.push(post_id);
            }
        }
    }
    out
}

/// Runs all three passes.
///
/// # Errors
/// Dimension mismatch between inputs, or frame assembly failures.
pub fn aggregate(
    input: &AggregationInput<'_>,
    weights: AggregationWeights,
) -> Result<AggregationOutput, PipelineError> {
    let dim = ensure_same_dim(
        std::iter::once(input.post_embeddings)
            .chain(input.comment_embeddings)
            .chain(input.subreddit_embeddings),
    )?;
    let mut report = AggregationReport::default();

    let comment_vectors = comments_to_post(input, &mut report);
    debug!(posts_with_comments = comment_vectors.len(), "pass 1 complete");

    let mut by_sub: BTreeMap<&str, Vec<(&str, usize)>> = BTreeMap::new();
    for post in input.posts {
        match input.post_embeddings.position(&post.post_id) {
            Some(row) => by_sub
                .entry(post.subreddit_id.as_str())
                .or_default()
                .push((post.post_id.as_str(), row)),
            None => report.posts_without_embedding += 1,
        }
    }
    if report.posts_without_embedding > 0 {
        warn!(
            missing = report.posts_without_embedding,
            "posts without an embedding were skipped"
        );
    }

    let wp = f64::from(weights.post);
    let wc = f64::from(weights.comment);
    let wd = f64::from(weights.subreddit_desc);
    let post_vectors = input.post_embeddings.vectors();

    let results: Vec<Result<SubResult, PipelineError>> = by_sub
        .par_iter()
        .map(|(sub_id, posts)| {
            let desc = input.subreddit_embeddings.and_then(|f| f.get(sub_id));
            let mut rows = Vec::with_capacity(posts.len());
            for &(post_id, row) in posts {
                let p = post_vectors.row(row);
                let b = match comment_vectors.get(post_id) {
                    Some(c) => weighted_mean(&[p, c.view()], &[wp, wc]),
                    None => Some(p.to_owned()),
                };
                let b = b.ok_or_else(|| PipelineError::ComputationFailure {
                    key: post_id.to_string(),
                    detail: "post and comment weights sum to zero".into(),
                })?;
                let c = match &desc {
                    Some(d) => {
                        let d = d.view();
                        let parts = [b.view(), d];
                        weighted_mean(&parts, &[wp + wc, wd])
                    }
                    None => Some(b.clone()),
                };
                let c = c.ok_or_else(|| PipelineError::ComputationFailure {
                    key: post_id.to_string(),
                    detail: "description weights sum to zero".into(),
                })?;
                rows.push(PostVectors {
                    post_id: post_id.to_string(),
                    b,
                    c,
                });
            }
            let failure = |variant: &str| PipelineError::ComputationFailure {
                key: (*sub_id).to_string(),
                detail: format!("variant {variant} mean over {} posts", rows.len()),
            };
            let a_rows: Vec<_> = posts.iter().map(|&(_, row)| post_vectors.row(row)).collect();
            let a = mean(&a_rows).ok_or_else(|| failure("A"))?;
            let b_rows: Vec<_> = rows.iter().map(|r| r.b.view()).collect();
            let b = mean(&b_rows).ok_or_else(|| failure("B"))?;
            let c_rows: Vec<_> = rows.iter().map(|r| r.c.view()).collect();
            let c = mean(&c_rows).ok_or_else(|| failure("C"))?;
            Ok(SubResult {
                subreddit_id: (*sub_id).to_string(),
                count: rows.len(),
                posts: rows,
                a,
                b,
                c,
            })
        })
        .collect();

    let mut subs = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(sub) => subs.push(sub),
            Err(error) => {
                warn!(error = %error, "skipping subreddit group");
                if let PipelineError::ComputationFailure { key, .. } = &error {
                    report.failed_groups.push(key.clone());
                }
            }
        }
    }

    // 投稿がなく説明文だけあるサブレディット
    if let Some(desc_frame) = input.subreddit_embeddings {
        for (row, sub_id) in desc_frame.ids().iter().enumerate() {
            if by_sub.contains_key(sub_id.as_str()) {
                continue;
            }
            let vector = desc_frame.vectors().row(row).to_owned();
            subs.push(SubResult {
                subreddit_id: sub_id.clone(),
                posts: Vec::new(),
                a: vector.clone(),
                b: vector.clone(),
                c: vector,
                count: 0,
            });
            report.subreddits_description_only += 1;
        }
    }
    subs.sort_by(|x, y| x.subreddit_id.cmp(&y.subreddit_id));

    let output = assemble(subs, dim, report)?;
    info!(
        subreddits = output.sub_level_c.frame.len(),
        posts = output.post_level_c.len(),
        failed_groups = output.report.failed_groups.len(),
        description_only = output.report.subreddits_description_only,
        "embedding aggregation complete"
    );
    Ok(output)
}

fn assemble(
    subs: Vec<SubResult>,
    dim: usize,
    report: AggregationReport,
) -> Result<AggregationOutput, PipelineError> {
    let mut post_ids = Vec::new();
    let mut post_b = Vec::new();
    let mut post_c = Vec::new();
    let mut sub_ids = Vec::with_capacity(subs.len());
    let mut counts = Vec::with_capacity(subs.len());
    let (mut sub_a, mut sub_b, mut sub_c) = (Vec::new(), Vec::new(), Vec::new());

    for sub in subs {
        for post in sub.posts {
            post_ids.push(post.post_id);
            post_b.push(post.b);
            post_c.push(post.c);
        }
        sub_ids.push(sub.subreddit_id);
        counts.push(sub.count);
        sub_a.push(sub.a);
        sub_b.push(sub.b);
        sub_c.push(sub.c);
    }

    let sub_level =
        |name: &str, rows: &[Array1<f32>]| -> Result<SubLevelEmbeddings, PipelineError> {
            Ok(SubLevelEmbeddings {
                frame: EmbeddingFrame::from_rows(name, "subreddit_id", sub_ids.clone(), rows, dim)?,
                posts_for_embeddings_count: counts.clone(),
            })
        };
    let post_level_b =
        EmbeddingFrame::from_rows(POST_LEVEL_B, "post_id", post_ids.clone(), &post_b, dim)?;
    let post_level_c = EmbeddingFrame::from_rows(POST_LEVEL_C, "post_id", post_ids, &post_c, dim)?;

    Ok(AggregationOutput {
        post_level_b,
        post_level_c,
        sub_level_a: sub_level(SUB_LEVEL_A, &sub_a)?,
        sub_level_b: sub_level(SUB_LEVEL_B, &sub_b)?,
        sub_level_c: sub_level(SUB_LEVEL_C, &sub_c)?,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn one_post(vectors: Array2<f32>) -> EmbeddingFrame {
        EmbeddingFrame::new("posts", "post_id", vec!["p1".into()], vectors).expect("posts")
    }

    fn post(id: &str, sub: &str) -> PostRecord {
        PostRecord {
            post_id: id.into(),
            subreddit_id: sub.into(),
            text_len: None,
            text_word_count: None,
            post_type: None,
            weighted_language: None,
        }
    }

    fn comment(id: &str, post_id: &str, weight: Option<f64>) -> CommentRecord {
        CommentRecord {
            comment_id: id.into(),
            post_id: post_id.into(),
            subreddit_id: "t5_a".into(),
            text_len: weight,
            weight,
        }
    }

    #[test]
    fn comment_weights_are_log_damped_before_division() {
        let posts = vec![post("p1", "t5_a")];
        let comments = vec![comment("c1", "p1", Some(0.0)), comment("c2", "p1", Some(98.0))];
        let post_frame = one_post(array![[0.0, 0.0]]);
        let comment_frame = EmbeddingFrame::new(
            "comments",
            "comment_id",
            vec!["c1".into(), "c2".into()],
            array![[1.0, 0.0], [0.0, 1.0]],
        )
        .expect("comments");
        let input = AggregationInput {
            posts: &posts,
            comments: &comments,
            post_embeddings: &post_frame,
            comment_embeddings: Some(&comment_frame),
            subreddit_embeddings: None,
            weighted_comments: true,
        };
        let mut report = AggregationReport::default();
        let vectors = comments_to_post(&input, &mut report);
        let c = &vectors["p1"];
        let (w1, w2) = (2.0_f64.ln(), 100.0_f64.ln());
        assert!((f64::from(c[0]) - w1 / (w1 + w2)).abs() < 1e-6);
        assert!((f64::from(c[1]) - w2 / (w1 + w2)).abs() < 1e-6);
    }

    #[test]
    fn null_weights_take_the_median() {
        let posts = vec![post("p1", "t5_a")];
        let comments = vec![
            comment("c1", "p1", Some(10.0)),
            comment("c2", "p1", None),
            comment("c3", "p1", Some(10.0)),
        ];
        let post_frame = one_post(array![[0.0]]);
        let comment_frame = EmbeddingFrame::new(
            "comments",
            "comment_id",
            vec!["c1".into(), "c2".into(), "c3".into()],
            array![[3.0], [0.0], [0.0]],
        )
        .expect("comments");
        let input = AggregationInput {
            posts: &posts,
            comments: &comments,
            post_embeddings: &post_frame,
            comment_embeddings: Some(&comment_frame),
            subreddit_embeddings: None,
            weighted_comments: true,
        };
        let vectors = comments_to_post(&input, &mut AggregationReport::default());
        assert!((vectors["p1"][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn description_only_subreddit_gets_description_vector() {
        let posts = vec![post("p1", "t5_a")];
        let post_frame = one_post(array![[1.0, 0.0]]);
        let desc_frame = EmbeddingFrame::new(
            "subs",
            "subreddit_id",
            vec!["t5_a".into(), "t5_b".into()],
            array![[0.0, 1.0], [0.5, 0.5]],
        )
        .expect("desc");
        let input = AggregationInput {
            posts: &posts,
            comments: &[],
            post_embeddings: &post_frame,
            comment_embeddings: None,
            subreddit_embeddings: Some(&desc_frame),
            weighted_comments: false,
        };
        let out = aggregate(&input, AggregationWeights::default()).expect("aggregate");

        let c = out.sub_level_c.frame.get("t5_a").expect("t5_a");
        assert!((c[0] - 0.9).abs() < 1e-6);
        assert!((c[1] - 0.1).abs() < 1e-6);
        assert_eq!(out.sub_level_a.frame.get("t5_a").expect("a"), array![1.0_f32, 0.0].view());

        for variant in [&out.sub_level_a, &out.sub_level_b, &out.sub_level_c] {
            assert_eq!(variant.frame.get("t5_b").expect("t5_b"), array![0.5_f32, 0.5].view());
        }
        assert_eq!(out.sub_level_c.posts_for_embeddings_count, vec![1, 0]);
        assert_eq!(out.report.subreddits_description_only, 1);
        assert!(out.sub_level_c.with_min_posts(1).frame.get("t5_b").is_none());
    }

    #[test]
    fn post_vectors_blend_comments_then_description() {
        let posts = vec![post("p1", "t5_a")];
        let comments = vec![comment("c1", "p1", None)];
        let post_frame = one_post(array![[1.0, 0.0]]);
        let comment_frame =
            EmbeddingFrame::new("comments", "comment_id", vec!["c1".into()], array![[0.0, 1.0]])
                .expect("comments");
        let desc_frame =
            EmbeddingFrame::new("subs", "subreddit_id", vec!["t5_a".into()], array![[1.0, 1.0]])
                .expect("desc");
        let input = AggregationInput {
            posts: &posts,
            comments: &comments,
            post_embeddings: &post_frame,
            comment_embeddings: Some(&comment_frame),
            subreddit_embeddings: Some(&desc_frame),
            weighted_comments: false,
        };
        let out = aggregate(&input, AggregationWeights::default()).expect("aggregate");

        let b = out.post_level_b.get("p1").expect("b");
        assert!((b[0] - 7.0 / 9.0).abs() < 1e-6);
        assert!((b[1] - 2.0 / 9.0).abs() < 1e-6);
        let c = out.post_level_c.get("p1").expect("c");
        assert!((c[0] - 0.8).abs() < 1e-6);
        assert!((c[1] - 0.3).abs() < 1e-6);
        assert_eq!(out.sub_level_c.frame.get("t5_a").expect("sub c"), c);
    }
}
