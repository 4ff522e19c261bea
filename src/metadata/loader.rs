//! Joins post metadata onto subreddits and derives per-subreddit profiles.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{info, warn};

use super::language::{in_use_multilingual, is_placeholder, language_name};
use super::records::{CommentRecord, PostRecord, SubredditRecord};
use crate::config::RunConfig;
use crate::store::{Column, StoreError, Table};
use crate::util::error::PipelineError;
use crate::util::stats::median;

/// Secondary languages below this fraction of posts are dropped.
pub const SECONDARY_LANGUAGE_MIN_FRACTION: f64 = 0.008;

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub min_comment_text_len: usize,
    pub weight_col: Option<String>,
    pub secondary_min_fraction: f64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            min_comment_text_len: 11,
            weight_col: Some("comment_text_len".to_string()),
            secondary_min_fraction: SECONDARY_LANGUAGE_MIN_FRACTION,
        }
    }
}

impl LoaderOptions {
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            min_comment_text_len: config.min_comment_text_len,
            weight_col: config.agg_comments_to_post_weight_col.clone(),
            secondary_min_fraction: SECONDARY_LANGUAGE_MIN_FRACTION,
        }
    }
}

/// Rows removed by the loader's filters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub posts_dropped: usize,
    pub comments_dropped_orphan: usize,
    pub comments_dropped_short: usize,
}

/// Derived per-subreddit columns. Percent fields are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubredditProfile {
    pub subreddit_id: String,
    pub subreddit_name: String,
    pub primary_post_language: Option<String>,
    pub primary_post_language_percent: Option<f64>,
    pub primary_post_language_in_use_multilingual: Option<bool>,
    pub secondary_post_language: Option<String>,
    pub secondary_post_language_percent: Option<f64>,
    pub primary_post_type: Option<String>,
    pub primary_post_type_percent: Option<f64>,
    pub posts_for_modeling_count: usize,
    pub post_median_word_count: Option<f64>,
    pub post_median_text_len: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub subreddits: Vec<SubredditRecord>,
    pub posts: Vec<PostRecord>,
    pub comments: Vec<CommentRecord>,
    pub profiles: Vec<SubredditProfile>,
    pub report: LoadReport,
}

impl Metadata {
    /// Subreddit id to name.
    #[must_use]
    pub fn names_by_id(&self) -> HashMap<&str, &str> {
        self.subreddits
            .iter()
            .map(|s| (s.subreddit_id.as_str(), s.subreddit_name.as_str()))
            .collect()
    }
}

fn ensure_unique<'a>(frame: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    let mut duplicated: Vec<String> = ids
        .filter(|id| !seen.insert(*id))
        .map(str::to_string)
        .collect();
    if duplicated.is_empty() {
        return Ok(());
    }
    duplicated.sort();
    duplicated.dedup();
    Err(PipelineError::UniquenessViolation {
        frame: frame.to_string(),
        ids: duplicated,
    })
}

/// Loads posts first, joins them onto subreddits, then filters comments.
///
/// # Errors
/// Schema problems in any table or duplicated ids.
pub fn load_metadata(
    subreddits: &Table,
    posts: &Table,
    comments: Option<&Table>,
    options: &LoaderOptions,
) -> Result<Metadata, PipelineError> {
    let mut post_rows = PostRecord::from_table(posts)?;
    let subreddit_rows = SubredditRecord::from_table(subreddits)?;
    ensure_unique("subreddits", subreddit_rows.iter().map(|s| s.subreddit_id.as_str()))?;
    ensure_unique("posts", post_rows.iter().map(|p| p.post_id.as_str()))?;

    let mut report = LoadReport::default();
    let known_subs: HashSet<&str> =
        subreddit_rows.iter().map(|s| s.subreddit_id.as_str()).collect();
    let before = post_rows.len();
    post_rows.retain(|p| known_subs.contains(p.subreddit_id.as_str()));
    report.posts_dropped = before - post_rows.len();
    if report.posts_dropped > 0 {
        warn!(
            dropped = report.posts_dropped,
            "dropped posts referencing unknown subreddits"
        );
    }

    let comment_rows = match comments {
        Some(table) => {
            let rows = CommentRecord::from_table(table, options.weight_col.as_deref())?;
            ensure_unique("comments", rows.iter().map(|c| c.comment_id.as_str()))?;
            filter_comments(rows, &post_rows, options.min_comment_text_len, &mut report)
        }
        None => Vec::new(),
    };

    let profiles = profile_subreddits(&subreddit_rows, &post_rows, options.secondary_min_fraction);

    info!(
        subreddits = subreddit_rows.len(),
        posts = post_rows.len(),
        comments = comment_rows.len(),
        comments_dropped_orphan = report.comments_dropped_orphan,
        comments_dropped_short = report.comments_dropped_short,
        "metadata loaded"
    );

    Ok(Metadata {
        subreddits: subreddit_rows,
        posts: post_rows,
        comments: comment_rows,
        profiles,
        report,
    })
}

fn filter_comments(
    rows: Vec<CommentRecord>,
    posts: &[PostRecord],
    min_text_len: usize,
    report: &mut LoadReport,
) -> Vec<CommentRecord> {
    let post_ids: HashSet<&str> = posts.iter().map(|p| p.post_id.as_str()).collect();
    #[allow(clippy::cast_precision_loss)]
    let min_len = min_text_len as f64;
    rows.into_iter()
        .filter(|comment| {
            if !post_ids.contains(comment.post_id.as_str()) {
                report.comments_dropped_orphan += 1;
                return false;
            }
            if comment.text_len.is_some_and(|len| len < min_len) {
                report.comments_dropped_short += 1;
                return false;
            }
            true
        })
        .collect()
}

/// Highest-fraction bucket; ties resolve to the lexically first name.
fn argmax<'a>(
    fractions: &BTreeMap<&'a str, f64>,
    skip: impl Fn(&str) -> bool,
) -> Option<(&'a str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (&name, &fraction) in fractions {
        if skip(name) {
            continue;
        }
        if best.is_none_or(|(_, current)| fraction > current) {
            best = Some((name, fraction));
        }
    }
    best
}

#[allow(clippy::cast_precision_loss)]
fn fractions<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<&'a str, f64> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0_usize;
    for value in values {
        *counts.entry(value).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .map(|(name, count)| (name, count as f64 / total.max(1) as f64))
        .collect()
}

/// Per-subreddit language, post type and length aggregates.
#[must_use]
pub fn profile_subreddits(
    subreddits: &[SubredditRecord],
    posts: &[PostRecord],
    secondary_min_fraction: f64,
) -> Vec<SubredditProfile> {
    let mut by_sub: HashMap<&str, Vec<&PostRecord>> = HashMap::new();
    for post in posts {
        by_sub.entry(post.subreddit_id.as_str()).or_default().push(post);
    }

    subreddits
        .iter()
        .map(|sub| {
            let group = by_sub.get(sub.subreddit_id.as_str()).map_or(&[][..], Vec::as_slice);
            let languages = fractions(
                group
                    .iter()
                    .map(|p| language_name(p.weighted_language.as_deref())),
            );
            let primary = argmax(&languages, |_| false);
            let secondary = primary.and_then(|(primary_name, _)| {
                argmax(&languages, |name| is_placeholder(name) || name == primary_name)
                    .filter(|(_, fraction)| *fraction >= secondary_min_fraction)
            });
            let post_types = fractions(
                group
                    .iter()
                    .map(|p| p.post_type.as_deref().unwrap_or("other")),
            );
            let primary_type = argmax(&post_types, |_| false);
            let word_counts: Vec<f64> = group.iter().filter_map(|p| p.text_word_count).collect();
            let text_lens: Vec<f64> = group.iter().filter_map(|p| p.text_len).collect();

            SubredditProfile {
                subreddit_id: sub.subreddit_id.clone(),
                subreddit_name: sub.subreddit_name.clone(),
                primary_post_language: primary.map(|(name, _)| name.to_string()),
                primary_post_language_percent: primary.map(|(_, fraction)| fraction),
                primary_post_language_in_use_multilingual: primary
                    .map(|(name, _)| in_use_multilingual(name)),
                secondary_post_language: secondary.map(|(name, _)| name.to_string()),
                secondary_post_language_percent: secondary.map(|(_, fraction)| fraction),
                primary_post_type: primary_type.map(|(name, _)| name.to_string()),
                primary_post_type_percent: primary_type.map(|(_, fraction)| fraction),
                posts_for_modeling_count: group.len(),
                post_median_word_count: median(&word_counts),
                post_median_text_len: median(&text_lens),
            }
        })
        .collect()
}

/// Profiles as the `df_subreddit_metadata` table.
///
/// # Errors
/// Never in practice; column lengths are built from one slice.
pub fn profiles_to_table(profiles: &[SubredditProfile]) -> Result<Table, StoreError> {
    let utf8 = |f: fn(&SubredditProfile) -> Option<String>| {
        Column::Utf8(profiles.iter().map(f).collect())
    };
    let float = |f: fn(&SubredditProfile) -> Option<f64>| {
        Column::Float64(profiles.iter().map(f).collect())
    };
    Table::new()
        .with_column("subreddit_id", utf8(|p| Some(p.subreddit_id.clone())))?
        .with_column("subreddit_name", utf8(|p| Some(p.subreddit_name.clone())))?
        .with_column("primary_post_language", utf8(|p| p.primary_post_language.clone()))?
        .with_column(
            "primary_post_language_percent",
            float(|p| p.primary_post_language_percent),
        )?
        .with_column(
            "primary_post_language_in_use_multilingual",
            Column::Bool(
                profiles
                    .iter()
                    .map(|p| p.primary_post_language_in_use_multilingual)
                    .collect(),
            ),
        )?
        .with_column("secondary_post_language", utf8(|p| p.secondary_post_language.clone()))?
        .with_column(
            "secondary_post_language_percent",
            float(|p| p.secondary_post_language_percent),
        )?
        .with_column("primary_post_type", utf8(|p| p.primary_post_type.clone()))?
        .with_column("primary_post_type_percent", float(|p| p.primary_post_type_percent))?
        .with_column(
            "posts_for_modeling_count",
            Column::Int64(
                profiles
                    .iter()
                    .map(|p| i64::try_from(p.posts_for_modeling_count).ok())
                    .collect(),
            ),
        )?
        .with_column("post_median_word_count", float(|p| p.post_median_word_count))?
        .with_column("post_median_text_len", float(|p| p.post_median_text_len))
        .map(|t| t.with_index("subreddit_id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(values: &[&str]) -> Column {
        Column::Utf8(values.iter().map(|v| Some((*v).to_string())).collect())
    }

    fn subs() -> Table {
        Table::new()
            .with_column("subreddit_id", utf8(&["t5_a", "t5_b"]))
            .and_then(|t| t.with_column("subreddit_name", utf8(&["a", "b"])))
            .expect("subs")
    }

    #[test]
    fn secondary_language_skips_placeholders_and_small_shares() {
        let posts = Table::new()
            .with_column("post_id", utf8(&["p1", "p2", "p3", "p4"]))
            .and_then(|t| t.with_column("subreddit_id", utf8(&["t5_a", "t5_a", "t5_a", "t5_a"])))
            .and_then(|t| t.with_column("weighted_language", utf8(&["de", "de", "und", "xx"])))
            .expect("posts");
        let meta = load_metadata(&subs(), &posts, None, &LoaderOptions::default()).expect("load");
        let profile = &meta.profiles[0];
        assert_eq!(profile.primary_post_language.as_deref(), Some("German"));
        assert_eq!(profile.primary_post_language_percent, Some(0.5));
        assert_eq!(profile.secondary_post_language, None);
        assert_eq!(profile.primary_post_language_in_use_multilingual, Some(true));
        assert_eq!(meta.profiles[1].posts_for_modeling_count, 0);
        assert_eq!(meta.profiles[1].primary_post_language, None);
    }

    #[test]
    fn orphan_and_short_comments_are_counted() {
        let posts = Table::new()
            .with_column("post_id", utf8(&["p1", "p2"]))
            .and_then(|t| t.with_column("subreddit_id", utf8(&["t5_a", "t5_missing"])))
            .expect("posts");
        let comments = Table::new()
            .with_column("comment_id", utf8(&["c1", "c2", "c3"]))
            .and_then(|t| t.with_column("post_id", utf8(&["p1", "p1", "p2"])))
            .and_then(|t| t.with_column("subreddit_id", utf8(&["t5_a", "t5_a", "t5_missing"])))
            .and_then(|t| {
                t.with_column(
                    "comment_text_len",
                    Column::Int64(vec![Some(40), Some(3), Some(40)]),
                )
            })
            .expect("comments");
        let meta = load_metadata(&subs(), &posts, Some(&comments), &LoaderOptions::default())
            .expect("load");
        assert_eq!(meta.report.posts_dropped, 1);
        assert_eq!(meta.report.comments_dropped_orphan, 1);
        assert_eq!(meta.report.comments_dropped_short, 1);
        assert_eq!(meta.comments.len(), 1);
        assert_eq!(meta.comments[0].weight, Some(40.0));
    }

    #[test]
    fn duplicated_post_ids_are_rejected() {
        let posts = Table::new()
            .with_column("post_id", utf8(&["p1", "p1"]))
            .and_then(|t| t.with_column("subreddit_id", utf8(&["t5_a", "t5_a"])))
            .expect("posts");
        let err = load_metadata(&subs(), &posts, None, &LoaderOptions::default())
            .expect_err("duplicates");
        assert!(matches!(err, PipelineError::UniquenessViolation { ids, .. } if ids == vec!["p1"]));
    }

    #[test]
    fn profile_table_has_one_row_per_subreddit() {
        let posts = Table::new()
            .with_column("post_id", utf8(&["p1"]))
            .and_then(|t| t.with_column("subreddit_id", utf8(&["t5_a"])))
            .expect("posts");
        let meta = load_metadata(&subs(), &posts, None, &LoaderOptions::default()).expect("load");
        let table = profiles_to_table(&meta.profiles).expect("table");
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.index_name(), Some("subreddit_id"));
    }
}
