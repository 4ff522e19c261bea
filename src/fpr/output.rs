//! FPR tables and the per-country JSON lines.

use serde_json::{Map, Value, json};

use super::builder::{ClusterSummary, CountryFpr, FprRow, QaSummary};
use crate::store::{Column, StoreError, Table};

pub const DF_FPR: &str = "df_fpr";
pub const DF_FPR_CLUSTER_SUMMARY: &str = "df_fpr_cluster_summary";
pub const DF_FPR_QA_SUMMARY: &str = "df_fpr_qa_summary";
pub const FPR_JSON: &str = "fpr";

fn to_i64(v: usize) -> Option<i64> {
    i64::try_from(v).ok()
}

fn text<T>(rows: &[T], f: impl Fn(&T) -> Option<String>) -> Column {
    Column::Utf8(rows.iter().map(f).collect())
}

fn int<T>(rows: &[T], f: impl Fn(&T) -> usize) -> Column {
    Column::Int64(rows.iter().map(|r| to_i64(f(r))).collect())
}

fn list<T>(rows: &[T], f: impl Fn(&T) -> Vec<String>) -> Column {
    Column::Utf8List(rows.iter().map(|r| Some(f(r))).collect())
}

/// `{country: {seed: [counterparts]}}`, one JSON object per line.
///
/// # Errors
/// Serialization fails.
pub fn to_json_lines(fprs: &[CountryFpr]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for fpr in fprs {
        let seeds: Map<String, Value> = fpr
            .mapping
            .iter()
            .map(|(seed, counterparts)| (seed.clone(), json!(counterparts)))
            .collect();
        let mut line = Map::new();
        line.insert(fpr.country.clone(), Value::Object(seeds));
        out.push_str(&serde_json::to_string(&Value::Object(line))?);
        out.push('\n');
    }
    Ok(out)
}

/// # Errors
/// Table assembly fails.
pub fn rows_to_table(rows: &[FprRow]) -> Result<Table, StoreError> {
    Table::new()
        .with_column("geo_country_code", text(rows, |r| Some(r.country.clone())))?
        .with_column("subreddit_id", text(rows, |r| Some(r.subreddit_id.clone())))?
        .with_column("subreddit_name", text(rows, |r| Some(r.subreddit_name.clone())))?
        .with_column("qa_status", text(rows, |r| Some(r.qa_status.as_str().to_string())))?
        .with_column("cluster_label", text(rows, |r| Some(r.cluster_label.clone())))?
        .with_column("cluster_label_k", text(rows, |r| Some(r.cluster_label_k.clone())))?
        .with_column(
            "cluster_majority_primary_topic",
            text(rows, |r| r.cluster_majority_primary_topic.clone()),
        )?
        .with_column("cluster_topic_mix", text(rows, |r| r.cluster_topic_mix.clone()))?
        .with_column("orphan", Column::Bool(rows.iter().map(|r| Some(r.orphan)).collect()))?
        .with_column("cluster_subreddit_ids_list", list(rows, |r| r.counterpart_ids.clone()))?
        .with_column("cluster_subreddit_names_list", list(rows, |r| r.counterpart_names.clone()))?
        .with_column("counterpart_count", int(rows, |r| r.counterpart_ids.len()))
}

/// # Errors
/// Table assembly fails.
pub fn clusters_to_table(rows: &[ClusterSummary]) -> Result<Table, StoreError> {
    Table::new()
        .with_column("geo_country_code", text(rows, |r| Some(r.country.clone())))?
        .with_column("cluster_label", text(rows, |r| Some(r.cluster_label.clone())))?
        .with_column("cluster_label_k", text(rows, |r| Some(r.cluster_label_k.clone())))?
        .with_column(
            "cluster_majority_primary_topic",
            text(rows, |r| r.cluster_majority_primary_topic.clone()),
        )?
        .with_column("cluster_topic_mix", text(rows, |r| r.cluster_topic_mix.clone()))?
        .with_column("subreddit_count", int(rows, |r| r.subreddit_count))?
        .with_column("seed_count", int(rows, |r| r.seed_count))?
        .with_column("recommend_count", int(rows, |r| r.recommend_count))?
        .with_column("orphan", Column::Bool(rows.iter().map(|r| Some(r.orphan)).collect()))?
        .with_column("private_count", int(rows, |r| r.private_count))?
        .with_column("allow_discovery_f_count", int(rows, |r| r.allow_discovery_f_count))?
        .with_column("missing_topic_count", int(rows, |r| r.missing_topic_count))?
        .with_column("seed_subreddit_ids_list", list(rows, |r| r.seed_ids.clone()))?
        .with_column("recommend_subreddit_ids_list", list(rows, |r| r.recommend_ids.clone()))
}

/// # Errors
/// Table assembly fails.
pub fn qa_summary_to_table(rows: &[QaSummary]) -> Result<Table, StoreError> {
    Table::new()
        .with_column("geo_country_code", text(rows, |r| Some(r.country.clone())))?
        .with_column(
            "min_subs_in_cluster",
            Column::Int64(rows.iter().map(|r| r.min_subs_in_cluster.and_then(to_i64)).collect()),
        )?
        .with_column("geo_relevant_count", int(rows, |r| r.geo_relevant_count))?
        .with_column("seed_count", int(rows, |r| r.seed_count))?
        .with_column("recommend_count", int(rows, |r| r.recommend_count))?
        .with_column("cluster_count", int(rows, |r| r.cluster_count))?
        .with_column("orphan_cluster_count", int(rows, |r| r.orphan_cluster_count))?
        .with_column("seeds_published", int(rows, |r| r.seeds_published))?
        .with_column("seeds_in_orphan_clusters", int(rows, |r| r.seeds_in_orphan_clusters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn empty_country_keeps_its_key() {
        let fpr = CountryFpr {
            country: "MX".into(),
            mapping: BTreeMap::new(),
            rows: Vec::new(),
            clusters: Vec::new(),
            summary: QaSummary::default(),
            sweep: Vec::new(),
        };
        assert_eq!(to_json_lines(&[fpr]).expect("json"), "{\"MX\":{}}\n");
    }

    #[test]
    fn json_lines_list_counterparts() {
        let fpr = CountryFpr {
            country: "DE".into(),
            mapping: BTreeMap::from([(
                "t5_a".to_string(),
                vec!["t5_b".to_string(), "t5_c".to_string()],
            )]),
            rows: Vec::new(),
            clusters: Vec::new(),
            summary: QaSummary::default(),
            sweep: Vec::new(),
        };
        let line = to_json_lines(&[fpr]).expect("json");
        let parsed: Value = serde_json::from_str(line.trim()).expect("parse");
        assert_eq!(parsed["DE"]["t5_a"], json!(["t5_b", "t5_c"]));
    }
}
