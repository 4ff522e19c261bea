use std::collections::BTreeMap;

use subclu::clustering::{ClusterLabels, DepthLabels};
use rstest::rstest;
use subclu::fpr::{
    FprBuilder, FprPolicy, GeoRelevanceRow, GeoThresholds, build_subjects, relevant_ids,
    rows_to_table, to_json_lines,
};
use subclu::metadata::records::SubredditRecord;
use subclu::resize::{ResizeOptions, ResizeStrategy};

fn sub(id: &str, name: &str, over_18: Option<bool>) -> SubredditRecord {
    SubredditRecord {
        subreddit_id: id.to_string(),
        subreddit_name: name.to_string(),
        description_text: None,
        topic: Some("Gaming".to_string()),
        rating: Some("E".to_string()),
        sub_type: Some("public".to_string()),
        over_18,
        allow_discovery: Some(true),
    }
}

fn geo(id: &str, country: &str) -> GeoRelevanceRow {
    GeoRelevanceRow {
        subreddit_id: id.to_string(),
        geo_country_code: country.to_string(),
        users_percent_by_subreddit_l28: None,
        users_percent_by_country_standardized: None,
        geo_relevance_default: Some(true),
    }
}

fn one_cluster(ids: &[&str]) -> ClusterLabels {
    ClusterLabels {
        ids: ids.iter().map(|id| (*id).to_string()).collect(),
        names: vec![None; ids.len()],
        depths: vec![DepthLabels {
            k: 1,
            labels: vec![1; ids.len()],
            majority: BTreeMap::new(),
        }],
        truths: BTreeMap::new(),
    }
}

fn thresholds() -> GeoThresholds {
    GeoThresholds {
        min_users_percent_l28: 0.14,
        min_country_standardized: 2.5,
    }
}

#[test]
fn over_18_seed_gets_counterparts_but_is_never_one() {
    let subreddits = vec![
        sub("t5_a", "alpha", Some(false)),
        sub("t5_b", "bravo", Some(true)),
        sub("t5_c", "charlie", None),
    ];
    let subjects = build_subjects(&subreddits, None);
    let policy = FprPolicy::new(Default::default(), &[]).expect("policy");
    let labels = one_cluster(&["t5_a", "t5_b", "t5_c"]);
    let builder = FprBuilder::new(
        &labels,
        &subjects,
        &policy,
        ResizeStrategy::AggregateSmallClusters,
        &[1, 2],
        ResizeOptions::default(),
    );

    let geo_rows = vec![
        geo("t5_a", "DE"),
        geo("t5_b", "de"),
        geo("t5_c", "DE"),
        geo("t5_a", "FR"),
    ];
    let ids = relevant_ids(&geo_rows, "DE", &thresholds());
    let fpr = builder.build("DE", &ids);

    assert_eq!(fpr.mapping["t5_a"], vec!["t5_c".to_string()]);
    assert_eq!(fpr.mapping["t5_b"], vec!["t5_a".to_string(), "t5_c".to_string()]);
    assert!(fpr.mapping.values().all(|c| !c.contains(&"t5_b".to_string())));
    assert_eq!(fpr.summary.seed_count, 3);
    assert_eq!(fpr.summary.recommend_count, 2);
    assert_eq!(fpr.summary.orphan_cluster_count, 0);
    assert_eq!(fpr.summary.min_subs_in_cluster, Some(2));
    assert_eq!(fpr.sweep.len(), 2);

    let json = to_json_lines(std::slice::from_ref(&fpr)).expect("json");
    let parsed: serde_json::Value = serde_json::from_str(json.trim()).expect("parse");
    assert_eq!(parsed["DE"]["t5_b"], serde_json::json!(["t5_a", "t5_c"]));
}

#[test]
fn country_without_geo_relevant_subs_keeps_its_key() {
    let subreddits = vec![sub("t5_a", "alpha", None), sub("t5_b", "bravo", None)];
    let subjects = build_subjects(&subreddits, None);
    let policy = FprPolicy::new(Default::default(), &[]).expect("policy");
    let labels = one_cluster(&["t5_a", "t5_b"]);
    let builder = FprBuilder::new(
        &labels,
        &subjects,
        &policy,
        ResizeStrategy::AggregateSmallClusters,
        &[1],
        ResizeOptions::default(),
    );

    let ids = relevant_ids(&[geo("t5_a", "DE")], "MX", &thresholds());
    let fpr = builder.build("MX", &ids);
    assert!(fpr.is_empty());
    assert_eq!(fpr.summary.seeds_published, 0);
    assert_eq!(fpr.summary.seed_count, 0);
    assert_eq!(to_json_lines(&[fpr]).expect("json"), "{\"MX\":{}}\n");
}

#[test]
fn blocked_names_drop_out_of_both_sides() {
    let subreddits = vec![
        sub("t5_a", "alpha", None),
        sub("t5_b", "bravo", None),
        sub("t5_c", "cointrading", None),
    ];
    let subjects = build_subjects(&subreddits, None);
    let policy = FprPolicy::new(Default::default(), &["coin".to_string()]).expect("policy");
    let labels = one_cluster(&["t5_a", "t5_b", "t5_c"]);
    let builder = FprBuilder::new(
        &labels,
        &subjects,
        &policy,
        ResizeStrategy::AggregateSmallClusters,
        &[1],
        ResizeOptions::default(),
    );
    let geo_rows = vec![geo("t5_a", "DE"), geo("t5_b", "DE"), geo("t5_c", "DE")];
    let fpr = builder.build("DE", &relevant_ids(&geo_rows, "DE", &thresholds()));
    assert_eq!(fpr.mapping.len(), 2);
    assert!(!fpr.mapping.contains_key("t5_c"));
    assert_eq!(fpr.mapping["t5_a"], vec!["t5_b".to_string()]);
}

#[rstest]
#[case::lone_geo_relevant_seed(
    vec![sub("t5_a", "alpha", None), sub("t5_b", "bravo", None)],
    &["t5_a"],
    1
)]
#[case::seeds_without_recommendables(
    vec![
        sub("t5_a", "alpha", Some(true)),
        sub("t5_b", "bravo", Some(true)),
        sub("t5_c", "charlie", Some(true)),
    ],
    &["t5_a", "t5_b", "t5_c"],
    0
)]
fn orphaned_seeds_are_reported_but_not_published(
    #[case] subreddits: Vec<SubredditRecord>,
    #[case] relevant: &[&str],
    #[case] recommends: usize,
) {
    let subjects = build_subjects(&subreddits, None);
    let policy = FprPolicy::new(Default::default(), &[]).expect("policy");
    let all_ids: Vec<&str> = subreddits.iter().map(|s| s.subreddit_id.as_str()).collect();
    let labels = one_cluster(&all_ids);
    let builder = FprBuilder::new(
        &labels,
        &subjects,
        &policy,
        ResizeStrategy::AggregateSmallClusters,
        &[1],
        ResizeOptions::default(),
    );
    let geo_rows: Vec<GeoRelevanceRow> = relevant.iter().map(|id| geo(id, "DE")).collect();
    let fpr = builder.build("DE", &relevant_ids(&geo_rows, "DE", &thresholds()));

    assert!(fpr.is_empty());
    assert_eq!(fpr.rows.len(), relevant.len());
    assert!(fpr.rows.iter().all(|r| r.orphan && r.counterpart_ids.is_empty()));
    assert_eq!(fpr.clusters.len(), 1);
    assert!(fpr.clusters[0].orphan);
    assert_eq!(fpr.clusters[0].recommend_count, recommends);

    assert_eq!(fpr.summary.seed_count, relevant.len());
    assert_eq!(fpr.summary.recommend_count, recommends);
    assert_eq!(fpr.summary.orphan_cluster_count, 1);
    assert_eq!(fpr.summary.seeds_in_orphan_clusters, relevant.len());
    assert_eq!(fpr.summary.seeds_published, 0);

    let table = rows_to_table(&fpr.rows).expect("df_fpr");
    assert_eq!(table.num_rows(), relevant.len());
    assert_eq!(to_json_lines(&[fpr]).expect("json"), "{\"DE\":{}}\n");
}
