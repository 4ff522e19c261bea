use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use subclu::config::{EnvSettings, InputsConfig, RunConfig, TableSource};
use subclu::embedding::frame::EmbeddingFrame;
use subclu::observability::Telemetry;
use subclu::pipeline::{LabelOrigin, PipelineOrchestrator, RunContext, RunDir, SUCCESS_MARKER};
use subclu::embedding::aggregate::{
    POST_LEVEL_B, POST_LEVEL_C, SUB_LEVEL_A, SUB_LEVEL_B, SUB_LEVEL_C,
};
use subclu::store::artifacts::{read_local, save_table_chunked};
use subclu::store::codec::to_ndjson;
use subclu::store::{ArtifactFormat, ArtifactStore, Column, LocalObjectStore, SaveOptions, Table};

const SUBS: [(&str, &str, &str); 8] = [
    ("t5_g1", "pcgaming", "Gaming"),
    ("t5_g2", "zocken", "Gaming"),
    ("t5_g3", "konsolen", "Gaming"),
    ("t5_g4", "retrogames", "Gaming"),
    ("t5_f1", "kochen", "Food"),
    ("t5_f2", "backen", "Food"),
    ("t5_f3", "grillen", "Food"),
    ("t5_f4", "rezepte", "Food"),
];

fn text(values: impl IntoIterator<Item = String>) -> Column {
    Column::Utf8(values.into_iter().map(Some).collect())
}

fn repeated(value: &str, n: usize) -> Column {
    Column::Utf8(vec![Some(value.to_string()); n])
}

fn write(table: &Table, dir: &Path) -> TableSource {
    save_table_chunked(table, dir, SaveOptions::default()).expect("write input");
    TableSource::Local { path: dir.to_path_buf() }
}

/// Post ids per subreddit: `{sub}_p0`, `{sub}_p1`; one comment per post.
fn post_ids() -> Vec<(String, String)> {
    SUBS.iter()
        .flat_map(|(id, _, _)| (0..2).map(move |p| (format!("{id}_p{p}"), (*id).to_string())))
        .collect()
}

fn vector_for(sub: &str, jitter: f32) -> [f32; 3] {
    if sub.starts_with("t5_g") {
        [1.0, 0.05 + jitter, 0.0]
    } else {
        [0.0, 1.0, 0.05 + jitter]
    }
}

fn write_inputs(root: &Path) -> InputsConfig {
    let inputs = root.join("inputs");
    let subreddits = Table::new()
        .with_column("subreddit_id", text(SUBS.iter().map(|s| s.0.to_string())))
        .and_then(|t| t.with_column("subreddit_name", text(SUBS.iter().map(|s| s.1.to_string()))))
        .and_then(|t| t.with_column("primary_topic", text(SUBS.iter().map(|s| s.2.to_string()))))
        .and_then(|t| t.with_column("rating", text(SUBS.iter().map(|_| "E".to_string()))))
        .and_then(|t| t.with_column("type", text(SUBS.iter().map(|_| "public".to_string()))))
        .and_then(|t| t.with_column("over_18", text(SUBS.iter().map(|_| "f".to_string()))))
        .and_then(|t| t.with_column("allow_discovery", Column::Bool(vec![Some(true); SUBS.len()])))
        .expect("subreddits");

    let posts = post_ids();
    let post_table = Table::new()
        .with_column("post_id", text(posts.iter().map(|p| p.0.clone())))
        .and_then(|t| t.with_column("subreddit_id", text(posts.iter().map(|p| p.1.clone()))))
        .and_then(|t| t.with_column("weighted_language", repeated("de", posts.len())))
        .and_then(|t| t.with_column("post_type", text(posts.iter().map(|_| "text".to_string()))))
        .and_then(|t| t.with_column("text_len", Column::Float64(vec![Some(120.0); posts.len()])))
        .and_then(|t| {
            t.with_column("text_word_count", Column::Float64(vec![Some(20.0); posts.len()]))
        })
        .expect("posts");
    let comment_table = Table::new()
        .with_column("comment_id", text(posts.iter().map(|p| format!("{}_c0", p.0))))
        .and_then(|t| t.with_column("post_id", text(posts.iter().map(|p| p.0.clone()))))
        .and_then(|t| t.with_column("subreddit_id", text(posts.iter().map(|p| p.1.clone()))))
        .and_then(|t| {
            t.with_column("comment_text_len", Column::Float64(vec![Some(40.0); posts.len()]))
        })
        .expect("comments");

    let mut post_vectors = Array2::<f32>::zeros((posts.len(), 3));
    for (row, (_, sub)) in posts.iter().enumerate() {
        let v = vector_for(sub, row as f32 * 0.01);
        post_vectors.row_mut(row).assign(&ndarray::arr1(&v));
    }
    let post_embeddings = EmbeddingFrame::new(
        "post_embeddings",
        "post_id",
        posts.iter().map(|p| p.0.clone()).collect(),
        post_vectors.clone(),
    )
    .expect("post embeddings");
    let comment_embeddings = EmbeddingFrame::new(
        "comment_embeddings",
        "comment_id",
        posts.iter().map(|p| format!("{}_c0", p.0)).collect(),
        post_vectors,
    )
    .expect("comment embeddings");

    InputsConfig {
        subreddits: Some(write(&subreddits, &inputs.join("subreddits"))),
        posts: Some(write(&post_table, &inputs.join("posts"))),
        comments: Some(write(&comment_table, &inputs.join("comments"))),
        subreddit_embeddings: None,
        post_embeddings: Some(write(
            &post_embeddings.to_table().expect("table"),
            &inputs.join("post_embeddings"),
        )),
        comment_embeddings: Some(write(
            &comment_embeddings.to_table().expect("table"),
            &inputs.join("comment_embeddings"),
        )),
        partition: None,
    }
}

fn write_geo(root: &Path) -> TableSource {
    let ids: Vec<String> = SUBS.iter().map(|s| s.0.to_string()).collect();
    let table = Table::new()
        .with_column("subreddit_id", text(ids.clone()))
        .and_then(|t| t.with_column("geo_country_code", text(ids.iter().map(|_| "DE".to_string()))))
        .and_then(|t| {
            t.with_column("geo_relevance_default", Column::Bool(vec![Some(true); ids.len()]))
        })
        .expect("geo");
    let path = root.join("inputs").join("geo.json");
    std::fs::create_dir_all(root.join("inputs")).expect("inputs dir");
    std::fs::write(&path, to_ndjson(&table).expect("ndjson")).expect("write geo");
    TableSource::Local { path }
}

fn run_config(root: &Path) -> RunConfig {
    RunConfig {
        mlflow_experiment_name: "e2e".to_string(),
        target_countries: vec!["DE".to_string()],
        inputs: write_inputs(root),
        geo_relevance_table: Some(write_geo(root)),
        optimal_k_search: vec![2, 4],
        min_subs_sweep: vec![1, 2],
        build_ann_index: true,
        n_trees: 4,
        similarity_top_n: 3,
        ..RunConfig::default()
    }
}

fn context(root: &Path, config: RunConfig) -> RunContext {
    let env = EnvSettings::rooted_at(root);
    let run = RunDir::create(env.work_root()).expect("run dir");
    let store = ArtifactStore::new(
        Arc::new(LocalObjectStore::new(env.store_root(), env.bucket())),
        env.cache_root(),
        config.mlflow_experiment_name.clone(),
    );
    RunContext::new(Arc::new(config), env, store, run, Telemetry::new().expect("telemetry"))
}

fn artifact_dir(root: &Path, run_id: &str, folder: &str) -> PathBuf {
    let env = EnvSettings::rooted_at(root);
    env.store_root()
        .join(env.bucket())
        .join("mlruns/e2e")
        .join(run_id)
        .join("artifacts")
        .join(folder)
}

#[tokio::test]
async fn fit_then_resume_publishes_the_same_fpr() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    let config = run_config(root);

    let first = PipelineOrchestrator::new(context(root, config.clone()));
    let summary = first.execute().await.expect("first run");
    assert_eq!(summary.label_origin, LabelOrigin::Fitted);
    assert_eq!(summary.subreddits_clustered, SUBS.len());
    assert_eq!(summary.ks, vec![2, 4]);
    assert_eq!(summary.countries.len(), 1);
    assert!(summary.countries[0].seeds_published > 0);
    assert!(first.context().run().is_complete());

    let run_id = summary.run_id.clone();
    for folder in [
        "df_subreddit_metadata",
        "df_sub_level_agg_c_post_comments_and_sub_desc",
        "df_labels",
        "linkage",
        "optimal_k",
        "df_supervised_metrics",
        "df_nearest_neighbors",
        "df_fpr",
        "config",
        "metrics",
    ] {
        assert!(artifact_dir(root, &run_id, folder).exists(), "missing artifact {folder}");
    }
    assert!(artifact_dir(root, &run_id, SUCCESS_MARKER).is_file());

    let json_path = first.context().run().folder("fpr").join("fpr.json");
    let json = std::fs::read_to_string(&json_path).expect("fpr json");
    let parsed: serde_json::Value = serde_json::from_str(json.trim()).expect("parse");
    let seeds = parsed["DE"].as_object().expect("DE seeds");
    for (seed, counterparts) in seeds {
        let group = &seed[..4];
        for counterpart in counterparts.as_array().expect("list") {
            let counterpart = counterpart.as_str().expect("id");
            assert_ne!(counterpart, seed);
            assert!(counterpart.starts_with(group), "{seed} paired with {counterpart}");
        }
    }

    let mut resumed_config = config;
    resumed_config.resume.clustering_run_id = Some(run_id.clone());
    let second = PipelineOrchestrator::new(context(root, resumed_config));
    let resumed = second.execute().await.expect("resumed run");
    assert_eq!(resumed.label_origin, LabelOrigin::Resumed { run_id });
    assert_ne!(resumed.run_id, summary.run_id);
    let resumed_path = second.context().run().folder("fpr").join("fpr.json");
    let resumed_json = std::fs::read_to_string(resumed_path).expect("resumed json");
    assert_eq!(resumed_json, json);
}

#[tokio::test]
async fn two_fresh_fits_write_identical_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    let config = run_config(root);

    let mut runs = Vec::new();
    for _ in 0..2 {
        let orchestrator = PipelineOrchestrator::new(context(root, config.clone()));
        let summary = orchestrator.execute().await.expect("fit");
        assert_eq!(summary.label_origin, LabelOrigin::Fitted);
        runs.push(summary.run_id);
    }
    assert_ne!(runs[0], runs[1]);

    for folder in [
        SUB_LEVEL_A,
        SUB_LEVEL_B,
        SUB_LEVEL_C,
        POST_LEVEL_B,
        POST_LEVEL_C,
        "df_labels",
        "df_fpr",
    ] {
        let frames: Vec<Table> = runs
            .iter()
            .map(|run_id| {
                read_local(&artifact_dir(root, run_id, folder), ArtifactFormat::Parquet, None)
                    .expect("read frame")
            })
            .collect();
        assert!(frames[0].num_rows() > 0, "{folder} is empty");
        assert_eq!(frames[0], frames[1], "{folder} differs between runs");
    }
}
