use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};

#[cfg(test)]
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::clustering::{Affinity, LinkageMethod};
use crate::resize::ResizeStrategy;
use crate::similarity::AnnMetric;
use crate::store::ArtifactFormat;

#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to parse config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Where a table is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableSource {
    /// File or folder on the local filesystem.
    Local { path: PathBuf },
    /// Key prefix in the configured bucket.
    Remote { path: String },
    /// Artifact folder of an earlier run.
    Artifact { run_id: String, folder: String },
}

impl TableSource {
    /// Shard format, inferred from the path suffix (folders default to parquet).
    #[must_use]
    pub fn format(&self) -> ArtifactFormat {
        let path = match self {
            TableSource::Local { path } => path.to_string_lossy().into_owned(),
            TableSource::Remote { path } => path.clone(),
            TableSource::Artifact { folder, .. } => folder.clone(),
        };
        if path.ends_with(".json") || path.ends_with(".ndjson") {
            ArtifactFormat::Json
        } else {
            ArtifactFormat::Parquet
        }
    }

    /// Appends a partition folder (`pt=2022-01-01` style) to path-based sources.
    #[must_use]
    pub fn with_partition(&self, partition: Option<&str>) -> TableSource {
        let Some(partition) = partition.filter(|p| !p.is_empty()) else {
            return self.clone();
        };
        match self {
            TableSource::Local { path } => TableSource::Local {
                path: path.join(partition),
            },
            TableSource::Remote { path } => TableSource::Remote {
                path: format!("{}/{partition}", path.trim_end_matches('/')),
            },
            TableSource::Artifact { .. } => self.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputsConfig {
    pub subreddits: Option<TableSource>,
    pub posts: Option<TableSource>,
    pub comments: Option<TableSource>,
    pub subreddit_embeddings: Option<TableSource>,
    pub post_embeddings: Option<TableSource>,
    pub comment_embeddings: Option<TableSource>,
    pub partition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResumeConfig {
    pub embeddings_run_id: Option<String>,
    pub clustering_run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelKwargs {
    pub linkage: LinkageMethod,
    pub affinity: Affinity,
}

impl Default for ModelKwargs {
    fn default() -> Self {
        Self {
            linkage: LinkageMethod::Ward,
            affinity: Affinity::Euclidean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringAlgoConfig {
    pub model_name: String,
    pub model_kwargs: ModelKwargs,
}

impl Default for ClusteringAlgoConfig {
    fn default() -> Self {
        Self {
            model_name: "AgglomerativeClustering".to_string(),
            model_kwargs: ModelKwargs::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReduceConfig {
    pub n_components: usize,
    pub n_iter: usize,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            n_components: 50,
            n_iter: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineStepsConfig {
    pub normalize: bool,
    pub reduce: Option<ReduceConfig>,
}

impl Default for PipelineStepsConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            reduce: None,
        }
    }
}

/// One composed run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub mlflow_experiment_name: String,
    pub run_name: Option<String>,
    pub target_countries: Vec<String>,
    pub inputs: InputsConfig,
    pub resume: ResumeConfig,
    pub cluster_labels_table: Option<TableSource>,
    pub qa_table: Option<TableSource>,
    pub qa_partition: Option<String>,
    pub geo_relevance_table: Option<TableSource>,
    pub geo_min_users_percent_by_subreddit_l28: f64,
    pub geo_min_country_standardized_relevance: f64,
    pub agg_post_post_weight: u32,
    pub agg_post_comment_weight: u32,
    pub agg_post_subreddit_desc_weight: u32,
    pub agg_comments_to_post_weight_col: Option<String>,
    pub min_comment_text_len: usize,
    pub n_min_post_per_sub: usize,
    pub clustering_algo: ClusteringAlgoConfig,
    pub pipeline: PipelineStepsConfig,
    pub n_trees: usize,
    pub metric: AnnMetric,
    pub optimal_k_search: Vec<usize>,
    pub dynamic_agg_strategy: ResizeStrategy,
    pub sensitive_topics: BTreeSet<String>,
    pub n_mix_start: usize,
    pub min_subs_sweep: Vec<usize>,
    pub blocked_name_keywords: Vec<String>,
    pub ground_truth_cols: Vec<String>,
    pub similarity_top_n: usize,
    pub build_ann_index: bool,
    pub ann_search_k: Option<usize>,
    pub k_intervals: Vec<(usize, usize)>,
    pub last_n_merges: usize,
    pub seed: u64,
    /// Overrides `SUBCLU_TARGET_MB` for this run.
    pub target_mb_size: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mlflow_experiment_name: "subreddit_clustering".to_string(),
            run_name: None,
            target_countries: Vec::new(),
            inputs: InputsConfig::default(),
            resume: ResumeConfig::default(),
            cluster_labels_table: None,
            qa_table: None,
            qa_partition: None,
            geo_relevance_table: None,
            geo_min_users_percent_by_subreddit_l28: 0.14,
            geo_min_country_standardized_relevance: 2.0,
            agg_post_post_weight: 70,
            agg_post_comment_weight: 20,
            agg_post_subreddit_desc_weight: 10,
            agg_comments_to_post_weight_col: Some("comment_text_len".to_string()),
            min_comment_text_len: 11,
            n_min_post_per_sub: 0,
            clustering_algo: ClusteringAlgoConfig::default(),
            pipeline: PipelineStepsConfig::default(),
            n_trees: 200,
            metric: AnnMetric::Angular,
            optimal_k_search: vec![10, 20, 40, 50, 100, 250, 500],
            dynamic_agg_strategy: ResizeStrategy::AggregateSmallClusters,
            sensitive_topics: [
                "Addiction Support",
                "Gender",
                "Mature Themes and Adult Content",
                "Medical and Mental Health",
                "Politics",
                "Religion and Spirituality",
                "Sexual Orientation",
                "Trauma Support",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            n_mix_start: 1,
            min_subs_sweep: (5..=10).collect(),
            blocked_name_keywords: vec![
                "covid".to_string(),
                "coronavirus".to_string(),
                "vaccin".to_string(),
            ],
            ground_truth_cols: vec!["primary_topic".to_string()],
            similarity_top_n: 20,
            build_ann_index: false,
            ann_search_k: None,
            k_intervals: crate::clustering::kselect::DEFAULT_K_INTERVALS.to_vec(),
            last_n_merges: 500,
            seed: 42,
            target_mb_size: None,
        }
    }
}

impl RunConfig {
    /// Reads an optional YAML file, patches it with `key.path=value`
    /// overrides and deserializes the result.
    ///
    /// # Errors
    /// Unreadable file, malformed YAML, unknown keys, or failed validation.
    pub fn load(path: Option<&Path>, overrides: &[String]) -> Result<Self, ConfigError> {
        let (origin, raw) = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Invalid {
                    name: "config",
                    source: anyhow::Error::new(error).context(path.display().to_string()),
                })?;
                (path.display().to_string(), raw)
            }
            None => ("<defaults>".to_string(), String::new()),
        };
        Self::from_yaml_str(&origin, &raw, overrides)
    }

    /// # Errors
    /// Same as [`RunConfig::load`].
    pub fn from_yaml_str(
        origin: &str,
        raw: &str,
        overrides: &[String],
    ) -> Result<Self, ConfigError> {
        let mut tree: Value = if raw.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
                origin: origin.to_string(),
                source,
            })?
        };
        if tree.is_null() {
            tree = Value::Mapping(Mapping::new());
        }

        let known = known_keys();
        for raw_override in overrides {
            apply_override(&mut tree, raw_override, &known)?;
        }

        let config: RunConfig = serde_yaml::from_value(tree).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] for inconsistent option values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, message: String| ConfigError::Invalid {
            name,
            source: anyhow::anyhow!(message),
        };
        if self.agg_post_post_weight == 0 {
            return Err(invalid("agg_post_post_weight", "must be positive".into()));
        }
        if self.n_trees == 0 {
            return Err(invalid("n_trees", "must be positive".into()));
        }
        if self.similarity_top_n == 0 {
            return Err(invalid("similarity_top_n", "must be positive".into()));
        }
        if self.min_subs_sweep.is_empty() {
            return Err(invalid("min_subs_sweep", "must not be empty".into()));
        }
        if self.n_mix_start == 0 {
            return Err(invalid("n_mix_start", "depths start at 1".into()));
        }
        if let Some((lo, hi)) = self.k_intervals.iter().find(|(lo, hi)| lo >= hi) {
            return Err(invalid("k_intervals", format!("interval ({lo}, {hi}) is empty")));
        }
        if self.target_mb_size.is_some_and(|mb| !(mb.is_finite() && mb > 0.0)) {
            return Err(invalid("target_mb_size", "must be a positive number".into()));
        }
        Ok(())
    }

    /// Resolved configuration rendered as YAML.
    ///
    /// # Errors
    /// Serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn known_keys() -> BTreeSet<String> {
    match serde_yaml::to_value(RunConfig::default()) {
        Ok(Value::Mapping(mapping)) => mapping
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Applies one `a.b.c=value` override; the value parses as a YAML node.
fn apply_override(
    tree: &mut Value,
    raw_override: &str,
    known: &BTreeSet<String>,
) -> Result<(), ConfigError> {
    let (key, raw_value) = raw_override
        .split_once('=')
        .ok_or_else(|| ConfigError::Invalid {
            name: "--set",
            source: anyhow::anyhow!("expected key=value, got `{raw_override}`"),
        })?;
    let segments: Vec<&str> = key.trim().split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(ConfigError::Invalid {
            name: "--set",
            source: anyhow::anyhow!("empty key in `{raw_override}`"),
        });
    };
    if let Some(top) = segments.first() {
        if !known.contains(*top) {
            return Err(ConfigError::UnknownKey((*top).to_string()));
        }
    }

    let value: Value = if raw_value.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(raw_value).map_err(|source| ConfigError::Parse {
            origin: format!("--set {key}"),
            source,
        })?
    };

    let mut node = tree;
    for segment in parents {
        let mapping = as_mapping(node, key)?;
        node = mapping
            .entry(Value::String((*segment).to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if node.is_null() {
            *node = Value::Mapping(Mapping::new());
        }
    }
    as_mapping(node, key)?.insert(Value::String((*last).to_string()), value);
    Ok(())
}

fn as_mapping<'a>(node: &'a mut Value, key: &str) -> Result<&'a mut Mapping, ConfigError> {
    node.as_mapping_mut().ok_or_else(|| ConfigError::Invalid {
        name: "--set",
        source: anyhow::anyhow!("`{key}` descends into a non-mapping value"),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    work_root: PathBuf,
    cache_root: PathBuf,
    store_root: PathBuf,
    bucket: String,
    download_concurrency: usize,
    target_mb: f64,
    log_format: LogFormat,
}

impl EnvSettings {
    /// Reads `SUBCLU_*` variables, falling back to local defaults.
    ///
    /// # Errors
    /// A set variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let work_root = PathBuf::from(env_or("SUBCLU_WORK_ROOT", "/tmp/subclu/runs"));
        let cache_root = PathBuf::from(env_or("SUBCLU_CACHE_ROOT", "/tmp/subclu/cache"));
        let store_root = PathBuf::from(env_or("SUBCLU_STORE_ROOT", "/tmp/subclu/store"));
        let bucket = env_or("SUBCLU_BUCKET", "i18n-subreddit-clustering");
        let download_concurrency =
            parse_usize("SUBCLU_DOWNLOAD_CONCURRENCY", default_concurrency())?;
        if download_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "SUBCLU_DOWNLOAD_CONCURRENCY",
                source: anyhow::anyhow!("must be greater than zero"),
            });
        }
        let target_mb = parse_f64("SUBCLU_TARGET_MB", 75.0)?;
        let log_format = parse_log_format("SUBCLU_LOG_FORMAT")?;

        Ok(Self {
            work_root,
            cache_root,
            store_root,
            bucket,
            download_concurrency,
            target_mb,
            log_format,
        })
    }

    #[must_use]
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    #[must_use]
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn download_concurrency(&self) -> usize {
        self.download_concurrency
    }

    #[must_use]
    pub fn target_mb(&self) -> f64 {
        self.target_mb
    }

    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Settings rooted under one directory, for tests and local runs.
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            work_root: root.join("runs"),
            cache_root: root.join("cache"),
            store_root: root.join("store"),
            bucket: "i18n-subreddit-clustering".to_string(),
            download_concurrency: 4,
            target_mb: 75.0,
            log_format: LogFormat::Text,
        }
    }
}

/// One and a half downloads per core.
fn default_concurrency() -> usize {
    (num_cpus::get() * 3 / 2).max(1)
}

fn env_or(name: &'static str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let value = raw.trim().parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be a positive number"),
        });
    }
    Ok(value)
}

fn parse_log_format(name: &'static str) -> Result<LogFormat, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| "text".to_string());
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("expected text or json, got `{other}`"),
        }),
    }
}
