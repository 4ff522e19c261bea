//! Per-run working directory and the shared stage context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{EnvSettings, RunConfig, TableSource};
use crate::observability::Telemetry;
use crate::observability::metrics::Metrics;
use crate::store::artifacts::{read_local, save_table_chunked};
use crate::store::{ArtifactStore, ReadOptions, SaveOptions, StoreError, Table};
use crate::util::error::PipelineError;

/// Written last; a run directory without it was abandoned.
pub const SUCCESS_MARKER: &str = "_SUCCESS";
pub const LOGS_DIR: &str = "logs";
pub const LOG_FILE: &str = "log.txt";
pub const CONFIG_DIR: &str = "config";
pub const METRICS_DIR: &str = "metrics";

const RUN_ID_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Local directory of one run, named by its run id.
#[derive(Debug, Clone)]
pub struct RunDir {
    run_id: String,
    path: PathBuf,
}

impl RunDir {
    /// Creates a fresh run directory under `work_root` stamped with the
    /// current UTC time.
    ///
    /// # Errors
    /// The directory cannot be created.
    pub fn create(work_root: &Path) -> Result<Self> {
        Self::create_at(work_root, Utc::now())
    }

    /// Same as [`RunDir::create`] with an explicit clock. Existing ids get a
    /// numeric suffix.
    ///
    /// # Errors
    /// The directory cannot be created.
    pub fn create_at(work_root: &Path, now: DateTime<Utc>) -> Result<Self> {
        std::fs::create_dir_all(work_root)
            .with_context(|| format!("failed to create work root {}", work_root.display()))?;
        let stamp = now.format(RUN_ID_FORMAT).to_string();
        let mut run_id = stamp.clone();
        let mut suffix = 1;
        while work_root.join(&run_id).exists() {
            run_id = format!("{stamp}_{suffix:02}");
            suffix += 1;
        }
        let path = work_root.join(&run_id);
        for sub in [LOGS_DIR, CONFIG_DIR, METRICS_DIR] {
            let dir = path.join(sub);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self { run_id, path })
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.path.join(LOGS_DIR).join(LOG_FILE)
    }

    #[must_use]
    pub fn folder(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    #[must_use]
    pub fn marker(&self) -> PathBuf {
        self.path.join(SUCCESS_MARKER)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.marker().is_file()
    }

    /// # Errors
    /// The marker cannot be written.
    pub fn mark_success(&self) -> Result<PathBuf> {
        let marker = self.marker();
        std::fs::write(&marker, Utc::now().to_rfc3339())
            .with_context(|| format!("failed to write {}", marker.display()))?;
        Ok(marker)
    }

    /// Resolved config as `config/config.yaml` and `config/config.json`.
    ///
    /// # Errors
    /// Serialization or write failure.
    pub fn save_config(&self, config: &RunConfig) -> Result<PathBuf> {
        let dir = self.folder(CONFIG_DIR);
        let yaml = config.to_yaml().context("failed to render config as yaml")?;
        std::fs::write(dir.join("config.yaml"), yaml).context("failed to write config.yaml")?;
        let json = serde_json::to_string_pretty(config).context("failed to render config as json")?;
        std::fs::write(dir.join("config.json"), json).context("failed to write config.json")?;
        Ok(dir)
    }
}

/// Run directories under `work_root` that never reached [`SUCCESS_MARKER`].
#[must_use]
pub fn scan_abandoned(work_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(work_root) else {
        return Vec::new();
    };
    let mut abandoned: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && !path.join(SUCCESS_MARKER).is_file())
        .collect();
    abandoned.sort();
    abandoned
}

/// Everything a stage needs: config, store, run directory and metrics.
#[derive(Debug, Clone)]
pub struct RunContext {
    config: Arc<RunConfig>,
    env: EnvSettings,
    store: ArtifactStore,
    run: RunDir,
    telemetry: Telemetry,
}

impl RunContext {
    #[must_use]
    pub fn new(
        config: Arc<RunConfig>,
        env: EnvSettings,
        store: ArtifactStore,
        run: RunDir,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            config,
            env,
            store,
            run,
            telemetry,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn run(&self) -> &RunDir {
        &self.run
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        self.run.run_id()
    }

    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        self.telemetry.metrics()
    }

    fn save_options(&self) -> SaveOptions {
        SaveOptions {
            target_mb_size: self.config.target_mb_size.unwrap_or_else(|| self.env.target_mb()),
            write_index: true,
        }
    }

    /// Reads a configured table, appending `partition` to path sources.
    ///
    /// # Errors
    /// [`PipelineError::MissingInput`] when nothing is found; decode failures
    /// become [`PipelineError::SchemaMismatch`].
    pub async fn load_table(
        &self,
        frame: &str,
        source: &TableSource,
        partition: Option<&str>,
    ) -> Result<Table, PipelineError> {
        let source = source.with_partition(partition);
        let format = source.format();
        let options = ReadOptions {
            format,
            ..ReadOptions::default()
        };
        let table = match &source {
            TableSource::Local { path } => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || read_local(&path, format, None))
                    .await
                    .map_err(|e| StoreError::Join(e.to_string()))
                    .and_then(|r| r)
            }
            TableSource::Remote { path } => self.store.read_remote(path, options).await,
            TableSource::Artifact { run_id, folder } => {
                self.store.read_artifact(run_id, folder, options).await
            }
        }
        .map_err(|e| PipelineError::from_store(frame, e))?;
        debug!(frame, rows = table.num_rows(), columns = table.num_columns(), "table loaded");
        Ok(table)
    }

    /// Reads an artifact folder written by an earlier run.
    ///
    /// # Errors
    /// Same as [`RunContext::load_table`].
    pub async fn load_artifact(&self, run_id: &str, folder: &str) -> Result<Table, PipelineError> {
        let source = TableSource::Artifact {
            run_id: run_id.to_string(),
            folder: folder.to_string(),
        };
        self.load_table(folder, &source, None).await
    }

    /// Saves `table` as chunked parquet under the run directory and uploads
    /// the folder to the run's artifacts.
    ///
    /// # Errors
    /// Local write or upload fails.
    pub async fn save_artifact(&self, folder: &str, table: Table) -> Result<usize> {
        let local = self.run.folder(folder);
        let options = self.save_options();
        let target = local.clone();
        let rows = table.num_rows();
        let written =
            tokio::task::spawn_blocking(move || save_table_chunked(&table, &target, options))
                .await
                .context("save task panicked")?
                .with_context(|| format!("failed to save {folder}"))?;
        self.store
            .log_artifact_folder(self.run.run_id(), &local, folder)
            .await
            .with_context(|| format!("failed to upload {folder}"))?;
        info!(folder, rows, files = written.len(), "artifact saved");
        Ok(rows)
    }

    /// Writes one text file into `folder` and uploads the folder.
    ///
    /// # Errors
    /// Local write or upload fails.
    pub async fn save_text(&self, folder: &str, file: &str, contents: String) -> Result<PathBuf> {
        let dir = self.run.folder(folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(file);
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.upload_folder(folder).await?;
        Ok(path)
    }

    /// Uploads a run-local folder (or file) to the same artifact subpath.
    ///
    /// # Errors
    /// Upload fails.
    pub async fn upload_folder(&self, folder: &str) -> Result<usize> {
        let local = self.run.folder(folder);
        if !local.exists() {
            warn!(folder, "nothing to upload");
            return Ok(0);
        }
        self.store
            .log_artifact_folder(self.run.run_id(), &local, folder)
            .await
            .with_context(|| format!("failed to upload {folder}"))
    }

    /// Runs `fut`, recording its wall time under `stage`.
    pub async fn timed<T>(&self, stage: &str, fut: impl Future<Output = T>) -> T {
        let started = Instant::now();
        let out = fut.await;
        let elapsed = started.elapsed();
        self.metrics()
            .stage_duration
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
        info!(stage, elapsed_ms = elapsed.as_millis(), "stage finished");
        out
    }
}
