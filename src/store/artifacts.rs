//! Run-scoped artifact client with a content-addressed local cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use super::codec::{from_ndjson, read_parquet, write_parquet};
use super::object_store::ObjectStore;
use super::table::Table;
use super::StoreError;

/// Sidecar written next to chunked parquet folders.
pub const SHAPE_SIDECAR: &str = "_shape_and_columns.txt";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Parquet,
    Json,
}

impl ArtifactFormat {
    fn matches(self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match self {
            ArtifactFormat::Parquet => ext == "parquet",
            ArtifactFormat::Json => ext == "json" || ext == "ndjson",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub format: ArtifactFormat,
    pub cache_locally: bool,
    /// Read only the first N shards.
    pub n_sample_files: Option<usize>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            format: ArtifactFormat::Parquet,
            cache_locally: true,
            n_sample_files: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    pub target_mb_size: f64,
    pub write_index: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            target_mb_size: 75.0,
            write_index: true,
        }
    }
}

/// Number of parquet shards for a table of `estimated_mb`.
#[must_use]
pub fn partition_count(estimated_mb: f64, target_mb: f64) -> usize {
    if !(target_mb.is_finite() && target_mb > 0.0) || !estimated_mb.is_finite() {
        return 1;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let extra = (estimated_mb.max(0.0) / target_mb).floor() as usize;
    1 + extra
}

/// Splits `table` into parquet shards near `target_mb_size` each and writes a
/// sidecar recording the original shape and columns.
///
/// # Errors
/// Any filesystem or encoding failure.
pub fn save_table_chunked(
    table: &Table,
    local_dir: &Path,
    options: SaveOptions,
) -> Result<Vec<PathBuf>, StoreError> {
    let table = match (options.write_index, table.index_name()) {
        (false, Some(index)) => table.without_column(index),
        _ => table.clone(),
    };
    std::fs::create_dir_all(local_dir).map_err(|e| StoreError::io(local_dir, e))?;
    clear_data_files(local_dir)?;

    #[allow(clippy::cast_precision_loss)]
    let estimated_mb = table.estimated_bytes() as f64 / BYTES_PER_MB;
    let rows = table.num_rows();
    let parts = partition_count(estimated_mb, options.target_mb_size).min(rows.max(1));
    let rows_per_part = rows.div_ceil(parts).max(1);

    let mut written = Vec::with_capacity(parts);
    for part in 0..parts {
        let start = (part * rows_per_part).min(rows);
        let end = ((part + 1) * rows_per_part).min(rows);
        if start == end && part > 0 {
            break;
        }
        let path = local_dir.join(format!("part-{part:05}.parquet"));
        write_parquet(&table.slice(start..end), &path)?;
        written.push(path);
    }

    let sidecar = format!(
        "shape: ({}, {})\ncolumns: {:?}\n",
        rows,
        table.num_columns(),
        table.column_names()
    );
    let sidecar_path = local_dir.join(SHAPE_SIDECAR);
    std::fs::write(&sidecar_path, sidecar).map_err(|e| StoreError::io(&sidecar_path, e))?;

    debug!(
        dir = %local_dir.display(),
        rows,
        parts = written.len(),
        estimated_mb,
        "saved table in chunks"
    );
    Ok(written)
}

fn clear_data_files(dir: &Path) -> Result<(), StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        let is_data = ArtifactFormat::Parquet.matches(&path) || ArtifactFormat::Json.matches(&path);
        if path.is_file() && is_data {
            std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
    }
    Ok(())
}

fn data_files(dir: &Path, format: ArtifactFormat) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| StoreError::io(&current, e))?;
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&current, e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if format.matches(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Reads a local folder (or single file) of shards into one table.
///
/// # Errors
/// Missing path, no matching shards, or undecodable shards.
pub fn read_local(
    path: &Path,
    format: ArtifactFormat,
    n_sample_files: Option<usize>,
) -> Result<Table, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound {
            run_id: None,
            path: path.display().to_string(),
        });
    }
    let mut files = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        data_files(path, format)?
    };
    if files.is_empty() {
        return Err(StoreError::NotFound {
            run_id: None,
            path: path.display().to_string(),
        });
    }
    if let Some(n) = n_sample_files {
        files.truncate(n.max(1));
    }
    let mut parts = Vec::with_capacity(files.len());
    for file in &files {
        let part = match format {
            ArtifactFormat::Parquet => read_parquet(file)?,
            ArtifactFormat::Json => {
                let raw = std::fs::read_to_string(file).map_err(|e| StoreError::io(file, e))?;
                from_ndjson(&raw)?
            }
        };
        parts.push(part);
    }
    Table::concat(parts)
}

/// Reads and writes artifacts for runs of one experiment.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    cache_root: PathBuf,
    experiment: String,
    concurrency: usize,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("bucket", &self.store.bucket())
            .field("cache_root", &self.cache_root)
            .field("experiment", &self.experiment)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ArtifactStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache_root: impl Into<PathBuf>,
        experiment: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cache_root: cache_root.into(),
            experiment: experiment.into(),
            concurrency: 4,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Remote key prefix of an artifact folder.
    #[must_use]
    pub fn artifact_prefix(&self, run_id: &str, folder: &str) -> String {
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            format!("mlruns/{}/{run_id}/artifacts", self.experiment)
        } else {
            format!("mlruns/{}/{run_id}/artifacts/{folder}", self.experiment)
        }
    }

    /// Local mirror path `{cache_root}/{bucket}/{remote_path}`.
    #[must_use]
    pub fn local_mirror(&self, remote_path: &str) -> PathBuf {
        self.cache_root
            .join(self.store.bucket())
            .join(remote_path.trim_matches('/'))
    }

    /// Reads an artifact folder of a prior run.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when the folder has no matching shards; any
    /// download or decode failure aborts the read.
    pub async fn read_artifact(
        &self,
        run_id: &str,
        artifact_folder: &str,
        options: ReadOptions,
    ) -> Result<Table, StoreError> {
        let prefix = self.artifact_prefix(run_id, artifact_folder);
        self.read_prefix(Some(run_id), &prefix, options).await
    }

    /// Reads an arbitrary remote prefix (input tables and partitions).
    ///
    /// # Errors
    /// Same as [`ArtifactStore::read_artifact`].
    pub async fn read_remote(
        &self,
        prefix: &str,
        options: ReadOptions,
    ) -> Result<Table, StoreError> {
        self.read_prefix(None, prefix, options).await
    }

    async fn read_prefix(
        &self,
        run_id: Option<&str>,
        prefix: &str,
        options: ReadOptions,
    ) -> Result<Table, StoreError> {
        let not_found = || StoreError::NotFound {
            run_id: run_id.map(ToString::to_string),
            path: prefix.to_string(),
        };

        if options.cache_locally {
            let local = self.local_mirror(prefix);
            if has_data_files(&local, options.format) {
                debug!(path = %local.display(), "artifact already cached");
            } else {
                let keys = self.matching_keys(prefix, options.format, None).await?;
                if keys.is_empty() {
                    return Err(not_found());
                }
                self.download_atomically(prefix, &keys, &local).await?;
            }
            return read_blocking(local, options.format, options.n_sample_files)
                .await
                .map_err(|e| attach_run(e, run_id, prefix));
        }

        let keys = self
            .matching_keys(prefix, options.format, options.n_sample_files)
            .await?;
        if keys.is_empty() {
            return Err(not_found());
        }
        let scratch = tempfile::tempdir().map_err(|e| StoreError::io(std::env::temp_dir(), e))?;
        self.download_all(prefix, &keys, scratch.path()).await?;
        read_blocking(scratch.path().to_path_buf(), options.format, None).await
    }

    async fn matching_keys(
        &self,
        prefix: &str,
        format: ArtifactFormat,
        limit: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .store
            .list(prefix)
            .await?
            .into_iter()
            .filter(|key| format.matches(Path::new(key)))
            .collect();
        if let Some(n) = limit {
            keys.truncate(n.max(1));
        }
        Ok(keys)
    }

    async fn download_all(
        &self,
        prefix: &str,
        keys: &[String],
        target: &Path,
    ) -> Result<(), StoreError> {
        let prefix = prefix.trim_matches('/');
        stream::iter(keys.iter().cloned())
            .map(|key| {
                let relative = key
                    .strip_prefix(prefix)
                    .unwrap_or(&key)
                    .trim_start_matches('/')
                    .to_string();
                let local = target.join(relative);
                async move { self.store.download(&key, &local).await }
            })
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Downloads into a sibling scratch folder and renames it into place, so a
    /// failed batch never leaves a cache that looks complete.
    async fn download_atomically(
        &self,
        prefix: &str,
        keys: &[String],
        local: &Path,
    ) -> Result<(), StoreError> {
        let parent = local.parent().unwrap_or(&self.cache_root).to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io(&parent, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(".partial-")
            .tempdir_in(&parent)
            .map_err(|e| StoreError::io(&parent, e))?;

        info!(prefix, files = keys.len(), "caching artifact folder locally");
        if let Err(error) = self.download_all(prefix, keys, scratch.path()).await {
            warn!(prefix, error = %error, "download batch failed, discarding partial cache");
            return Err(error);
        }

        if local.exists() {
            tokio::fs::remove_dir_all(local)
                .await
                .map_err(|e| StoreError::io(local, e))?;
        }
        tokio::fs::rename(scratch.path(), local)
            .await
            .map_err(|e| StoreError::io(local, e))?;
        Ok(())
    }

    /// Uploads every file under `local_path` to the run's artifact folder.
    ///
    /// # Errors
    /// Walking the folder or any upload fails.
    pub async fn log_artifact_folder(
        &self,
        run_id: &str,
        local_path: &Path,
        remote_subpath: &str,
    ) -> Result<usize, StoreError> {
        let base = self.artifact_prefix(run_id, remote_subpath);
        let mut files = Vec::new();
        let mut pending = vec![local_path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            if dir.is_file() {
                files.push(dir);
                continue;
            }
            let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
            for entry in entries {
                pending.push(entry.map_err(|e| StoreError::io(&dir, e))?.path());
            }
        }
        files.sort();

        let file_count = files.len();
        let uploads = files.into_iter().map(|file| {
            let relative = file
                .strip_prefix(local_path)
                .ok()
                .filter(|rel| !rel.as_os_str().is_empty())
                .map_or_else(
                    || file.file_name().map(PathBuf::from).unwrap_or_default(),
                    Path::to_path_buf,
                );
            let key = format!("{base}/{}", relative.to_string_lossy().replace('\\', "/"));
            let store = Arc::clone(&self.store);
            async move { store.upload(&file, &key).await }
        });
        stream::iter(uploads)
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        debug!(run_id, remote = %base, files = file_count, "logged artifact folder");
        Ok(file_count)
    }
}

fn has_data_files(dir: &Path, format: ArtifactFormat) -> bool {
    dir.is_dir() && data_files(dir, format).is_ok_and(|files| !files.is_empty())
}

async fn read_blocking(
    path: PathBuf,
    format: ArtifactFormat,
    n_sample_files: Option<usize>,
) -> Result<Table, StoreError> {
    tokio::task::spawn_blocking(move || read_local(&path, format, n_sample_files))
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
}

fn attach_run(error: StoreError, run_id: Option<&str>, prefix: &str) -> StoreError {
    match error {
        StoreError::NotFound { .. } => StoreError::NotFound {
            run_id: run_id.map(ToString::to_string),
            path: prefix.to_string(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::object_store::LocalObjectStore;
    use crate::store::table::Column;

    fn ids_table(n: usize) -> Table {
        Table::new()
            .with_column(
                "subreddit_id",
                Column::Utf8((0..n).map(|i| Some(format!("t5_{i}"))).collect()),
            )
            .expect("table")
            .with_index("subreddit_id")
    }

    #[test]
    fn partition_count_follows_target_size() {
        assert_eq!(partition_count(10.0, 75.0), 1);
        assert_eq!(partition_count(150.0, 75.0), 3);
        assert_eq!(partition_count(5.0, 0.0), 1);
    }

    #[test]
    fn chunked_save_writes_sidecar_and_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = ids_table(10);
        let options = SaveOptions {
            target_mb_size: 0.000_05,
            write_index: true,
        };
        let parts = save_table_chunked(&table, dir.path(), options).expect("save");
        assert!(parts.len() > 1);
        assert!(dir.path().join(SHAPE_SIDECAR).exists());

        let loaded = read_local(dir.path(), ArtifactFormat::Parquet, None).expect("read");
        assert_eq!(
            loaded.utf8("subreddit_id").expect("ids"),
            table.utf8("subreddit_id").expect("ids")
        );
    }

    #[tokio::test]
    async fn read_artifact_caches_and_fails_fast_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(LocalObjectStore::new(dir.path().join("remote"), "bucket"));
        let artifacts = ArtifactStore::new(store, dir.path().join("cache"), "exp");

        let local = dir.path().join("out");
        save_table_chunked(&ids_table(4), &local, SaveOptions::default()).expect("save");
        artifacts
            .log_artifact_folder("run1", &local, "df_ids")
            .await
            .expect("upload");

        let table = artifacts
            .read_artifact("run1", "df_ids", ReadOptions::default())
            .await
            .expect("read");
        assert_eq!(table.num_rows(), 4);
        assert!(
            artifacts
                .local_mirror(&artifacts.artifact_prefix("run1", "df_ids"))
                .join("part-00000.parquet")
                .exists()
        );

        let missing = artifacts
            .read_artifact("run1", "df_missing", ReadOptions::default())
            .await
            .expect_err("missing artifact");
        assert!(matches!(missing, StoreError::NotFound { run_id: Some(_), .. }));
    }

    #[tokio::test]
    async fn folder_upload_runs_on_a_spawned_task() {
        let dir = tempfile::tempdir().expect("tempdir");
        let remote = dir.path().join("remote");
        let store = Arc::new(LocalObjectStore::new(&remote, "bucket"));
        let artifacts = ArtifactStore::new(store, dir.path().join("cache"), "exp");

        let local = dir.path().join("out");
        std::fs::create_dir_all(local.join("nested")).expect("mkdir");
        std::fs::write(local.join("a.txt"), "a").expect("write a");
        std::fs::write(local.join("nested").join("b.txt"), "b").expect("write b");

        let folder = local.clone();
        let uploaded = tokio::spawn(async move {
            artifacts.log_artifact_folder("run1", &folder, "logs").await
        })
        .await
        .expect("join")
        .expect("upload");
        assert_eq!(uploaded, 2);

        let artifacts_root = remote.join("bucket/mlruns/exp/run1/artifacts/logs");
        assert!(artifacts_root.join("a.txt").exists());
        assert!(artifacts_root.join("nested/b.txt").exists());
    }
}
