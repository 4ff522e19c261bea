use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Error, Result};
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// コンソールには `format` に応じてテキストまたは JSON を出力し、
/// `log_file` が指定された場合は ANSI なしのテキストを同じファイルに追記する。
/// 2回目以降の呼び出しは何もしない（最初の実行のログファイルが使われ続ける）。
///
/// # Errors
/// ログファイルの作成、またはサブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(format: LogFormat, log_file: Option<&Path>) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let file_layer = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open log file {}", path.display()))?;
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(Mutex::new(file)),
                )
            }
            None => None,
        };

        let (json_layer, text_layer) = match format {
            LogFormat::Json => (Some(fmt::layer().with_target(false).json()), None),
            LogFormat::Text => (None, Some(fmt::layer().with_target(false))),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(text_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;

        info!(
            log_format = ?format,
            log_file = log_file.map(|p| p.display().to_string()),
            "tracing initialized"
        );
        Ok::<(), Error>(())
    })?;
    Ok(())
}
