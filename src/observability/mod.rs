pub mod metrics;
pub mod tracing;

use std::sync::Arc;

use anyhow::Result;
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// 実行ごとのメトリクスレジストリ。
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// 新しいレジストリを作成し、メトリクスを登録する。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合。
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(Arc::clone(&registry))?);
        Ok(Self { registry, metrics })
    }

    /// メトリクスへのアクセスを提供する。
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// テキスト形式でメトリクスをレンダリングする。
    ///
    /// # Errors
    /// エンコードに失敗した場合。
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_counters() {
        let telemetry = Telemetry::new().expect("telemetry");
        telemetry
            .metrics()
            .comments_dropped
            .with_label_values(&["short"])
            .inc_by(3);
        telemetry.metrics().fpr_orphan_clusters.inc();

        let rendered = telemetry.render().expect("render");
        assert!(rendered.contains("subclu_comments_dropped_total{reason=\"short\"} 3"));
        assert!(rendered.contains("subclu_fpr_orphan_clusters_total 1"));
    }
}
