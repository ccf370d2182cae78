//! CLI subcommand implementations for vyper-difftest

pub mod aggregate;
pub mod compile;
pub mod generate;
pub mod output;
pub mod run;
pub mod synth;
pub mod triage;

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use difftest_core::metrics::PipelineMetrics;

/// Rewrite the metrics file every `interval` for as long as a loop runs.
pub fn spawn_metrics_writer(metrics: PipelineMetrics, path: PathBuf, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let written = metrics
                .render()
                .and_then(|text| std::fs::write(&path, text).map_err(Into::into));
            if let Err(e) = written {
                warn!(path = %path.display(), error = %e, "failed to write metrics");
            }
        }
    });
}
