//! Pipeline counters.
//!
//! Each process owns one [`PipelineMetrics`] and passes it to the stages it
//! runs. The binary renders it in the text exposition format on exit.

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    pub generations: IntCounter,
    pub harness_defects: IntCounter,
    pub compile_failures: IntCounter,
    pub artifacts_processed: IntCounter,
    pub deployment_failures: IntCounter,
    pub unavailable_snapshots: IntCounter,
    pub run_results: IntCounter,
    pub divergences: IntCounter,
    pub pending_generations: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("difftest".into()), None)?;
        let pending_generations = IntGauge::new(
            "pending_generations",
            "Generation ids waiting for at least one runner report",
        )?;
        registry.register(Box::new(pending_generations.clone()))?;
        Ok(Self {
            generations: counter(&registry, "generations_total", "Structured inputs synthesized")?,
            harness_defects: counter(
                &registry,
                "harness_defects_total",
                "Synthesizer or input generator defects",
            )?,
            compile_failures: counter(
                &registry,
                "compile_failures_total",
                "Sources rejected by a compiler target",
            )?,
            artifacts_processed: counter(
                &registry,
                "artifacts_processed_total",
                "Compiled artifacts executed by runners",
            )?,
            deployment_failures: counter(
                &registry,
                "deployment_failures_total",
                "Artifacts whose deployment failed",
            )?,
            unavailable_snapshots: counter(
                &registry,
                "unavailable_snapshots_total",
                "Calls that produced no snapshot",
            )?,
            run_results: counter(&registry, "run_results_total", "Aggregated run results")?,
            divergences: counter(
                &registry,
                "divergences_total",
                "Run results with at least one divergence",
            )?,
            pending_generations,
            registry,
        })
    }

    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_text_format() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.generations.inc_by(3);
        metrics.pending_generations.set(2);
        let text = metrics.render().unwrap();
        assert!(text.contains("difftest_generations_total 3"));
        assert!(text.contains("difftest_pending_generations 2"));
        assert!(text.contains("# TYPE difftest_divergences_total counter"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = PipelineMetrics::new().unwrap();
        let b = PipelineMetrics::new().unwrap();
        a.divergences.inc();
        assert_eq!(b.divergences.get(), 0);
    }
}
