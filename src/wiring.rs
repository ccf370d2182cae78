//! Builds pipeline components from a [`Config`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use difftest_core::aggregator::ResultAggregator;
use difftest_core::backend::{Compiler, ExecutionBackend};
use difftest_core::compile_worker::{CompileWorker, JobSource};
use difftest_core::config::{CompilerTarget, Config, QueueEndpoint, StoreConfig};
use difftest_core::distributor::{DistributionMode, WorkDistributor};
use difftest_core::divergence::DivergenceOptions;
use difftest_core::generator::GenerationStage;
use difftest_core::input_gen::InputGenerator;
use difftest_core::metrics::PipelineMetrics;
use difftest_core::process::{ExecutorTimeouts, ProcessExecutor, VyperCli};
use difftest_core::queue::{FanoutQueue, SpoolQueue, WorkQueue};
use difftest_core::runner::{DifferentialRunner, RunnerSettings};
use difftest_core::store::{DirStore, MemoryStore, RecordStore};

pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    match config {
        StoreConfig::Memory => {
            debug!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::Directory { path } => {
            let store = DirStore::open(path.clone())
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            debug!(root = %path.display(), "using directory store");
            Ok(Arc::new(store))
        }
    }
}

pub fn open_queue(endpoint: &QueueEndpoint) -> Result<Arc<dyn WorkQueue>> {
    let queue = SpoolQueue::open(&endpoint.name, &endpoint.spool_dir).with_context(|| {
        format!(
            "failed to open queue `{}` at {}",
            endpoint.name,
            endpoint.spool_dir.display()
        )
    })?;
    Ok(Arc::new(queue))
}

pub fn compiler_for(target: &CompilerTarget, config: &Config) -> Arc<dyn Compiler> {
    Arc::new(VyperCli::new(
        target.id(),
        target.binary.clone(),
        target.extra_args.clone(),
        config.compile_timeout(),
    ))
}

/// Shared handles for every stage of one process.
pub struct Pipeline {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub metrics: PipelineMetrics,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let store = open_store(&config.store)?;
        let metrics = PipelineMetrics::new()?;
        Ok(Self {
            config,
            store,
            metrics,
        })
    }

    fn distribution_mode(&self) -> Result<DistributionMode> {
        if !self.config.use_queue {
            return Ok(DistributionMode::StorePoll {
                targets: self.config.runner_names(),
            });
        }
        let queues = self
            .config
            .compiler_queues
            .iter()
            .map(open_queue)
            .collect::<Result<Vec<_>>>()?;
        Ok(DistributionMode::Queue(FanoutQueue::new(queues)))
    }

    pub fn generation_stage(&self) -> Result<GenerationStage> {
        let reference = self.config.reference_target()?;
        let distributor = WorkDistributor::new(self.store.clone(), self.distribution_mode()?);
        info!(
            reference = %reference.id(),
            use_queue = self.config.use_queue,
            "generation stage ready"
        );
        Ok(GenerationStage::new(
            self.store.clone(),
            compiler_for(reference, &self.config),
            distributor,
            InputGenerator::new(self.config.generator.seed, self.config.generator.max_dynamic_len),
            self.config.input_strategies.clone(),
            self.config.generator.version.clone(),
            self.config.compile_timeout(),
            self.metrics.clone(),
        ))
    }

    pub fn compile_worker(&self, target_id: &str) -> Result<CompileWorker> {
        let target = self.config.target(target_id)?;
        let jobs = if self.config.use_queue {
            let endpoint = self
                .config
                .queue_for(target_id)
                .ok_or_else(|| anyhow!("no compiler queue configured for `{target_id}`"))?;
            JobSource::Queue(open_queue(endpoint)?)
        } else {
            JobSource::Store
        };
        Ok(CompileWorker::new(
            target.id(),
            target.collection(),
            compiler_for(target, &self.config),
            self.store.clone(),
            jobs,
            self.config.compile_timeout(),
            self.metrics.clone(),
        ))
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        let runner = &self.config.runner;
        RunnerSettings {
            storage_slots: runner.storage_slots,
            memory_bytes: runner.memory_bytes,
            deploy_timeout: runner.deploy_timeout(),
            call_timeout: runner.call_timeout(),
            fallback_strategy: runner.fallback_strategy,
            max_dynamic_len: self.config.generator.max_dynamic_len,
            seed: self.config.generator.seed,
        }
    }

    pub fn runner(&self, target_id: &str) -> Result<DifferentialRunner> {
        let target = self.config.target(target_id)?;
        let timeouts = ExecutorTimeouts {
            deploy: self.config.runner.deploy_timeout(),
            call: self.config.runner.call_timeout(),
        };
        let backend: Arc<dyn ExecutionBackend> = Arc::new(
            ProcessExecutor::new(self.config.runner.executor.clone(), timeouts)
                .context("runner.executor must name the execution engine command")?,
        );
        Ok(self.runner_with_backend(target, backend))
    }

    pub fn runner_with_backend(
        &self,
        target: &CompilerTarget,
        backend: Arc<dyn ExecutionBackend>,
    ) -> DifferentialRunner {
        DifferentialRunner::new(
            target.id(),
            target.collection(),
            backend,
            self.store.clone(),
            self.runner_settings(),
            self.metrics.clone(),
        )
    }

    pub fn aggregator(&self) -> ResultAggregator {
        ResultAggregator::new(
            self.store.clone(),
            self.config.runner_names(),
            DivergenceOptions {
                compare_gas: self.config.aggregator.compare_gas,
            },
            self.config.aggregator.stale_after(),
            self.metrics.clone(),
        )
    }

    /// Write the metrics text exposition to `path`.
    pub fn write_metrics(&self, path: &Path) -> Result<()> {
        let text = self.metrics.render()?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write metrics to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> Config {
        Config {
            store: StoreConfig::Directory {
                path: dir.join("store"),
            },
            compilers: vec![
                CompilerTarget {
                    name: "default".into(),
                    version: "0.3.10".into(),
                    binary: "vyper".into(),
                    extra_args: vec![],
                },
                CompilerTarget {
                    name: "default".into(),
                    version: "0.3.9".into(),
                    binary: "vyper-0.3.9".into(),
                    extra_args: vec![],
                },
            ],
            ..Config::default()
        }
    }

    #[test]
    fn test_store_poll_pipeline_builds() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        assert!(dir.path().join("store").is_dir());
        assert!(pipeline.generation_stage().is_ok());
        assert!(pipeline.compile_worker("0.3.9_default").is_ok());
        assert!(pipeline.compile_worker("0.2.0_default").is_err());
    }

    #[test]
    fn test_queue_mode_requires_endpoint_per_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.use_queue = true;
        config.compiler_queues = vec![QueueEndpoint {
            name: "0.3.10_default".into(),
            spool_dir: dir.path().join("q1"),
        }];
        let pipeline = Pipeline::new(config).unwrap();
        assert!(pipeline.compile_worker("0.3.10_default").is_ok());
        assert!(pipeline.compile_worker("0.3.9_default").is_err());
    }

    #[test]
    fn test_runner_needs_executor_command() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path())).unwrap();
        assert!(pipeline.runner("0.3.10_default").is_err());
    }
}
