//! Differential runner: one instance per compiler target.
//!
//! Each cycle:
//!
//! 1. return claims left behind by an interrupted cycle,
//! 2. claim every unclaimed artifact of the target's collection,
//! 3. for each artifact deploy, invoke every eligible function once per
//!    stored input set and write the runner report,
//! 4. mark the whole batch ran.
//!
//! Artifacts are processed sequentially. A failed deployment or call is
//! recorded, never raised; only store failures abort a cycle, and the
//! artifacts of an aborted cycle are reclaimed on the next one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use difftest_types::{
    AbiEntry, CompiledArtifact, DeploymentOutcome, ExecutionSnapshot, HexBytes, InputSet,
    InputStrategy, RunnerReport, SnapshotOutcome, VyperType, CONSTRUCTOR_NAME,
};

use crate::abi;
use crate::backend::{caller_deadline, CallRequest, CallTrace, ExecutionBackend, ExecutionError};
use crate::input_gen::InputGenerator;
use crate::metrics::PipelineMetrics;
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub storage_slots: usize,
    pub memory_bytes: usize,
    pub deploy_timeout: Duration,
    pub call_timeout: Duration,
    pub fallback_strategy: InputStrategy,
    /// Bound for dynamic lengths of ABI-derived types and fallback inputs.
    pub max_dynamic_len: u32,
    pub seed: u64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            storage_slots: 10,
            memory_bytes: 1280,
            deploy_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            fallback_strategy: InputStrategy::Default,
            max_dynamic_len: 32,
            seed: 0,
        }
    }
}

/// Counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub released: usize,
    pub claimed: usize,
    pub deployment_failures: usize,
    pub snapshots: usize,
    pub unavailable: usize,
}

pub struct DifferentialRunner {
    name: String,
    collection: String,
    backend: Arc<dyn ExecutionBackend>,
    store: Arc<dyn RecordStore>,
    settings: RunnerSettings,
    fallback: InputGenerator,
    metrics: PipelineMetrics,
}

impl DifferentialRunner {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        backend: Arc<dyn ExecutionBackend>,
        store: Arc<dyn RecordStore>,
        settings: RunnerSettings,
        metrics: PipelineMetrics,
    ) -> Self {
        let fallback = InputGenerator::new(settings.seed, settings.max_dynamic_len);
        Self {
            name: name.into(),
            collection: collection.into(),
            backend,
            store,
            settings,
            fallback,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&mut self, interval: Duration) -> Result<()> {
        info!(runner = %self.name, collection = %self.collection, "runner started");
        loop {
            let summary = self.run_cycle().await?;
            if summary.claimed > 0 {
                info!(runner = %self.name, ?summary, "cycle done");
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let mut summary = CycleSummary {
            released: self.store.release_claims(&self.collection)?,
            ..CycleSummary::default()
        };
        if summary.released > 0 {
            warn!(runner = %self.name, released = summary.released, "reclaiming artifacts of an interrupted cycle");
        }

        let batch = self.store.claim_artifacts(&self.collection)?;
        summary.claimed = batch.len();
        let mut done = Vec::with_capacity(batch.len());
        for artifact in &batch {
            let report = self.process(artifact).await;
            if !report.deployment.is_deployed() {
                summary.deployment_failures += 1;
            }
            summary.snapshots += report.snapshots.len();
            summary.unavailable += report.snapshots.iter().filter(|s| !s.is_available()).count();
            self.store.put_report(&report).with_context(|| {
                format!("failed to store report for {}", artifact.generation_id)
            })?;
            self.metrics.artifacts_processed.inc();
            done.push(artifact.id.clone());
        }
        if !done.is_empty() {
            self.store.mark_ran(&self.collection, &done)?;
        }
        Ok(summary)
    }

    /// Deploy and exercise one artifact. Never fails: every engine error is
    /// folded into the report.
    pub async fn process(&mut self, artifact: &CompiledArtifact) -> RunnerReport {
        let deployment = self.deploy(artifact).await;
        let mut snapshots = Vec::new();
        if let DeploymentOutcome::Deployed { address } = &deployment {
            for entry in artifact.abi.iter().filter(|e| e.is_invocable()) {
                self.invoke(artifact, address, entry, &mut snapshots).await;
            }
        } else {
            self.metrics.deployment_failures.inc();
        }
        RunnerReport {
            generation_id: artifact.generation_id.clone(),
            runner: self.name.clone(),
            artifact_id: artifact.id.clone(),
            deployment,
            snapshots,
            reported_at: Utc::now(),
        }
    }

    async fn deploy(&mut self, artifact: &CompiledArtifact) -> DeploymentOutcome {
        let types = artifact
            .type_map
            .get(CONSTRUCTOR_NAME)
            .map(<[VyperType]>::to_vec)
            .unwrap_or_default();
        let set = match self.input_sets(artifact, CONSTRUCTOR_NAME, &types).into_iter().next() {
            Some(set) => set,
            None => {
                return DeploymentOutcome::Failed {
                    reason: "no constructor inputs".to_string(),
                }
            }
        };
        let ctor_args = match abi::encode(&set.values, &types) {
            Ok(args) => args,
            Err(e) => {
                return DeploymentOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let deployed = tokio::time::timeout(
            caller_deadline(self.settings.deploy_timeout),
            self.backend.deploy(&artifact.bytecode, &ctor_args),
        )
        .await
        .unwrap_or(Err(ExecutionError::Timeout(self.settings.deploy_timeout)));
        match deployed {
            Ok(address) => {
                debug!(runner = %self.name, generation_id = %artifact.generation_id, %address, "deployed");
                DeploymentOutcome::Deployed { address }
            }
            Err(e) => {
                info!(runner = %self.name, generation_id = %artifact.generation_id, error = %e, "deployment failed");
                DeploymentOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn invoke(
        &mut self,
        artifact: &CompiledArtifact,
        address: &difftest_types::Address,
        entry: &AbiEntry,
        snapshots: &mut Vec<ExecutionSnapshot>,
    ) {
        let Some(function) = entry.name.clone() else {
            return;
        };
        let types = match self.param_types(artifact, &function, entry) {
            Ok(types) => types,
            Err(reason) => {
                self.push_unavailable(snapshots, &function, 0, self.settings.fallback_strategy, reason);
                return;
            }
        };

        for (index, set) in self.input_sets(artifact, &function, &types).into_iter().enumerate() {
            let calldata = match abi::calldata(entry, &set.values, &types) {
                Ok(data) => data,
                Err(e) => {
                    self.push_unavailable(snapshots, &function, index, set.strategy, e.to_string());
                    continue;
                }
            };
            let request = CallRequest {
                function: function.clone(),
                calldata: HexBytes(calldata),
                args: set.values,
            };
            let called = tokio::time::timeout(
                caller_deadline(self.settings.call_timeout),
                self.backend.call(address, &request),
            )
            .await
            .unwrap_or(Err(ExecutionError::Timeout(self.settings.call_timeout)));
            match called {
                Ok(trace) => snapshots.push(ExecutionSnapshot {
                    function: function.clone(),
                    input_set: index,
                    strategy: set.strategy,
                    outcome: self.capture(trace),
                }),
                Err(e) => {
                    debug!(runner = %self.name, %function, input_set = index, error = %e, "call failed");
                    self.push_unavailable(snapshots, &function, index, set.strategy, e.to_string());
                }
            }
        }
    }

    /// Declared parameter types: the artifact's type map, else the ABI.
    fn param_types(
        &self,
        artifact: &CompiledArtifact,
        function: &str,
        entry: &AbiEntry,
    ) -> Result<Vec<VyperType>, String> {
        if let Some(types) = artifact.type_map.get(function) {
            return Ok(types.to_vec());
        }
        entry
            .inputs
            .iter()
            .map(|p| p.vyper_type(self.settings.max_dynamic_len))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    /// Stored sets in strategy order, or one fallback set.
    fn input_sets(
        &mut self,
        artifact: &CompiledArtifact,
        function: &str,
        types: &[VyperType],
    ) -> Vec<InputSet> {
        let stored = artifact.input_sets(function);
        if !stored.is_empty() {
            return stored.to_vec();
        }
        let strategy = self.settings.fallback_strategy;
        match self.fallback.generate(types, strategy) {
            Ok(values) => vec![InputSet { strategy, values }],
            Err(e) => {
                warn!(runner = %self.name, function, error = %e, "cannot generate fallback inputs");
                Vec::new()
            }
        }
    }

    fn capture(&self, trace: CallTrace) -> SnapshotOutcome {
        let CallTrace {
            mut storage,
            memory,
            gas_used,
            return_value,
        } = trace;
        storage.truncate(self.settings.storage_slots);
        let mut memory = memory.0;
        memory.truncate(self.settings.memory_bytes);
        SnapshotOutcome::Captured {
            state: storage,
            memory: HexBytes(memory),
            consumed_gas: gas_used,
            return_value,
        }
    }

    fn push_unavailable(
        &self,
        snapshots: &mut Vec<ExecutionSnapshot>,
        function: &str,
        input_set: usize,
        strategy: InputStrategy,
        reason: String,
    ) {
        self.metrics.unavailable_snapshots.inc();
        snapshots.push(ExecutionSnapshot {
            function: function.to_string(),
            input_set,
            strategy,
            outcome: SnapshotOutcome::Unavailable { reason },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use difftest_types::{AbiParam, Address, StateMutability};

    #[test]
    fn test_capture_truncates_prefixes() {
        let runner = DifferentialRunner::new(
            "v1",
            "c",
            Arc::new(NullBackend),
            Arc::new(crate::store::MemoryStore::new()),
            RunnerSettings {
                storage_slots: 2,
                memory_bytes: 4,
                ..RunnerSettings::default()
            },
            PipelineMetrics::new().unwrap(),
        );
        let outcome = runner.capture(CallTrace {
            storage: vec!["1".into(), "2".into(), "3".into()],
            memory: HexBytes(vec![9; 10]),
            gas_used: 21,
            return_value: serde_json::json!("1"),
        });
        match outcome {
            SnapshotOutcome::Captured { state, memory, .. } => {
                assert_eq!(state, vec!["1", "2"]);
                assert_eq!(memory.len(), 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_param_types_fall_back_to_abi() {
        let runner = DifferentialRunner::new(
            "v1",
            "c",
            Arc::new(NullBackend),
            Arc::new(crate::store::MemoryStore::new()),
            RunnerSettings::default(),
            PipelineMetrics::new().unwrap(),
        );
        let entry = AbiEntry {
            kind: "function".into(),
            name: Some("func_0".into()),
            inputs: vec![AbiParam {
                name: "x_0".into(),
                ty: "uint8".into(),
                components: vec![],
            }],
            outputs: vec![],
            state_mutability: Some(StateMutability::View),
        };
        let artifact = crate::store::conformance::artifact("a1", "g1");
        assert_eq!(
            runner.param_types(&artifact, "func_0", &entry).unwrap(),
            vec![VyperType::Uint { bits: 8 }]
        );
    }

    fn function_entry(name: &str) -> AbiEntry {
        AbiEntry {
            kind: "function".into(),
            name: Some(name.into()),
            inputs: vec![],
            outputs: vec![],
            state_mutability: Some(StateMutability::Nonpayable),
        }
    }

    fn artifact_with(functions: &[&str]) -> CompiledArtifact {
        let mut artifact = crate::store::conformance::artifact("a1", "g1");
        artifact.abi = functions.iter().map(|f| function_entry(f)).collect();
        artifact
    }

    fn runner_with(backend: Arc<dyn ExecutionBackend>, call_timeout: Duration) -> DifferentialRunner {
        DifferentialRunner::new(
            "v1",
            "c",
            backend,
            Arc::new(crate::store::MemoryStore::new()),
            RunnerSettings {
                call_timeout,
                ..RunnerSettings::default()
            },
            PipelineMetrics::new().unwrap(),
        )
    }

    fn outcomes(report: &RunnerReport) -> Vec<(&str, &SnapshotOutcome)> {
        report
            .snapshots
            .iter()
            .map(|s| (s.function.as_str(), &s.outcome))
            .collect()
    }

    /// Hangs on `func_1`, reverts on `func_2`, answers everything else.
    struct FlakyEngine;

    #[async_trait::async_trait]
    impl ExecutionBackend for FlakyEngine {
        async fn deploy(&self, _: &HexBytes, _: &[u8]) -> Result<Address, ExecutionError> {
            Ok(Address([0xaa; 20]))
        }

        async fn call(&self, _: &Address, request: &CallRequest) -> Result<CallTrace, ExecutionError> {
            match request.function.as_str() {
                "func_1" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ExecutionError::Backend("unreachable".into()))
                }
                "func_2" => Err(ExecutionError::Revert("assert".into())),
                other => Ok(CallTrace {
                    storage: vec!["7".into()],
                    memory: HexBytes(vec![]),
                    gas_used: 100,
                    return_value: serde_json::json!(other),
                }),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_calls_do_not_stop_the_artifact() {
        let mut runner = runner_with(Arc::new(FlakyEngine), Duration::from_millis(50));
        let artifact = artifact_with(&["func_0", "func_1", "func_2", "func_3"]);

        let report = runner.process(&artifact).await;
        assert!(report.deployment.is_deployed());
        let outcomes = outcomes(&report);
        assert_eq!(outcomes.len(), 4);
        for (function, outcome) in &outcomes {
            match (*function, outcome) {
                ("func_1", SnapshotOutcome::Unavailable { reason }) => {
                    assert!(reason.contains("timed out"), "{reason}")
                }
                ("func_2", SnapshotOutcome::Unavailable { reason }) => {
                    assert!(reason.contains("reverted"), "{reason}")
                }
                ("func_0" | "func_3", SnapshotOutcome::Captured { return_value, .. }) => {
                    assert_eq!(return_value, &serde_json::json!(function))
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_engine_keeps_later_snapshots_aligned() {
        use crate::process::{scripted, ExecutorTimeouts, ProcessExecutor};

        let dir = tempfile::tempdir().unwrap();
        let engine = scripted::echo_engine(dir.path(), "func_1", 2);
        let call_timeout = Duration::from_millis(200);
        let executor = ProcessExecutor::new(
            vec![engine.display().to_string()],
            ExecutorTimeouts {
                deploy: Duration::from_secs(10),
                call: call_timeout,
            },
        )
        .unwrap();
        let mut runner = runner_with(Arc::new(executor), call_timeout);
        let artifact = artifact_with(&["func_0", "func_1", "func_2", "func_3"]);

        let report = runner.process(&artifact).await;
        assert!(report.deployment.is_deployed());
        let outcomes = outcomes(&report);
        assert_eq!(outcomes.len(), 4);
        assert!(matches!(outcomes[1].1, SnapshotOutcome::Unavailable { .. }));
        for index in [0, 2, 3] {
            let (function, outcome) = outcomes[index];
            match outcome {
                SnapshotOutcome::Captured { return_value, .. } => {
                    assert_eq!(return_value, &serde_json::json!(function))
                }
                other => panic!("{function}: unexpected {other:?}"),
            }
        }
    }

    struct NullBackend;

    #[async_trait::async_trait]
    impl ExecutionBackend for NullBackend {
        async fn deploy(&self, _: &HexBytes, _: &[u8]) -> Result<Address, ExecutionError> {
            Err(ExecutionError::Backend("unused".into()))
        }

        async fn call(&self, _: &Address, _: &CallRequest) -> Result<CallTrace, ExecutionError> {
            Err(ExecutionError::Backend("unused".into()))
        }
    }
}
