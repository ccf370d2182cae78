//! Persisted documents of the pipeline.
//!
//! Every document is keyed, directly or through a join, by the generation id
//! assigned when a structured input is first synthesized.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abi::AbiEntry;
use crate::ty::TypeMap;
use crate::value::{Address, HexBytes, Value};

/// Stable join key across all documents.
pub type GenerationId = String;

/// Value-generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputStrategy {
    /// Canonical zero / empty / minimal values.
    Default,
    /// Uniform random values.
    Random,
    /// Type maximum, full-length dynamic values.
    Max,
    /// Type minimum, empty dynamic values.
    Min,
    /// Boundary-heavy distribution.
    Boundary,
}

impl InputStrategy {
    pub const ALL: [InputStrategy; 5] = [
        InputStrategy::Default,
        InputStrategy::Random,
        InputStrategy::Max,
        InputStrategy::Min,
        InputStrategy::Boundary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputStrategy::Default => "default",
            InputStrategy::Random => "random",
            InputStrategy::Max => "max",
            InputStrategy::Min => "min",
            InputStrategy::Boundary => "boundary",
        }
    }
}

impl fmt::Display for InputStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InputStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown input strategy `{s}`"))
    }
}

/// Result of compiling synthesized source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompileOutcome {
    Success {
        bytecode: HexBytes,
        abi: Vec<AbiEntry>,
    },
    Failure {
        error_type: String,
        error_message: String,
    },
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompileOutcome::Success { .. })
    }
}

/// One candidate argument list produced by one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSet {
    pub strategy: InputStrategy,
    pub values: Vec<Value>,
}

/// All candidate argument lists of one function, in strategy order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInputs {
    pub function: String,
    pub sets: Vec<InputSet>,
}

/// One row per synthesis attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: GenerationId,
    pub created_at: DateTime<Utc>,
    /// Serialized structured input, kept for replay and triage.
    pub structured_input: String,
    pub source: String,
    /// SHA-256 of `source`, hex.
    pub source_digest: String,
    pub compilation: CompileOutcome,
    pub generator_version: String,
    /// Generated inputs in structured-input function order.
    pub inputs: Vec<FunctionInputs>,
}

/// A synthesizer or generator defect, persisted for triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessFailure {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
    pub structured_input: String,
}

/// A compile worker's failure to compile a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileFailure {
    pub generation_id: GenerationId,
    pub compiler: String,
    pub recorded_at: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
}

/// Message handed to compile workers in queue mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub generation_id: GenerationId,
    pub source: String,
    pub generated_inputs: Vec<FunctionInputs>,
    pub structured_input_serialized: String,
    pub generator_version: String,
}

impl QueueMessage {
    pub fn from_record(record: &GenerationRecord) -> Self {
        Self {
            generation_id: record.id.clone(),
            source: record.source.clone(),
            generated_inputs: record.inputs.clone(),
            structured_input_serialized: record.structured_input.clone(),
            generator_version: record.generator_version.clone(),
        }
    }
}

/// A successfully compiled generation, owned by one compiler-version collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub id: String,
    pub generation_id: GenerationId,
    pub compiler: String,
    pub bytecode: HexBytes,
    pub abi: Vec<AbiEntry>,
    pub type_map: TypeMap,
    pub inputs: Vec<FunctionInputs>,
    pub ran: bool,
    pub created_at: DateTime<Utc>,
}

impl CompiledArtifact {
    /// Stored candidate sets for `function`, empty when none were generated.
    pub fn input_sets(&self, function: &str) -> &[InputSet] {
        self.inputs
            .iter()
            .find(|f| f.function == function)
            .map(|f| f.sets.as_slice())
            .unwrap_or(&[])
    }
}

/// Bounded capture of post-call state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    Captured {
        /// Storage slots `0..n`, decimal.
        state: Vec<String>,
        memory: HexBytes,
        consumed_gas: u64,
        return_value: serde_json::Value,
    },
    /// Deployment or the call itself failed.
    Unavailable { reason: String },
}

/// Per (generation, compiler version, function, input set) result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub function: String,
    pub input_set: usize,
    pub strategy: InputStrategy,
    pub outcome: SnapshotOutcome,
}

impl ExecutionSnapshot {
    pub fn is_available(&self) -> bool {
        matches!(self.outcome, SnapshotOutcome::Captured { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Deployed { address: Address },
    Failed { reason: String },
}

impl DeploymentOutcome {
    pub fn is_deployed(&self) -> bool {
        matches!(self, DeploymentOutcome::Deployed { .. })
    }
}

/// What one runner recorded for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerReport {
    pub generation_id: GenerationId,
    pub runner: String,
    pub artifact_id: String,
    pub deployment: DeploymentOutcome,
    pub snapshots: Vec<ExecutionSnapshot>,
    pub reported_at: DateTime<Utc>,
}

/// One compiler version's contribution to a [`RunResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionResult {
    pub deployment: DeploymentOutcome,
    pub snapshots: Vec<ExecutionSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    Deployment,
    SnapshotCount,
    Availability,
    State,
    Memory,
    ReturnValue,
    Gas,
}

/// One observed difference against the reference version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub runner: String,
    pub kind: DivergenceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_set: Option<usize>,
    pub expected: String,
    pub observed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceReport {
    pub reference: String,
    pub findings: Vec<Divergence>,
}

/// Final per-generation aggregate, written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub generation_id: GenerationId,
    /// Keyed by runner (compiler-version) name.
    pub results: BTreeMap<String, VersionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<DivergenceReport>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Distributed, waiting for every runner to report.
    Pending,
    /// The reference compile failed; nothing was distributed.
    NotCompiled,
    Complete,
}

/// Entry of the run-results collection; inserted as a marker by the
/// generation stage and completed by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub generation_id: GenerationId,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
}

impl RunEntry {
    pub fn marker(generation_id: GenerationId, state: RunState) -> Self {
        Self {
            generation_id,
            state,
            created_at: Utc::now(),
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("BOUNDARY".parse::<InputStrategy>(), Ok(InputStrategy::Boundary));
        assert!("fuzzy".parse::<InputStrategy>().is_err());
    }

    #[test]
    fn test_snapshot_outcome_serialization() {
        let snap = ExecutionSnapshot {
            function: "func_0".into(),
            input_set: 0,
            strategy: InputStrategy::Default,
            outcome: SnapshotOutcome::Unavailable {
                reason: "revert".into(),
            },
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"status\":\"unavailable\""));
        let back: ExecutionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert!(!back.is_available());
    }

    #[test]
    fn test_compile_outcome_tagging() {
        let failure = CompileOutcome::Failure {
            error_type: "TypeMismatch".into(),
            error_message: "bad".into(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["status"], "failure");
        assert!(!failure.is_success());
    }
}
