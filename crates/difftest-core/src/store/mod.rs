//! Durable keyed storage shared by every pipeline stage.
//!
//! The store is the only shared mutable resource between processes. Two
//! operations carry the concurrency contract:
//!
//! - [`RecordStore::claim_artifacts`] moves every unclaimed artifact of one
//!   collection to "claimed" as one logical step, so two claimers of the same
//!   collection never receive the same artifact.
//! - [`RecordStore::complete_run`] transitions a run entry to complete at
//!   most once per generation id.
//!
//! Runner reports are keyed by (runner, generation id), so reprocessing an
//! artifact overwrites its report instead of duplicating it. Reports are only
//! removed once their generation's run result is complete.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use anyhow::Result;

use difftest_types::{
    CompileFailure, CompiledArtifact, GenerationId, GenerationRecord, HarnessFailure, RunEntry,
    RunResult, RunnerReport,
};

/// Collection holding one compiler target's artifacts.
///
/// `compilation_results_<version>_<name>` with the dots of the version
/// replaced by underscores.
pub fn artifact_collection(version: &str, name: &str) -> String {
    format!("compilation_results_{}_{}", version.replace('.', "_"), name)
}

/// Report collection / runner name of one compiler target.
pub fn runner_name(version: &str, name: &str) -> String {
    format!("{version}_{name}")
}

pub trait RecordStore: Send + Sync {
    // ---- Generation stage ----

    fn insert_generation(&self, record: &GenerationRecord) -> Result<()>;

    fn get_generation(&self, id: &str) -> Result<Option<GenerationRecord>>;

    fn generations(&self) -> Result<Vec<GenerationRecord>>;

    fn record_harness_failure(&self, failure: &HarnessFailure) -> Result<()>;

    fn harness_failures(&self) -> Result<Vec<HarnessFailure>>;

    // ---- Compile jobs (store-poll mode) ----

    /// Mark a generation for compilation by `compiler`.
    fn enqueue_compile(&self, compiler: &str, id: &str) -> Result<()>;

    /// Generation ids waiting for `compiler`, oldest first.
    fn pending_compiles(&self, compiler: &str) -> Result<Vec<GenerationId>>;

    /// Remove a job once its artifact or failure has been recorded.
    fn finish_compile(&self, compiler: &str, id: &str) -> Result<()>;

    fn record_compile_failure(&self, failure: &CompileFailure) -> Result<()>;

    fn compile_failures(&self) -> Result<Vec<CompileFailure>>;

    /// Note that generation `id` was handed to compiler target `target`.
    fn record_delivery(&self, id: &str, target: &str) -> Result<()>;

    /// Targets generation `id` was handed to, in any order.
    fn deliveries(&self, id: &str) -> Result<Vec<String>>;

    // ---- Artifacts ----

    fn insert_artifact(&self, collection: &str, artifact: &CompiledArtifact) -> Result<()>;

    /// Atomically claim every artifact of `collection` that is neither
    /// claimed nor ran.
    fn claim_artifacts(&self, collection: &str) -> Result<Vec<CompiledArtifact>>;

    /// Set `ran = true` on claimed artifacts, in one batch.
    fn mark_ran(&self, collection: &str, artifact_ids: &[String]) -> Result<()>;

    /// Return claimed-but-not-ran artifacts to the unclaimed pool.
    fn release_claims(&self, collection: &str) -> Result<usize>;

    fn artifacts(&self, collection: &str) -> Result<Vec<CompiledArtifact>>;

    // ---- Runner reports ----

    /// Insert or replace the report of `report.runner` for its generation id.
    fn put_report(&self, report: &RunnerReport) -> Result<()>;

    fn reports(&self, runner: &str) -> Result<Vec<RunnerReport>>;

    /// Drop the report of `runner` for generation `id`, if any.
    fn remove_report(&self, runner: &str, id: &str) -> Result<()>;

    // ---- Run results ----

    /// Insert a run marker; returns false when one already exists.
    fn insert_run_entry(&self, entry: &RunEntry) -> Result<bool>;

    fn get_run_entry(&self, id: &str) -> Result<Option<RunEntry>>;

    fn run_entries(&self) -> Result<Vec<RunEntry>>;

    /// Pending entries only; completed ones are not read.
    fn pending_runs(&self) -> Result<Vec<RunEntry>>;

    /// Complete the run entry of `result.generation_id`. Returns false when
    /// it was already complete.
    fn complete_run(&self, result: &RunResult) -> Result<bool>;
}
