//! In-process store for tests and single-process pipelines.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use parking_lot::Mutex;

use difftest_types::{
    CompileFailure, CompiledArtifact, GenerationId, GenerationRecord, HarnessFailure, RunEntry,
    RunResult, RunState, RunnerReport,
};

use super::RecordStore;

#[derive(Debug, Clone)]
struct ArtifactSlot {
    artifact: CompiledArtifact,
    claimed: bool,
}

#[derive(Default)]
struct Inner {
    generations: Vec<GenerationRecord>,
    harness_failures: Vec<HarnessFailure>,
    compile_failures: Vec<CompileFailure>,
    compile_jobs: HashMap<String, Vec<GenerationId>>,
    deliveries: HashMap<GenerationId, BTreeSet<String>>,
    artifacts: HashMap<String, Vec<ArtifactSlot>>,
    reports: HashMap<String, BTreeMap<GenerationId, RunnerReport>>,
    runs: BTreeMap<GenerationId, RunEntry>,
}

/// Every operation runs under one lock, which serializes claims.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn insert_generation(&self, record: &GenerationRecord) -> Result<()> {
        self.inner.lock().generations.push(record.clone());
        Ok(())
    }

    fn get_generation(&self, id: &str) -> Result<Option<GenerationRecord>> {
        Ok(self
            .inner
            .lock()
            .generations
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    fn generations(&self) -> Result<Vec<GenerationRecord>> {
        Ok(self.inner.lock().generations.clone())
    }

    fn record_harness_failure(&self, failure: &HarnessFailure) -> Result<()> {
        self.inner.lock().harness_failures.push(failure.clone());
        Ok(())
    }

    fn harness_failures(&self) -> Result<Vec<HarnessFailure>> {
        Ok(self.inner.lock().harness_failures.clone())
    }

    fn enqueue_compile(&self, compiler: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let jobs = inner.compile_jobs.entry(compiler.to_string()).or_default();
        if !jobs.iter().any(|j| j == id) {
            jobs.push(id.to_string());
        }
        Ok(())
    }

    fn pending_compiles(&self, compiler: &str) -> Result<Vec<GenerationId>> {
        Ok(self
            .inner
            .lock()
            .compile_jobs
            .get(compiler)
            .cloned()
            .unwrap_or_default())
    }

    fn finish_compile(&self, compiler: &str, id: &str) -> Result<()> {
        if let Some(jobs) = self.inner.lock().compile_jobs.get_mut(compiler) {
            jobs.retain(|j| j != id);
        }
        Ok(())
    }

    fn record_compile_failure(&self, failure: &CompileFailure) -> Result<()> {
        self.inner.lock().compile_failures.push(failure.clone());
        Ok(())
    }

    fn compile_failures(&self) -> Result<Vec<CompileFailure>> {
        Ok(self.inner.lock().compile_failures.clone())
    }

    fn record_delivery(&self, id: &str, target: &str) -> Result<()> {
        self.inner
            .lock()
            .deliveries
            .entry(id.to_string())
            .or_default()
            .insert(target.to_string());
        Ok(())
    }

    fn deliveries(&self, id: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .deliveries
            .get(id)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn insert_artifact(&self, collection: &str, artifact: &CompiledArtifact) -> Result<()> {
        self.inner
            .lock()
            .artifacts
            .entry(collection.to_string())
            .or_default()
            .push(ArtifactSlot {
                artifact: artifact.clone(),
                claimed: false,
            });
        Ok(())
    }

    fn claim_artifacts(&self, collection: &str) -> Result<Vec<CompiledArtifact>> {
        let mut inner = self.inner.lock();
        let Some(slots) = inner.artifacts.get_mut(collection) else {
            return Ok(Vec::new());
        };
        let mut claimed = Vec::new();
        for slot in slots.iter_mut().filter(|s| !s.claimed && !s.artifact.ran) {
            slot.claimed = true;
            claimed.push(slot.artifact.clone());
        }
        Ok(claimed)
    }

    fn mark_ran(&self, collection: &str, artifact_ids: &[String]) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(slots) = inner.artifacts.get_mut(collection) {
            for slot in slots
                .iter_mut()
                .filter(|s| artifact_ids.contains(&s.artifact.id))
            {
                slot.artifact.ran = true;
                slot.claimed = false;
            }
        }
        Ok(())
    }

    fn release_claims(&self, collection: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut released = 0;
        if let Some(slots) = inner.artifacts.get_mut(collection) {
            for slot in slots.iter_mut().filter(|s| s.claimed && !s.artifact.ran) {
                slot.claimed = false;
                released += 1;
            }
        }
        Ok(released)
    }

    fn artifacts(&self, collection: &str) -> Result<Vec<CompiledArtifact>> {
        Ok(self
            .inner
            .lock()
            .artifacts
            .get(collection)
            .map(|slots| slots.iter().map(|s| s.artifact.clone()).collect())
            .unwrap_or_default())
    }

    fn put_report(&self, report: &RunnerReport) -> Result<()> {
        self.inner
            .lock()
            .reports
            .entry(report.runner.clone())
            .or_default()
            .insert(report.generation_id.clone(), report.clone());
        Ok(())
    }

    fn reports(&self, runner: &str) -> Result<Vec<RunnerReport>> {
        Ok(self
            .inner
            .lock()
            .reports
            .get(runner)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_report(&self, runner: &str, id: &str) -> Result<()> {
        if let Some(reports) = self.inner.lock().reports.get_mut(runner) {
            reports.remove(id);
        }
        Ok(())
    }

    fn insert_run_entry(&self, entry: &RunEntry) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.runs.contains_key(&entry.generation_id) {
            return Ok(false);
        }
        inner
            .runs
            .insert(entry.generation_id.clone(), entry.clone());
        Ok(true)
    }

    fn get_run_entry(&self, id: &str) -> Result<Option<RunEntry>> {
        Ok(self.inner.lock().runs.get(id).cloned())
    }

    fn run_entries(&self) -> Result<Vec<RunEntry>> {
        Ok(self.inner.lock().runs.values().cloned().collect())
    }

    fn pending_runs(&self) -> Result<Vec<RunEntry>> {
        Ok(self
            .inner
            .lock()
            .runs
            .values()
            .filter(|e| e.state == RunState::Pending)
            .cloned()
            .collect())
    }

    fn complete_run(&self, result: &RunResult) -> Result<bool> {
        let mut inner = self.inner.lock();
        let entry = inner
            .runs
            .entry(result.generation_id.clone())
            .or_insert_with(|| RunEntry::marker(result.generation_id.clone(), RunState::Pending));
        if entry.state == RunState::Complete {
            return Ok(false);
        }
        entry.state = RunState::Complete;
        entry.result = Some(result.clone());
        Ok(true)
    }
}
