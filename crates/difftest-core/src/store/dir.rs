//! Directory-backed store, one JSON document per file.
//!
//! Shared between processes on one host. Every write lands in a temp file
//! first and is renamed into place, so readers never see a partial document.
//!
//! ## Storage Structure
//!
//! ```text
//! <root>/
//! ├── generations/
//! │   └── {generation_id}.json
//! ├── harness_failures/
//! │   └── {failure_id}.json
//! ├── compile_failures/
//! │   └── {generation_id}_{compiler}.json
//! ├── compile_jobs/
//! │   └── {compiler}/{generation_id}.json   # store-poll mode only
//! ├── deliveries/
//! │   └── {generation_id}/{target}.json
//! ├── artifacts/
//! │   └── {collection}/
//! │       ├── pending/{artifact_id}.json
//! │       ├── claimed/{artifact_id}.json    # owned by one runner
//! │       └── ran/{artifact_id}.json
//! ├── reports/
//! │   └── {runner}/{generation_id}.json
//! ├── run_results/
//! │   ├── {generation_id}.json
//! │   └── {generation_id}.complete          # completed entry, created once
//! └── run_pending/
//!     └── {generation_id}.json              # index of pending entries
//! ```
//!
//! Claims are `rename(pending/x, claimed/x)`: exactly one claimer wins each
//! rename, a loser sees `NotFound` and skips the file.
//!
//! Completion creates `{generation_id}.complete` holding the completed entry
//! and then rewrites `{generation_id}.json`. The `.complete` document wins
//! whenever both exist, so a crash between the two steps loses nothing.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use difftest_types::{
    CompileFailure, CompiledArtifact, GenerationId, GenerationRecord, HarnessFailure, RunEntry,
    RunResult, RunState, RunnerReport,
};

use super::RecordStore;

const PENDING: &str = "pending";
const CLAIMED: &str = "claimed";
const RAN: &str = "ran";

#[derive(Debug, Serialize, Deserialize)]
struct CompileJob {
    generation_id: GenerationId,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeliveryRecord {
    target: String,
    delivered_at: DateTime<Utc>,
}

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [
            "generations",
            "harness_failures",
            "compile_failures",
            "compile_jobs",
            "artifacts",
            "reports",
            "run_results",
            "run_pending",
            "deliveries",
        ] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("failed to create {}", root.join(dir).display()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, collection: &str, state: &str) -> Result<PathBuf> {
        let dir = self.root.join("artifacts").join(collection).join(state);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.root.join("run_results").join(format!("{id}.json"))
    }

    fn completion_path(&self, id: &str) -> PathBuf {
        self.root.join("run_results").join(format!("{id}.complete"))
    }

    fn pending_index(&self, id: &str) -> PathBuf {
        json_file(&self.root.join("run_pending"), id)
    }

    /// Finish a completion interrupted after its `.complete` document was
    /// created.
    fn settle_completion(&self, id: &str) -> Result<()> {
        let Some(completed) = read_json::<RunEntry>(&self.completion_path(id))? else {
            return Ok(());
        };
        let current = read_json::<RunEntry>(&self.run_path(id))?;
        if current.map(|e| e.state) != Some(RunState::Complete) {
            debug!(generation_id = %id, "finishing interrupted completion");
            write_json(&self.run_path(id), &completed)?;
        }
        remove_if_present(&self.pending_index(id))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(e).with_context(|| format!("failed to remove {}", path.display()))
        }
        _ => Ok(()),
    }
}

fn json_file(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

/// Serialize into a sibling temp file, returning its path.
fn write_temp<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    let bytes = serde_json::to_vec_pretty(value)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(tmp)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = write_temp(path, value)?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to move document into {}", path.display()))
}

/// Write `value` at `path` unless a document already exists there.
fn create_json<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
    let tmp = write_temp(path, value)?;
    let linked = fs::hard_link(&tmp, path);
    fs::remove_file(&tmp).ok();
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to create {}", path.display())),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .with_context(|| format!("malformed document {}", path.display())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// `*.json` documents of `dir`, sorted by file name. Temp files are skipped.
fn json_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_doc = path.extension().is_some_and(|ext| ext == "json")
            && !path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
        if is_doc {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut docs = Vec::new();
    for path in json_paths(dir)? {
        // A document can be renamed away between listing and reading.
        if let Some(doc) = read_json(&path)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

impl RecordStore for DirStore {
    fn insert_generation(&self, record: &GenerationRecord) -> Result<()> {
        write_json(&json_file(&self.root.join("generations"), &record.id), record)
    }

    fn get_generation(&self, id: &str) -> Result<Option<GenerationRecord>> {
        read_json(&json_file(&self.root.join("generations"), id))
    }

    fn generations(&self) -> Result<Vec<GenerationRecord>> {
        let mut records: Vec<GenerationRecord> = read_all(&self.root.join("generations"))?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    fn record_harness_failure(&self, failure: &HarnessFailure) -> Result<()> {
        write_json(
            &json_file(&self.root.join("harness_failures"), &failure.id),
            failure,
        )
    }

    fn harness_failures(&self) -> Result<Vec<HarnessFailure>> {
        read_all(&self.root.join("harness_failures"))
    }

    fn enqueue_compile(&self, compiler: &str, id: &str) -> Result<()> {
        let job = CompileJob {
            generation_id: id.to_string(),
            enqueued_at: Utc::now(),
        };
        create_json(
            &json_file(&self.root.join("compile_jobs").join(compiler), id),
            &job,
        )?;
        Ok(())
    }

    fn pending_compiles(&self, compiler: &str) -> Result<Vec<GenerationId>> {
        let mut jobs: Vec<CompileJob> = read_all(&self.root.join("compile_jobs").join(compiler))?;
        jobs.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(jobs.into_iter().map(|j| j.generation_id).collect())
    }

    fn finish_compile(&self, compiler: &str, id: &str) -> Result<()> {
        remove_if_present(&json_file(&self.root.join("compile_jobs").join(compiler), id))
    }

    fn record_compile_failure(&self, failure: &CompileFailure) -> Result<()> {
        let key = format!("{}_{}", failure.generation_id, failure.compiler);
        write_json(&json_file(&self.root.join("compile_failures"), &key), failure)
    }

    fn compile_failures(&self) -> Result<Vec<CompileFailure>> {
        read_all(&self.root.join("compile_failures"))
    }

    fn record_delivery(&self, id: &str, target: &str) -> Result<()> {
        let record = DeliveryRecord {
            target: target.to_string(),
            delivered_at: Utc::now(),
        };
        create_json(&json_file(&self.root.join("deliveries").join(id), target), &record)?;
        Ok(())
    }

    fn deliveries(&self, id: &str) -> Result<Vec<String>> {
        let records: Vec<DeliveryRecord> = read_all(&self.root.join("deliveries").join(id))?;
        Ok(records.into_iter().map(|r| r.target).collect())
    }

    fn insert_artifact(&self, collection: &str, artifact: &CompiledArtifact) -> Result<()> {
        let state = if artifact.ran { RAN } else { PENDING };
        let dir = self.artifact_dir(collection, state)?;
        write_json(&json_file(&dir, &artifact.id), artifact)
    }

    fn claim_artifacts(&self, collection: &str) -> Result<Vec<CompiledArtifact>> {
        let pending = self.artifact_dir(collection, PENDING)?;
        let claimed_dir = self.artifact_dir(collection, CLAIMED)?;
        let mut claimed = Vec::new();
        for path in json_paths(&pending)? {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = claimed_dir.join(name);
            match fs::rename(&path, &target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "artifact claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to claim {}", path.display()))
                }
            }
            if let Some(artifact) = read_json(&target)? {
                claimed.push(artifact);
            }
        }
        Ok(claimed)
    }

    fn mark_ran(&self, collection: &str, artifact_ids: &[String]) -> Result<()> {
        let claimed_dir = self.artifact_dir(collection, CLAIMED)?;
        let ran_dir = self.artifact_dir(collection, RAN)?;
        for id in artifact_ids {
            let claimed = json_file(&claimed_dir, id);
            let Some(mut artifact) = read_json::<CompiledArtifact>(&claimed)? else {
                warn!(collection, artifact_id = %id, "marking an artifact that is not claimed");
                continue;
            };
            artifact.ran = true;
            write_json(&json_file(&ran_dir, id), &artifact)?;
            fs::remove_file(&claimed)
                .with_context(|| format!("failed to remove {}", claimed.display()))?;
        }
        Ok(())
    }

    fn release_claims(&self, collection: &str) -> Result<usize> {
        let pending = self.artifact_dir(collection, PENDING)?;
        let claimed_dir = self.artifact_dir(collection, CLAIMED)?;
        let mut released = 0;
        for path in json_paths(&claimed_dir)? {
            let Some(name) = path.file_name() else {
                continue;
            };
            match fs::rename(&path, pending.join(name)) {
                Ok(()) => released += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to release {}", path.display()))
                }
            }
        }
        Ok(released)
    }

    fn artifacts(&self, collection: &str) -> Result<Vec<CompiledArtifact>> {
        let mut all = Vec::new();
        for state in [PENDING, CLAIMED, RAN] {
            all.extend(read_all::<CompiledArtifact>(
                &self.artifact_dir(collection, state)?,
            )?);
        }
        Ok(all)
    }

    fn put_report(&self, report: &RunnerReport) -> Result<()> {
        let dir = self.root.join("reports").join(&report.runner);
        write_json(&json_file(&dir, &report.generation_id), report)
    }

    fn reports(&self, runner: &str) -> Result<Vec<RunnerReport>> {
        read_all(&self.root.join("reports").join(runner))
    }

    fn remove_report(&self, runner: &str, id: &str) -> Result<()> {
        remove_if_present(&json_file(&self.root.join("reports").join(runner), id))
    }

    fn insert_run_entry(&self, entry: &RunEntry) -> Result<bool> {
        // Indexed first: a stray index entry is filtered out on read, a
        // missing one would hide the entry from the aggregator.
        if entry.state == RunState::Pending {
            write_json(&self.pending_index(&entry.generation_id), entry)?;
        }
        create_json(&self.run_path(&entry.generation_id), entry)
    }

    fn get_run_entry(&self, id: &str) -> Result<Option<RunEntry>> {
        if let Some(completed) = read_json(&self.completion_path(id))? {
            return Ok(Some(completed));
        }
        read_json(&self.run_path(id))
    }

    fn run_entries(&self) -> Result<Vec<RunEntry>> {
        let mut entries: Vec<RunEntry> = read_all(&self.root.join("run_results"))?;
        for entry in entries.iter_mut().filter(|e| e.state != RunState::Complete) {
            if let Some(completed) = read_json(&self.completion_path(&entry.generation_id))? {
                *entry = completed;
            }
        }
        Ok(entries)
    }

    fn pending_runs(&self) -> Result<Vec<RunEntry>> {
        let mut pending = Vec::new();
        for marker in read_all::<RunEntry>(&self.root.join("run_pending"))? {
            let id = &marker.generation_id;
            match self.get_run_entry(id)? {
                Some(entry) if entry.state == RunState::Pending => pending.push(entry),
                Some(_) => remove_if_present(&self.pending_index(id))?,
                None => {}
            }
        }
        Ok(pending)
    }

    fn complete_run(&self, result: &RunResult) -> Result<bool> {
        let id = &result.generation_id;
        let mut entry = self
            .get_run_entry(id)?
            .unwrap_or_else(|| RunEntry::marker(id.clone(), RunState::Pending));
        if entry.state == RunState::Complete {
            self.settle_completion(id)?;
            return Ok(false);
        }
        entry.state = RunState::Complete;
        entry.result = Some(result.clone());
        if !create_json(&self.completion_path(id), &entry)? {
            self.settle_completion(id)?;
            return Ok(false);
        }
        write_json(&self.run_path(id), &entry)?;
        remove_if_present(&self.pending_index(id))?;
        Ok(true)
    }
}
