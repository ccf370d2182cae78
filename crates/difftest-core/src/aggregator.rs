//! Result aggregator.
//!
//! Joins runner reports by generation id. Reports are durable, so a
//! generation whose runners report in different cycles is completed as soon
//! as the last one arrives; until then it stays pending. Completion goes
//! through [`RecordStore::complete_run`], which succeeds once per id, and is
//! followed by removing the joined reports. A cycle therefore reads only the
//! pending entries and the reports of generations still open.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use difftest_types::{GenerationId, RunResult, RunState, RunnerReport, VersionResult};

use crate::divergence::{detect_divergence, DivergenceOptions};
use crate::metrics::PipelineMetrics;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub completed: usize,
    pub divergent: usize,
    pub pending: usize,
    pub stale: usize,
}

pub struct ResultAggregator {
    store: Arc<dyn RecordStore>,
    /// Configured runners; the first is the divergence reference.
    runners: Vec<String>,
    options: DivergenceOptions,
    stale_after: Duration,
    metrics: PipelineMetrics,
}

impl ResultAggregator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        runners: Vec<String>,
        options: DivergenceOptions,
        stale_after: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            store,
            runners,
            options,
            stale_after,
            metrics,
        }
    }

    pub async fn run(&self, interval: Duration) -> Result<()> {
        info!(runners = ?self.runners, "aggregator started");
        loop {
            let summary = self.run_cycle()?;
            if summary.completed > 0 {
                info!(?summary, "aggregation cycle done");
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub fn run_cycle(&self) -> Result<AggregationSummary> {
        let mut joined: HashMap<GenerationId, BTreeMap<String, RunnerReport>> = HashMap::new();
        for runner in &self.runners {
            for report in self.store.reports(runner)? {
                joined
                    .entry(report.generation_id.clone())
                    .or_default()
                    .insert(runner.clone(), report);
            }
        }

        let pending = self.store.pending_runs()?;
        let open: HashSet<&str> = pending.iter().map(|e| e.generation_id.as_str()).collect();
        let mut candidates: Vec<(GenerationId, Option<chrono::DateTime<Utc>>)> = pending
            .iter()
            .map(|e| (e.generation_id.clone(), Some(e.created_at)))
            .collect();
        // Reports with no pending entry: either the marker is missing, and
        // they are joined all the same, or the run is already settled and
        // they are leftovers of a re-run.
        let mut orphans: Vec<GenerationId> = joined
            .keys()
            .filter(|id| !open.contains(id.as_str()))
            .cloned()
            .collect();
        orphans.sort();
        for id in orphans {
            match self.store.get_run_entry(&id)?.map(|e| e.state) {
                None => candidates.push((id, None)),
                // Marker written after this cycle listed the pending runs.
                Some(RunState::Pending) => {
                    joined.remove(&id);
                }
                Some(state) => {
                    debug!(generation_id = %id, ?state, "dropping reports of a settled run");
                    joined.remove(&id);
                    self.remove_reports(&id)?;
                }
            }
        }

        let mut summary = AggregationSummary::default();
        let stale_cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d));

        for (id, created_at) in candidates {
            let reports = joined.remove(&id).unwrap_or_default();
            if reports.len() < self.runners.len() {
                summary.pending += 1;
                let is_stale = matches!((created_at, stale_cutoff), (Some(at), Some(cutoff)) if at < cutoff);
                if is_stale {
                    summary.stale += 1;
                    let missing: Vec<&str> = self
                        .runners
                        .iter()
                        .filter(|r| !reports.contains_key(*r))
                        .map(String::as_str)
                        .collect();
                    warn!(generation_id = %id, ?missing, "generation still waiting for runners");
                } else {
                    debug!(generation_id = %id, reported = reports.len(), "partial reports");
                }
                continue;
            }

            let mut result = RunResult {
                generation_id: id.clone(),
                results: reports
                    .into_iter()
                    .map(|(runner, report)| {
                        (
                            runner,
                            VersionResult {
                                deployment: report.deployment,
                                snapshots: report.snapshots,
                            },
                        )
                    })
                    .collect(),
                divergence: None,
                completed_at: Utc::now(),
            };
            result.divergence = detect_divergence(&result, &self.runners, self.options);

            let completed = self.store.complete_run(&result)?;
            self.remove_reports(&id)?;
            if !completed {
                continue;
            }
            summary.completed += 1;
            self.metrics.run_results.inc();
            if let Some(report) = &result.divergence {
                summary.divergent += 1;
                self.metrics.divergences.inc();
                warn!(
                    generation_id = %id,
                    reference = %report.reference,
                    findings = report.findings.len(),
                    "divergence detected"
                );
            } else {
                debug!(generation_id = %id, "run result complete");
            }
        }

        self.metrics.pending_generations.set(summary.pending as i64);
        Ok(summary)
    }

    fn remove_reports(&self, id: &str) -> Result<()> {
        for runner in &self.runners {
            self.store.remove_report(runner, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use difftest_types::{DeploymentOutcome, RunEntry};

    fn report(runner: &str, id: &str) -> RunnerReport {
        RunnerReport {
            generation_id: id.into(),
            runner: runner.into(),
            artifact_id: format!("{runner}-{id}"),
            deployment: DeploymentOutcome::Failed {
                reason: "reverted".into(),
            },
            snapshots: vec![],
            reported_at: Utc::now(),
        }
    }

    fn aggregator(store: Arc<MemoryStore>, stale_after: Duration) -> ResultAggregator {
        ResultAggregator::new(
            store,
            vec!["v1".into(), "v2".into()],
            DivergenceOptions::default(),
            stale_after,
            PipelineMetrics::new().unwrap(),
        )
    }

    #[test]
    fn test_partial_reports_stay_pending_across_cycles() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_run_entry(&RunEntry::marker("g1".into(), RunState::Pending))
            .unwrap();
        let agg = aggregator(store.clone(), Duration::from_secs(600));

        store.put_report(&report("v1", "g1")).unwrap();
        let first = agg.run_cycle().unwrap();
        assert_eq!(first.completed, 0);
        assert_eq!(first.pending, 1);
        assert_eq!(store.get_run_entry("g1").unwrap().unwrap().state, RunState::Pending);

        store.put_report(&report("v2", "g1")).unwrap();
        let second = agg.run_cycle().unwrap();
        assert_eq!(second.completed, 1);
        assert_eq!(second.pending, 0);

        let entry = store.get_run_entry("g1").unwrap().unwrap();
        assert_eq!(entry.state, RunState::Complete);
        let result = entry.result.unwrap();
        assert_eq!(result.results.len(), 2);
        assert!(result.divergence.is_none());

        assert_eq!(agg.run_cycle().unwrap().completed, 0);
    }

    #[test]
    fn test_completed_reports_are_not_read_again() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_run_entry(&RunEntry::marker("g1".into(), RunState::Pending))
            .unwrap();
        store
            .insert_run_entry(&RunEntry::marker("g2".into(), RunState::Pending))
            .unwrap();
        let agg = aggregator(store.clone(), Duration::from_secs(600));
        store.put_report(&report("v1", "g1")).unwrap();
        store.put_report(&report("v2", "g1")).unwrap();
        store.put_report(&report("v1", "g2")).unwrap();

        let summary = agg.run_cycle().unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        let left: Vec<_> = store
            .reports("v1")
            .unwrap()
            .into_iter()
            .map(|r| r.generation_id)
            .collect();
        assert_eq!(left, vec!["g2"]);
        assert!(store.reports("v2").unwrap().is_empty());

        // A late re-run report of a completed generation is dropped, not
        // aggregated a second time.
        store.put_report(&report("v2", "g1")).unwrap();
        assert_eq!(agg.run_cycle().unwrap().completed, 0);
        assert!(store.reports("v2").unwrap().is_empty());
        assert!(store.get_run_entry("g1").unwrap().unwrap().result.is_some());
    }

    #[test]
    fn test_stale_pending_is_counted() {
        let store = Arc::new(MemoryStore::new());
        let mut old = RunEntry::marker("g1".into(), RunState::Pending);
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        store.insert_run_entry(&old).unwrap();
        let agg = aggregator(store.clone(), Duration::from_secs(60));
        let summary = agg.run_cycle().unwrap();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.stale, 1);
        assert_eq!(agg.metrics.pending_generations.get(), 1);
    }

    #[test]
    fn test_not_compiled_entries_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_run_entry(&RunEntry::marker("g1".into(), RunState::NotCompiled))
            .unwrap();
        let summary = aggregator(store, Duration::from_secs(60)).run_cycle().unwrap();
        assert_eq!(summary, AggregationSummary::default());
    }
}
