//! Cross-version comparison of aggregated run results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use difftest_types::{
    DeploymentOutcome, Divergence, DivergenceKind, DivergenceReport, ExecutionSnapshot, RunEntry,
    RunResult, RunState, SnapshotOutcome, VersionResult,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct DivergenceOptions {
    /// Gas differs between versions routinely; off by default.
    pub compare_gas: bool,
}

fn deployment_label(outcome: &DeploymentOutcome) -> String {
    match outcome {
        DeploymentOutcome::Deployed { .. } => "deployed".to_string(),
        DeploymentOutcome::Failed { reason } => format!("failed: {reason}"),
    }
}

fn availability_label(snapshot: Option<&ExecutionSnapshot>) -> String {
    match snapshot.map(|s| &s.outcome) {
        Some(SnapshotOutcome::Captured { .. }) => "captured".to_string(),
        Some(SnapshotOutcome::Unavailable { reason }) => format!("unavailable: {reason}"),
        None => "missing".to_string(),
    }
}

/// Compare every runner of `result` against the reference, which is the
/// first name of `runner_order` present in the result.
///
/// Returns `None` when all versions agree.
pub fn detect_divergence(
    result: &RunResult,
    runner_order: &[String],
    options: DivergenceOptions,
) -> Option<DivergenceReport> {
    let reference = runner_order
        .iter()
        .find(|name| result.results.contains_key(*name))?;
    let expected = result.results.get(reference)?;

    let mut findings = Vec::new();
    for name in runner_order.iter().filter(|n| *n != reference) {
        if let Some(observed) = result.results.get(name) {
            compare_versions(name, expected, observed, options, &mut findings);
        }
    }

    if findings.is_empty() {
        None
    } else {
        Some(DivergenceReport {
            reference: reference.clone(),
            findings,
        })
    }
}

fn compare_versions(
    runner: &str,
    expected: &VersionResult,
    observed: &VersionResult,
    options: DivergenceOptions,
    findings: &mut Vec<Divergence>,
) {
    let finding = |kind, function: Option<&str>, input_set, e: String, o: String| Divergence {
        runner: runner.to_string(),
        kind,
        function: function.map(str::to_string),
        input_set,
        expected: e,
        observed: o,
    };

    if expected.deployment.is_deployed() != observed.deployment.is_deployed() {
        findings.push(finding(
            DivergenceKind::Deployment,
            None,
            None,
            deployment_label(&expected.deployment),
            deployment_label(&observed.deployment),
        ));
        return;
    }
    if expected.snapshots.len() != observed.snapshots.len() {
        findings.push(finding(
            DivergenceKind::SnapshotCount,
            None,
            None,
            expected.snapshots.len().to_string(),
            observed.snapshots.len().to_string(),
        ));
    }

    for snap in &expected.snapshots {
        let other = observed
            .snapshots
            .iter()
            .find(|o| o.function == snap.function && o.input_set == snap.input_set);
        let at = Some(snap.function.as_str());
        let set = Some(snap.input_set);
        match (&snap.outcome, other.map(|o| &o.outcome)) {
            (
                SnapshotOutcome::Captured {
                    state,
                    memory,
                    consumed_gas,
                    return_value,
                },
                Some(SnapshotOutcome::Captured {
                    state: o_state,
                    memory: o_memory,
                    consumed_gas: o_gas,
                    return_value: o_return,
                }),
            ) => {
                if state != o_state {
                    findings.push(finding(
                        DivergenceKind::State,
                        at,
                        set,
                        state.join(","),
                        o_state.join(","),
                    ));
                }
                if memory != o_memory {
                    findings.push(finding(
                        DivergenceKind::Memory,
                        at,
                        set,
                        memory.to_string(),
                        o_memory.to_string(),
                    ));
                }
                if return_value != o_return {
                    findings.push(finding(
                        DivergenceKind::ReturnValue,
                        at,
                        set,
                        return_value.to_string(),
                        o_return.to_string(),
                    ));
                }
                if options.compare_gas && consumed_gas != o_gas {
                    findings.push(finding(
                        DivergenceKind::Gas,
                        at,
                        set,
                        consumed_gas.to_string(),
                        o_gas.to_string(),
                    ));
                }
            }
            (SnapshotOutcome::Unavailable { .. }, Some(SnapshotOutcome::Unavailable { .. })) => {}
            _ => findings.push(finding(
                DivergenceKind::Availability,
                at,
                set,
                availability_label(Some(snap)),
                availability_label(other),
            )),
        }
    }
}

/// Gas usage profile across captured snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasProfile {
    pub min: u64,
    pub max: u64,
    pub avg: u64,
    pub p50: u64,
    pub p99: u64,
    pub samples: usize,
}

impl GasProfile {
    /// Compute gas profile from a list of gas values.
    pub fn from_values(gas_values: &mut [u64]) -> Self {
        if gas_values.is_empty() {
            return Self {
                min: 0,
                max: 0,
                avg: 0,
                p50: 0,
                p99: 0,
                samples: 0,
            };
        }

        gas_values.sort_unstable();
        let len = gas_values.len();
        let sum: u128 = gas_values.iter().map(|&g| u128::from(g)).sum();

        Self {
            min: gas_values[0],
            max: gas_values[len - 1],
            avg: (sum / len as u128) as u64,
            p50: gas_values[len / 2],
            p99: gas_values[(len as f64 * 0.99) as usize],
            samples: len,
        }
    }
}

fn captured_gas(snapshots: &[ExecutionSnapshot]) -> impl Iterator<Item = u64> + '_ {
    snapshots.iter().filter_map(|s| match &s.outcome {
        SnapshotOutcome::Captured { consumed_gas, .. } => Some(*consumed_gas),
        SnapshotOutcome::Unavailable { .. } => None,
    })
}

/// Summary of aggregated results for triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageSummary {
    pub completed: usize,
    pub pending: usize,
    pub not_compiled: usize,
    pub divergent: Vec<DivergenceReportEntry>,
    pub findings_by_kind: BTreeMap<String, usize>,
    pub gas_by_runner: BTreeMap<String, GasProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceReportEntry {
    pub generation_id: String,
    pub report: DivergenceReport,
}

impl TriageSummary {
    pub fn from_entries(entries: &[RunEntry]) -> Self {
        let mut summary = TriageSummary {
            completed: 0,
            pending: 0,
            not_compiled: 0,
            divergent: Vec::new(),
            findings_by_kind: BTreeMap::new(),
            gas_by_runner: BTreeMap::new(),
        };
        let mut gas: BTreeMap<String, Vec<u64>> = BTreeMap::new();

        for entry in entries {
            match entry.state {
                RunState::Pending => summary.pending += 1,
                RunState::NotCompiled => summary.not_compiled += 1,
                RunState::Complete => summary.completed += 1,
            }
            let Some(result) = &entry.result else {
                continue;
            };
            for (runner, version) in &result.results {
                gas.entry(runner.clone())
                    .or_default()
                    .extend(captured_gas(&version.snapshots));
            }
            if let Some(report) = &result.divergence {
                for finding in &report.findings {
                    let kind = serde_json::to_value(finding.kind)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    *summary.findings_by_kind.entry(kind).or_default() += 1;
                }
                summary.divergent.push(DivergenceReportEntry {
                    generation_id: result.generation_id.clone(),
                    report: report.clone(),
                });
            }
        }

        summary.gas_by_runner = gas
            .into_iter()
            .map(|(runner, mut values)| (runner, GasProfile::from_values(&mut values)))
            .collect();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use difftest_types::{Address, HexBytes, InputStrategy};

    fn captured(function: &str, slot0: &str, ret: serde_json::Value, gas: u64) -> ExecutionSnapshot {
        ExecutionSnapshot {
            function: function.into(),
            input_set: 0,
            strategy: InputStrategy::Default,
            outcome: SnapshotOutcome::Captured {
                state: vec![slot0.into(), "0".into()],
                memory: HexBytes(vec![0; 4]),
                consumed_gas: gas,
                return_value: ret,
            },
        }
    }

    fn deployed(snapshots: Vec<ExecutionSnapshot>) -> VersionResult {
        VersionResult {
            deployment: DeploymentOutcome::Deployed {
                address: Address::ZERO,
            },
            snapshots,
        }
    }

    fn result(a: VersionResult, b: VersionResult) -> RunResult {
        RunResult {
            generation_id: "g1".into(),
            results: BTreeMap::from([("v1".to_string(), a), ("v2".to_string(), b)]),
            divergence: None,
            completed_at: Utc::now(),
        }
    }

    fn order() -> Vec<String> {
        vec!["v1".into(), "v2".into()]
    }

    #[test]
    fn test_identical_versions_agree() {
        let snap = captured("func_0", "7", serde_json::json!("7"), 100);
        let r = result(deployed(vec![snap.clone()]), deployed(vec![snap]));
        assert!(detect_divergence(&r, &order(), DivergenceOptions::default()).is_none());
    }

    #[test]
    fn test_return_and_state_divergence() {
        let r = result(
            deployed(vec![captured("func_0", "7", serde_json::json!("7"), 100)]),
            deployed(vec![captured("func_0", "8", serde_json::json!("8"), 100)]),
        );
        let report = detect_divergence(&r, &order(), DivergenceOptions::default()).unwrap();
        assert_eq!(report.reference, "v1");
        let kinds: Vec<_> = report.findings.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![DivergenceKind::State, DivergenceKind::ReturnValue]);
        assert_eq!(report.findings[0].runner, "v2");
        assert_eq!(report.findings[0].function.as_deref(), Some("func_0"));
    }

    #[test]
    fn test_gas_compared_only_on_request() {
        let r = result(
            deployed(vec![captured("func_0", "7", serde_json::json!(null), 100)]),
            deployed(vec![captured("func_0", "7", serde_json::json!(null), 120)]),
        );
        assert!(detect_divergence(&r, &order(), DivergenceOptions::default()).is_none());
        let report =
            detect_divergence(&r, &order(), DivergenceOptions { compare_gas: true }).unwrap();
        assert_eq!(report.findings[0].kind, DivergenceKind::Gas);
    }

    #[test]
    fn test_deployment_divergence_short_circuits() {
        let failed = VersionResult {
            deployment: DeploymentOutcome::Failed {
                reason: "reverted".into(),
            },
            snapshots: vec![],
        };
        let r = result(
            deployed(vec![captured("func_0", "7", serde_json::json!(null), 1)]),
            failed,
        );
        let report = detect_divergence(&r, &order(), DivergenceOptions::default()).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, DivergenceKind::Deployment);
        assert_eq!(report.findings[0].observed, "failed: reverted");
    }

    #[test]
    fn test_availability_divergence() {
        let mut unavailable = captured("func_0", "7", serde_json::json!(null), 1);
        unavailable.outcome = SnapshotOutcome::Unavailable {
            reason: "reverted".into(),
        };
        let r = result(
            deployed(vec![captured("func_0", "7", serde_json::json!(null), 1)]),
            deployed(vec![unavailable]),
        );
        let report = detect_divergence(&r, &order(), DivergenceOptions::default()).unwrap();
        assert_eq!(report.findings[0].kind, DivergenceKind::Availability);
        assert_eq!(report.findings[0].expected, "captured");
    }

    #[test]
    fn test_gas_profile_from_values() {
        let mut values = vec![100, 200, 300, 400, 500];
        let profile = GasProfile::from_values(&mut values);
        assert_eq!(profile.min, 100);
        assert_eq!(profile.max, 500);
        assert_eq!(profile.avg, 300);
        assert_eq!(profile.p50, 300);
        assert_eq!(profile.samples, 5);
    }

    #[test]
    fn test_gas_profile_large_values() {
        let mut values = vec![u64::MAX, u64::MAX - 2];
        let profile = GasProfile::from_values(&mut values);
        assert_eq!(profile.avg, u64::MAX - 1);
        assert_eq!(profile.max, u64::MAX);
    }

    #[test]
    fn test_gas_profile_empty() {
        let profile = GasProfile::from_values(&mut []);
        assert_eq!(profile.min, 0);
        assert_eq!(profile.max, 0);
    }

    #[test]
    fn test_triage_summary() {
        let mut r = result(
            deployed(vec![captured("func_0", "7", serde_json::json!("7"), 100)]),
            deployed(vec![captured("func_0", "8", serde_json::json!("8"), 300)]),
        );
        r.divergence = detect_divergence(&r, &order(), DivergenceOptions::default());
        let complete = RunEntry {
            generation_id: "g1".into(),
            state: RunState::Complete,
            created_at: Utc::now(),
            result: Some(r),
        };
        let pending = RunEntry::marker("g2".into(), RunState::Pending);
        let summary = TriageSummary::from_entries(&[complete, pending]);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.divergent.len(), 1);
        assert_eq!(summary.findings_by_kind.get("return_value"), Some(&1));
        assert_eq!(summary.gas_by_runner["v2"].max, 300);
    }
}
