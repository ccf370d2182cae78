//! Output formatting for vyper-difftest commands

use serde::Serialize;

use difftest_core::divergence::TriageSummary;
use difftest_core::errors::HarnessError;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line description of a harness defect for stderr.
pub fn format_harness_error(origin: &str, err: &HarnessError) -> String {
    format!("\x1b[31m✗ harness defect in {origin}\x1b[0m [{}]: {err}", err.kind())
}

pub fn format_triage(summary: &TriageSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Completed: {}  Pending: {}  Not compiled: {}\n",
        summary.completed, summary.pending, summary.not_compiled
    ));

    if summary.divergent.is_empty() {
        out.push_str("\x1b[32m✓ No divergences\x1b[0m\n");
    } else {
        out.push_str(&format!(
            "\n\x1b[1mDivergences:\x1b[0m {}\n",
            summary.divergent.len()
        ));
        for entry in &summary.divergent {
            out.push_str(&format!(
                "  \x1b[33m{}\x1b[0m (reference {})\n",
                entry.generation_id, entry.report.reference
            ));
            for finding in &entry.report.findings {
                let location = match (&finding.function, finding.input_set) {
                    (Some(function), Some(set)) => format!(" {function}[{set}]"),
                    (Some(function), None) => format!(" {function}"),
                    _ => String::new(),
                };
                out.push_str(&format!(
                    "    {:?}{location} {}: expected {} got {}\n",
                    finding.kind, finding.runner, finding.expected, finding.observed
                ));
            }
        }
        out.push_str("\n\x1b[1mBy kind:\x1b[0m\n");
        for (kind, count) in &summary.findings_by_kind {
            out.push_str(&format!("  {kind}: {count}\n"));
        }
    }

    if !summary.gas_by_runner.is_empty() {
        out.push_str("\n\x1b[1mGas:\x1b[0m\n");
        for (runner, gas) in &summary.gas_by_runner {
            out.push_str(&format!(
                "  {runner}: min {} p50 {} avg {} p99 {} max {} ({} samples)\n",
                gas.min, gas.p50, gas.avg, gas.p99, gas.max, gas.samples
            ));
        }
    }
    out
}
