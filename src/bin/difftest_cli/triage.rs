//! Triage command - summarise aggregated results and divergences

use anyhow::{anyhow, Result};
use clap::Parser;

use difftest_core::divergence::TriageSummary;
use vyper_difftest::Pipeline;

use super::output::{format_triage, print_json};

#[derive(Parser, Debug)]
pub struct TriageCmd {
    /// Show the full run entry of one generation instead
    #[arg(long)]
    pub generation: Option<String>,
}

impl TriageCmd {
    pub fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        if let Some(id) = &self.generation {
            let entry = pipeline
                .store
                .get_run_entry(id)?
                .ok_or_else(|| anyhow!("no run entry for generation {id}"))?;
            return print_json(&entry);
        }

        let summary = TriageSummary::from_entries(&pipeline.store.run_entries()?);
        if json_output {
            print_json(&summary)
        } else {
            print!("{}", format_triage(&summary));
            Ok(())
        }
    }
}
