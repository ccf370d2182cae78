//! Generate command - feed structured inputs through the generation stage

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;

use difftest_core::distributor::Distribution;
use difftest_core::generator::GenerationError;
use vyper_difftest::inputs::load_inputs;
use vyper_difftest::Pipeline;

use super::output::{format_harness_error, print_json};

#[derive(Parser, Debug)]
pub struct GenerateCmd {
    /// JSON files, directories of `*.json`, or `-` for JSON lines on stdin
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
struct GenerateSummary {
    generated: usize,
    compiled: usize,
    distributed: usize,
}

impl GenerateCmd {
    /// Stops at the first harness defect and returns it as the error.
    pub async fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        let inputs = load_inputs(&self.paths)?;
        let mut stage = pipeline.generation_stage()?;
        let mut summary = GenerateSummary::default();

        for input in &inputs {
            match stage.process(&input.description).await {
                Ok(outcome) => {
                    summary.generated += 1;
                    if outcome.compiled {
                        summary.compiled += 1;
                    }
                    if matches!(
                        outcome.distribution,
                        Distribution::Published(_) | Distribution::Enqueued(_)
                    ) {
                        summary.distributed += 1;
                    }
                    info!(
                        origin = %input.origin,
                        generation_id = %outcome.id,
                        distribution = ?outcome.distribution,
                        "generated"
                    );
                }
                Err(GenerationError::Harness(e)) => {
                    eprintln!("{}", format_harness_error(&input.origin, &e));
                    return Err(anyhow!(e).context(format!("harness defect in {}", input.origin)));
                }
                Err(GenerationError::Pipeline(e)) => return Err(e),
            }
        }

        if json_output {
            print_json(&summary)?;
        } else {
            println!(
                "Generated {} ({} compiled, {} distributed)",
                summary.generated, summary.compiled, summary.distributed
            );
        }
        Ok(())
    }
}
