//! Run command - differential runner for one compiler version

use anyhow::Result;
use clap::Parser;

use vyper_difftest::Pipeline;

use super::output::print_json;

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Compiler target id whose artifacts this runner executes
    #[arg(long)]
    pub target: String,

    /// Run a single claim cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl RunCmd {
    pub async fn execute(&self, pipeline: &Pipeline, json_output: bool) -> Result<()> {
        let mut runner = pipeline.runner(&self.target)?;
        if !self.once {
            return runner.run(pipeline.config.runner.poll_interval()).await;
        }
        let summary = runner.run_cycle().await?;
        if json_output {
            print_json(&serde_json::json!({
                "runner": runner.name(),
                "released": summary.released,
                "claimed": summary.claimed,
                "deployment_failures": summary.deployment_failures,
                "snapshots": summary.snapshots,
                "unavailable": summary.unavailable,
            }))
        } else {
            println!(
                "{}: {} artifact(s), {} deployment failure(s), {} snapshot(s) ({} unavailable)",
                runner.name(),
                summary.claimed,
                summary.deployment_failures,
                summary.snapshots,
                summary.unavailable
            );
            Ok(())
        }
    }
}
