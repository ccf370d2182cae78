//! Aggregate command - join runner reports into run results

use anyhow::Result;
use clap::Parser;

use vyper_difftest::Pipeline;

#[derive(Parser, Debug)]
pub struct AggregateCmd {
    /// Run a single aggregation cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl AggregateCmd {
    pub async fn execute(&self, pipeline: &Pipeline) -> Result<()> {
        let aggregator = pipeline.aggregator();
        if !self.once {
            return aggregator
                .run(pipeline.config.aggregator.poll_interval())
                .await;
        }
        let summary = aggregator.run_cycle()?;
        println!(
            "Completed {} ({} divergent), {} pending ({} stale)",
            summary.completed, summary.divergent, summary.pending, summary.stale
        );
        Ok(())
    }
}
