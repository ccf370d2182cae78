//! Compile command - compile worker for one compiler target

use anyhow::Result;
use clap::Parser;

use vyper_difftest::Pipeline;

#[derive(Parser, Debug)]
pub struct CompileCmd {
    /// Compiler target id, `<version>_<name>`
    #[arg(long)]
    pub target: String,

    /// Drain the available jobs once and exit
    #[arg(long)]
    pub once: bool,
}

impl CompileCmd {
    pub async fn execute(&self, pipeline: &Pipeline) -> Result<()> {
        let worker = pipeline.compile_worker(&self.target)?;
        if self.once {
            let processed = worker.run_once().await?;
            println!("Compiled {processed} job(s) for {}", self.target);
            return Ok(());
        }
        worker.run(pipeline.config.runner.poll_interval()).await
    }
}
