//! vyper-difftest: differential fuzzing pipeline for the Vyper compiler
//!
//! Structured contract descriptions are synthesized into Vyper source,
//! compiled by every configured compiler target, executed against the same
//! generated inputs and compared for divergent side effects.
//!
//! ## Commands
//!
//! - **synth**: print the synthesized source and parameter-type map
//! - **generate**: run structured inputs through synthesis, input generation
//!   and the reference compile, then distribute them
//! - **compile**: compile worker for one target
//! - **run**: differential runner for one target
//! - **aggregate**: join runner reports into run results
//! - **triage**: summarise divergences and gas per version
//!
//! ## Example Usage
//!
//! ```bash
//! vyper-difftest synth contract.json
//! vyper-difftest --config difftest.json generate corpus/
//! vyper-difftest --config difftest.json compile --target 0.3.10_default --once
//! vyper-difftest --config difftest.json run --target 0.3.10_default
//! vyper-difftest --config difftest.json aggregate
//! vyper-difftest --config difftest.json triage --json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use difftest_core::config::Config;
use vyper_difftest::{logging, Pipeline};

mod difftest_cli;

use difftest_cli::{
    aggregate::AggregateCmd, compile::CompileCmd, generate::GenerateCmd, run::RunCmd,
    synth::SynthCmd, triage::TriageCmd,
};

#[derive(Parser)]
#[command(
    name = "vyper-difftest",
    author,
    version,
    about = "Differential fuzzing pipeline for the Vyper compiler"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write prometheus metrics in text format to this file
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    /// Output as JSON instead of human-readable format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print synthesized source and parameter-type map for one input
    Synth(SynthCmd),

    /// Synthesize, generate inputs, compile and distribute structured inputs
    Generate(GenerateCmd),

    /// Compile worker for one compiler target
    Compile(CompileCmd),

    /// Differential runner for one compiler target
    Run(RunCmd),

    /// Join runner reports into run results
    Aggregate(AggregateCmd),

    /// Summarise run results, divergences and gas per version
    Triage(TriageCmd),
}

impl Commands {
    /// Loop commands that keep running unless `--once` is given.
    fn is_long_running(&self) -> bool {
        match self {
            Commands::Compile(cmd) => !cmd.once,
            Commands::Run(cmd) => !cmd.once,
            Commands::Aggregate(cmd) => !cmd.once,
            _ => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        command,
        config,
        metrics_file,
        json,
    } = Cli::parse();

    // Synthesis is local and needs no compiler targets.
    if let Commands::Synth(cmd) = &command {
        let mut defaults = Config::default();
        defaults.apply_env();
        logging::init(&defaults.verbosity)?;
        return cmd.execute(json);
    }

    let config = Config::load(config.as_deref())?;
    logging::init(&config.verbosity)?;
    let pipeline = Pipeline::new(config)?;

    if let Some(path) = &metrics_file {
        if command.is_long_running() {
            difftest_cli::spawn_metrics_writer(
                pipeline.metrics.clone(),
                path.clone(),
                Duration::from_secs(15),
            );
        }
    }

    let result = match command {
        Commands::Synth(_) => Ok(()),
        Commands::Generate(cmd) => cmd.execute(&pipeline, json).await,
        Commands::Compile(cmd) => cmd.execute(&pipeline).await,
        Commands::Run(cmd) => cmd.execute(&pipeline, json).await,
        Commands::Aggregate(cmd) => cmd.execute(&pipeline).await,
        Commands::Triage(cmd) => cmd.execute(&pipeline, json),
    };

    // Written on failure too: harness defects are counted.
    if let Some(path) = &metrics_file {
        pipeline.write_metrics(path)?;
    }
    result
}
