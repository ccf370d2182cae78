//! Synth command - print synthesized source and its parameter-type map

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;

use difftest_core::synthesize;
use difftest_types::TypeMap;
use vyper_difftest::inputs::load_file;

use super::output::{format_harness_error, print_json};

#[derive(Parser, Debug)]
pub struct SynthCmd {
    /// Structured input (JSON contract description)
    pub input: PathBuf,
}

#[derive(Serialize)]
struct SynthJson<'a> {
    source: &'a str,
    type_map: &'a TypeMap,
    order: &'a [usize],
}

impl SynthCmd {
    pub fn execute(&self, json_output: bool) -> Result<()> {
        let desc = load_file(&self.input)?;
        let synthesis = match synthesize(&desc) {
            Ok(synthesis) => synthesis,
            Err(e) => {
                eprintln!("{}", format_harness_error(&self.input.display().to_string(), &e));
                return Err(anyhow!(e));
            }
        };

        if json_output {
            return print_json(&SynthJson {
                source: &synthesis.source,
                type_map: &synthesis.type_map,
                order: &synthesis.order,
            });
        }
        println!("{}", synthesis.source);
        println!("{}", serde_json::to_string_pretty(&synthesis.type_map)?);
        Ok(())
    }
}
