//! Structured-input loading.
//!
//! Accepts JSON files, directories of `*.json` files (sorted by name, not
//! recursive) and `-` for JSON lines on stdin.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use difftest_core::ast::ContractDescription;

/// A loaded description and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedInput {
    pub origin: String,
    pub description: ContractDescription,
}

pub fn load_file(path: &Path) -> Result<ContractDescription> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    ContractDescription::from_json(&text)
        .with_context(|| format!("invalid structured input {}", path.display()))
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read one description per non-empty line.
pub fn load_lines(reader: impl BufRead, origin: &str) -> Result<Vec<LoadedInput>> {
    let mut out = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {origin}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let description = ContractDescription::from_json(&line)
            .with_context(|| format!("invalid structured input at {origin}:{}", index + 1))?;
        out.push(LoadedInput {
            origin: format!("{origin}:{}", index + 1),
            description,
        });
    }
    Ok(out)
}

/// Expand `paths` into descriptions, in argument order.
pub fn load_inputs(paths: &[PathBuf]) -> Result<Vec<LoadedInput>> {
    let mut out = Vec::new();
    for path in paths {
        if path.as_os_str() == "-" {
            let stdin = std::io::stdin();
            out.extend(load_lines(stdin.lock(), "<stdin>")?);
        } else if path.is_dir() {
            for file in json_files(path)? {
                out.push(LoadedInput {
                    origin: file.display().to_string(),
                    description: load_file(&file)?,
                });
            }
        } else {
            out.push(LoadedInput {
                origin: path.display().to_string(),
                description: load_file(path)?,
            });
        }
    }
    Ok(out)
}
