#![allow(dead_code)]
//! Shared test utilities for CLI integration tests.
//!
//! - fixtures: structured inputs written to scratch directories
//! - config: minimal pipeline configs backed by a directory store
//! - commands: the `vyper-difftest` binary under test

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::json;

/// `__init__(x_0: int128)` stores its argument, `func_0` returns it.
pub fn counter_input() -> serde_json::Value {
    let int128 = json!({"type": "int", "bits": 128});
    json!({
        "storage": [int128],
        "constructor": {
            "payable": false,
            "params": [int128],
            "body": [{
                "kind": "assign",
                "target": {"kind": "storage", "index": 0},
                "value": {"kind": "var", "index": 0}
            }]
        },
        "functions": [{
            "visibility": "external",
            "mutability": "view",
            "params": [],
            "returns": int128,
            "body": [{"kind": "return", "value": {"kind": "storage", "index": 0}}]
        }]
    })
}

/// The counter with a call to a function that does not exist.
pub fn dangling_call_input() -> serde_json::Value {
    let mut input = counter_input();
    input["functions"][0]["body"]
        .as_array_mut()
        .unwrap()
        .insert(0, json!({"kind": "call", "function": 7, "args": []}));
    input
}

pub fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

/// Two targets backed by binaries that are not installed, sharing a
/// directory store under `dir/store`.
pub fn write_config(dir: &Path) -> PathBuf {
    let config = json!({
        "verbosity": "WARNING",
        "store": {"kind": "directory", "path": dir.join("store")},
        "compilers": [
            {"name": "default", "version": "0.3.10", "binary": dir.join("missing-vyper-0.3.10")},
            {"name": "default", "version": "0.3.9", "binary": dir.join("missing-vyper-0.3.9")}
        ],
        "input_strategies": ["default", "max"]
    });
    write_json(dir, "difftest.json", &config)
}

pub fn difftest() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("vyper-difftest").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("DIFFTEST_VERBOSITY")
        .env_remove("DIFFTEST_USE_QUEUE")
        .env_remove("DIFFTEST_STORE_DIR");
    cmd
}

pub fn json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}
