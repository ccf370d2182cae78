mod common;

use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

use common::{counter_input, dangling_call_input, difftest, json_files, write_config, write_json};

#[test]
fn test_synth_prints_source_and_type_map() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "counter.json", &counter_input());

    difftest()
        .arg("synth")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("var_0: int128"))
        .stdout(predicate::str::contains(
            "@external\n@view\ndef func_0() -> int128:\n    return self.var_0",
        ))
        .stdout(predicate::str::contains("def __init__(x_0: int128):"))
        .stdout(predicate::str::contains("\"__init__\""));
}

#[test]
fn test_synth_json_output() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "counter.json", &counter_input());

    let output = difftest()
        .arg("synth")
        .arg(&input)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["source"].as_str().unwrap().contains("def func_0()"));
    assert_eq!(json["type_map"]["version"], 1);
    let functions = json["type_map"]["functions"].as_object().unwrap();
    assert_eq!(functions["__init__"][0]["type"], "int");
    assert_eq!(functions["__init__"][0]["bits"], 128);
    assert!(functions["func_0"].as_array().unwrap().is_empty());
}

#[test]
fn test_synth_dangling_call_is_a_harness_defect() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "broken.json", &dangling_call_input());

    difftest()
        .arg("synth")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("DependencyError"));
}

#[test]
fn test_synth_rejects_malformed_input() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("garbage.json");
    fs::write(&input, "{\"functions\": 3}").unwrap();

    difftest()
        .arg("synth")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid structured input"));
}

#[test]
fn test_generate_requires_compiler_targets() {
    let dir = TempDir::new().unwrap();
    let input = write_json(dir.path(), "counter.json", &counter_input());

    difftest()
        .arg("generate")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config validation failed"))
        .stderr(predicate::str::contains("at least one compiler target"));
}

#[test]
fn test_generate_stops_on_harness_defect() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let inputs = dir.path().join("inputs");
    fs::create_dir(&inputs).unwrap();
    write_json(&inputs, "a_broken.json", &dangling_call_input());
    write_json(&inputs, "b_counter.json", &counter_input());
    let metrics = dir.path().join("metrics.prom");

    difftest()
        .arg("--config")
        .arg(&config)
        .arg("--metrics-file")
        .arg(&metrics)
        .arg("generate")
        .arg(&inputs)
        .assert()
        .failure()
        .stderr(predicate::str::contains("harness defect"))
        .stderr(predicate::str::contains("a_broken.json"));

    let store = dir.path().join("store");
    let failures = json_files(&store.join("harness_failures"));
    assert_eq!(failures.len(), 1);
    let failure: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&failures[0]).unwrap()).unwrap();
    assert_eq!(failure["error_type"], "DependencyError");
    assert!(json_files(&store.join("generations")).is_empty());

    let text = fs::read_to_string(&metrics).unwrap();
    assert!(text.contains("difftest_harness_defects_total 1"));
    assert!(text.contains("difftest_generations_total 0"));
}

#[test]
fn test_triage_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    difftest()
        .arg("--config")
        .arg(&config)
        .arg("triage")
        .assert()
        .success()
        .stdout(predicate::str::contains("Completed: 0"))
        .stdout(predicate::str::contains("No divergences"));

    let output = difftest()
        .arg("--config")
        .arg(&config)
        .arg("triage")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["completed"], 0);
    assert!(json["divergent"].as_array().unwrap().is_empty());
}

#[test]
fn test_triage_unknown_generation_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    difftest()
        .arg("--config")
        .arg(&config)
        .arg("triage")
        .arg("--generation")
        .arg("does-not-exist")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no run entry"));
}

#[test]
fn test_unknown_compile_target_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    difftest()
        .arg("--config")
        .arg(&config)
        .arg("compile")
        .arg("--target")
        .arg("0.2.0_default")
        .arg("--once")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown compiler target"));
}

#[test]
fn test_store_poll_compile_with_no_jobs_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    difftest()
        .arg("--config")
        .arg(&config)
        .arg("compile")
        .arg("--target")
        .arg("0.3.9_default")
        .arg("--once")
        .assert()
        .success()
        .stdout(predicate::str::contains("Compiled 0 job(s) for 0.3.9_default"));
}
