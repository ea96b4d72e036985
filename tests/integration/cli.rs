#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use tempfile::TempDir;

fn seed_file() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("seed.json");
    let seed = json!({
        "nodes": [
            {"id": "User:1", "props": {"name": "ada", "team": "core"}},
            {"id": "User:2", "props": {"name": "grace", "team": "core"}},
            {"id": "User:3", "props": {"name": "linus", "team": "kernel"}}
        ],
        "edges": [
            {"edgeType": "Follows", "inId": "User:2", "outId": "User:1"},
            {"edgeType": "Follows", "inId": "User:3", "outId": "User:1"}
        ]
    });
    fs::write(&path, serde_json::to_vec_pretty(&seed).expect("seed json")).expect("write seed");
    (dir, path)
}

fn run_json(args: &[&str]) -> Value {
    let (_dir, seed) = seed_file();
    let output = cargo_bin_cmd!("strata")
        .arg("--seed")
        .arg(&seed)
        .args(args)
        .output()
        .expect("run strata");
    assert!(
        output.status.success(),
        "strata failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json output")
}

#[test]
fn nodes_command_pages_and_filters() {
    let page = run_json(&["nodes", "User", "--first", "2"]);
    let ids: Vec<&str> = page["edges"]
        .as_array()
        .expect("edges")
        .iter()
        .filter_map(|e| e["node"]["id"].as_str())
        .collect();
    assert_eq!(ids, ["User:1", "User:2"]);
    assert_eq!(page["pageInfo"]["hasNextPage"], json!(true));

    let cursor = page["pageInfo"]["endCursor"].as_str().expect("cursor").to_owned();
    let rest = run_json(&["nodes", "User", "--first", "2", "--after", &cursor]);
    assert_eq!(rest["edges"].as_array().map(Vec::len), Some(1));

    let kernel = run_json(&["nodes", "User", "--where", "team=kernel"]);
    assert_eq!(kernel["edges"][0]["node"]["id"], json!("User:3"));
}

#[test]
fn node_and_edges_commands_read_the_seed() {
    let node = run_json(&["node", "User:1"]);
    assert_eq!(node["props"]["name"], json!("ada"));
    assert_eq!(node["versionDetail"]["nodeVersion"], json!(1));

    let edges = run_json(&["edges", "User:1", "--type", "Follows", "--side", "out"]);
    assert_eq!(edges["edges"].as_array().map(Vec::len), Some(2));

    let none = run_json(&["edges", "User:1", "--side", "in"]);
    assert_eq!(none["edges"].as_array().map(Vec::len), Some(0));
}

#[test]
fn config_command_prints_the_effective_settings() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("strata.toml");
    fs::write(&path, "table = \"graph\"\ndefault_page_size = 10\n").expect("write config");
    let output = cargo_bin_cmd!("strata")
        .arg("--config")
        .arg(&path)
        .arg("config")
        .output()
        .expect("run strata");
    assert!(output.status.success());
    let config: Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(config["table"], json!("graph"));
    assert_eq!(config["default_page_size"], json!(10));
}

#[test]
fn missing_nodes_fail_with_a_message() {
    let (_dir, seed) = seed_file();
    let output = cargo_bin_cmd!("strata")
        .arg("--seed")
        .arg(&seed)
        .args(["node", "User:9"])
        .output()
        .expect("run strata");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}
