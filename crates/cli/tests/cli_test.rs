use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const GUARDED: &str = r#"{
    "name": "Vault",
    "storage": [{"name": "owner", "type": "address"}, {"name": "fee", "type": "uint256"}],
    "functions": [{
        "name": "initialize", "visibility": "external",
        "parameters": [{"name": "_owner", "type": "address"}],
        "modifiers": ["initializer"],
        "body": [
            {"kind": "require", "condition": {"kind": "binary", "op": "!=",
                "left": {"kind": "identifier", "name": "_owner"},
                "right": {"kind": "call", "callee": "address", "arguments": [{"kind": "literal", "value": "0"}]}}},
            {"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
             "value": {"kind": "identifier", "name": "_owner"}}
        ]
    }]
}"#;

const UNGUARDED: &str = r#"{
    "name": "Vault",
    "storage": [{"name": "owner", "type": "address"}],
    "functions": [{
        "name": "initialize", "visibility": "public",
        "parameters": [{"name": "_owner", "type": "address"}],
        "body": [{"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
                  "value": {"kind": "identifier", "name": "_owner"}}]
    }]
}"#;

const SHIFTED: &str = r#"{
    "name": "Vault",
    "storage": [{"name": "fee", "type": "uint256"}, {"name": "owner", "type": "address"}],
    "functions": []
}"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn audit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_audit"))
        .args(args)
        .output()
        .expect("failed to run audit")
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_clean_contract_exits_zero() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "vault.json", GUARDED);

    let output = audit(&["check", arg(&path)]);
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("No findings"));
}

#[test]
fn test_blocking_findings_exit_one() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "vault.json", UNGUARDED);

    let output = audit(&["check", arg(&path)]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("init-unprotected"));
    assert!(stdout.contains("initialize(address)"));
}

#[test]
fn test_upgrade_pair_as_json() {
    let dir = TempDir::new().unwrap();
    let old = write(&dir, "old.json", GUARDED);
    let new = write(&dir, "new.json", SHIFTED);

    let output = audit(&["check", arg(&old), arg(&new), "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["tool"], "audit");
    assert!(report["generated_at"].is_string());
    assert_eq!(report["contracts_analyzed"], 1);
    let findings = report["findings"].as_array().unwrap();
    assert!(!findings.is_empty());
    assert!(findings.iter().all(|f| f["category"] == "storage-shift"));
}

#[test]
fn test_unloadable_input_exits_two() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.json", "{ not json");

    let output = audit(&["check", arg(&path)]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("load error"));
}

#[test]
fn test_missing_file_exits_two() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.json");

    let output = audit(&["check", arg(&missing)]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_usage_error_exits_two() {
    let output = audit(&["check", "--format", "yaml", "vault.json"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_scan_walks_directories() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    write(&dir, "guarded.json", GUARDED);
    write(&dir, "nested/unguarded.json", UNGUARDED);
    write(&dir, "notes.txt", "not a contract");

    let output = audit(&["scan", arg(dir.path()), "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["contracts_analyzed"], 2);
}

#[test]
fn test_scan_keeps_same_named_contracts_apart() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("a")).unwrap();
    fs::create_dir(dir.path().join("b")).unwrap();
    write(&dir, "a/vault.json", UNGUARDED);
    write(&dir, "b/vault.json", UNGUARDED);

    let output = audit(&["scan", arg(dir.path()), "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let contracts: Vec<&str> = report["findings"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|f| f["category"] == "init-unprotected")
        .map(|f| f["location"]["contract"].as_str().unwrap())
        .collect();
    assert_eq!(contracts.len(), 2);
    assert!(contracts[0].ends_with("vault.json)"));
    assert_ne!(contracts[0], contracts[1]);
}

#[test]
fn test_config_override_disables_gap_policy() {
    let dir = TempDir::new().unwrap();
    let old = write(
        &dir,
        "old.json",
        r#"{"name": "Vault", "storage": [{"name": "a", "type": "uint256"},
            {"name": "__gap", "type": "uint256[50]"}]}"#,
    );
    let new = write(
        &dir,
        "new.json",
        r#"{"name": "Vault", "storage": [{"name": "a", "type": "uint256"},
            {"name": "b", "type": "uint256"}, {"name": "__gap", "type": "uint256[49]"}]}"#,
    );
    let config = write(&dir, "config.json", r#"{"gap_policy": {"enabled": false}}"#);

    let output = audit(&["check", arg(&old), arg(&new)]);
    assert_eq!(output.status.code(), Some(0));

    let output = audit(&["--config", arg(&config), "check", arg(&old), arg(&new)]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_list_shows_analyzers() {
    let output = audit(&["list"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    for id in ["storage-layout", "initialization", "upgrade-authorization"] {
        assert!(stdout.contains(id), "missing {} in {}", id, stdout);
    }
}
