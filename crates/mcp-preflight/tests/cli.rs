use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn write_report(dir: &Path, file: &str, tools: &str) -> PathBuf {
    let path = dir.join(file);
    let text = format!(
        r#"{{
  "schemaVersion": 1,
  "generatedAt": "2025-03-01T12:00:00Z",
  "scannedCommand": ["node", "server.js"],
  "serverName": "accounts",
  "protocolVersion": "2025-06-18",
  "capabilities": {{ "tools": true, "resources": false, "prompts": false }},
  "status": "ok",
  "tools": {tools},
  "resources": [],
  "prompts": [],
  "manifest": null,
  "risk": {{ "readOnly": 1, "write": 0, "destructive": 0, "defaulted": 0 }},
  "signals": [],
  "notes": []
}}
"#
    );
    std::fs::write(&path, text).unwrap();
    path
}

const GET_USER: &str =
    r#"[{ "name": "get_user", "riskClassification": "read-only", "matchedKeyword": "get" }]"#;
const GET_AND_DELETE_USER: &str = r#"[
    { "name": "delete_user", "riskClassification": "destructive", "matchedKeyword": "delete" },
    { "name": "get_user", "riskClassification": "read-only", "matchedKeyword": "get" }
]"#;

#[test]
fn diff_of_identical_reports_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_report(dir.path(), "before.json", GET_USER);
    let after = write_report(dir.path(), "after.json", GET_USER);

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("diff").arg(&before).arg(&after).arg("--exit-code");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""summary""#));
}

#[test]
fn diff_exit_code_reports_changes() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_report(dir.path(), "before.json", GET_USER);
    let after = write_report(dir.path(), "after.json", GET_AND_DELETE_USER);

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("diff").arg(&before).arg(&after).arg("--exit-code");
    cmd.assert()
        .code(2)
        .stdout(predicate::str::contains("delete_user"));

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("--json").arg("diff").arg(&before).arg(&after);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("delete_user"));
}

#[test]
fn diff_rejects_reports_from_another_schema() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_report(dir.path(), "before.json", GET_USER);
    let after = dir.path().join("after.json");
    std::fs::write(&after, r#"{ "schemaVersion": 7 }"#).unwrap();

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("diff").arg(&before).arg(&after);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("schemaVersion 7"));
}

#[test]
fn diff_resolves_relative_paths_against_root() {
    let dir = tempfile::tempdir().unwrap();
    write_report(dir.path(), "before.json", GET_USER);
    write_report(dir.path(), "after.json", GET_USER);

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("--root")
        .arg(dir.path())
        .arg("diff")
        .arg("before.json")
        .arg("after.json");
    cmd.assert().success();
}

#[test]
fn diff_reports_a_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let before = write_report(dir.path(), "before.json", GET_USER);

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("diff").arg(&before).arg(dir.path().join("nope.json"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn inspect_requires_a_command() {
    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("inspect");
    cmd.assert().failure();
}

#[test]
fn inspect_rejects_an_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("preflight.json"),
        r#"{ "version": 1, "timeout_ms": 0 }"#,
    )
    .unwrap();

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("--root")
        .arg(dir.path())
        .arg("inspect")
        .arg("--")
        .arg("true");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("timeout_ms"));
}

#[cfg(unix)]
#[test]
fn inspect_prints_and_saves_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"
read -r _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"accounts","version":"2"}}}'
read -r _initialized
read -r _list
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"delete_user","description":"Delete a user"}]}}'
cat >/dev/null
"#;

    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("--root")
        .arg(dir.path())
        .arg("inspect")
        .arg("--save")
        .arg("report.json")
        .arg("--")
        .arg("sh")
        .arg("-c")
        .arg(script);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""schemaVersion": 1"#))
        .stdout(predicate::str::contains(r#""riskClassification": "destructive""#));

    let text = std::fs::read_to_string(dir.path().join("report.json")).unwrap();
    let report = mcp_preflight::report::decode(&text).unwrap();
    assert_eq!(report.snapshot.server_name, "accounts");
    assert_eq!(report.snapshot.tools[0].name, "delete_user");
}

#[cfg(unix)]
#[test]
fn inspect_failure_prints_a_stderr_hint() {
    let mut cmd = cargo_bin_cmd!("mcp-preflight");
    cmd.arg("inspect")
        .arg("--timeout-ms")
        .arg("2000")
        .arg("--")
        .arg("sh -c 'echo \"Error: authentication required\" >&2; exit 3'");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("hint: authentication required"));
}
