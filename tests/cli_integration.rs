use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use mockito::Matcher;
use predicates::prelude::*;

fn koor(server_url: &str, dir: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("koor-cli");
    cmd.current_dir(dir.path())
        .env("KOOR_SERVER", server_url)
        .env_remove("KOOR_TOKEN")
        .env_remove("KOOR_LOG");
    cmd
}

#[test]
fn status_prints_body_verbatim() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/health")
        .with_body(r#"{"status":"ok"}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .arg("status")
        .assert()
        .success()
        .stdout(r#"{"status":"ok"}"#);
    mock.assert();
}

#[test]
fn pretty_flag_anywhere_reformats() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/state")
        .with_body(r#"[{"key":"a"}]"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["state", "--pretty", "list"])
        .assert()
        .success()
        .stdout("[\n  {\n    \"key\": \"a\"\n  }\n]\n");
}

#[test]
fn http_error_status_still_exits_zero() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/state/missing")
        .with_status(404)
        .with_body(r#"{"error":"not found"}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["state", "get", "missing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not found"));
}

#[test]
fn state_set_sends_inline_data() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("PUT", "/api/state/k1")
        .match_header("Content-Type", "application/json")
        .match_header("Authorization", "Bearer tok")
        .match_body(r#"{"a":1}"#)
        .with_body("{}")
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .env("KOOR_TOKEN", "tok")
        .args(["state", "set", "k1", "--data", r#"{"a":1}"#])
        .assert()
        .success();
    mock.assert();
}

#[test]
fn events_publish_wraps_topic_and_data() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/events/publish")
        .match_body(r#"{"topic":"t.x","data":{"v":2}}"#)
        .with_body(r#"{"id":1}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["events", "publish", "t.x", "--data", r#"{"v":2}"#])
        .assert()
        .success();
    mock.assert();
}

#[test]
fn rules_import_rejects_non_array_without_request() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/rules/import")
        .expect(0)
        .create();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("rules.json"), r#"{"r":1}"#).unwrap();

    koor(&server.url(), &dir)
        .args(["rules", "import", "--file", "rules.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
    mock.assert();
}

#[test]
fn contract_set_requires_contract_kind() {
    let mut server = mockito::Server::new();
    let mock = server.mock("PUT", "/api/specs/p/n").expect(0).create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["contract", "set", "p/n", "--data", r#"{"kind":"spec"}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("contract"));
    mock.assert();
}

#[test]
fn contract_validate_pass() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/api/contracts/p/n/validate")
        .with_body(r#"{"valid":true,"violations":[]}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args([
            "contract",
            "validate",
            "p/n",
            "--endpoint",
            "POST /api/x",
            "--direction",
            "request",
            "--payload",
            r#"{"k":"v"}"#,
        ])
        .assert()
        .success()
        .stdout("PASS  request POST /api/x\n");
}

#[test]
fn contract_validate_fail_exits_one() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/api/contracts/p/n/validate")
        .with_body(r#"{"valid":false,"violations":[{"path":"$.k","message":"required"}]}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args([
            "contract",
            "validate",
            "p/n",
            "--endpoint",
            "POST /api/x",
            "--direction",
            "request",
            "--payload",
            r#"{"k":"v"}"#,
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("FAIL  request POST /api/x"))
        .stdout(predicate::str::contains("  - [$.k] required"));
}

#[test]
fn contract_test_summarises_endpoints() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/specs/p/n")
        .with_body(r#"{"kind":"contract","endpoints":{"GET /a":{}}}"#)
        .create();
    server
        .mock("POST", "/api/contracts/p/n/test")
        .match_body(Matcher::Json(
            serde_json::json!({"endpoint":"GET /a","base_url":"http://target"}),
        ))
        .with_body(r#"{"valid":true,"status_code":200}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["contract", "test", "p/n", "--target", "http://target"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS  GET /a (status: 200)"))
        .stdout(predicate::str::contains("1/1 endpoints PASS"));
}

#[test]
fn metrics_agents_disambiguates_id_and_flag() {
    let mut server = mockito::Server::new();
    let with_id = server
        .mock("GET", "/api/metrics/agents/abc?period=1h")
        .with_body("{}")
        .create();
    let without_id = server
        .mock("GET", "/api/metrics/agents?period=1h")
        .with_body("[]")
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["metrics", "agents", "abc", "--period", "1h"])
        .assert()
        .success();
    koor(&server.url(), &dir)
        .args(["metrics", "agents", "--period", "1h"])
        .assert()
        .success();
    with_id.assert();
    without_id.assert();
}

#[test]
fn rules_export_to_file_writes_pretty_json() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/rules/export?source=local")
        .with_body(r#"[{"r":1}]"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["rules", "export", "--source", "local", "--output", "rules.json"])
        .assert()
        .success()
        .stdout("rules exported to rules.json\n");
    mock.assert();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("rules.json")).unwrap(),
        "[\n  {\n    \"r\": 1\n  }\n]\n"
    );
}

#[test]
fn metrics_agents_drops_id_after_options() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/metrics/agents?period=1h")
        .with_body("[]")
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["metrics", "agents", "--period", "1h", "abc"])
        .assert()
        .success();
    mock.assert();
}

#[test]
fn subscribe_fallback_streams_new_events_once() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/events/history?last=10")
        .with_body(r#"[{"id":1,"topic":"a"},{"id":2,"topic":"b"}]"#)
        .expect(1)
        .create();
    server
        .mock("GET", "/api/events/history?last=10")
        .with_body(r#"[{"id":2,"topic":"b"},{"id":3,"topic":"c"}]"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    // The follow never exits on its own; stop it after a few polls.
    koor(&server.url(), &dir)
        .args(["events", "subscribe", "deploy.*"])
        .timeout(Duration::from_millis(4500))
        .assert()
        .failure()
        .stdout(
            "{\"id\":1,\"topic\":\"a\"}\n{\"id\":2,\"topic\":\"b\"}\n{\"id\":3,\"topic\":\"c\"}\n",
        )
        .stderr(predicate::str::contains(
            "subscribe endpoint: ws://127.0.0.1",
        ))
        .stderr(predicate::str::contains("/api/events/subscribe?pattern=deploy.*"))
        .stderr(predicate::str::contains("wscat -c"));
}

#[test]
fn backup_then_restore() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/state")
        .with_body(r#"[{"key":"a"},{"key":"b"}]"#)
        .create();
    server
        .mock("GET", "/api/state/a")
        .with_body(r#"{"x":1}"#)
        .create();
    server
        .mock("GET", "/api/state/b")
        .with_body(r#"{"y":2}"#)
        .create();
    server
        .mock(
            "GET",
            "/api/rules/export?source=local,learned,external,user-rules",
        )
        .with_body(r#"[{"r":1}]"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["backup", "--output", "backup.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("state keys: 2"))
        .stdout(predicate::str::contains("rules: 1"));

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("backup.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(
        written,
        serde_json::json!({"state":{"a":{"x":1},"b":{"y":2}},"rules":[{"r":1}]})
    );

    let put_a = server
        .mock("PUT", "/api/state/a")
        .match_body(Matcher::Json(serde_json::json!({"x":1})))
        .with_body("{}")
        .create();
    let put_b = server
        .mock("PUT", "/api/state/b")
        .match_body(Matcher::Json(serde_json::json!({"y":2})))
        .with_body("{}")
        .create();
    let import = server
        .mock("POST", "/api/rules/import")
        .match_body(Matcher::Json(serde_json::json!([{"r":1}])))
        .with_body(r#"{"imported":1}"#)
        .create();

    koor(&server.url(), &dir)
        .args(["restore", "--file", "backup.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2/2 restored"))
        .stdout(predicate::str::contains("1 imported"));
    put_a.assert();
    put_b.assert();
    import.assert();
}

#[test]
fn backup_warns_on_unreadable_key() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/api/state")
        .with_body(r#"[{"key":"a"}]"#)
        .create();
    server
        .mock("GET", "/api/state/a")
        .with_status(500)
        .with_body("boom")
        .create();
    server
        .mock(
            "GET",
            "/api/rules/export?source=local,learned,external,user-rules",
        )
        .with_body("[]")
        .create();
    let dir = tempfile::tempdir().unwrap();

    koor(&server.url(), &dir)
        .args(["backup", "--output", "backup.json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("could not backup state key a"))
        .stdout(predicate::str::contains("state keys: 0"));
}

#[test]
fn config_set_server_is_used_unless_env_overrides() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/health")
        .with_body("ok")
        .expect(1)
        .create();
    let dir = tempfile::tempdir().unwrap();

    let url = server.url();
    let mut set = cargo_bin_cmd!("koor-cli");
    set.current_dir(dir.path())
        .args(["config", "set", "server", url.as_str()])
        .assert()
        .success();

    let mut status = cargo_bin_cmd!("koor-cli");
    status
        .current_dir(dir.path())
        .env_remove("KOOR_SERVER")
        .arg("status")
        .assert()
        .success()
        .stdout("ok");
    mock.assert();

    // KOOR_SERVER wins over settings.json: nothing listens on port 1.
    let mut overridden = cargo_bin_cmd!("koor-cli");
    overridden
        .current_dir(dir.path())
        .env("KOOR_SERVER", "http://127.0.0.1:1")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn config_set_preserves_unknown_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"unknown": 1}"#).unwrap();

    let mut cmd = cargo_bin_cmd!("koor-cli");
    cmd.current_dir(dir.path())
        .args(["config", "set", "token", "bar"])
        .assert()
        .success();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value, serde_json::json!({"unknown": 1, "token": "bar"}));
}

#[test]
fn config_set_unknown_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("koor-cli");
    cmd.current_dir(dir.path())
        .args(["config", "set", "foo", "bar"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown config key"));
    assert!(!dir.path().join("settings.json").exists());
}

#[test]
fn help_flag_prints_usage() {
    for flag in ["--help", "-h", "help"] {
        cargo_bin_cmd!("koor-cli")
            .arg(flag)
            .assert()
            .success()
            .stdout(predicate::str::contains("usage: koor-cli"));
    }
}

#[test]
fn no_arguments_prints_usage_and_fails() {
    cargo_bin_cmd!("koor-cli")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("usage: koor-cli"));
}

#[test]
fn missing_required_flag_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    koor("http://127.0.0.1:1", &dir)
        .args(["state", "set", "k1"])
        .assert()
        .code(1);
}

#[test]
fn transport_failure_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    koor("http://127.0.0.1:1", &dir)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error:"));
}
