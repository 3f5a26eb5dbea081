#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn treeops(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("treeops").unwrap();
    cmd.current_dir(dir.path())
        .env("TREEOPS_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn json(dir: &TempDir, args: &[&str]) -> Value {
    let out = treeops(dir).arg("--json").args(args).output().unwrap();
    assert!(
        out.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

fn init_project(dir: &TempDir) {
    treeops(dir).arg("init").assert().success();
}

fn set_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join(".treeops/config.yaml"), yaml).unwrap();
}

/// R(1) holds vm 1; C(2) under R holds vm 2.
fn two_level_tree(dir: &TempDir) {
    init_project(dir);
    treeops(dir).args(["vm", "add", "web-01", "--zone", "east"]).assert().success();
    treeops(dir).args(["vm", "add", "db-01"]).assert().success();
    treeops(dir).args(["service", "add", "R"]).assert().success();
    treeops(dir)
        .args(["service", "add", "C", "--parent", "1"])
        .assert()
        .success();
    treeops(dir)
        .args(["service", "attach", "1", "--vm", "1"])
        .assert()
        .success();
    treeops(dir)
        .args(["service", "attach", "2", "--vm", "2"])
        .assert()
        .success();
}

fn power_states(dir: &TempDir) -> Vec<String> {
    json(dir, &["vm", "list"])
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["vm"]["power_state"].as_str().unwrap().to_string())
        .collect()
}

fn event_names(dir: &TempDir) -> Vec<String> {
    json(dir, &["events"])
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// treeops init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_state_files() {
    let dir = TempDir::new().unwrap();
    treeops(&dir).arg("init").assert().success();

    assert!(dir.path().join(".treeops").is_dir());
    assert!(dir.path().join(".treeops/config.yaml").exists());
    assert!(dir.path().join(".treeops/tree.yaml").exists());
    assert!(dir.path().join(".treeops/vms.yaml").exists());
    assert!(dir.path().join(".treeops/queue.db").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    treeops(&dir).arg("init").assert().success();
    treeops(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .treeops/config.yaml"));
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    treeops(&dir)
        .args(["service", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// treeops service / vm
// ---------------------------------------------------------------------------

#[test]
fn service_add_list_and_show() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    treeops(&dir)
        .args(["service", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("R"))
        .stdout(predicate::str::contains("C"));

    let shown = json(&dir, &["service", "show", "1"]);
    assert_eq!(shown["service"]["name"], "R");
    assert_eq!(shown["children"], serde_json::json!([2]));
    assert_eq!(shown["total_vms"], 2);
}

#[test]
fn vm_attaches_to_one_service_only() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    treeops(&dir)
        .args(["service", "attach", "2", "--vm", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Vm <1> is already connected to service 1.",
        ));
}

#[test]
fn attach_unknown_vm_fails() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    treeops(&dir)
        .args(["service", "attach", "1", "--vm", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vm not found: 99"));
}

#[test]
fn attach_requires_exactly_one_target() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    treeops(&dir)
        .args(["service", "attach", "1"])
        .assert()
        .failure();
    treeops(&dir)
        .args(["service", "attach", "1", "--vm", "1", "--service", "2"])
        .assert()
        .failure();
}

#[test]
fn groups_follow_depth() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    let partition = json(&dir, &["service", "groups", "1"]);
    let groups = partition["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["attachments"][0]["resource"]["id"], 1);
    assert_eq!(groups[1]["attachments"][0]["resource"]["id"], 2);
}

#[test]
fn removing_a_service_removes_its_subtree() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    let removed = json(&dir, &["service", "remove", "1"]);
    assert_eq!(removed["removed"], serde_json::json!([1, 2]));
    treeops(&dir)
        .args(["service", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No services."));
}

// ---------------------------------------------------------------------------
// Orchestration runs
// ---------------------------------------------------------------------------

#[test]
fn start_runs_every_group_without_delay() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);
    set_config(&dir, "version: 1\ndelay_between_groups: 0\n");

    treeops(&dir)
        .args(["start", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued start of service 1: group 0"));
    assert_eq!(power_states(&dir), vec!["off", "off"]);

    treeops(&dir)
        .args(["work", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 2 stage(s): 2 completed, 0 failed"));

    assert_eq!(power_states(&dir), vec!["on", "on"]);
    assert_eq!(
        event_names(&dir),
        vec!["request_service_start", "service_started"]
    );

    let entries = json(&dir, &["queue", "list"]);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["status"]["type"] == "completed"));
}

#[test]
fn stop_paces_groups_deepest_first() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    treeops(&dir)
        .args(["stop", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("group 1"));
    treeops(&dir).args(["work", "--once"]).assert().success();

    let pending = json(&dir, &["queue", "list", "--status", "pending"]);
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1, "group 0 waits for the pacing delay");
    assert_eq!(
        pending[0]["request"]["args"],
        serde_json::json!(["stop", 0, -1])
    );
    assert!(pending[0]["request"]["deliver_on"].is_string());
    assert_eq!(event_names(&dir), vec!["request_service_stop"]);
}

#[test]
fn stage_carries_zone_of_first_vm() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);

    treeops(&dir).args(["start", "1"]).assert().success();
    let entries = json(&dir, &["queue", "list"]);
    let request = &entries[0]["request"];
    assert_eq!(request["zone"], "east");
    assert_eq!(request["task_id"], "service_1");
    assert_eq!(request["method_name"], "process_group_action");
    assert_eq!(request["role"], "ems_operations");
}

#[test]
fn service_without_resources_completes_immediately() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    treeops(&dir).args(["service", "add", "empty"]).assert().success();

    treeops(&dir)
        .args(["start", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has no resources"));
    assert_eq!(
        event_names(&dir),
        vec!["request_service_start", "service_started"]
    );
    assert_eq!(json(&dir, &["queue", "list"]), serde_json::json!([]));
}

#[test]
fn template_vm_blocks_the_run() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);
    treeops(&dir).args(["vm", "template", "2"]).assert().success();

    treeops(&dir)
        .args(["start", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no longer eligible"));
    assert_eq!(json(&dir, &["queue", "list"]), serde_json::json!([]));
}

#[test]
fn failed_stage_can_be_retried() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);
    set_config(&dir, "version: 1\ndelay_between_groups: 0\n");

    treeops(&dir).args(["start", "1"]).assert().success();
    // Group 1 turns ineligible after the run was accepted.
    treeops(&dir).args(["vm", "template", "2"]).assert().success();
    treeops(&dir)
        .args(["work", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 failed"));

    let failed = json(&dir, &["queue", "list", "--status", "failed"]);
    let id = failed[0]["id"].as_str().unwrap().to_string();
    assert!(failed[0]["status"]["reason"]
        .as_str()
        .unwrap()
        .contains("template"));
    assert_eq!(event_names(&dir), vec!["request_service_start"]);

    treeops(&dir)
        .args(["queue", "retry", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending again"));
    let entry = json(&dir, &["queue", "show", &id]);
    assert_eq!(entry["status"]["type"], "pending");
}

// ---------------------------------------------------------------------------
// treeops work (long-running)
// ---------------------------------------------------------------------------

/// Kills the background worker even when an assertion fails.
struct Background(std::process::Child);

impl Drop for Background {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn commands_succeed_while_worker_runs() {
    let dir = TempDir::new().unwrap();
    two_level_tree(&dir);
    set_config(
        &dir,
        "version: 1\ndelay_between_groups: 0\nqueue:\n  tick_interval_secs: 1\n",
    );

    let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("treeops"))
        .arg("work")
        .current_dir(dir.path())
        .env("TREEOPS_ROOT", dir.path())
        .env_remove("RUST_LOG")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .unwrap();
    let _worker = Background(child);
    std::thread::sleep(std::time::Duration::from_millis(500));

    treeops(&dir).args(["start", "1"]).assert().success();
    treeops(&dir).args(["queue", "list"]).assert().success();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(15);
    while power_states(&dir) != vec!["on", "on"] {
        assert!(
            std::time::Instant::now() < deadline,
            "worker never started the VMs"
        );
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
    treeops(&dir).args(["vm", "add", "cache-01"]).assert().success();
    assert_eq!(power_states(&dir), vec!["on", "on", "off"]);
}

// ---------------------------------------------------------------------------
// treeops config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    treeops(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));
}

#[test]
fn config_validate_rejects_zero_tick_interval() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    set_config(
        &dir,
        "version: 1\naction_delays:\n  reboot: 5\nqueue:\n  tick_interval_secs: 0\n",
    );
    treeops(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("unknown action 'reboot'"))
        .stderr(predicate::str::contains("config validation found errors"));
}
