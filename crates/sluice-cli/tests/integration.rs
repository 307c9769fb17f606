//! Integration tests for the sluice CLI.
//!
//! Each test builds bare repositories with the git CLI inside a temp
//! directory and drives the binary end-to-end against them.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to get the sluice command pointed at `temp`'s data directory.
fn sluice(temp: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sluice"));
    cmd.arg("--data-dir")
        .arg(temp.path().join("data"))
        .env("NO_COLOR", "1")
        .env_remove("SLUICE_USER")
        .env_remove("SLUICE_DATA_DIR")
        .env_remove("SLUICE_LOG");
    cmd
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Work tree with `main` (README.md) and `feature` (feature.txt), cloned bare.
fn setup_repo(temp: &TempDir) -> PathBuf {
    let work = temp.path().join("work");
    fs::create_dir_all(&work).unwrap();
    git(&work, &["init"]);
    git(&work, &["config", "user.email", "test@example.com"]);
    git(&work, &["config", "user.name", "Test User"]);

    fs::write(work.join("README.md"), "# Test Repo\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-m", "Initial commit"]);
    git(&work, &["branch", "-M", "main"]);

    git(&work, &["checkout", "-b", "feature"]);
    fs::write(work.join("feature.txt"), "feature\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-m", "Add feature"]);
    git(&work, &["checkout", "main"]);

    let bare = temp.path().join("repos").join("repo1.git");
    git(
        temp.path(),
        &["clone", "--bare", work.to_str().unwrap(), bare.to_str().unwrap()],
    );
    bare
}

/// Initialized data dir with `user1` (admin), `user2` and `user2/repo1`.
fn setup(temp: &TempDir) -> PathBuf {
    let bare = setup_repo(temp);
    sluice(temp).arg("init").assert().success();
    sluice(temp)
        .args(["user", "add", "user1", "--email", "user1@example.com", "--admin"])
        .assert()
        .success();
    sluice(temp)
        .args(["user", "add", "user2", "--email", "user2@example.com"])
        .assert()
        .success();
    sluice(temp)
        .args(["repo", "add", "user2/repo1", "--path"])
        .arg(&bare)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 branch(es) indexed"));
    bare
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_version_flag() {
    Command::new(env!("CARGO_BIN_EXE_sluice"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sluice"));
}

#[test]
fn test_help_lists_commands() {
    Command::new(env!("CARGO_BIN_EXE_sluice"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("pr"))
        .stdout(predicate::str::contains("conflicts"));
}

#[test]
fn test_not_initialized() {
    let temp = TempDir::new().unwrap();
    sluice(&temp)
        .args(["repo", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn test_init_twice_warns() {
    let temp = TempDir::new().unwrap();
    sluice(&temp)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));
    sluice(&temp)
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("already initialized"));
    assert!(temp.path().join("data").join("config.toml").exists());
}

#[test]
fn test_completions_bash() {
    Command::new(env!("CARGO_BIN_EXE_sluice"))
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sluice"));
}

// ============================================================================
// Branch index
// ============================================================================

#[test]
fn test_branches_json_lists_refs() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    let output = sluice(&temp)
        .args(["branches", "user2/repo1", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let branches: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = branches
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["feature", "main"]);
}

#[test]
fn test_sync_marks_out_of_band_delete() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);
    git(&bare, &["branch", "-D", "feature"]);

    sluice(&temp)
        .args(["sync", "user2/repo1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 added, 1 marked deleted"));

    sluice(&temp)
        .args(["branches", "user2/repo1", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("feature (deleted)"));
}

#[test]
fn test_sync_all_requires_admin() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    sluice(&temp)
        .args(["--as", "user2", "sync", "--all"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("administrator"));

    sluice(&temp)
        .args(["--as", "user1", "sync", "--all", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"succeeded\": 1"));
}

// ============================================================================
// Pull requests
// ============================================================================

#[test]
fn test_open_show_and_merge() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);

    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "Add feature"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Opened pull request #1"));

    sluice(&temp)
        .args(["--as", "user2", "pr", "show", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("can be merged automatically"));

    sluice(&temp)
        .args(["--as", "user2", "pr", "merge", "user2/repo1", "1", "--delete-branch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Merged #1 into main"));

    let parents = git(&bare, &["rev-list", "--parents", "-n", "1", "main"]);
    assert_eq!(parents.split_whitespace().count(), 3);
    let refs = git(&bare, &["for-each-ref", "--format=%(refname)", "refs/heads"]);
    assert_eq!(refs, "refs/heads/main");
    assert!(
        git(&bare, &["log", "-1", "--format=%s", "main"])
            .starts_with("Merge pull request 'Add feature' (#1) from feature into main")
    );
}

#[test]
fn test_wip_title_blocks_merge() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "WIP: add feature"])
        .assert()
        .success();

    sluice(&temp)
        .args(["--as", "user2", "pr", "merge", "user2/repo1", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("work in progress"));
}

#[test]
fn test_required_approvals() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    sluice(&temp)
        .args(["protect", "user2/repo1", "main", "--required-approvals", "1"])
        .assert()
        .success();
    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "Add feature"])
        .assert()
        .success();

    sluice(&temp)
        .args(["--as", "user2", "pr", "show", "user2/repo1", "1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"can_merge_now\": false"));

    sluice(&temp)
        .args(["--as", "user1", "pr", "approve", "user2/repo1", "1"])
        .assert()
        .success();

    sluice(&temp)
        .args(["--as", "user2", "pr", "merge", "user2/repo1", "1", "--style", "squash"])
        .assert()
        .success();
}

#[test]
fn test_fast_forward_only_divergence() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);

    let work = temp.path().join("work");
    fs::write(work.join("other.txt"), "other\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-m", "Move main"]);
    git(&work, &["push", bare.to_str().unwrap(), "main"]);
    let base = git(&bare, &["rev-parse", "main"]);

    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "Add feature"])
        .assert()
        .success();

    sluice(&temp)
        .args(["--as", "user2", "pr", "merge", "user2/repo1", "1"])
        .args(["--style", "fast-forward-only"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fast-forward"));
    assert_eq!(git(&bare, &["rev-parse", "main"]), base);
}

#[test]
fn test_conflicts_json() {
    let temp = TempDir::new().unwrap();
    setup(&temp);

    let output = sluice(&temp)
        .args(["conflicts", "user2/repo1", "main", "feature", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let check: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(check["unrelated"], false);
    assert_eq!(check["conflicted_files"].as_array().unwrap().len(), 0);
    assert_eq!(check["divergence"]["ahead"], 1);
    assert_eq!(check["fast_forwardable"], true);
}

#[test]
fn test_pre_receive_rejects_protected_push() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);
    sluice(&temp)
        .args(["protect", "user2/repo1", "main"])
        .assert()
        .success();

    let main = git(&bare, &["rev-parse", "main"]);
    let update = format!("{main} {main} refs/heads/main\n");
    sluice(&temp)
        .args(["--as", "user2", "hook", "pre-receive", "user2/repo1"])
        .write_stdin(update.clone())
        .assert()
        .failure()
        .stderr(predicate::str::contains("pushes are disabled"));

    sluice(&temp)
        .args(["--as", "user1", "hook", "pre-receive", "user2/repo1"])
        .write_stdin(update)
        .assert()
        .success();
}

#[test]
fn test_post_receive_delete_retargets_child() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);

    let work = temp.path().join("work");
    git(&work, &["checkout", "feature"]);
    git(&work, &["checkout", "-b", "child"]);
    fs::write(work.join("child.txt"), "child\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-m", "Add child"]);
    git(&work, &["push", bare.to_str().unwrap(), "child"]);
    sluice(&temp).args(["sync", "user2/repo1"]).assert().success();

    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "child", "--base", "feature", "--title", "Child"])
        .assert()
        .success();

    let feature = git(&bare, &["rev-parse", "feature"]);
    git(&bare, &["branch", "-D", "feature"]);
    let zero = "0".repeat(40);
    sluice(&temp)
        .args(["--as", "user2", "hook", "post-receive", "user2/repo1"])
        .write_stdin(format!("{feature} {zero} refs/heads/feature\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("retargeted to main"));

    let output = sluice(&temp)
        .args(["pr", "list", "user2/repo1", "--json"])
        .output()
        .unwrap();
    let pulls: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(pulls[0]["base_branch"], "main");
}

#[test]
fn test_post_receive_applies_remaining_updates_after_failure() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);
    git(&bare, &["branch", "hotfix", "main"]);
    let hotfix = git(&bare, &["rev-parse", "hotfix"]);
    let zero = "0".repeat(40);
    let missing = "b".repeat(40);

    sluice(&temp)
        .args(["--as", "user2", "hook", "post-receive", "user2/repo1"])
        .write_stdin(format!(
            "{zero} {missing} refs/heads/ghost\n{zero} {hotfix} refs/heads/hotfix\n"
        ))
        .assert()
        .failure()
        .stdout(predicate::str::contains("refs/heads/hotfix updated"))
        .stderr(predicate::str::contains("refs/heads/ghost"))
        .stderr(predicate::str::contains("1 ref update(s) failed"));

    let output = sluice(&temp)
        .args(["branches", "user2/repo1", "--json"])
        .output()
        .unwrap();
    let branches: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = branches
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["feature", "hotfix", "main"]);
}

#[test]
fn test_pre_receive_rejects_protected_files() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);
    sluice(&temp)
        .args(["protect", "user2/repo1", "main", "--enable-push"])
        .args(["--protected-files", "*.lock;ci/**"])
        .assert()
        .success();

    let work = temp.path().join("work");
    fs::write(work.join("Cargo.lock"), "# lock\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-m", "Touch lock file"]);
    git(&work, &["push", bare.to_str().unwrap(), "HEAD:refs/pending/lock"]);
    let old = git(&bare, &["rev-parse", "main"]);
    let new = git(&bare, &["rev-parse", "refs/pending/lock"]);
    let update = format!("{old} {new} refs/heads/main\n");

    sluice(&temp)
        .args(["--as", "user2", "hook", "pre-receive", "user2/repo1"])
        .write_stdin(update.clone())
        .assert()
        .failure()
        .stderr(predicate::str::contains("changes protected files: Cargo.lock"));

    sluice(&temp)
        .args(["--as", "user1", "hook", "pre-receive", "user2/repo1"])
        .write_stdin(update)
        .assert()
        .success();
}

#[test]
fn test_merge_when_checks_succeed() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);
    sluice(&temp)
        .args(["protect", "user2/repo1", "main", "--status-check", "ci/build"])
        .assert()
        .success();
    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "Add feature"])
        .assert()
        .success();
    let base = git(&bare, &["rev-parse", "main"]);

    sluice(&temp)
        .args(["--as", "user2", "pr", "merge", "user2/repo1", "1", "--when-checks-succeed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("once checks succeed"))
        .stdout(predicate::str::contains("ci/build"));
    assert_eq!(git(&bare, &["rev-parse", "main"]), base);

    sluice(&temp)
        .args(["--as", "user2", "pr", "show", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auto-merge:  scheduled"));

    sluice(&temp)
        .args(["status", "set", "user2/repo1", "feature", "ci/build", "success"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Auto-merged #1 into main"));

    assert_ne!(git(&bare, &["rev-parse", "main"]), base);
    let output = sluice(&temp)
        .args(["pr", "list", "user2/repo1", "--all", "--json"])
        .output()
        .unwrap();
    let pulls: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(pulls[0]["status"]["state"], "merged");
}

#[test]
fn test_cancel_auto_merge() {
    let temp = TempDir::new().unwrap();
    setup(&temp);
    sluice(&temp)
        .args(["protect", "user2/repo1", "main", "--required-approvals", "1"])
        .assert()
        .success();
    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "Add feature"])
        .assert()
        .success();
    sluice(&temp)
        .args(["--as", "user2", "pr", "merge", "user2/repo1", "1", "--when-checks-succeed"])
        .assert()
        .success();

    sluice(&temp)
        .args(["--as", "user2", "pr", "cancel-auto-merge", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancelled auto-merge of #1"));

    sluice(&temp)
        .args(["--as", "user1", "pr", "approve", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Auto-merged").not());
}

#[test]
fn test_update_merges_base_into_head() {
    let temp = TempDir::new().unwrap();
    let bare = setup(&temp);

    let work = temp.path().join("work");
    fs::write(work.join("other.txt"), "other\n").unwrap();
    git(&work, &["add", "."]);
    git(&work, &["commit", "-m", "Move main"]);
    git(&work, &["push", bare.to_str().unwrap(), "main"]);
    sluice(&temp).args(["sync", "user2/repo1"]).assert().success();
    let base = git(&bare, &["rev-parse", "main"]);

    sluice(&temp)
        .args(["--as", "user2", "pr", "open", "user2/repo1"])
        .args(["--head", "feature", "--title", "Add feature"])
        .assert()
        .success();
    sluice(&temp)
        .args(["--as", "user2", "pr", "show", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 ahead, 1 behind"));

    sluice(&temp)
        .args(["--as", "user2", "pr", "update", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated feature from main by merge"));

    let parents = git(&bare, &["rev-list", "--parents", "-n", "1", "feature"]);
    assert!(parents.ends_with(&base));
    sluice(&temp)
        .args(["--as", "user2", "pr", "update", "user2/repo1", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already up to date"));
}
