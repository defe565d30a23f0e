//! CLI tests for `explorer init` and `explorer explore`.
//!
//! Spawns the explorer binary and checks exit codes for cases that are decided
//! before any request reaches the exploration service.

use std::fs;
use std::process::Command;

use explorer::exit_codes;
use explorer::io::config::{ExplorerConfig, load_config};

fn explorer(dir: &std::path::Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_explorer"));
    command.current_dir(dir).env_remove("RUST_LOG");
    command
}

#[test]
fn init_writes_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = explorer(temp.path())
        .arg("init")
        .status()
        .expect("explorer init");

    assert_eq!(status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join(".explorer/config.toml")).expect("load");
    assert_eq!(cfg, ExplorerConfig::default());
}

#[test]
fn init_keeps_existing_config_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(".explorer/config.toml");
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, "default_depth = 3\n").expect("write");

    let status = explorer(temp.path())
        .arg("init")
        .status()
        .expect("explorer init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").default_depth, 3);

    let status = explorer(temp.path())
        .args(["init", "--force"])
        .status()
        .expect("explorer init --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").default_depth, 5);
}

#[test]
fn explore_without_device_lock_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = explorer(temp.path())
        .args(["explore", "--tree", "tree-1", "--host", "host-a", "--device", "device1"])
        .output()
        .expect("explorer explore");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not locked"), "{stderr}");
}

#[test]
fn explore_rejects_invalid_identifier() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = explorer(temp.path())
        .args([
            "explore",
            "--tree",
            "../tree",
            "--host",
            "host-a",
            "--device",
            "device1",
            "--lock-held",
        ])
        .output()
        .expect("explorer explore");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tree must be"), "{stderr}");
}

#[test]
fn explore_rejects_out_of_range_depth() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = explorer(temp.path())
        .args([
            "explore", "--tree", "tree-1", "--host", "host-a", "--device", "device1", "--depth",
            "11", "--lock-held",
        ])
        .status()
        .expect("explorer explore");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn explore_rejects_invalid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(".explorer/config.toml");
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, "[service]\nbase_url = \"ftp://lab\"\n").expect("write");

    let status = explorer(temp.path())
        .args([
            "explore",
            "--tree",
            "tree-1",
            "--host",
            "host-a",
            "--device",
            "device1",
            "--lock-held",
        ])
        .status()
        .expect("explorer explore");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
