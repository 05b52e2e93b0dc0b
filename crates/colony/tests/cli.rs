use std::fs;
use std::path::Path;

use assert_cmd::Command; // Bring Command into scope
use predicates::prelude::*; // Bring predicate traits into scope
use tempfile::tempdir;

fn colony(manager_path: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("colony")?;
    for key in ["COLONY_MANAGER_PATH", "COLONY_PLUGIN_PATH", "COLONY_LOG_LEVEL", "COLONY_BLACKLIST", "COLONY_WHITELIST"] {
        cmd.env_remove(key);
    }
    cmd.arg("--manager-path").arg(manager_path);
    Ok(cmd)
}

fn write_manifest(dir: &Path, id: &str, version: &str, entry_point: &str) {
    let plugin_dir = dir.join(id);
    fs::create_dir_all(&plugin_dir).unwrap();
    fs::write(
        plugin_dir.join("manifest.json"),
        format!(
            r#"{{"id": "{}", "version": "{}", "entry_point": "{}", "capabilities": ["diagnostics.event_log"]}}"#,
            id, version, entry_point
        ),
    )
    .unwrap();
}

#[test]
fn test_help_lists_options() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("colony")?;
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--manager-path"))
        .stdout(predicate::str::contains("--plugin-path"))
        .stdout(predicate::str::contains("list"));
    Ok(())
}

#[test]
fn test_list_shows_builtin_plugin_and_prepares_layout() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    colony(dir.path())?
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("core-event-log 0.1.0"));

    assert!(dir.path().join("plugins").is_dir());
    assert!(dir.path().join("colony.json").is_file());
    Ok(())
}

#[test]
fn test_list_includes_discovered_manifests() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let extra = tempdir()?;
    write_manifest(extra.path(), "audit-log", "2.0.0", "core-event-log");
    write_manifest(extra.path(), "stray", "1.0.0", "not-compiled-in");

    colony(dir.path())?
        .arg("--plugin-path")
        .arg(extra.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("audit-log 2.0.0"))
        .stdout(predicate::str::contains("core-event-log"))
        .stdout(predicate::str::contains("stray").not());
    Ok(())
}

#[test]
fn test_invalid_level_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    colony(dir.path())?
        .args(["--level", "chatty", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to initialize application"));
    Ok(())
}
