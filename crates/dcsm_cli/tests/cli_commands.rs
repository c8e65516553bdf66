use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fixture_storage() -> PathBuf {
    workspace_root().join("tests/fixtures/storage")
}

/// Temp dir with a `storage/` copy of the fixture storage directory.
fn scratch_storage() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let storage = dir.path().join("storage");
    fs::create_dir(&storage).expect("failed to create storage dir");
    for entry in fs::read_dir(fixture_storage()).expect("failed to list fixtures") {
        let entry = entry.expect("fixture entry");
        fs::copy(entry.path(), storage.join(entry.file_name())).expect("failed to copy");
    }
    (dir, storage)
}

fn run_cli(storage: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_dcsm"))
        .arg("--storage")
        .arg(storage)
        .args(args)
        .env_remove("DCSM_BACKUP_DIR")
        .env_remove("DCSM_SNAPSHOT_BEFORE_RESTORE")
        .env_remove("DCSM_ALLOW_DUPLICATES")
        .output()
        .expect("failed to run dcsm CLI")
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn get_prints_scalars_bare() {
    let output = run_cli(&fixture_storage(), &["get", "memory.name"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ダリア");

    let output = run_cli(&fixture_storage(), &["get", "judgeCounts.perfect", "--json"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output), Value::from(12));
}

#[test]
fn get_missing_field_fails() {
    let output = run_cli(&fixture_storage(), &["get", "judgeCounts.miss"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("judgeCounts.miss"), "stderr: {stderr}");

    let output = run_cli(&fixture_storage(), &["--json", "get", "judgeCounts.miss"]);
    let error: Value = serde_json::from_slice(&output.stderr).expect("stderr should be JSON");
    assert_eq!(error["error"]["code"], "path_not_found");
}

#[test]
fn show_prints_the_whole_tree() {
    let output = run_cli(&fixture_storage(), &["show", "--json"]);
    assert!(output.status.success());
    let value = stdout_json(&output);
    let keys: Vec<&str> = value
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys[..3], ["endings", "collectedEndings", "sticker"]);
}

#[test]
fn set_writes_in_place_and_reports_the_change() {
    let (_dir, storage) = scratch_storage();
    let output = run_cli(&storage, &["set", "endings.end_02", "true"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "~ endings.end_02: false -> true"
    );

    let output = run_cli(&storage, &["get", "endings.end_02"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
}

#[test]
fn set_dry_run_and_bad_literal_leave_file_alone() {
    let (_dir, storage) = scratch_storage();
    let save = storage.join("DevilConnection_sf.sav");
    let before = fs::read(&save).expect("read save");

    let output = run_cli(&storage, &["set", "kill", "1", "--dry-run"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("~ kill: 0 -> 1"));

    let output = run_cli(&storage, &["set", "kill", "{broken"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read(&save).expect("read save"), before);
}

#[test]
fn set_string_and_output_copy() {
    let (dir, storage) = scratch_storage();
    let copy = dir.path().join("edited.sav");
    let copy_arg = copy.to_string_lossy().to_string();
    let output = run_cli(
        &storage,
        &["set", "memory.name", "Debi", "--string", "--output", &copy_arg],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let copy_file = ["get", "memory.name", "--file", &copy_arg];
    let output = run_cli(&storage, &copy_file);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Debi");
    let output = run_cli(&storage, &["get", "memory.name"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ダリア");

    let output = run_cli(&storage, &["diff", &copy_arg, "--json"]);
    let changes = stdout_json(&output);
    assert_eq!(changes[0]["path"], "memory.name");
    let output = run_cli(&storage, &["diff", &copy_arg, "--ignore", "memory"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "no changes");
}

#[test]
fn usage_errors_exit_with_two() {
    let output = run_cli(&fixture_storage(), &["set", "kill"]);
    assert_eq!(output.status.code(), Some(2));
    let output = run_cli(&fixture_storage(), &["set", "kill", "1", "--dry-run", "--output", "x"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn progress_summarises_collections() {
    let output = run_cli(&fixture_storage(), &["progress", "--json"]);
    assert!(output.status.success());
    let value = stdout_json(&output);
    assert_eq!(value["stickers"]["collected_count"], 4);
    assert_eq!(value["characters"]["missing"], serde_json::json!(["amo", "kupya"]));
}

#[test]
fn slots_list_export_and_reorder() {
    let (dir, storage) = scratch_storage();
    let output = run_cli(&storage, &["slots", "list", "--json"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output).as_array().map(Vec::len), Some(7));

    let exported = dir.path().join("slot0.json");
    let exported_arg = exported.to_string_lossy().to_string();
    let output = run_cli(&storage, &["slots", "export", "0", "--output", &exported_arg]);
    assert!(output.status.success());
    let slot: Value =
        serde_json::from_slice(&fs::read(&exported).expect("read export")).expect("JSON export");
    assert_eq!(slot["title"], "Chapter 2");

    let output = run_cli(&storage, &["slots", "import", "1", &exported_arg]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let output = run_cli(&storage, &["slots", "reorder", "6,1,2,3,4,5,0"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("changed pages: 1, 2"));

    let output = run_cli(&storage, &["slots", "list", "--json"]);
    let slots = stdout_json(&output);
    assert_eq!(slots[0]["title"], "Chapter 1");
    assert_eq!(slots[1]["title"], "Chapter 2");
    assert_eq!(slots[6]["title"], "Chapter 2");

    let output = run_cli(&storage, &["slots", "reorder", "0,0,1,2,3,4,5"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn file_errors_follow_the_json_switch() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let target = dir.path().join("absent").join("slot.json");
    let target_arg = target.to_string_lossy().to_string();

    let output = run_cli(
        &fixture_storage(),
        &["--json", "slots", "export", "0", "--output", &target_arg],
    );
    assert_eq!(output.status.code(), Some(1));
    let error: Value = serde_json::from_slice(&output.stderr).expect("stderr should be JSON");
    assert_eq!(error["error"]["code"], "io");

    let output = run_cli(&fixture_storage(), &["slots", "import", "1", &target_arg]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error reading slot payload"));
}

#[test]
fn gallery_move_sort_and_export() {
    let (dir, storage) = scratch_storage();
    let output = run_cli(&storage, &["gallery", "move", "k9m8n7p6", "0", "--json"]);
    assert!(output.status.success());
    let ids: Vec<String> = stdout_json(&output)
        .as_array()
        .expect("array")
        .iter()
        .map(|entry| entry["id"].as_str().expect("id").to_string())
        .collect();
    assert_eq!(ids, vec!["k9m8n7p6", "a1b2c3d4", "e5f6g7h8"]);

    let zip_path = dir.path().join("shots.zip");
    let zip_arg = zip_path.to_string_lossy().to_string();
    let output = run_cli(&storage, &["gallery", "export", "--all", "--output", &zip_arg]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(zip_path.is_file());

    let output = run_cli(&storage, &["gallery", "sort", "--json"]);
    let first = &stdout_json(&output)[0];
    assert_eq!(first["id"], "e5f6g7h8");

    let output = run_cli(&storage, &["gallery", "delete", "nope1234"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn gallery_add_rejects_duplicates() {
    let (_dir, storage) = scratch_storage();
    let image = workspace_root().join("tests/fixtures/images/duplicate_of_a1b2c3d4.png");
    let image_arg = image.to_string_lossy().to_string();
    let output = run_cli(&storage, &["--json", "gallery", "add", &image_arg]);
    assert_eq!(output.status.code(), Some(1));
    let error: Value = serde_json::from_slice(&output.stderr).expect("stderr should be JSON");
    assert_eq!(error["error"]["code"], "duplicate");

    let fresh = workspace_root().join("tests/fixtures/images/new_shot.png");
    let fresh_arg = fresh.to_string_lossy().to_string();
    let output = run_cli(&storage, &["gallery", "add", &fresh_arg, "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)[0]["order"], 3);
}

#[test]
fn backup_create_list_rename_delete() {
    let (dir, storage) = scratch_storage();
    let output = run_cli(&storage, &["backup", "create", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let created = stdout_json(&output);
    let name = created["file_name"].as_str().expect("file name").to_string();
    assert!(name.starts_with("DC_storage_backup_"));
    assert!(dir.path().join("dcsm_backups").join(&name).is_file());

    let output = run_cli(&storage, &["backup", "list", "--json"]);
    let listed = stdout_json(&output);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["file_name"], name.as_str());

    let output = run_cli(&storage, &["backup", "rename", &name, "before-epilogue"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("before-epilogue.zip"));

    let output = run_cli(&storage, &["backup", "delete", "before-epilogue.zip"]);
    assert!(output.status.success());
    assert!(!dir.path().join("dcsm_backups").exists());
}

#[test]
fn backup_restore_round_trip() {
    let (_dir, storage) = scratch_storage();
    let output = run_cli(&storage, &["backup", "create", "--json"]);
    let name = stdout_json(&output)["file_name"]
        .as_str()
        .expect("file name")
        .to_string();

    let output = run_cli(&storage, &["set", "kill", "1"]);
    assert!(output.status.success());
    let output = run_cli(&storage, &["backup", "restore", &name, "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout_json(&output)["previous"].is_object());

    let output = run_cli(&storage, &["get", "kill"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "0");
}

#[test]
fn config_reflects_environment_overrides() {
    let output = Command::new(env!("CARGO_BIN_EXE_dcsm"))
        .args(["config", "--json"])
        .env("DCSM_ALLOW_DUPLICATES", "yes")
        .env("DCSM_SNAPSHOT_BEFORE_RESTORE", "0")
        .output()
        .expect("failed to run dcsm CLI");
    assert!(output.status.success());
    let value = stdout_json(&output);
    assert_eq!(value["duplicate_policy"], "allow");
    assert_eq!(value["snapshot_before_restore"], false);
}

#[test]
fn missing_storage_directory_is_reported() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let output = run_cli(&dir.path().join("absent"), &["slots", "list"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("opening storage directory"));
}
