use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use dcsm_core::backup::BACKUP_INFO_FILE_NAME;
use dcsm_core::{
    BackupManager, Config, CoreErrorCode, FieldPath, Node, OperationLocks, SaveFile, WriteMode,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// Temp dir holding a `storage/` copy of the fixture storage directory.
fn scratch_storage() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let storage = dir.path().join("storage");
    fs::create_dir(&storage).expect("failed to create storage dir");
    let source = workspace_root().join("tests/fixtures/storage");
    for entry in fs::read_dir(&source).expect("failed to list fixtures") {
        let entry = entry.expect("fixture entry");
        fs::copy(entry.path(), storage.join(entry.file_name())).expect("failed to copy");
    }
    (dir, storage)
}

fn manager_for(storage: &Path, config: &Config) -> BackupManager {
    let backup_dir = config
        .backup_dir
        .clone()
        .unwrap_or_else(|| BackupManager::default_dir_for(storage));
    BackupManager::new(backup_dir, config, OperationLocks::new())
}

fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, day)
        .and_then(|date| date.and_hms_opt(hour, 0, 0))
        .expect("valid timestamp")
}

fn snapshot_of(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("entry"))
        .filter(|entry| entry.path().is_file())
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).expect("read file"),
            )
        })
        .collect()
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).expect("create zip"));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        zip.write_all(data.as_bytes()).expect("write entry");
    }
    zip.finish().expect("finish zip");
}

#[test]
fn created_backup_is_listed_first_exactly_once() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());

    let older = manager.create_backup_at(&storage, at(1, 9)).expect("first backup");
    let newer = manager.create_backup_at(&storage, at(2, 9)).expect("second backup");
    assert_eq!(newer.file_name, "DC_storage_backup_20250102_090000.zip");
    assert!(newer.has_info);
    assert_eq!(newer.timestamp, Some(at(2, 9)));
    assert_eq!(newer.format_version, Some(1));

    let listed = manager.list_backups().expect("list backups");
    let names: Vec<&str> = listed.iter().map(|s| s.file_name.as_str()).collect();
    assert_eq!(names, vec![newer.file_name.as_str(), older.file_name.as_str()]);
    assert!(manager.missing_required_files(&newer).expect("inspect").is_empty());
}

#[test]
fn same_second_backups_get_distinct_names() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());
    let first = manager.create_backup_at(&storage, at(3, 12)).expect("first");
    let second = manager.create_backup_at(&storage, at(3, 12)).expect("second");
    assert_ne!(first.path, second.path);
    assert_eq!(second.file_name, "DC_storage_backup_20250103_120000_2.zip");
    assert_eq!(manager.list_backups().expect("list").len(), 2);
}

#[test]
fn restore_brings_back_the_exact_files() {
    let (_dir, storage) = scratch_storage();
    let config = Config {
        snapshot_before_restore: false,
        ..Config::default()
    };
    let manager = manager_for(&storage, &config);
    let original = snapshot_of(&storage);
    let backup = manager.create_backup_at(&storage, at(4, 8)).expect("backup");

    let mut save = SaveFile::open(storage.join("DevilConnection_sf.sav")).expect("open save");
    save.document_mut()
        .write(
            &FieldPath::parse("kill").expect("path"),
            Node::from(1_i64),
            WriteMode::Existing,
        )
        .expect("edit");
    save.save().expect("save edit");
    fs::remove_file(storage.join("DevilConnection_photo_ids.sav")).expect("remove manifest");
    fs::write(storage.join("stray.txt"), b"left over").expect("write stray file");

    let previous = manager.restore_backup(&backup, &storage).expect("restore");
    assert!(previous.is_none());
    assert_eq!(snapshot_of(&storage), original);
    assert!(!storage.join(BACKUP_INFO_FILE_NAME).exists());

    let restored_save = SaveFile::open(storage.join("DevilConnection_sf.sav")).expect("open");
    assert!(!restored_save.collection_progress().fanatic_route);
}

#[test]
fn restore_snapshots_current_contents_first() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());
    let backup = manager.create_backup_at(&storage, at(6, 8)).expect("backup");

    let previous = manager
        .restore_backup(&backup, &storage)
        .expect("restore")
        .expect("pre-restore snapshot");
    let listed = manager.list_backups().expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].path, previous.path);
}

#[test]
fn backups_inside_the_storage_dir_are_neither_archived_nor_cleared() {
    let (_dir, storage) = scratch_storage();
    let config = Config {
        backup_dir: Some(storage.join("dcsm_backups")),
        snapshot_before_restore: false,
        ..Config::default()
    };
    let manager = manager_for(&storage, &config);
    let first = manager.create_backup_at(&storage, at(7, 8)).expect("first");
    let second = manager.create_backup_at(&storage, at(7, 9)).expect("second");

    let archive = zip::ZipArchive::new(File::open(&second.path).expect("open zip"))
        .expect("valid zip");
    assert!(archive.file_names().all(|name| !name.starts_with("dcsm_backups")));

    manager.restore_backup(&first, &storage).expect("restore");
    assert!(first.path.exists() && second.path.exists());
}

#[test]
fn archives_missing_save_files_are_flagged() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());
    fs::create_dir_all(manager.backup_dir()).expect("create backups dir");
    let partial = manager.backup_dir().join("handmade.zip");
    write_zip(&partial, &[("DevilConnection_sf.sav", "%7B%7D")]);

    manager.create_backup_at(&storage, at(8, 8)).expect("regular backup");
    let listed = manager.list_backups().expect("list");
    assert_eq!(listed.len(), 2);
    let handmade = &listed[1];
    assert_eq!(handmade.file_name, "handmade.zip");
    assert!(!handmade.has_info);
    assert!(handmade.timestamp.is_none());
    assert_eq!(
        manager.missing_required_files(handmade).expect("inspect"),
        vec!["DevilConnection_tyrano_data.sav"]
    );
}

#[test]
fn restore_rejects_entries_outside_the_target() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());
    fs::create_dir_all(manager.backup_dir()).expect("create backups dir");
    let hostile = manager.backup_dir().join("hostile.zip");
    write_zip(
        &hostile,
        &[
            ("DevilConnection_sf.sav", "%7B%7D"),
            ("../escaped.txt", "nope"),
        ],
    );
    let before = snapshot_of(&storage);

    let snapshot = manager.find("hostile.zip").expect("find backup");
    let err = manager
        .restore_backup(&snapshot, &storage)
        .expect_err("hostile archive");
    assert_eq!(err.code(), CoreErrorCode::Archive);
    assert_eq!(snapshot_of(&storage), before);
}

#[test]
fn rename_appends_zip_and_refuses_to_overwrite() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());
    let first = manager.create_backup_at(&storage, at(9, 8)).expect("first");
    let second = manager.create_backup_at(&storage, at(9, 9)).expect("second");

    let renamed = manager.rename_backup(&first, "before day 3").expect("rename");
    assert_eq!(renamed.file_name, "before day 3.zip");
    assert!(!first.path.exists());
    assert_eq!(renamed.timestamp, first.timestamp);

    let err = manager
        .rename_backup(&second, "before day 3.zip")
        .expect_err("name in use");
    assert_eq!(err.code(), CoreErrorCode::Duplicate);
    assert!(second.path.exists());

    let err = manager.rename_backup(&second, "../outside").expect_err("bad name");
    assert_eq!(err.code(), CoreErrorCode::InvalidValue);
}

#[test]
fn deleting_the_last_backup_removes_the_directory() {
    let (_dir, storage) = scratch_storage();
    let manager = manager_for(&storage, &Config::default());
    let backup = manager.create_backup_at(&storage, at(10, 8)).expect("backup");
    assert!(manager.backup_dir().is_dir());

    manager.delete_backup(&backup).expect("delete");
    assert!(!backup.path.exists());
    assert!(!manager.backup_dir().exists());
    assert!(manager.list_backups().expect("list").is_empty());

    let err = manager.find(&backup.file_name).expect_err("gone");
    assert_eq!(err.code(), CoreErrorCode::NotFound);
}

#[test]
fn concurrent_operation_on_the_same_storage_is_busy() {
    let (_dir, storage) = scratch_storage();
    let locks = OperationLocks::new();
    let manager = BackupManager::new(
        BackupManager::default_dir_for(&storage),
        &Config::default(),
        locks.clone(),
    );

    let guard = locks.acquire(&storage).expect("hold storage lock");
    let err = manager
        .create_backup_at(&storage, at(11, 8))
        .expect_err("storage is busy");
    assert_eq!(err.code(), CoreErrorCode::Busy);

    drop(guard);
    manager
        .create_backup_at(&storage, at(11, 8))
        .expect("lock released");
}
