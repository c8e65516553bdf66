use std::fs;
use std::path::PathBuf;

use dcsm_core::{
    ChangeKind, CoreError, CoreErrorCode, DiffOptions, FieldPath, Node, SaveDocument, SaveFile,
    WriteMode, collection_progress, parse_literal,
};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fixture_save() -> PathBuf {
    workspace_root().join("tests/fixtures/storage/DevilConnection_sf.sav")
}

fn path(text: &str) -> FieldPath {
    FieldPath::parse(text).expect("failed to parse path")
}

#[test]
fn write_touches_only_the_target_field() {
    let mut save = SaveFile::open(fixture_save()).expect("failed to open save");
    let before = save.document().root().clone();

    let old = save
        .document_mut()
        .write(&path("judgeCounts.good"), Node::from(9_i64), WriteMode::Existing)
        .expect("write judgeCounts.good");
    assert_eq!(old.and_then(|n| n.as_i64()), Some(3));

    let document = save.document();
    assert_eq!(
        document.read(&path("judgeCounts.good")).ok().and_then(Node::as_i64),
        Some(9)
    );
    for sibling in ["judgeCounts.perfect", "judgeCounts.bad", "memory", "sticker", "NEO"] {
        assert_eq!(
            document.get(&path(sibling)),
            before.get_path(&path(sibling)),
            "{sibling} changed"
        );
    }

    let changes = save.preview();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, path("judgeCounts.good"));
    assert_eq!(changes[0].kind(), ChangeKind::Modified);
}

#[test]
fn existing_mode_refuses_missing_fields_and_allow_create_builds_them() {
    let mut save = SaveFile::open(fixture_save()).expect("failed to open save");
    let document = save.document_mut();

    let err = document
        .write(&path("system.language"), Node::from("en"), WriteMode::Existing)
        .expect_err("missing key must not be created");
    assert_eq!(err.code(), CoreErrorCode::PathNotFound);
    assert!(!document.is_modified());

    document
        .write(&path("extras.flags[0]"), Node::Bool(true), WriteMode::AllowCreate)
        .expect("create nested field");
    assert_eq!(
        document.read(&path("extras.flags[0]")).ok().and_then(Node::as_bool),
        Some(true)
    );

    document
        .write(&path("sticker[4]"), Node::from(90_i64), WriteMode::AllowCreate)
        .expect("append to sequence");
    let err = document
        .write(&path("sticker[9]"), Node::from(91_i64), WriteMode::AllowCreate)
        .expect_err("gaps are not filled");
    assert!(matches!(err, CoreError::PathNotFound(_)));
    assert_eq!(
        document.read(&path("sticker")).ok().and_then(Node::as_sequence).map(Vec::len),
        Some(5)
    );
}

#[test]
fn failed_create_does_not_leave_intermediate_containers() {
    let root = parse_literal(r#"{"x":1}"#).expect("literal");
    let mut document = SaveDocument::new(root.clone());

    let err = document
        .write(&path("a.b[5]"), Node::Bool(true), WriteMode::AllowCreate)
        .expect_err("index past the end of a new sequence");
    assert_eq!(err.code(), CoreErrorCode::PathNotFound);
    assert_eq!(document.root(), &root);
    assert!(!document.is_modified());

    let mut save = SaveFile::open(fixture_save()).expect("failed to open save");
    let document = save.document_mut();
    assert!(
        document
            .write(&path("memory.extra.list[2]"), Node::from(1_i64), WriteMode::AllowCreate)
            .is_err()
    );
    assert!(document.get(&path("memory.extra")).is_none());
    assert!(document.changes().is_empty());
}

#[test]
fn malformed_literal_leaves_document_unchanged() {
    let mut save = SaveFile::open(fixture_save()).expect("failed to open save");
    let err = save
        .document_mut()
        .write_literal(&path("kill"), "{not json", WriteMode::Existing)
        .expect_err("malformed literal");
    assert_eq!(err.code(), CoreErrorCode::InvalidValue);
    assert!(!save.document().is_modified());

    assert_eq!(parse_literal("\"0\"").expect("string literal"), Node::from("0"));
    assert_eq!(parse_literal(" 1 ").ok().and_then(|n| n.as_i64()), Some(1));
}

#[test]
fn remove_and_revert() {
    let mut save = SaveFile::open(fixture_save()).expect("failed to open save");
    let document = save.document_mut();

    let removed = document.remove(&path("NEO")).expect("remove NEO");
    assert!(removed.is_null());
    let changes = document.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind(), ChangeKind::Removed);

    document.remove(&path("sticker[0]")).expect("remove first sticker");
    assert_eq!(
        document.read(&path("sticker[0]")).ok().and_then(Node::as_i64),
        Some(2)
    );

    assert!(document.remove(&FieldPath::root()).is_err());
    document.revert();
    assert!(!document.is_modified());
    assert!(document.read(&path("NEO")).is_ok());
}

#[test]
fn diff_reports_subtrees_once_and_honours_ignored_paths() {
    let save = SaveFile::open(fixture_save()).expect("failed to open save");
    let mut edited = save.document().clone();
    edited
        .write(&path("memory.count"), Node::from(5_i64), WriteMode::Existing)
        .expect("write memory.count");
    edited
        .write(&path("system.autosave"), Node::Bool(false), WriteMode::Existing)
        .expect("write autosave");
    edited
        .write(&path("gallery.pages"), Node::from(2_i64), WriteMode::AllowCreate)
        .expect("create gallery subtree");

    let changes = save.document().diff(&edited);
    let paths: Vec<String> = changes.iter().map(|c| c.path.to_string()).collect();
    assert_eq!(paths, vec!["memory.count", "system.autosave", "gallery"]);
    assert_eq!(changes[2].kind(), ChangeKind::Added);

    let options = DiffOptions {
        ignored: vec![path("system")],
    };
    let filtered = save.document().diff_with(&edited, &options);
    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|c| !c.path.starts_with(&path("system"))));
}

#[test]
fn save_writes_atomically_and_commits() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let target = dir.path().join("DevilConnection_sf.sav");
    fs::copy(fixture_save(), &target).expect("failed to copy fixture");

    let mut save = SaveFile::open(&target).expect("failed to open copy");
    save.document_mut()
        .write(&path("kill"), Node::from(1_i64), WriteMode::Existing)
        .expect("write kill");
    save.save().expect("failed to save");
    assert!(!save.document().is_modified());

    let reloaded = SaveFile::open(&target).expect("failed to reopen");
    assert!(reloaded.collection_progress().fanatic_route);
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".dcsm_"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn collection_progress_of_fixture() {
    let save = SaveFile::open(fixture_save()).expect("failed to open save");
    let progress = collection_progress(save.document().root());

    assert_eq!(progress.endings.collected, vec!["1"]);
    assert_eq!(progress.stickers.collected, vec!["1", "2", "3", "83"]);
    assert_eq!(progress.stickers.total(), 132);
    assert_eq!(progress.stickers.missing.first().map(String::as_str), Some("4"));
    assert_eq!(progress.characters.collected, vec!["debi"]);
    assert_eq!(progress.characters.missing, vec!["amo", "kupya"]);
    assert_eq!(progress.omakes.collected, vec!["1", "3", "5"]);
    assert_eq!(progress.omakes.total(), 36);
    assert!(!progress.fanatic_route);
}

#[test]
fn non_mapping_save_root_is_rejected() {
    let err = SaveFile::from_bytes("sf.sav", b"%5B1%2C2%5D").expect_err("sequence root");
    assert_eq!(err.code(), CoreErrorCode::Format);
}
