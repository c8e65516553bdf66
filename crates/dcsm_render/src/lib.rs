use std::fmt::Write as _;

use dcsm_core::backup::format_size;
use dcsm_core::slots::SLOTS_PER_PAGE;
use dcsm_core::{
    BackupSnapshot, Change, ChangeKind, Collection, CollectionProgress, Config, CoreError,
    GalleryEntry, Node, SlotSummary,
};
use serde_json::{Map as JsonMap, Value as JsonValue};

const TITLE_COL_WIDTH: usize = 24;
const DATE_COL_WIDTH: usize = 21;
const CHANGE_VALUE_WIDTH: usize = 60;
const MISSING_PREVIEW: usize = 20;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn render_node_json(node: &Node) -> JsonValue {
    node.to_json_value()
}

/// Strings print bare; everything else prints as indented JSON.
pub fn render_node_text(node: &Node) -> String {
    match node {
        Node::String(s) => s.clone(),
        Node::Sequence(_) | Node::Mapping(_) => serde_json::to_string_pretty(node)
            .unwrap_or_else(|_| node.to_string()),
        other => other.to_string(),
    }
}

pub fn render_slots_json(slots: &[SlotSummary]) -> JsonValue {
    JsonValue::Array(slots.iter().map(slot_to_json).collect())
}

fn slot_to_json(slot: &SlotSummary) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("index".to_string(), JsonValue::from(slot.index));
    m.insert(
        "page".to_string(),
        JsonValue::from(slot.index / SLOTS_PER_PAGE + 1),
    );
    m.insert("empty".to_string(), JsonValue::Bool(slot.is_empty));
    m.insert("title".to_string(), optional_string(slot.title.as_deref()));
    m.insert(
        "save_date".to_string(),
        optional_string(slot.save_date.as_deref()),
    );
    m.insert(
        "day".to_string(),
        slot.day.map_or(JsonValue::Null, JsonValue::from),
    );
    m.insert("epilogue".to_string(), JsonValue::Bool(slot.is_epilogue));
    m.insert(
        "finished_count".to_string(),
        JsonValue::from(slot.finished_count),
    );
    m.insert(
        "subtitle".to_string(),
        optional_string(slot.subtitle.as_deref()),
    );
    m.insert(
        "export_name".to_string(),
        JsonValue::String(slot.export_file_name()),
    );
    JsonValue::Object(m)
}

pub fn render_slots_text(slots: &[SlotSummary]) -> String {
    let mut out = String::new();
    if slots.is_empty() {
        writeln!(out, "no save slots").expect("writing to String cannot fail");
        return out;
    }
    for (page, chunk) in slots.chunks(SLOTS_PER_PAGE).enumerate() {
        writeln!(out, "Page {}", page + 1).expect("writing to String cannot fail");
        for slot in chunk {
            if slot.is_empty {
                writeln!(out, "  {:>3}  (empty)", slot.index)
                    .expect("writing to String cannot fail");
                continue;
            }
            let day = match (slot.day, slot.is_epilogue) {
                (Some(day), true) => format!("Epilogue {day}"),
                (Some(day), false) => format!("Day {day}"),
                (None, _) => "-".to_string(),
            };
            let line = format!(
                "  {:>3}  {:<t$}{:<11}{}  {:<d$}{}",
                slot.index,
                fit_column(slot.title.as_deref().unwrap_or(""), TITLE_COL_WIDTH),
                day,
                finished_marks(slot.finished_count),
                slot.save_date.as_deref().unwrap_or(""),
                slot.subtitle.as_deref().unwrap_or(""),
                t = TITLE_COL_WIDTH,
                d = DATE_COL_WIDTH,
            );
            writeln!(out, "{}", line.trim_end()).expect("writing to String cannot fail");
        }
    }
    out
}

fn finished_marks(count: usize) -> String {
    (0..3).map(|i| if i < count { 'X' } else { 'O' }).collect()
}

pub fn render_gallery_json(entries: &[GalleryEntry]) -> JsonValue {
    JsonValue::Array(
        entries
            .iter()
            .map(|entry| {
                let mut m = JsonMap::new();
                m.insert("order".to_string(), JsonValue::from(entry.order));
                m.insert("id".to_string(), JsonValue::String(entry.id.clone()));
                m.insert("date".to_string(), JsonValue::String(entry.date.clone()));
                m.insert(
                    "main_file".to_string(),
                    optional_path(entry.main_file.as_deref()),
                );
                m.insert(
                    "thumb_file".to_string(),
                    optional_path(entry.thumb_file.as_deref()),
                );
                JsonValue::Object(m)
            })
            .collect(),
    )
}

pub fn render_gallery_text(entries: &[GalleryEntry]) -> String {
    let mut out = String::new();
    if entries.is_empty() {
        writeln!(out, "gallery is empty").expect("writing to String cannot fail");
        return out;
    }
    for entry in entries {
        let mut line = format!("  {:>3}  {}  {}", entry.order, entry.id, entry.date);
        if entry.main_file.is_none() {
            line.push_str("  [image missing]");
        }
        if entry.thumb_file.is_none() {
            line.push_str("  [thumbnail missing]");
        }
        writeln!(out, "{line}").expect("writing to String cannot fail");
    }
    out
}

pub fn render_changes_json(changes: &[Change]) -> JsonValue {
    JsonValue::Array(
        changes
            .iter()
            .map(|change| {
                let mut m = JsonMap::new();
                m.insert(
                    "kind".to_string(),
                    JsonValue::String(change_kind_name(change.kind()).to_string()),
                );
                m.insert("path".to_string(), JsonValue::String(change.path.to_string()));
                m.insert(
                    "old".to_string(),
                    change.old.as_ref().map_or(JsonValue::Null, Node::to_json_value),
                );
                m.insert(
                    "new".to_string(),
                    change.new.as_ref().map_or(JsonValue::Null, Node::to_json_value),
                );
                JsonValue::Object(m)
            })
            .collect(),
    )
}

/// One line per change: `~ path: old -> new`, `+ path: new`, `- path: old`.
pub fn render_changes_text(changes: &[Change]) -> String {
    let mut out = String::new();
    if changes.is_empty() {
        writeln!(out, "no changes").expect("writing to String cannot fail");
        return out;
    }
    let value = |node: &Option<Node>| {
        node.as_ref()
            .map(|n| fit_column(&n.to_string(), CHANGE_VALUE_WIDTH))
            .unwrap_or_default()
    };
    for change in changes {
        let path = if change.path.is_root() {
            "(root)".to_string()
        } else {
            change.path.to_string()
        };
        match change.kind() {
            ChangeKind::Added => writeln!(out, "+ {path}: {}", value(&change.new)),
            ChangeKind::Removed => writeln!(out, "- {path}: {}", value(&change.old)),
            ChangeKind::Modified => writeln!(
                out,
                "~ {path}: {} -> {}",
                value(&change.old),
                value(&change.new)
            ),
        }
        .expect("writing to String cannot fail");
    }
    out
}

fn change_kind_name(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Added => "added",
        ChangeKind::Removed => "removed",
        ChangeKind::Modified => "modified",
    }
}

pub fn render_backups_json(backups: &[BackupSnapshot]) -> JsonValue {
    JsonValue::Array(backups.iter().map(backup_to_json).collect())
}

pub fn render_backup_json(backup: &BackupSnapshot) -> JsonValue {
    backup_to_json(backup)
}

fn backup_to_json(backup: &BackupSnapshot) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert(
        "file_name".to_string(),
        JsonValue::String(backup.file_name.clone()),
    );
    m.insert("path".to_string(), optional_path(Some(backup.path.as_path())));
    m.insert(
        "timestamp".to_string(),
        backup.timestamp.map_or(JsonValue::Null, |t| {
            JsonValue::String(t.format(TIMESTAMP_FORMAT).to_string())
        }),
    );
    m.insert("has_info".to_string(), JsonValue::Bool(backup.has_info));
    m.insert(
        "format_version".to_string(),
        backup.format_version.map_or(JsonValue::Null, JsonValue::from),
    );
    m.insert("size".to_string(), JsonValue::from(backup.size));
    JsonValue::Object(m)
}

pub fn render_backups_text(backups: &[BackupSnapshot]) -> String {
    let mut out = String::new();
    if backups.is_empty() {
        writeln!(out, "no backups").expect("writing to String cannot fail");
        return out;
    }
    for backup in backups {
        let when = backup.timestamp.map_or_else(
            || "unknown time".to_string(),
            |t| t.format(TIMESTAMP_FORMAT).to_string(),
        );
        let line = format!(
            "  {:<d$}{:>11}  {}",
            when,
            format_size(backup.size),
            backup.file_name,
            d = DATE_COL_WIDTH,
        );
        writeln!(out, "{line}").expect("writing to String cannot fail");
    }
    out
}

pub fn render_progress_json(progress: &CollectionProgress) -> JsonValue {
    let mut m = JsonMap::new();
    m.insert("endings".to_string(), collection_to_json(&progress.endings));
    m.insert("stickers".to_string(), collection_to_json(&progress.stickers));
    m.insert(
        "characters".to_string(),
        collection_to_json(&progress.characters),
    );
    m.insert("omakes".to_string(), collection_to_json(&progress.omakes));
    m.insert(
        "fanatic_route".to_string(),
        JsonValue::Bool(progress.fanatic_route),
    );
    JsonValue::Object(m)
}

fn collection_to_json(collection: &Collection) -> JsonValue {
    let strings = |ids: &[String]| {
        JsonValue::Array(ids.iter().map(|id| JsonValue::String(id.clone())).collect())
    };
    let mut m = JsonMap::new();
    m.insert(
        "collected_count".to_string(),
        JsonValue::from(collection.collected.len()),
    );
    m.insert("total".to_string(), JsonValue::from(collection.total()));
    m.insert("collected".to_string(), strings(&collection.collected));
    m.insert("missing".to_string(), strings(&collection.missing));
    JsonValue::Object(m)
}

pub fn render_progress_text(progress: &CollectionProgress) -> String {
    let mut out = String::new();
    for (label, collection) in [
        ("Endings", &progress.endings),
        ("Stickers", &progress.stickers),
        ("Characters", &progress.characters),
        ("Omakes", &progress.omakes),
    ] {
        writeln!(
            out,
            "{:<12}{}/{}",
            label,
            collection.collected.len(),
            collection.total()
        )
        .expect("writing to String cannot fail");
        if !collection.missing.is_empty() {
            writeln!(out, "  missing: {}", preview_list(&collection.missing))
                .expect("writing to String cannot fail");
        }
    }
    writeln!(
        out,
        "{:<12}{}",
        "Fanatic",
        if progress.fanatic_route { "yes" } else { "no" }
    )
    .expect("writing to String cannot fail");
    out
}

fn preview_list(ids: &[String]) -> String {
    if ids.len() <= MISSING_PREVIEW {
        return ids.join(", ");
    }
    format!(
        "{}, ... ({} more)",
        ids[..MISSING_PREVIEW].join(", "),
        ids.len() - MISSING_PREVIEW
    )
}

pub fn render_config_json(config: &Config) -> JsonValue {
    serde_json::to_value(config).unwrap_or(JsonValue::Null)
}

pub fn render_config_text(config: &Config) -> String {
    let mut out = String::new();
    let backup_dir = config
        .backup_dir
        .as_ref()
        .map_or_else(|| "(next to storage)".to_string(), |p| p.display().to_string());
    let duplicates = match config.duplicate_policy {
        dcsm_core::DuplicatePolicy::Reject => "reject",
        dcsm_core::DuplicatePolicy::Allow => "allow",
    };
    for (key, value) in [
        ("backup_dir", backup_dir),
        (
            "snapshot_before_restore",
            config.snapshot_before_restore.to_string(),
        ),
        ("duplicate_policy", duplicates.to_string()),
        (
            "thumbnail_size",
            format!("{}x{}", config.thumbnail_size.0, config.thumbnail_size.1),
        ),
        ("thumbnail_quality", config.thumbnail_quality.to_string()),
        ("compression_level", config.compression_level.to_string()),
    ] {
        writeln!(out, "{key:<25}{value}").expect("writing to String cannot fail");
    }
    out
}

pub fn render_error_json(error: &CoreError) -> JsonValue {
    let mut inner = JsonMap::new();
    inner.insert(
        "code".to_string(),
        JsonValue::String(error.code().as_str().to_string()),
    );
    inner.insert("message".to_string(), JsonValue::String(error.to_string()));
    let mut m = JsonMap::new();
    m.insert("error".to_string(), JsonValue::Object(inner));
    JsonValue::Object(m)
}

fn optional_string(value: Option<&str>) -> JsonValue {
    value.map_or(JsonValue::Null, |s| JsonValue::String(s.to_string()))
}

fn optional_path(value: Option<&std::path::Path>) -> JsonValue {
    value.map_or(JsonValue::Null, |p| {
        JsonValue::String(p.display().to_string())
    })
}

fn fit_column(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    if width <= 3 {
        return value.chars().take(width).collect();
    }
    let mut out: String = value.chars().take(width - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_column_truncates_by_characters() {
        assert_eq!(fit_column("ダリアの部屋", 10), "ダリアの部屋");
        assert_eq!(fit_column("abcdefghij", 6), "abc...");
    }

    #[test]
    fn long_missing_lists_are_shortened() {
        let ids: Vec<String> = (1..=25).map(|n| n.to_string()).collect();
        assert!(preview_list(&ids).ends_with("... (5 more)"));
    }
}
