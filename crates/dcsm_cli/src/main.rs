use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use dcsm_core::codec;
use dcsm_core::save_file::SAVE_FILE_NAME;
use dcsm_core::{
    Config, CoreError, DiffOptions, FieldPath, Node, SaveFile, WriteMode, Workspace, format_size,
    parse_literal,
};
use dcsm_render::{
    render_backup_json, render_backups_json, render_backups_text, render_changes_json,
    render_changes_text, render_config_json, render_config_text, render_error_json,
    render_gallery_json, render_gallery_text, render_node_json, render_node_text,
    render_progress_json, render_progress_text, render_slots_json, render_slots_text,
};
use env_logger::Env;
use serde_json::{Map as JsonMap, Value as JsonValue};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Game storage directory holding the .sav files.
    #[arg(long, short = 's', global = true, value_name = "DIR", default_value = ".")]
    storage: PathBuf,
    /// JSON configuration file; DCSM_* environment variables still apply.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a decoded artifact (the save file by default).
    Show {
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Print the value at a field path.
    Get {
        path: String,
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Write a JSON literal at a field path and save.
    Set {
        path: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
        /// Store VALUE as a string instead of parsing it as JSON.
        #[arg(long)]
        string: bool,
        /// Create missing intermediate fields.
        #[arg(long)]
        create: bool,
        /// Show the pending change without writing.
        #[arg(long)]
        dry_run: bool,
        /// Write the edited artifact here instead of in place.
        #[arg(long, value_name = "FILE", conflicts_with = "dry_run")]
        output: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Compare an artifact with another copy of it.
    Diff {
        other: PathBuf,
        #[arg(long, value_name = "FILE")]
        file: Option<PathBuf>,
        /// Skip a subtree; may be repeated.
        #[arg(long = "ignore", value_name = "PATH")]
        ignore: Vec<String>,
    },
    /// Summarise collected endings, stickers, characters and omakes.
    Progress,
    #[command(subcommand)]
    Slots(SlotsCommand),
    #[command(subcommand)]
    Gallery(GalleryCommand),
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Subcommand)]
enum SlotsCommand {
    List,
    /// Write one slot as pretty JSON.
    Export {
        index: usize,
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Replace one slot with a JSON (or percent-encoded) payload.
    Import { index: usize, file: PathBuf },
    /// New order as old indices, e.g. `1,0,2,3,4,5`.
    Reorder {
        #[arg(value_delimiter = ',', required = true, num_args = 1..)]
        order: Vec<usize>,
    },
}

#[derive(Debug, Subcommand)]
enum GalleryCommand {
    List,
    Add {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    Replace {
        id: String,
        image: PathBuf,
    },
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Move a screenshot to a 0-based display position.
    Move {
        id: String,
        index: usize,
    },
    /// Write the selected screenshots to a ZIP archive.
    Export {
        ids: Vec<String>,
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        #[arg(long, value_name = "FILE")]
        output: PathBuf,
    },
    Sort {
        #[arg(long)]
        descending: bool,
    },
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    Create,
    List,
    /// Replace the storage directory contents with a backup.
    Restore {
        name: String,
        /// Restore even when the archive lacks a required save file.
        #[arg(long)]
        force: bool,
    },
    Delete {
        name: String,
    },
    Rename {
        name: String,
        new_name: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, json: JsonValue, text: String) {
        if self.json {
            let rendered = serde_json::to_string_pretty(&json).unwrap_or_else(|e| {
                eprintln!("Error rendering JSON output: {e}");
                process::exit(1);
            });
            println!("{rendered}");
        } else {
            print!("{text}");
            if !text.is_empty() && !text.ends_with('\n') {
                println!();
            }
        }
    }

    fn message(&self, key: &str, value: JsonValue, text: String) {
        let mut m = JsonMap::new();
        m.insert(key.to_string(), value);
        self.emit(JsonValue::Object(m), text);
    }

    fn fail(&self, context: &str, error: CoreError) -> ! {
        if self.json {
            eprintln!("{}", render_error_json(&error));
        } else {
            eprintln!("Error {context}: {error}");
        }
        process::exit(1);
    }
}

trait OrExit<T> {
    fn or_exit(self, out: Output, context: &str) -> T;
}

impl<T> OrExit<T> for Result<T, CoreError> {
    fn or_exit(self, out: Output, context: &str) -> T {
        self.unwrap_or_else(|e| out.fail(context, e))
    }
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::init_from_env(Env::default().default_filter_or(level));

    let out = Output { json: cli.json };
    let config = match &cli.config {
        Some(path) => Config::load(path).or_exit(out, "loading configuration"),
        None => Config::from_env(),
    };
    let default_file = cli.storage.join(SAVE_FILE_NAME);

    match cli.command {
        Command::Show { file } => {
            let file = file.unwrap_or(default_file);
            let document = codec::decode_file(&file).or_exit(out, "reading artifact");
            out.emit(
                render_node_json(document.root()),
                render_node_text(document.root()),
            );
        }
        Command::Get { path, file } => {
            let file = file.unwrap_or(default_file);
            let field = FieldPath::parse(&path).or_exit(out, "parsing field path");
            let document = codec::decode_file(&file).or_exit(out, "reading artifact");
            let value = document.read(&field).or_exit(out, "reading field");
            out.emit(render_node_json(value), render_node_text(value));
        }
        Command::Set {
            path,
            value,
            string,
            create,
            dry_run,
            output,
            file,
        } => {
            let file = file.unwrap_or(default_file);
            let field = FieldPath::parse(&path).or_exit(out, "parsing field path");
            let value = if string {
                Node::from(value)
            } else {
                parse_literal(&value).or_exit(out, "parsing value")
            };
            let mode = if create {
                WriteMode::AllowCreate
            } else {
                WriteMode::Existing
            };
            let mut save = SaveFile::open(&file).or_exit(out, "opening artifact");
            save.document_mut()
                .write(&field, value, mode)
                .or_exit(out, "writing field");
            let changes = save.preview();
            if !dry_run {
                match &output {
                    Some(target) => save.save_as(target),
                    None => save.save(),
                }
                .or_exit(out, "saving artifact");
            }
            out.emit(render_changes_json(&changes), render_changes_text(&changes));
        }
        Command::Diff {
            other,
            file,
            ignore,
        } => {
            let file = file.unwrap_or(default_file);
            let ignored = ignore
                .iter()
                .map(|p| FieldPath::parse(p))
                .collect::<Result<Vec<_>, _>>()
                .or_exit(out, "parsing --ignore path");
            let left = codec::decode_file(&file).or_exit(out, "reading artifact");
            let right = codec::decode_file(&other).or_exit(out, "reading artifact");
            let changes = left.diff_with(&right, &DiffOptions { ignored });
            out.emit(render_changes_json(&changes), render_changes_text(&changes));
        }
        Command::Progress => {
            let workspace = open_workspace(&cli.storage, config, out);
            let save = workspace.save_file().or_exit(out, "opening save file");
            let progress = save.collection_progress();
            out.emit(
                render_progress_json(&progress),
                render_progress_text(&progress),
            );
        }
        Command::Slots(command) => {
            let workspace = open_workspace(&cli.storage, config, out);
            run_slots(&workspace, command, out);
        }
        Command::Gallery(command) => {
            let workspace = open_workspace(&cli.storage, config, out);
            run_gallery(&workspace, command, out);
        }
        Command::Backup(command) => {
            let workspace = open_workspace(&cli.storage, config, out);
            run_backup(&workspace, command, out);
        }
        Command::Config => {
            out.emit(render_config_json(&config), render_config_text(&config));
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CoreError> {
    fs::read(path).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    fs::write(path, bytes).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn open_workspace(storage: &Path, config: Config, out: Output) -> Workspace {
    Workspace::open(storage, config).or_exit(out, "opening storage directory")
}

fn run_slots(workspace: &Workspace, command: SlotsCommand, out: Output) {
    let mut container = workspace
        .slot_container()
        .or_exit(out, "opening slot container");
    match command {
        SlotsCommand::List => {
            let slots = container.list_slots();
            out.emit(render_slots_json(&slots), render_slots_text(&slots));
        }
        SlotsCommand::Export { index, output } => {
            let bytes = container.export_slot(index).or_exit(out, "exporting slot");
            let target = match output {
                Some(path) => path,
                None => PathBuf::from(
                    container
                        .suggested_export_name(index)
                        .or_exit(out, "naming export"),
                ),
            };
            write_file(&target, &bytes).or_exit(out, "writing slot export");
            out.message(
                "exported",
                JsonValue::String(target.display().to_string()),
                format!("Exported slot {index} to {}\n", target.display()),
            );
        }
        SlotsCommand::Import { index, file } => {
            let bytes = read_file(&file).or_exit(out, "reading slot payload");
            container
                .import_slot(&bytes, index)
                .or_exit(out, "importing slot");
            container.save().or_exit(out, "saving slot container");
            out.message(
                "imported",
                JsonValue::from(index),
                format!("Imported {} into slot {index}\n", file.display()),
            );
        }
        SlotsCommand::Reorder { order } => {
            let pages = container
                .changed_pages(&order)
                .or_exit(out, "checking slot order");
            container
                .reorder_slots(&order)
                .or_exit(out, "reordering slots");
            container.save().or_exit(out, "saving slot container");
            let listed: Vec<String> = pages.iter().map(usize::to_string).collect();
            let text = if pages.is_empty() {
                "Slot order unchanged\n".to_string()
            } else {
                format!("Reordered slots; changed pages: {}\n", listed.join(", "))
            };
            out.message(
                "changed_pages",
                JsonValue::Array(pages.into_iter().map(JsonValue::from).collect()),
                text,
            );
        }
    }
}

fn run_gallery(workspace: &Workspace, command: GalleryCommand, out: Output) {
    let mut gallery = workspace.gallery().or_exit(out, "loading gallery");
    match command {
        GalleryCommand::List => {
            let entries = gallery.entries();
            out.emit(render_gallery_json(&entries), render_gallery_text(&entries));
        }
        GalleryCommand::Add { images } => {
            let mut added = Vec::with_capacity(images.len());
            for image in &images {
                let context = format!("adding {}", image.display());
                added.push(gallery.add(image).or_exit(out, &context));
            }
            out.emit(render_gallery_json(&added), render_gallery_text(&added));
        }
        GalleryCommand::Replace { id, image } => {
            let entry = gallery
                .replace(&id, &image)
                .or_exit(out, "replacing screenshot");
            let entries = [entry];
            out.emit(render_gallery_json(&entries), render_gallery_text(&entries));
        }
        GalleryCommand::Delete { ids } => {
            let removed = gallery
                .delete_many(&ids)
                .or_exit(out, "deleting screenshots");
            out.message(
                "deleted",
                JsonValue::from(removed),
                format!("Deleted {removed} screenshot(s)\n"),
            );
        }
        GalleryCommand::Move { id, index } => {
            gallery.reorder(&id, index).or_exit(out, "moving screenshot");
            let entries = gallery.entries();
            out.emit(render_gallery_json(&entries), render_gallery_text(&entries));
        }
        GalleryCommand::Export { ids, all, output } => {
            let ids = if all {
                gallery.entries().into_iter().map(|entry| entry.id).collect()
            } else {
                ids
            };
            let bytes = gallery
                .export_batch(&ids)
                .or_exit(out, "exporting screenshots");
            write_file(&output, &bytes).or_exit(out, "writing screenshot archive");
            out.message(
                "exported",
                JsonValue::from(ids.len()),
                format!(
                    "Exported {} screenshot(s) to {} ({})\n",
                    ids.len(),
                    output.display(),
                    format_size(bytes.len() as u64)
                ),
            );
        }
        GalleryCommand::Sort { descending } => {
            gallery
                .sort_by_date(!descending)
                .or_exit(out, "sorting gallery");
            let entries = gallery.entries();
            out.emit(render_gallery_json(&entries), render_gallery_text(&entries));
        }
    }
}

fn run_backup(workspace: &Workspace, command: BackupCommand, out: Output) {
    let backups = workspace.backups();
    match command {
        BackupCommand::Create => {
            let snapshot = backups
                .create_backup(workspace.storage_dir())
                .or_exit(out, "creating backup");
            out.emit(
                render_backup_json(&snapshot),
                format!(
                    "Created {} ({})\n",
                    snapshot.path.display(),
                    format_size(snapshot.size)
                ),
            );
        }
        BackupCommand::List => {
            let listed = backups.list_backups().or_exit(out, "listing backups");
            out.emit(render_backups_json(&listed), render_backups_text(&listed));
        }
        BackupCommand::Restore { name, force } => {
            let snapshot = backups.find(&name).or_exit(out, "finding backup");
            let missing = backups
                .missing_required_files(&snapshot)
                .or_exit(out, "inspecting backup");
            if !missing.is_empty() {
                if !force {
                    eprintln!(
                        "Error: {} lacks {}; pass --force to restore anyway",
                        snapshot.file_name,
                        missing.join(", ")
                    );
                    process::exit(1);
                }
                log::warn!("restoring {} without {}", snapshot.file_name, missing.join(", "));
            }
            let previous = backups
                .restore_backup(&snapshot, workspace.storage_dir())
                .or_exit(out, "restoring backup");
            let mut text = format!("Restored {}\n", snapshot.file_name);
            if let Some(previous) = &previous {
                text.push_str(&format!(
                    "Previous contents saved as {}\n",
                    previous.file_name
                ));
            }
            let mut m = JsonMap::new();
            m.insert("restored".to_string(), render_backup_json(&snapshot));
            m.insert(
                "previous".to_string(),
                previous.as_ref().map_or(JsonValue::Null, render_backup_json),
            );
            out.emit(JsonValue::Object(m), text);
        }
        BackupCommand::Delete { name } => {
            let snapshot = backups.find(&name).or_exit(out, "finding backup");
            backups
                .delete_backup(&snapshot)
                .or_exit(out, "deleting backup");
            out.message(
                "deleted",
                JsonValue::String(snapshot.file_name.clone()),
                format!("Deleted {}\n", snapshot.file_name),
            );
        }
        BackupCommand::Rename { name, new_name } => {
            let snapshot = backups.find(&name).or_exit(out, "finding backup");
            let renamed = backups
                .rename_backup(&snapshot, &new_name)
                .or_exit(out, "renaming backup");
            out.emit(
                render_backup_json(&renamed),
                format!("Renamed {} to {}\n", snapshot.file_name, renamed.file_name),
            );
        }
    }
}
