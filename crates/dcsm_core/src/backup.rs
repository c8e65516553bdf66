use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use walkdir::WalkDir;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::lock::OperationLocks;
use crate::save_file::SAVE_FILE_NAME;
use crate::slots::SLOT_CONTAINER_FILE_NAME;

pub const BACKUP_DIR_NAME: &str = "dcsm_backups";
pub const BACKUP_INFO_FILE_NAME: &str = "dcsmINFO.txt";
pub const BACKUP_FILE_PREFIX: &str = "DC_storage_backup_";
pub const BACKUP_FORMAT_VERSION: u32 = 1;
pub const REQUIRED_SAVE_FILES: [&str; 2] = [SAVE_FILE_NAME, SLOT_CONTAINER_FILE_NAME];

const INFO_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const INFO_NOTE: &str =
    "This backup .zip was created using https://github.com/Hxueit/Devil-Connection-Sav-Manager/";
const FORMAT_LINE_PREFIX: &str = "format:";
const TEMP_PREFIX: &str = ".dcsm_backup_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub path: PathBuf,
    pub file_name: String,
    /// Creation time from the info file; `None` for archives without one.
    pub timestamp: Option<NaiveDateTime>,
    pub has_info: bool,
    pub format_version: Option<u32>,
    pub size: u64,
}

impl BackupSnapshot {
    /// Reads the metadata of an existing archive.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size = fs::metadata(path)
            .map_err(|e| CoreError::read_failure(path, e))?
            .len();
        let mut archive = open_archive(path)?;
        let (timestamp, has_info, format_version) = match archive.index_for_name(BACKUP_INFO_FILE_NAME)
        {
            Some(index) => {
                let mut text = String::new();
                archive
                    .by_index(index)
                    .map_err(|e| CoreError::archive(path, e))?
                    .read_to_string(&mut text)
                    .map_err(|e| CoreError::io(path, e))?;
                let (timestamp, version) = parse_info(&text);
                (timestamp, true, version)
            }
            None => (None, false, None),
        };
        Ok(Self {
            path: path.to_path_buf(),
            file_name: file_name_of(path),
            timestamp,
            has_info,
            format_version,
            size,
        })
    }
}

fn parse_info(text: &str) -> (Option<NaiveDateTime>, Option<u32>) {
    let mut lines = text.lines();
    let timestamp = lines
        .next()
        .and_then(|line| NaiveDateTime::parse_from_str(line.trim(), INFO_TIMESTAMP_FORMAT).ok());
    let version = lines
        .filter_map(|line| line.trim().strip_prefix(FORMAT_LINE_PREFIX))
        .find_map(|v| v.trim().parse::<u32>().ok());
    (timestamp, version)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| CoreError::read_failure(path, e))?;
    ZipArchive::new(file).map_err(|e| CoreError::archive(path, e))
}

/// Timestamped ZIP snapshots of a storage directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    compression_level: i64,
    snapshot_before_restore: bool,
    locks: OperationLocks,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, config: &Config, locks: OperationLocks) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            compression_level: config.compression_level,
            snapshot_before_restore: config.snapshot_before_restore,
            locks,
        }
    }

    /// `dcsm_backups` beside the storage directory.
    pub fn default_dir_for(storage_dir: &Path) -> PathBuf {
        let parent = storage_dir
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        parent.join(BACKUP_DIR_NAME)
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn create_backup(&self, source_dir: &Path) -> Result<BackupSnapshot> {
        self.create_backup_at(source_dir, Local::now().naive_local())
    }

    /// Like [`create_backup`](Self::create_backup) with an explicit creation time.
    pub fn create_backup_at(&self, source_dir: &Path, now: NaiveDateTime) -> Result<BackupSnapshot> {
        let _guard = self.locks.acquire(source_dir)?;
        self.write_snapshot(source_dir, now)
    }

    fn write_snapshot(&self, source_dir: &Path, now: NaiveDateTime) -> Result<BackupSnapshot> {
        if !source_dir.is_dir() {
            return Err(CoreError::MissingFile(source_dir.to_path_buf()));
        }
        let files = self.collect_files(source_dir)?;
        fs::create_dir_all(&self.backup_dir).map_err(|e| CoreError::io(&self.backup_dir, e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.backup_dir)
            .map_err(|e| CoreError::io(&self.backup_dir, e))?;
        let tmp_path = tmp.path().to_path_buf();

        {
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.compression_level));
            let mut zip = ZipWriter::new(tmp.as_file_mut());
            zip.start_file(BACKUP_INFO_FILE_NAME, options)
                .map_err(|e| CoreError::archive(&tmp_path, e))?;
            zip.write_all(info_text(now).as_bytes())
                .map_err(|e| CoreError::io(&tmp_path, e))?;
            for (relative, absolute) in &files {
                zip.start_file(relative.as_str(), options)
                    .map_err(|e| CoreError::archive(&tmp_path, e))?;
                let mut input =
                    File::open(absolute).map_err(|e| CoreError::io(absolute, e))?;
                io::copy(&mut input, &mut zip).map_err(|e| CoreError::io(absolute, e))?;
            }
            zip.finish().map_err(|e| CoreError::archive(&tmp_path, e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| CoreError::io(&tmp_path, e))?;

        let target = self.unique_target(now);
        tmp.persist_noclobber(&target)
            .map_err(|e| CoreError::io(&target, e.error))?;
        log::info!(
            "created backup {} ({} files from {})",
            target.display(),
            files.len(),
            source_dir.display()
        );
        BackupSnapshot::inspect(&target)
    }

    /// Relative `/`-separated names and absolute paths, sorted by name.
    fn collect_files(&self, source_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        let skip = self.backup_dir.canonicalize().ok();
        let mut files = Vec::new();
        let walker = WalkDir::new(source_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                skip.as_deref()
                    .is_none_or(|skip| entry.path().canonicalize().ok().as_deref() != Some(skip))
            });
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source_dir).to_path_buf();
                CoreError::io(&path, io::Error::other(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source_dir)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if relative == BACKUP_INFO_FILE_NAME {
                continue;
            }
            files.push((relative, entry.path().to_path_buf()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    fn unique_target(&self, now: NaiveDateTime) -> PathBuf {
        let base = format!("{BACKUP_FILE_PREFIX}{}", now.format(FILE_TIMESTAMP_FORMAT));
        let mut candidate = self.backup_dir.join(format!("{base}.zip"));
        let mut n = 2;
        while candidate.exists() {
            candidate = self.backup_dir.join(format!("{base}_{n}.zip"));
            n += 1;
        }
        candidate
    }

    /// Archives in the backups directory: those with a timestamp newest
    /// first, then the rest by name.
    pub fn list_backups(&self) -> Result<Vec<BackupSnapshot>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(&self.backup_dir).map_err(|e| CoreError::io(&self.backup_dir, e))?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::io(&self.backup_dir, e))?;
            let path = entry.path();
            let name = file_name_of(&path);
            let is_zip = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
            if !is_zip || name.starts_with('.') || !path.is_file() {
                continue;
            }
            match BackupSnapshot::inspect(&path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    log::warn!("unreadable backup {}: {e}", path.display());
                    snapshots.push(BackupSnapshot {
                        size: entry.metadata().map(|m| m.len()).unwrap_or(0),
                        path,
                        file_name: name,
                        timestamp: None,
                        has_info: false,
                        format_version: None,
                    });
                }
            }
        }
        snapshots.sort_by(|a, b| match (a.timestamp, b.timestamp) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.file_name.cmp(&a.file_name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.file_name.cmp(&b.file_name),
        });
        Ok(snapshots)
    }

    pub fn missing_required_files(&self, snapshot: &BackupSnapshot) -> Result<Vec<String>> {
        let archive = open_archive(&snapshot.path)?;
        let names: Vec<&str> = archive.file_names().collect();
        Ok(REQUIRED_SAVE_FILES
            .iter()
            .filter(|required| !names.contains(required))
            .map(|required| required.to_string())
            .collect())
    }

    /// Replaces the contents of `target_dir` with the archive contents. The
    /// archive is verified before the directory is touched. Returns the
    /// snapshot taken of the previous contents, if one was taken.
    pub fn restore_backup(
        &self,
        snapshot: &BackupSnapshot,
        target_dir: &Path,
    ) -> Result<Option<BackupSnapshot>> {
        let _guard = self.locks.acquire(target_dir)?;
        let mut archive = open_archive(&snapshot.path)?;
        let plan = verify_archive(&mut archive, &snapshot.path)?;

        let previous = if self.snapshot_before_restore && has_files(target_dir)? {
            Some(self.write_snapshot(target_dir, Local::now().naive_local())?)
        } else {
            None
        };

        clear_directory(target_dir, &self.backup_dir)?;
        for (index, relative) in plan {
            let destination = target_dir.join(&relative);
            let mut entry = archive
                .by_index(index)
                .map_err(|e| CoreError::archive(&snapshot.path, e))?;
            if entry.is_dir() {
                fs::create_dir_all(&destination).map_err(|e| CoreError::io(&destination, e))?;
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
            }
            let mut output =
                File::create(&destination).map_err(|e| CoreError::io(&destination, e))?;
            io::copy(&mut entry, &mut output).map_err(|e| CoreError::io(&destination, e))?;
        }
        log::info!(
            "restored {} into {}",
            snapshot.file_name,
            target_dir.display()
        );
        Ok(previous)
    }

    /// Deletes the archive, and the backups directory once it is empty.
    pub fn delete_backup(&self, snapshot: &BackupSnapshot) -> Result<()> {
        fs::remove_file(&snapshot.path).map_err(|e| CoreError::read_failure(&snapshot.path, e))?;
        let is_empty = fs::read_dir(&self.backup_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            if let Err(e) = fs::remove_dir(&self.backup_dir) {
                log::debug!("kept empty backups directory: {e}");
            }
        }
        log::info!("deleted backup {}", snapshot.file_name);
        Ok(())
    }

    pub fn rename_backup(&self, snapshot: &BackupSnapshot, new_name: &str) -> Result<BackupSnapshot> {
        let new_name = new_name.trim();
        if new_name.is_empty() || new_name.contains(['/', '\\']) || new_name.starts_with('.') {
            return Err(CoreError::InvalidValue(format!(
                "{new_name:?} is not a valid backup file name"
            )));
        }
        let new_name = if new_name.to_ascii_lowercase().ends_with(".zip") {
            new_name.to_string()
        } else {
            format!("{new_name}.zip")
        };
        let parent = snapshot
            .path
            .parent()
            .map_or_else(|| self.backup_dir.clone(), Path::to_path_buf);
        let target = parent.join(&new_name);
        if target != snapshot.path && target.exists() {
            return Err(CoreError::Duplicate(format!("backup {new_name}")));
        }
        fs::rename(&snapshot.path, &target).map_err(|e| CoreError::io(&snapshot.path, e))?;
        log::info!("renamed backup {} to {new_name}", snapshot.file_name);
        BackupSnapshot::inspect(&target)
    }

    /// Resolves a file name inside the backups directory or a path to an archive.
    pub fn find(&self, name_or_path: &str) -> Result<BackupSnapshot> {
        let direct = PathBuf::from(name_or_path);
        let path = if direct.is_file() {
            direct
        } else {
            self.backup_dir.join(name_or_path)
        };
        if !path.is_file() {
            return Err(CoreError::NotFound(format!("backup {name_or_path}")));
        }
        BackupSnapshot::inspect(&path)
    }
}

fn info_text(now: NaiveDateTime) -> String {
    format!(
        "{}\n{INFO_NOTE}\nver:{}\n{FORMAT_LINE_PREFIX}{BACKUP_FORMAT_VERSION}\n",
        now.format(INFO_TIMESTAMP_FORMAT),
        env!("CARGO_PKG_VERSION"),
    )
}

/// Reads every entry to the end (checking CRCs) and returns the extraction
/// plan: archive index and enclosed relative path, info file excluded.
fn verify_archive(archive: &mut ZipArchive<File>, path: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| CoreError::archive(path, e))?;
        if entry.name() == BACKUP_INFO_FILE_NAME {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(CoreError::archive(
                path,
                zip::result::ZipError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry {:?} escapes the target directory", entry.name()),
                )),
            ));
        };
        io::copy(&mut entry, &mut io::sink()).map_err(|e| CoreError::io(path, e))?;
        plan.push((index, relative));
    }
    Ok(plan)
}

fn has_files(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoreError::io(dir, e)),
    }
}

/// Empties `dir`, leaving `keep` alone when it lives inside it.
fn clear_directory(dir: &Path, keep: &Path) -> Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir).map_err(|e| CoreError::io(dir, e));
    }
    let keep = keep.canonicalize().ok();
    let entries = fs::read_dir(dir).map_err(|e| CoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let path = entry.path();
        if keep.is_some() && path.canonicalize().ok() == keep {
            continue;
        }
        let removed = if entry.file_type().is_ok_and(|t| t.is_dir()) {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| CoreError::io(&path, e))?;
    }
    Ok(())
}

/// Human readable size with two decimals above one KiB.
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if value < KIB * KIB {
        format!("{:.2} KB", value / KIB)
    } else if value < KIB * KIB * KIB {
        format!("{:.2} MB", value / (KIB * KIB))
    } else {
        format!("{:.2} GB", value / (KIB * KIB * KIB))
    }
}
