mod imaging;
mod manifest;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use rand::Rng;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::codec;
use crate::config::{Config, DuplicatePolicy};
use crate::error::{CoreError, FormatError, Result};
use crate::field_path::FieldPath;
use crate::fsutil;
use crate::node::Node;

pub use imaging::{DataUri, JPEG_MIME, PNG_MIME};
pub use manifest::{ALL_IDS_FILE_NAME, IDS_FILE_NAME};

use manifest::{Manifest, Record};

pub const FILE_PREFIX: &str = "DevilConnection_photo_";
pub const FILE_SUFFIX: &str = ".sav";
pub const THUMB_SUFFIX: &str = "_thumb";
pub const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

const ID_LENGTH: usize = 8;
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub id: String,
    pub order: usize,
    pub date: String,
    pub main_file: Option<PathBuf>,
    pub thumb_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
struct FilePair {
    main: Option<PathBuf>,
    thumb: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GalleryOptions {
    pub duplicate_policy: DuplicatePolicy,
    pub default_thumbnail_size: (u32, u32),
    pub thumbnail_quality: u8,
}

impl Default for GalleryOptions {
    fn default() -> Self {
        GalleryOptions::from(&Config::default())
    }
}

impl From<&Config> for GalleryOptions {
    fn from(config: &Config) -> Self {
        Self {
            duplicate_policy: config.duplicate_policy,
            default_thumbnail_size: config.thumbnail_size,
            thumbnail_quality: config.thumbnail_quality,
        }
    }
}

/// Ordered screenshot collection. Display order lives in the index manifest;
/// image payloads live in one main and one thumbnail file per screenshot.
#[derive(Debug)]
pub struct Gallery {
    dir: PathBuf,
    manifest: Manifest,
    files: HashMap<String, FilePair>,
    thumbnails: HashMap<String, Vec<u8>>,
    hashes: HashMap<String, String>,
    options: GalleryOptions,
}

impl Gallery {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(dir, GalleryOptions::default())
    }

    pub fn load_with(dir: impl AsRef<Path>, options: GalleryOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest = Manifest::load(&dir)?;
        let files = scan_files(&dir)?;
        let gallery = Self {
            dir,
            manifest,
            files,
            thumbnails: HashMap::new(),
            hashes: HashMap::new(),
            options,
        };
        for id in gallery.orphans() {
            log::warn!("screenshot files for {id} have no manifest entry");
        }
        Ok(gallery)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.manifest.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.manifest.position(id).is_some()
    }

    pub fn entries(&self) -> Vec<GalleryEntry> {
        self.manifest
            .records
            .iter()
            .enumerate()
            .map(|(order, record)| self.entry(order, record))
            .collect()
    }

    pub fn entry_by_id(&self, id: &str) -> Result<GalleryEntry> {
        let order = self.position(id)?;
        Ok(self.entry(order, &self.manifest.records[order]))
    }

    /// Ids that have files on disk but no manifest record.
    pub fn orphans(&self) -> Vec<String> {
        let mut orphans: Vec<String> = self
            .files
            .keys()
            .filter(|id| !self.contains(id))
            .cloned()
            .collect();
        orphans.sort();
        orphans
    }

    pub fn add(&mut self, source: impl AsRef<Path>) -> Result<GalleryEntry> {
        let id = self.generate_id();
        let date = Local::now().format(DATE_FORMAT).to_string();
        self.add_with(source, &id, &date)
    }

    /// Adds a screenshot under a caller-chosen id and date. Files are written
    /// first and the manifests last; any failure removes what was written.
    pub fn add_with(
        &mut self,
        source: impl AsRef<Path>,
        id: &str,
        date: &str,
    ) -> Result<GalleryEntry> {
        validate_id(id)?;
        if self.contains(id) || self.files.contains_key(id) {
            return Err(CoreError::Duplicate(format!("screenshot id {id}")));
        }

        let source = source.as_ref();
        let raw = fsutil::read(source)?;
        let png = imaging::to_png(&raw)?;
        let hash = imaging::content_hash(&png);
        if self.options.duplicate_policy == DuplicatePolicy::Reject {
            if let Some(existing) = self.find_by_hash(&hash)? {
                return Err(CoreError::Duplicate(format!(
                    "{} has the same content as screenshot {existing}",
                    source.display()
                )));
            }
        }
        let thumb_size = self.inferred_thumbnail_size();
        let thumb = imaging::thumbnail(&png, thumb_size, self.options.thumbnail_quality)?;

        let main_path = self.main_path(id);
        let thumb_path = self.thumb_path(id);
        let written = write_payload(&main_path, PNG_MIME, &png).and_then(|()| {
            write_payload(&thumb_path, JPEG_MIME, &thumb)
        });
        if let Err(e) = written {
            discard(&[main_path.as_path(), thumb_path.as_path()]);
            return Err(e);
        }

        self.manifest.records.push(Record::new(id, date));
        if let Err(e) = self.manifest.save() {
            self.manifest.records.pop();
            discard(&[main_path.as_path(), thumb_path.as_path()]);
            return Err(e);
        }

        self.files.insert(
            id.to_string(),
            FilePair {
                main: Some(main_path),
                thumb: Some(thumb_path),
            },
        );
        self.thumbnails.insert(id.to_string(), thumb);
        self.hashes.insert(id.to_string(), hash);
        log::info!("added screenshot {id} from {}", source.display());
        self.entry_by_id(id)
    }

    /// Replaces the image of an existing screenshot, keeping its id, date and
    /// position. The thumbnail keeps the size of the one it replaces.
    pub fn replace(&mut self, id: &str, source: impl AsRef<Path>) -> Result<GalleryEntry> {
        self.position(id)?;
        let source = source.as_ref();
        let raw = fsutil::read(source)?;
        let png = imaging::to_png(&raw)?;
        let hash = imaging::content_hash(&png);
        if self.options.duplicate_policy == DuplicatePolicy::Reject {
            if let Some(existing) = self.find_by_hash(&hash)?.filter(|other| other != id) {
                return Err(CoreError::Duplicate(format!(
                    "{} has the same content as screenshot {existing}",
                    source.display()
                )));
            }
        }
        let thumb_size = self
            .thumbnail_size_of(id)
            .unwrap_or_else(|| self.inferred_thumbnail_size());
        let thumb = imaging::thumbnail(&png, thumb_size, self.options.thumbnail_quality)?;

        let main_path = self.main_path(id);
        let thumb_path = self.thumb_path(id);
        let staged_main = stage_payload(&main_path, PNG_MIME, &png)?;
        let staged_thumb = stage_payload(&thumb_path, JPEG_MIME, &thumb)?;
        let previous_main = fsutil::read_existing(&main_path)?;
        staged_main.commit()?;
        if let Err(e) = staged_thumb.commit() {
            fsutil::restore(&main_path, previous_main.as_deref());
            return Err(e);
        }

        self.files.insert(
            id.to_string(),
            FilePair {
                main: Some(main_path),
                thumb: Some(thumb_path),
            },
        );
        self.thumbnails.insert(id.to_string(), thumb);
        self.hashes.insert(id.to_string(), hash);
        log::info!("replaced screenshot {id} with {}", source.display());
        self.entry_by_id(id)
    }

    /// Drops the record from the manifests, then removes its files. Later
    /// entries move up by one.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        let position = self.position(id)?;
        let record = self.manifest.records.remove(position);
        if let Err(e) = self.manifest.save() {
            self.manifest.records.insert(position, record);
            return Err(e);
        }
        self.forget(id);
        log::info!("deleted screenshot {id}");
        Ok(())
    }

    /// Deletes every listed screenshot with a single manifest update. Unknown
    /// ids fail the whole call before anything changes; repeated ids count
    /// once.
    pub fn delete_many(&mut self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Err(CoreError::EmptySelection);
        }
        let mut selected: Vec<&str> = Vec::with_capacity(ids.len());
        for id in ids {
            self.position(id)?;
            if !selected.contains(&id.as_str()) {
                selected.push(id);
            }
        }

        let previous = self.manifest.records.clone();
        self.manifest
            .records
            .retain(|record| !selected.contains(&record.id()));
        if let Err(e) = self.manifest.save() {
            self.manifest.records = previous;
            return Err(e);
        }
        for id in &selected {
            self.forget(id);
        }
        log::info!("deleted {} screenshots", selected.len());
        Ok(selected.len())
    }

    /// Removes the files and caches of an id already gone from the manifest.
    /// Files that cannot be removed stay behind as orphans.
    fn forget(&mut self, id: &str) {
        let pair = self.files.remove(id).unwrap_or_default();
        self.thumbnails.remove(id);
        self.hashes.remove(id);
        for path in [pair.main, pair.thumb].into_iter().flatten() {
            if let Err(e) = fsutil::remove_if_exists(&path) {
                log::warn!("left orphan screenshot file: {e}");
            }
        }
    }

    pub fn reorder(&mut self, id: &str, new_index: usize) -> Result<()> {
        let len = self.len();
        if new_index >= len {
            return Err(CoreError::Range {
                index: new_index,
                len,
            });
        }
        let current = self.position(id)?;
        if current == new_index {
            return Ok(());
        }
        let previous = self.manifest.records.clone();
        let record = self.manifest.records.remove(current);
        self.manifest.records.insert(new_index, record);
        if let Err(e) = self.manifest.save() {
            self.manifest.records = previous;
            return Err(e);
        }
        log::info!("moved screenshot {id} from {current} to {new_index}");
        Ok(())
    }

    /// Stable sort on the record dates. Fails without changing anything when
    /// a date does not parse.
    pub fn sort_by_date(&mut self, ascending: bool) -> Result<()> {
        let mut keyed = Vec::with_capacity(self.len());
        for record in &self.manifest.records {
            let date = record.date();
            let parsed = NaiveDateTime::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                CoreError::InvalidValue(format!("screenshot {} has date {date:?}: {e}", record.id()))
            })?;
            keyed.push((parsed, record.clone()));
        }
        if ascending {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        } else {
            keyed.sort_by(|a, b| b.0.cmp(&a.0));
        }

        let previous = std::mem::replace(
            &mut self.manifest.records,
            keyed.into_iter().map(|(_, record)| record).collect(),
        );
        if let Err(e) = self.manifest.save() {
            self.manifest.records = previous;
            return Err(e);
        }
        Ok(())
    }

    /// ZIP archive of the selected screenshots in display order, named
    /// `NNN_<id>.<ext>` after their 1-based display position.
    pub fn export_batch(&self, ids: &[String]) -> Result<Vec<u8>> {
        if ids.is_empty() {
            return Err(CoreError::EmptySelection);
        }
        let selected: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        for id in &selected {
            self.position(id)?;
        }

        let archive_name = self.dir.join("gallery export");
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (order, record) in self.manifest.records.iter().enumerate() {
            if !selected.contains(record.id()) {
                continue;
            }
            let image = self.image_data(record.id())?;
            let name = format!("{:03}_{}.{}", order + 1, record.id(), image.extension());
            zip.start_file(name.as_str(), options)
                .map_err(|e| CoreError::archive(&archive_name, e))?;
            zip.write_all(&image.data)
                .map_err(|e| CoreError::io(&archive_name, e))?;
        }
        let cursor = zip
            .finish()
            .map_err(|e| CoreError::archive(&archive_name, e))?;
        Ok(cursor.into_inner())
    }

    /// Decoded main image of a screenshot.
    pub fn image_data(&self, id: &str) -> Result<DataUri> {
        self.position(id)?;
        let path = self
            .files
            .get(id)
            .and_then(|pair| pair.main.clone())
            .ok_or_else(|| CoreError::MissingFile(self.main_path(id)))?;
        read_payload(&path)
    }

    /// JPEG bytes of a screenshot thumbnail, cached after the first read.
    pub fn thumbnail(&mut self, id: &str) -> Result<Vec<u8>> {
        self.position(id)?;
        if let Some(cached) = self.thumbnails.get(id) {
            return Ok(cached.clone());
        }
        let path = self
            .files
            .get(id)
            .and_then(|pair| pair.thumb.clone())
            .ok_or_else(|| CoreError::MissingFile(self.thumb_path(id)))?;
        let payload = read_payload(&path)?;
        self.thumbnails.insert(id.to_string(), payload.data.clone());
        Ok(payload.data)
    }

    fn entry(&self, order: usize, record: &Record) -> GalleryEntry {
        let pair = self.files.get(record.id()).cloned().unwrap_or_default();
        GalleryEntry {
            id: record.id().to_string(),
            order,
            date: record.date(),
            main_file: pair.main,
            thumb_file: pair.thumb,
        }
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.manifest
            .position(id)
            .ok_or_else(|| CoreError::NotFound(format!("screenshot {id}")))
    }

    fn main_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}"))
    }

    fn thumb_path(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{id}{THUMB_SUFFIX}{FILE_SUFFIX}"))
    }

    fn generate_id(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let id: String = (0..ID_LENGTH)
                .map(|_| ID_CHARSET[rng.random_range(0..ID_CHARSET.len())] as char)
                .collect();
            if !self.contains(&id) && !self.files.contains_key(&id) {
                return id;
            }
        }
    }

    fn thumbnail_size_of(&self, id: &str) -> Option<(u32, u32)> {
        let path = self.files.get(id)?.thumb.as_ref()?;
        let payload = read_payload(path).ok()?;
        imaging::dimensions(&payload.data).ok()
    }

    /// Size of the first readable existing thumbnail, else the configured default.
    fn inferred_thumbnail_size(&self) -> (u32, u32) {
        self.manifest
            .records
            .iter()
            .find_map(|record| self.thumbnail_size_of(record.id()))
            .unwrap_or(self.options.default_thumbnail_size)
    }

    fn find_by_hash(&mut self, hash: &str) -> Result<Option<String>> {
        let ids: Vec<String> = self
            .manifest
            .records
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        for id in ids {
            if !self.hashes.contains_key(&id) {
                let Some(path) = self.files.get(&id).and_then(|pair| pair.main.clone()) else {
                    continue;
                };
                match read_payload(&path) {
                    Ok(payload) => {
                        self.hashes
                            .insert(id.clone(), imaging::content_hash(&payload.data));
                    }
                    Err(e) => {
                        log::warn!("skipping unreadable screenshot {id} in duplicate check: {e}");
                        continue;
                    }
                }
            }
            if self.hashes.get(&id).map(String::as_str) == Some(hash) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CoreError::InvalidValue(format!(
            "screenshot id {id:?} must be non-empty ASCII letters and digits"
        )));
    }
    Ok(())
}

fn scan_files(dir: &Path) -> Result<HashMap<String, FilePair>> {
    let mut files: HashMap<String, FilePair> = HashMap::new();
    let entries = fs::read_dir(dir).map_err(|e| CoreError::read_failure(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CoreError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == IDS_FILE_NAME || name == ALL_IDS_FILE_NAME {
            continue;
        }
        let Some(stem) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
        else {
            continue;
        };
        let (id, is_thumb) = match stem.strip_suffix(THUMB_SUFFIX) {
            Some(id) => (id, true),
            None => (stem, false),
        };
        if id.is_empty() || id.contains('_') {
            continue;
        }
        let pair = files.entry(id.to_string()).or_default();
        if is_thumb {
            pair.thumb = Some(entry.path());
        } else {
            pair.main = Some(entry.path());
        }
    }
    Ok(files)
}

fn write_payload(path: &Path, mime: &str, data: &[u8]) -> Result<()> {
    stage_payload(path, mime, data)?.commit()
}

fn stage_payload(path: &Path, mime: &str, data: &[u8]) -> Result<fsutil::StagedWrite> {
    let uri = DataUri {
        mime: mime.to_string(),
        data: data.to_vec(),
    };
    let bytes =
        codec::encode_node(&Node::String(uri.to_uri())).map_err(|e| CoreError::encode(path, e))?;
    fsutil::stage(path, &bytes)
}

fn read_payload(path: &Path) -> Result<DataUri> {
    let bytes = fsutil::read(path)?;
    let document = codec::decode(&bytes).map_err(|e| CoreError::format(path, e))?;
    let text = document.root().as_str().ok_or_else(|| {
        CoreError::format(
            path,
            FormatError::UnexpectedShape {
                path: FieldPath::root(),
                expected: "string",
                found: document.root().kind_name(),
            },
        )
    })?;
    DataUri::parse(text).map_err(|e| CoreError::format(path, e))
}

fn discard(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = fsutil::remove_if_exists(path) {
            log::warn!("could not remove partial file: {e}");
        }
    }
}
