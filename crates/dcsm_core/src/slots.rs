use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::codec;
use crate::document::SaveDocument;
use crate::error::{CoreError, FormatError, Result};
use crate::field_path::FieldPath;
use crate::fsutil;
use crate::node::{Mapping, Node};

pub const SLOT_CONTAINER_FILE_NAME: &str = "DevilConnection_tyrano_data.sav";
pub const SLOTS_PER_PAGE: usize = 6;

const DATA_KEY: &str = "data";
const EMPTY_SLOT_TITLE: &str = "NO SAVE";
const FINISHED_PER_DAY: usize = 3;
const UNSAFE_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const SAVE_DATE_FORMATS: [&str; 2] = ["%Y/%m/%d", "%Y-%m-%d"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSummary {
    pub index: usize,
    pub title: Option<String>,
    pub save_date: Option<String>,
    pub day: Option<i64>,
    pub is_epilogue: bool,
    pub finished_count: usize,
    pub subtitle: Option<String>,
    pub is_empty: bool,
}

impl SlotSummary {
    fn from_slot(index: usize, slot: &Mapping) -> Self {
        let text = |key: &str| slot.get(key).filter(|v| !v.is_null()).map(Node::to_label);
        let title = text("title");
        let save_date = text("save_date");

        let stat = slot.get("stat");
        let is_empty = title.as_deref() == Some(EMPTY_SLOT_TITLE)
            || (save_date.as_deref().unwrap_or("").is_empty()
                && text("img_data").as_deref().unwrap_or("").is_empty()
                && stat.is_none_or(|s| s.as_mapping().is_some_and(Mapping::is_empty)));

        let flags = stat
            .and_then(Node::as_mapping)
            .and_then(|s| s.get("f"))
            .and_then(Node::as_mapping);
        let flag = |key: &str| flags.and_then(|f| f.get(key));

        let epilogue_day = flag("day_epilogue").and_then(Node::as_i64).filter(|d| *d != 0);
        let day = epilogue_day.or_else(|| flag("day").and_then(Node::as_i64));

        let finished = flag("finished").and_then(Node::as_sequence);
        let finished_count = match (day, finished) {
            (Some(day), Some(finished)) if day >= 0 => {
                let start = usize::try_from(day).unwrap_or(usize::MAX);
                let start = if day == 0 { 0 } else { start.saturating_mul(FINISHED_PER_DAY) };
                finished
                    .len()
                    .saturating_sub(start)
                    .min(FINISHED_PER_DAY)
            }
            _ => 0,
        };

        let subtitle = match (slot.get("subtitle"), slot.get("subtitleText")) {
            (Some(flag), Some(text)) if flag.is_truthy() && text.is_truthy() => {
                Some(text.to_label())
            }
            _ => None,
        };

        Self {
            index,
            title,
            save_date,
            day,
            is_epilogue: epilogue_day.is_some(),
            finished_count,
            subtitle,
            is_empty,
        }
    }

    /// `{day}日目_{circles}_{date}[_{subtitle}].json`, safe as a file name.
    pub fn export_file_name(&self) -> String {
        let circles: String = (0..FINISHED_PER_DAY)
            .map(|i| if i < self.finished_count { 'X' } else { 'O' })
            .collect();
        let date = match self.save_date.as_deref() {
            Some(save_date) if !save_date.is_empty() => normalize_save_date(save_date),
            _ => Local::now().format("%Y-%m-%d").to_string(),
        };

        let mut parts = vec![format!("{}日目", self.day.unwrap_or(0)), circles, date];
        if let Some(subtitle) = self.subtitle.as_deref().filter(|s| !s.is_empty()) {
            parts.push(subtitle.to_string());
        }
        sanitize_file_name(&format!("{}.json", parts.join("_")))
    }
}

fn normalize_save_date(save_date: &str) -> String {
    let first = save_date.split_whitespace().next().unwrap_or(save_date);
    SAVE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(first, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| first.replace('/', "-"))
}

fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_FILE_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// The slot container (`DevilConnection_tyrano_data.sav`): a mapping whose
/// `data` sequence holds one mapping per save slot.
#[derive(Debug, Clone)]
pub struct SlotContainer {
    path: PathBuf,
    document: SaveDocument,
}

impl SlotContainer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fsutil::read(path)?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: impl AsRef<Path>, bytes: &[u8]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = codec::decode(bytes).map_err(|e| CoreError::format(&path, e))?;
        validate(document.root()).map_err(|e| CoreError::format(&path, e))?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &SaveDocument {
        &self.document
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.len().div_ceil(SLOTS_PER_PAGE)
    }

    pub fn slot(&self, index: usize) -> Result<&Node> {
        let slots = self.slots();
        slots.get(index).ok_or(CoreError::Range {
            index,
            len: slots.len(),
        })
    }

    pub fn list_slots(&self) -> Vec<SlotSummary> {
        self.slots()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_mapping()
                    .map(|map| SlotSummary::from_slot(index, map))
            })
            .collect()
    }

    /// Pretty-printed JSON of exactly one slot.
    pub fn export_slot(&self, index: usize) -> Result<Vec<u8>> {
        let slot = self.slot(index)?;
        serde_json::to_vec_pretty(slot).map_err(|e| {
            CoreError::encode(&self.path, crate::error::EncodeError::Json(e))
        })
    }

    pub fn suggested_export_name(&self, index: usize) -> Result<String> {
        let slot = self.slot(index)?;
        let summary = slot
            .as_mapping()
            .map(|map| SlotSummary::from_slot(index, map))
            .ok_or_else(|| CoreError::NotFound(format!("slot {index}")))?;
        Ok(summary.export_file_name())
    }

    /// Replaces slot `index` with `bytes` (raw or percent-encoded JSON). The
    /// payload is fully validated before anything changes.
    pub fn import_slot(&mut self, bytes: &[u8], index: usize) -> Result<()> {
        let len = self.len();
        if index >= len {
            return Err(CoreError::Range { index, len });
        }
        let payload = codec::decode_json_or_encoded(bytes)
            .and_then(|node| {
                codec::expect_mapping(&node, &FieldPath::root())?;
                Ok(node)
            })
            .map_err(|e| CoreError::format("slot import", e))?;

        let slots = self.slots_mut()?;
        slots[index] = payload;
        log::info!("imported slot {index}");
        Ok(())
    }

    /// `permutation[i]` is the old index of the slot placed at position `i`.
    pub fn reorder_slots(&mut self, permutation: &[usize]) -> Result<()> {
        check_permutation(permutation, self.len())?;
        let slots = self.slots_mut()?;
        let reordered: Vec<Node> = permutation.iter().map(|&old| slots[old].clone()).collect();
        *slots = reordered;
        Ok(())
    }

    /// 1-based page numbers whose content `permutation` would change.
    pub fn changed_pages(&self, permutation: &[usize]) -> Result<Vec<usize>> {
        check_permutation(permutation, self.len())?;
        Ok(permutation
            .chunks(SLOTS_PER_PAGE)
            .enumerate()
            .filter(|(page, chunk)| {
                chunk
                    .iter()
                    .enumerate()
                    .any(|(offset, &old)| old != page * SLOTS_PER_PAGE + offset)
            })
            .map(|(page, _)| page + 1)
            .collect())
    }

    pub fn is_modified(&self) -> bool {
        self.document.is_modified()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(&self.document).map_err(|e| CoreError::encode(&self.path, e))
    }

    pub fn save(&mut self) -> Result<()> {
        let bytes = self.to_bytes()?;
        fsutil::write_atomic(&self.path, &bytes)?;
        log::info!("saved {} ({} slots)", self.path.display(), self.len());
        self.document.commit();
        Ok(())
    }

    fn slots(&self) -> &[Node] {
        self.document
            .root()
            .as_mapping()
            .and_then(|map| map.get(DATA_KEY))
            .and_then(Node::as_sequence)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn slots_mut(&mut self) -> Result<&mut Vec<Node>> {
        let path = &self.path;
        self.document
            .root_mut()
            .as_mapping_mut()
            .and_then(|map| map.get_mut(DATA_KEY))
            .and_then(Node::as_sequence_mut)
            .ok_or_else(|| {
                CoreError::format(
                    path,
                    FormatError::UnexpectedShape {
                        path: FieldPath::root().child_key(DATA_KEY),
                        expected: "sequence",
                        found: "nothing",
                    },
                )
            })
    }
}

fn validate(root: &Node) -> std::result::Result<(), FormatError> {
    let root_path = FieldPath::root();
    codec::expect_mapping(root, &root_path)?;
    let data_path = root_path.child_key(DATA_KEY);
    let data = root
        .as_mapping()
        .and_then(|map| map.get(DATA_KEY))
        .ok_or_else(|| FormatError::UnexpectedShape {
            path: data_path.clone(),
            expected: "sequence",
            found: "nothing",
        })?;
    codec::expect_sequence(data, &data_path)?;
    for (index, slot) in data.as_sequence().into_iter().flatten().enumerate() {
        codec::expect_mapping(slot, &data_path.child_index(index))?;
    }
    Ok(())
}

fn check_permutation(permutation: &[usize], len: usize) -> Result<()> {
    if permutation.len() != len {
        return Err(CoreError::InvalidPermutation(format!(
            "expected {len} indices, got {}",
            permutation.len()
        )));
    }
    let mut seen = vec![false; len];
    for &old in permutation {
        if old >= len {
            return Err(CoreError::Range { index: old, len });
        }
        if std::mem::replace(&mut seen[old], true) {
            return Err(CoreError::InvalidPermutation(format!(
                "index {old} appears more than once"
            )));
        }
    }
    Ok(())
}
