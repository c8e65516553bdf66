use std::path::{Path, PathBuf};

use crate::codec;
use crate::document::SaveDocument;
use crate::error::{CoreError, FormatError, Result};
use crate::field_path::FieldPath;
use crate::fsutil;
use crate::node::{Mapping, Node};

pub const IDS_FILE_NAME: &str = "DevilConnection_photo_ids.sav";
pub const ALL_IDS_FILE_NAME: &str = "DevilConnection_photo_all_ids.sav";

const ID_KEY: &str = "id";
const DATE_KEY: &str = "date";

/// One record of the index manifest. Fields other than `id` and `date` are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    fields: Mapping,
}

impl Record {
    pub(crate) fn new(id: &str, date: &str) -> Self {
        let mut fields = Mapping::new();
        fields.insert(ID_KEY, Node::from(id));
        fields.insert(DATE_KEY, Node::from(date));
        Self { fields }
    }

    pub(crate) fn id(&self) -> &str {
        self.fields.get(ID_KEY).and_then(Node::as_str).unwrap_or("")
    }

    pub(crate) fn date(&self) -> String {
        self.fields
            .get(DATE_KEY)
            .filter(|d| !d.is_null())
            .map(Node::to_label)
            .unwrap_or_default()
    }
}

/// The canonical index manifest (`{id, date}` records in display order) and
/// its id-only mirror, each keeping the envelope it was read with.
#[derive(Debug, Clone)]
pub(crate) struct Manifest {
    ids_path: PathBuf,
    all_ids_path: PathBuf,
    ids_doc: SaveDocument,
    all_ids_doc: SaveDocument,
    pub(crate) records: Vec<Record>,
}

impl Manifest {
    pub(crate) fn load(dir: &Path) -> Result<Self> {
        let ids_path = dir.join(IDS_FILE_NAME);
        let all_ids_path = dir.join(ALL_IDS_FILE_NAME);
        let ids_doc = codec::decode_file(&ids_path)?;
        let all_ids_doc = codec::decode_file(&all_ids_path)?;

        let records = parse_records(ids_doc.root()).map_err(|e| CoreError::format(&ids_path, e))?;
        codec::expect_sequence(all_ids_doc.root(), &FieldPath::root())
            .map_err(|e| CoreError::format(&all_ids_path, e))?;

        let manifest = Self {
            ids_path,
            all_ids_path,
            ids_doc,
            all_ids_doc,
            records,
        };
        if manifest.all_ids_doc.root() != &manifest.mirror() {
            log::warn!(
                "{} disagrees with {}; the index manifest wins",
                ALL_IDS_FILE_NAME,
                IDS_FILE_NAME
            );
        }
        Ok(manifest)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    /// Persists both manifests from `records`. The mirror goes first and the
    /// canonical index last, so an `Err` always leaves the index file with
    /// its previous content. On failure the in-memory documents keep their
    /// previous content too.
    pub(crate) fn save(&mut self) -> Result<()> {
        let mut ids_doc = self.ids_doc.clone();
        *ids_doc.root_mut() = Node::Sequence(
            self.records
                .iter()
                .map(|r| Node::Mapping(r.fields.clone()))
                .collect(),
        );
        let mut all_ids_doc = self.all_ids_doc.clone();
        *all_ids_doc.root_mut() = self.mirror();

        let ids_bytes =
            codec::encode(&ids_doc).map_err(|e| CoreError::encode(&self.ids_path, e))?;
        let all_ids_bytes =
            codec::encode(&all_ids_doc).map_err(|e| CoreError::encode(&self.all_ids_path, e))?;
        let staged_ids = fsutil::stage(&self.ids_path, &ids_bytes)?;
        let staged_all_ids = fsutil::stage(&self.all_ids_path, &all_ids_bytes)?;
        let previous_all_ids = fsutil::read_existing(&self.all_ids_path)?;
        staged_all_ids.commit()?;
        if let Err(e) = staged_ids.commit() {
            fsutil::restore(&self.all_ids_path, previous_all_ids.as_deref());
            return Err(e);
        }

        ids_doc.commit();
        all_ids_doc.commit();
        self.ids_doc = ids_doc;
        self.all_ids_doc = all_ids_doc;
        log::debug!("wrote gallery manifests ({} records)", self.records.len());
        Ok(())
    }

    fn mirror(&self) -> Node {
        Node::Sequence(self.records.iter().map(|r| Node::from(r.id())).collect())
    }
}

fn parse_records(root: &Node) -> std::result::Result<Vec<Record>, FormatError> {
    let root_path = FieldPath::root();
    codec::expect_sequence(root, &root_path)?;
    let mut records = Vec::new();
    for (index, item) in root.as_sequence().into_iter().flatten().enumerate() {
        let path = root_path.child_index(index);
        codec::expect_mapping(item, &path)?;
        let fields = item.as_mapping().cloned().unwrap_or_default();
        if fields.get(ID_KEY).and_then(Node::as_str).is_none() {
            return Err(FormatError::UnexpectedShape {
                path: path.child_key(ID_KEY),
                expected: "string",
                found: fields.get(ID_KEY).map_or("nothing", Node::kind_name),
            });
        }
        records.push(Record { fields });
    }
    Ok(records)
}
