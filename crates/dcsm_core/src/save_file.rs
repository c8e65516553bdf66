use std::path::{Path, PathBuf};

use crate::codec;
use crate::diff::Change;
use crate::document::SaveDocument;
use crate::error::{CoreError, Result};
use crate::field_path::FieldPath;
use crate::fsutil;
use crate::well_known::{self, CollectionProgress};

pub const SAVE_FILE_NAME: &str = "DevilConnection_sf.sav";

/// The system save (`DevilConnection_sf.sav`): global flags, collections and
/// settings shared by every slot.
#[derive(Debug, Clone)]
pub struct SaveFile {
    path: PathBuf,
    document: SaveDocument,
}

impl SaveFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fsutil::read(path)?;
        Self::from_bytes(path, &bytes)
    }

    pub fn from_bytes(path: impl AsRef<Path>, bytes: &[u8]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = codec::decode(bytes).map_err(|e| CoreError::format(&path, e))?;
        codec::expect_mapping(document.root(), &FieldPath::root())
            .map_err(|e| CoreError::format(&path, e))?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &SaveDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut SaveDocument {
        &mut self.document
    }

    pub fn preview(&self) -> Vec<Change> {
        self.document.changes()
    }

    pub fn collection_progress(&self) -> CollectionProgress {
        well_known::collection_progress(self.document.root())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(&self.document).map_err(|e| CoreError::encode(&self.path, e))
    }

    pub fn save(&mut self) -> Result<()> {
        let path = self.path.clone();
        self.save_as(&path)
    }

    /// Writes the encoded document to `path`; the in-memory edits become the
    /// new pristine state only once the write succeeded.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        fsutil::write_atomic(path, &bytes)?;
        log::info!(
            "saved {} ({} pending changes written)",
            path.display(),
            self.document.changes().len()
        );
        self.document.commit();
        Ok(())
    }
}
