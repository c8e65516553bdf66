use std::path::{Path, PathBuf};

use crate::backup::BackupManager;
use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::gallery::{self, Gallery, GalleryOptions};
use crate::lock::OperationLocks;
use crate::save_file::{SAVE_FILE_NAME, SaveFile};
use crate::slots::{SLOT_CONTAINER_FILE_NAME, SlotContainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    SaveFile,
    SlotContainer,
    GalleryManifest,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [
        Artifact::SaveFile,
        Artifact::SlotContainer,
        Artifact::GalleryManifest,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::SaveFile => SAVE_FILE_NAME,
            Artifact::SlotContainer => SLOT_CONTAINER_FILE_NAME,
            Artifact::GalleryManifest => gallery::IDS_FILE_NAME,
        }
    }
}

/// One storage directory plus the configuration and operation guards every
/// manager opened from it shares.
#[derive(Debug, Clone)]
pub struct Workspace {
    storage_dir: PathBuf,
    config: Config,
    locks: OperationLocks,
}

impl Workspace {
    pub fn open(storage_dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        if !storage_dir.is_dir() {
            return Err(CoreError::MissingFile(storage_dir));
        }
        log::debug!("opened workspace {}", storage_dir.display());
        Ok(Self {
            storage_dir,
            config,
            locks: OperationLocks::new(),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &OperationLocks {
        &self.locks
    }

    pub fn artifact_path(&self, artifact: Artifact) -> PathBuf {
        self.storage_dir.join(artifact.file_name())
    }

    pub fn require(&self, artifact: Artifact) -> Result<PathBuf> {
        let path = self.artifact_path(artifact);
        if path.is_file() {
            Ok(path)
        } else {
            Err(CoreError::MissingFile(path))
        }
    }

    pub fn missing_artifacts(&self) -> Vec<Artifact> {
        Artifact::ALL
            .into_iter()
            .filter(|artifact| !self.artifact_path(*artifact).is_file())
            .collect()
    }

    pub fn save_file(&self) -> Result<SaveFile> {
        SaveFile::open(self.require(Artifact::SaveFile)?)
    }

    pub fn slot_container(&self) -> Result<SlotContainer> {
        SlotContainer::open(self.require(Artifact::SlotContainer)?)
    }

    pub fn gallery(&self) -> Result<Gallery> {
        self.require(Artifact::GalleryManifest)?;
        Gallery::load_with(&self.storage_dir, GalleryOptions::from(&self.config))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config
            .backup_dir
            .clone()
            .unwrap_or_else(|| BackupManager::default_dir_for(&self.storage_dir))
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.backup_dir(), &self.config, self.locks.clone())
    }
}
