use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, FormatError, Result};
use crate::fsutil;

pub const ENV_BACKUP_DIR: &str = "DCSM_BACKUP_DIR";
pub const ENV_SNAPSHOT_BEFORE_RESTORE: &str = "DCSM_SNAPSHOT_BEFORE_RESTORE";
pub const ENV_ALLOW_DUPLICATES: &str = "DCSM_ALLOW_DUPLICATES";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Adding an image whose bytes match an existing screenshot fails.
    #[default]
    Reject,
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults to `dcsm_backups` next to the storage directory.
    pub backup_dir: Option<PathBuf>,
    pub snapshot_before_restore: bool,
    pub duplicate_policy: DuplicatePolicy,
    /// Used when no existing thumbnail reveals the size the game expects.
    pub thumbnail_size: (u32, u32),
    pub thumbnail_quality: u8,
    pub compression_level: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: None,
            snapshot_before_restore: true,
            duplicate_policy: DuplicatePolicy::Reject,
            thumbnail_size: (1280, 960),
            thumbnail_quality: 90,
            compression_level: 7,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Reads a JSON config file (missing keys take defaults), then applies
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fsutil::read(path)?;
        let config: Config = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::format(path, FormatError::Json(e)))?;
        Ok(config.with_overrides(|name| env::var(name).ok()))
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_BACKUP_DIR).filter(|v| !v.trim().is_empty()) {
            self.backup_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup(ENV_SNAPSHOT_BEFORE_RESTORE).and_then(|v| parse_flag(&v)) {
            self.snapshot_before_restore = value;
        }
        if let Some(allow) = lookup(ENV_ALLOW_DUPLICATES).and_then(|v| parse_flag(&v)) {
            self.duplicate_policy = if allow {
                DuplicatePolicy::Allow
            } else {
                DuplicatePolicy::Reject
            };
        }
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            log::warn!("ignoring unrecognised boolean {other:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let config = Config::default().with_overrides(|name| match name {
            ENV_BACKUP_DIR => Some("/tmp/dcsm".to_string()),
            ENV_SNAPSHOT_BEFORE_RESTORE => Some("off".to_string()),
            ENV_ALLOW_DUPLICATES => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config.backup_dir, Some(PathBuf::from("/tmp/dcsm")));
        assert!(!config.snapshot_before_restore);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.thumbnail_size, (1280, 960));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"duplicate_policy":"allow","thumbnail_quality":80}"#)
                .expect("parse config");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Allow);
        assert_eq!(config.thumbnail_quality, 80);
        assert_eq!(config.compression_level, 7);
    }
}
