use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{CoreError, Result};

/// Per-resource "operation in progress" registry. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct OperationLocks {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `Busy` while another guard holds `resource`.
    pub fn acquire(&self, resource: &Path) -> Result<OperationGuard> {
        let key = lock_key(resource);
        if !self.held().insert(key.clone()) {
            return Err(CoreError::Busy(resource.to_path_buf()));
        }
        log::debug!("acquired operation guard on {}", key.display());
        Ok(OperationGuard {
            locks: self.clone(),
            key,
        })
    }

    pub fn is_held(&self, resource: &Path) -> bool {
        self.held().contains(&lock_key(resource))
    }

    fn held(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Canonical path when the resource exists, else the lexically absolute path,
/// so `storage` and `./storage` share one key either way.
fn lock_key(resource: &Path) -> PathBuf {
    resource
        .canonicalize()
        .or_else(|_| std::path::absolute(resource))
        .unwrap_or_else(|_| resource.to_path_buf())
}

#[derive(Debug)]
pub struct OperationGuard {
    locks: OperationLocks,
    key: PathBuf,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.locks.held().remove(&self.key);
    }
}
