pub mod backup;
pub mod codec;
pub mod config;
pub mod diff;
pub mod document;
pub mod envelope;
mod error;
pub mod field_path;
mod fsutil;
pub mod gallery;
pub mod lock;
pub mod node;
pub mod save_file;
pub mod slots;
pub mod well_known;
pub mod workspace;

pub use backup::{BackupManager, BackupSnapshot, format_size};
pub use config::{Config, DuplicatePolicy};
pub use diff::{Change, ChangeKind, DiffOptions};
pub use document::{SaveDocument, WriteMode, parse_literal};
pub use envelope::{Envelope, JsonLayout};
pub use error::{CoreError, CoreErrorCode, EncodeError, FormatError, Result};
pub use field_path::{FieldPath, Segment};
pub use gallery::{Gallery, GalleryEntry, GalleryOptions};
pub use lock::{OperationGuard, OperationLocks};
pub use node::{Mapping, Node};
pub use save_file::SaveFile;
pub use slots::{SlotContainer, SlotSummary};
pub use well_known::{Collection, CollectionProgress, collection_progress};
pub use workspace::{Artifact, Workspace};
