use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::field_path::FieldPath;

/// Flat classification of [`CoreError`] for front ends that only need to
/// branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorCode {
    Format,
    PathNotFound,
    InvalidPath,
    InvalidValue,
    Encode,
    Io,
    Archive,
    Range,
    InvalidPermutation,
    Duplicate,
    EmptySelection,
    NotFound,
    MissingFile,
    Busy,
    Image,
}

impl CoreErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::PathNotFound => "path_not_found",
            Self::InvalidPath => "invalid_path",
            Self::InvalidValue => "invalid_value",
            Self::Encode => "encode",
            Self::Io => "io",
            Self::Archive => "archive",
            Self::Range => "range",
            Self::InvalidPermutation => "invalid_permutation",
            Self::Duplicate => "duplicate",
            Self::EmptySelection => "empty_selection",
            Self::NotFound => "not_found",
            Self::MissingFile => "missing_file",
            Self::Busy => "busy",
            Self::Image => "image",
        }
    }
}

/// Failures while turning raw artifact bytes into a document tree.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("artifact is empty")]
    Empty,
    #[error("artifact is not valid UTF-8 {stage}: {source}")]
    InvalidUtf8 {
        stage: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {expected} at `{path}`, found {found}")]
    UnexpectedShape {
        path: FieldPath,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
}

/// Failures while turning a document tree back into artifact bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("duplicate key {key:?} in mapping at `{path}`")]
    DuplicateKey { path: FieldPath, key: String },
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{artifact}: {source}")]
    Format {
        artifact: String,
        #[source]
        source: FormatError,
    },
    #[error("field path `{0}` does not exist")]
    PathNotFound(FieldPath),
    #[error("invalid field path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("{artifact}: {source}")]
    Encode {
        artifact: String,
        #[source]
        source: EncodeError,
    },
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("index {index} is out of range (count {len})")]
    Range { index: usize, len: usize },
    #[error("invalid permutation: {0}")]
    InvalidPermutation(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("selection is empty")]
    EmptySelection,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("missing file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("operation already in progress on {}", .0.display())]
    Busy(PathBuf),
    #[error("{context}: {source}")]
    Image {
        context: String,
        #[source]
        source: image::ImageError,
    },
}

impl CoreError {
    pub fn code(&self) -> CoreErrorCode {
        match self {
            Self::Format { .. } => CoreErrorCode::Format,
            Self::PathNotFound(_) => CoreErrorCode::PathNotFound,
            Self::InvalidPath { .. } => CoreErrorCode::InvalidPath,
            Self::InvalidValue(_) => CoreErrorCode::InvalidValue,
            Self::Encode { .. } => CoreErrorCode::Encode,
            Self::Io { .. } => CoreErrorCode::Io,
            Self::Archive { .. } => CoreErrorCode::Archive,
            Self::Range { .. } => CoreErrorCode::Range,
            Self::InvalidPermutation(_) => CoreErrorCode::InvalidPermutation,
            Self::Duplicate(_) => CoreErrorCode::Duplicate,
            Self::EmptySelection => CoreErrorCode::EmptySelection,
            Self::NotFound(_) => CoreErrorCode::NotFound,
            Self::MissingFile(_) => CoreErrorCode::MissingFile,
            Self::Busy(_) => CoreErrorCode::Busy,
            Self::Image { .. } => CoreErrorCode::Image,
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(artifact: impl AsRef<Path>, source: FormatError) -> Self {
        Self::Format {
            artifact: artifact.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn encode(artifact: impl AsRef<Path>, source: EncodeError) -> Self {
        Self::Encode {
            artifact: artifact.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn archive(path: impl AsRef<Path>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Reading a path that is absent is reported as `MissingFile` rather than `Io`.
    pub(crate) fn read_failure(path: impl AsRef<Path>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::MissingFile(path.as_ref().to_path_buf())
        } else {
            Self::io(path, source)
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
