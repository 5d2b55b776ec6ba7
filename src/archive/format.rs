// Artifact container layout and manifest types.
//
// An artifact is a gzip-compressed tar archive:
//
//   oxipack/manifest.json   PackageManifest (descriptor + declared file list)
//   oxipack/delta.json      DeltaManifest, delta artifacts only
//   payload/<path>          file contents (full) or added files (delta)
//   diff/<path>             diff streams for patched files (delta)
//
// Entry order and tar headers are fixed so identical inputs produce
// identical bytes.

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::release::App;

/// Current container format revision.
pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_PATH: &str = "oxipack/manifest.json";
pub const DELTA_PATH: &str = "oxipack/delta.json";
pub const PAYLOAD_PREFIX: &str = "payload/";
pub const DIFF_PREFIX: &str = "diff/";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("artifact is missing {0}")]
    MissingEntry(String),
    #[error("artifact contains unexpected entry {0}")]
    UnexpectedEntry(String),
    #[error("artifact contains {0} more than once")]
    DuplicateEntry(String),
    #[error("unsafe payload path '{0}'")]
    UnsafePath(String),
    #[error("unsupported artifact format version {0} (supported: {FORMAT_VERSION})")]
    UnsupportedFormat(u32),
    #[error("payload {path}: expected sha256 {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("payload {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("descriptor delta flag does not match artifact contents")]
    KindMismatch,
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Declared payload file with its content identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Forward-slash relative path.
    pub path: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
}

impl FileEntry {
    pub fn describe(path: impl Into<String>, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            size: data.len() as u64,
            sha256: sha256_hex(data),
        }
    }
}

/// Manifest embedded in every artifact.
///
/// For delta artifacts `files` is the file set of the target release, i.e.
/// what reassembly must reproduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub format_version: u32,
    pub app: App,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    pub files: Vec<FileEntry>,
}

impl PackageManifest {
    pub fn new(app: App, files: Vec<FileEntry>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            app,
            title: None,
            description: None,
            authors: Vec::new(),
            files,
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// How a target file is produced from the base artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DeltaOperation {
    /// Unchanged: take the base file as is.
    Copy,
    /// Changed: apply `diff/<path>` to the base file with this hash.
    Patch { base_sha256: String },
    /// New: contents stored under `payload/<path>`.
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    pub path: String,
    #[serde(flatten)]
    pub operation: DeltaOperation,
}

/// Delta section of a delta artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaManifest {
    /// Canonical filename of the base full artifact.
    pub base_filename: String,
    pub base_version: Version,
    /// Declared file set of the base artifact at diff time.
    pub base_files: Vec<FileEntry>,
    /// One entry per target file, sorted by path.
    pub entries: Vec<DeltaEntry>,
    /// Base paths absent from the target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Reject absolute paths, backslashes and `.`/`..` components.
pub fn validate_relative_path(path: &str) -> Result<(), ArchiveError> {
    let ok = !path.is_empty()
        && !path.contains('\\')
        && path
            .split('/')
            .all(|c| !c.is_empty() && c != "." && c != ".." && !c.contains(':'));
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::UnsafePath(path.to_string()))
    }
}
