//! Package building and delta reassembly.
//!
//! [`PackageBuilder`] turns a base directory plus a manifest template into a
//! full artifact, diffs two full artifacts into a delta artifact, and
//! reconstructs a full artifact from a base plus a delta. The byte-level
//! diff backend is a type parameter defaulting to [`BlockDiff`].
//!
//! [`BlockDiff`]: crate::diff::BlockDiff

pub mod builder;
pub mod reassemble;
pub mod template;

use std::path::PathBuf;

use semver::Version;

use crate::archive::ArchiveError;
use crate::diff::DiffError;
use crate::release::ReleaseError;

pub use builder::{BuildSpec, BuiltArtifact, PackageBuilder};
pub use template::{ManifestTemplate, TemplateError};

/// Error type for building and reassembling packages.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("manifest template not found: {}", .0.display())]
    ManifestMissing(PathBuf),
    #[error("no payload files left under {} after filtering", .0.display())]
    EmptyPayload(PathBuf),
    #[error("cannot read base artifact {}: {source}", path.display())]
    BaseUnreadable { path: PathBuf, source: ArchiveError },
    #[error("cannot read target artifact {}: {source}", path.display())]
    TargetUnreadable { path: PathBuf, source: ArchiveError },
    #[error("cannot read delta artifact {}: {source}", path.display())]
    DeltaUnreadable { path: PathBuf, source: ArchiveError },
    #[error("target version {target} is not greater than base version {base}")]
    VersionNotGreater { base: Version, target: Version },
    #[error("incompatible packages: {0}")]
    IncompatiblePackages(String),
    #[error("{} is not a delta artifact", .0.display())]
    NotADelta(PathBuf),
    #[error("base artifact is {actual}, delta expects {expected}")]
    BaseVersionMismatch { expected: String, actual: String },
    #[error("integrity check failed for {path}: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("malformed delta: {0}")]
    MalformedDelta(String),
    #[error("cannot apply diff to {path}: {source}")]
    Diff { path: String, source: DiffError },
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
