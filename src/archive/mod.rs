//! Artifact container: a deterministic gzip-compressed tar archive holding
//! the manifest, the payload and, for deltas, per-file diff streams.

pub mod format;
pub mod reader;
pub mod writer;

pub use format::{
    ArchiveError, DeltaEntry, DeltaManifest, DeltaOperation, FileEntry, PackageManifest,
    sha256_hex,
};
pub use reader::{Artifact, open_artifact, read_artifact, read_manifest};
pub use writer::{write_atomic, write_delta, write_full};
