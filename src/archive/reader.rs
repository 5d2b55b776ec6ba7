// Artifact reader.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use super::format::{
    ArchiveError, DELTA_PATH, DIFF_PREFIX, DeltaManifest, FORMAT_VERSION, FileEntry,
    MANIFEST_PATH, PAYLOAD_PREFIX, PackageManifest, sha256_hex, validate_relative_path,
};

const PREALLOC_LIMIT: u64 = 1 << 20;

/// A fully loaded artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub manifest: PackageManifest,
    /// Present exactly when the descriptor is marked as a delta.
    pub delta: Option<DeltaManifest>,
    /// `payload/` entries keyed by relative path.
    pub payload: BTreeMap<String, Vec<u8>>,
    /// `diff/` entries keyed by relative path.
    pub diffs: BTreeMap<String, Vec<u8>>,
}

impl Artifact {
    pub fn is_delta(&self) -> bool {
        self.delta.is_some()
    }

    /// Check that the payload matches the declared file list exactly.
    ///
    /// Only meaningful for full artifacts.
    pub fn verify_payload(&self) -> Result<(), ArchiveError> {
        verify_files(&self.manifest.files, &self.payload)
    }
}

/// Check that `files` holds exactly the entries declared in `declared`, with
/// matching sizes and hashes.
pub fn verify_files(
    declared: &[FileEntry],
    files: &BTreeMap<String, Vec<u8>>,
) -> Result<(), ArchiveError> {
    for entry in declared {
        let data = files
            .get(&entry.path)
            .ok_or_else(|| ArchiveError::MissingEntry(format!("{PAYLOAD_PREFIX}{}", entry.path)))?;
        verify_entry(entry, data)?;
    }
    if let Some(extra) = files
        .keys()
        .find(|path| !declared.iter().any(|e| &e.path == *path))
    {
        return Err(ArchiveError::UnexpectedEntry(format!("{PAYLOAD_PREFIX}{extra}")));
    }
    Ok(())
}

/// Compare one file against its declared size and hash.
pub fn verify_entry(entry: &FileEntry, data: &[u8]) -> Result<(), ArchiveError> {
    if entry.size != data.len() as u64 {
        return Err(ArchiveError::SizeMismatch {
            path: entry.path.clone(),
            expected: entry.size,
            actual: data.len() as u64,
        });
    }
    let actual = sha256_hex(data);
    if actual != entry.sha256 {
        return Err(ArchiveError::HashMismatch {
            path: entry.path.clone(),
            expected: entry.sha256.clone(),
            actual,
        });
    }
    Ok(())
}

fn insert_unique(
    map: &mut BTreeMap<String, Vec<u8>>,
    full_path: &str,
    rel: &str,
    data: Vec<u8>,
) -> Result<(), ArchiveError> {
    validate_relative_path(rel)?;
    if map.insert(rel.to_string(), data).is_some() {
        return Err(ArchiveError::DuplicateEntry(full_path.to_string()));
    }
    Ok(())
}

/// Parse an artifact from its serialized bytes.
pub fn read_artifact(bytes: &[u8]) -> Result<Artifact, ArchiveError> {
    let mut archive = Archive::new(GzDecoder::new(bytes));

    let mut manifest_json = None;
    let mut delta_json = None;
    let mut payload = BTreeMap::new();
    let mut diffs = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = String::from_utf8(entry.path_bytes().into_owned())
            .map_err(|e| {
                ArchiveError::UnsafePath(String::from_utf8_lossy(e.as_bytes()).into_owned())
            })?;
        // Declared sizes are untrusted; let the buffer grow past this.
        let mut data = Vec::with_capacity(entry.size().min(PREALLOC_LIMIT) as usize);
        entry.read_to_end(&mut data)?;

        if path == MANIFEST_PATH {
            if manifest_json.replace(data).is_some() {
                return Err(ArchiveError::DuplicateEntry(path));
            }
        } else if path == DELTA_PATH {
            if delta_json.replace(data).is_some() {
                return Err(ArchiveError::DuplicateEntry(path));
            }
        } else if let Some(rel) = path.strip_prefix(PAYLOAD_PREFIX) {
            insert_unique(&mut payload, &path, rel, data)?;
        } else if let Some(rel) = path.strip_prefix(DIFF_PREFIX) {
            insert_unique(&mut diffs, &path, rel, data)?;
        } else {
            return Err(ArchiveError::UnexpectedEntry(path));
        }
    }

    let manifest_json =
        manifest_json.ok_or_else(|| ArchiveError::MissingEntry(MANIFEST_PATH.to_string()))?;
    let manifest: PackageManifest = serde_json::from_slice(&manifest_json)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(ArchiveError::UnsupportedFormat(manifest.format_version));
    }

    let delta = match (manifest.app.delta, delta_json) {
        (true, Some(json)) => Some(serde_json::from_slice::<DeltaManifest>(&json)?),
        (false, None) => None,
        (true, None) => return Err(ArchiveError::MissingEntry(DELTA_PATH.to_string())),
        (false, Some(_)) => return Err(ArchiveError::KindMismatch),
    };
    if delta.is_none() && !diffs.is_empty() {
        return Err(ArchiveError::KindMismatch);
    }

    Ok(Artifact {
        manifest,
        delta,
        payload,
        diffs,
    })
}

/// Load an artifact from disk.
pub fn open_artifact(path: &Path) -> Result<Artifact, ArchiveError> {
    let bytes = std::fs::read(path)?;
    read_artifact(&bytes)
}

/// Load only the manifest of the artifact at `path`.
pub fn read_manifest(path: &Path) -> Result<PackageManifest, ArchiveError> {
    Ok(open_artifact(path)?.manifest)
}
