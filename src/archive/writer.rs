// Deterministic artifact writer.
//
// Headers carry zero mtime/uid/gid and a fixed mode; entries are appended in
// a fixed order (manifests, then payload and diffs sorted by path).

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};

use super::format::{
    ArchiveError, DELTA_PATH, DIFF_PREFIX, DeltaManifest, MANIFEST_PATH, PAYLOAD_PREFIX,
    PackageManifest, validate_relative_path,
};

struct ArchiveWriter {
    builder: Builder<GzEncoder<Vec<u8>>>,
}

impl ArchiveWriter {
    fn new() -> Self {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);
        Self { builder }
    }

    fn add(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        self.builder.append_data(&mut header, path, data)?;
        Ok(())
    }

    fn add_json<T: serde::Serialize>(&mut self, path: &str, value: &T) -> Result<(), ArchiveError> {
        let json = serde_json::to_vec_pretty(value)?;
        self.add(path, &json)
    }

    fn add_tree(
        &mut self,
        prefix: &str,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), ArchiveError> {
        for (path, data) in files {
            validate_relative_path(path)?;
            self.add(&format!("{prefix}{path}"), data)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// Serialize a full artifact.
pub fn write_full(
    manifest: &PackageManifest,
    payload: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ArchiveWriter::new();
    writer.add_json(MANIFEST_PATH, manifest)?;
    writer.add_tree(PAYLOAD_PREFIX, payload)?;
    writer.finish()
}

/// Serialize a delta artifact: added files go under `payload/`, diff
/// streams under `diff/`.
pub fn write_delta(
    manifest: &PackageManifest,
    delta: &DeltaManifest,
    added: &BTreeMap<String, Vec<u8>>,
    diffs: &BTreeMap<String, Vec<u8>>,
) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ArchiveWriter::new();
    writer.add_json(MANIFEST_PATH, manifest)?;
    writer.add_json(DELTA_PATH, delta)?;
    writer.add_tree(PAYLOAD_PREFIX, added)?;
    writer.add_tree(DIFF_PREFIX, diffs)?;
    writer.finish()
}

/// Sibling path used while `path` is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `bytes` to a temporary sibling, then rename onto `path`.
///
/// Either the complete file appears at `path` or nothing does.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let temp = partial_path(path);
    let result = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::format::FileEntry;
    use crate::release::tests::demo_app;

    fn sample() -> (PackageManifest, BTreeMap<String, Vec<u8>>) {
        let mut payload = BTreeMap::new();
        payload.insert("bin/app".to_string(), b"binary".to_vec());
        payload.insert("readme.txt".to_string(), b"hello".to_vec());
        let files = payload
            .iter()
            .map(|(p, d)| FileEntry::describe(p.clone(), d))
            .collect();
        (PackageManifest::new(demo_app("1.0.0"), files), payload)
    }

    #[test]
    fn full_artifact_is_deterministic() {
        let (manifest, payload) = sample();
        let a = write_full(&manifest, &payload).unwrap();
        let b = write_full(&manifest, &payload).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..2], &[0x1F, 0x8B], "gzip magic");
    }

    #[test]
    fn unsafe_payload_path_is_rejected() {
        let (manifest, mut payload) = sample();
        payload.insert("../escape".to_string(), Vec::new());
        assert!(matches!(
            write_full(&manifest, &payload),
            Err(ArchiveError::UnsafePath(_))
        ));
    }

    #[test]
    fn atomic_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.oxpkg");
        write_atomic(&target, b"content").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"content");
        assert!(!partial_path(&target).exists());
    }
}
