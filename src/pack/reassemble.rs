// Delta reassembly.
//
// Rebuilds the target full artifact from a base full artifact and a delta.
// Every base file is checked against the hashes recorded at diff time and
// every reconstructed file against the target manifest before anything is
// serialized; the result is byte-identical to the artifact the delta was
// computed from.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::archive::{self, DeltaOperation, PackageManifest, sha256_hex};
use crate::diff::ByteDiff;
use crate::release::{App, naming};

use super::{PackError, PackageBuilder};

fn check_cancel(cancel: &CancellationToken) -> Result<(), PackError> {
    if cancel.is_cancelled() {
        Err(PackError::Cancelled)
    } else {
        Ok(())
    }
}

fn integrity(path: &str, expected: &str, data: Option<&[u8]>) -> Result<(), PackError> {
    let actual = data.map_or_else(|| "<missing>".to_string(), sha256_hex);
    if actual == expected {
        Ok(())
    } else {
        Err(PackError::IntegrityMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

impl<D: ByteDiff> PackageBuilder<D> {
    /// Reconstruct the full artifact described by the delta at `delta_path`
    /// using the base full artifact at `base_path`.
    ///
    /// Returns the serialized full artifact and its descriptor (the delta's
    /// target identity with the delta marking cleared).
    pub fn reassemble(
        &self,
        delta_path: &Path,
        base_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, App), PackError> {
        check_cancel(cancel)?;
        let delta = archive::open_artifact(delta_path).map_err(|source| {
            PackError::DeltaUnreadable {
                path: delta_path.to_path_buf(),
                source,
            }
        })?;
        let Some(section) = delta.delta.as_ref() else {
            return Err(PackError::NotADelta(delta_path.to_path_buf()));
        };
        let target_manifest = &delta.manifest;
        target_manifest.app.validate()?;
        match &target_manifest.app.delta_summary {
            Some(summary)
                if summary.full_filename == section.base_filename
                    && summary.base_version == section.base_version => {}
            _ => {
                return Err(PackError::MalformedDelta(
                    "descriptor summary disagrees with delta section".to_string(),
                ));
            }
        }

        check_cancel(cancel)?;
        let base = archive::open_artifact(base_path).map_err(|source| {
            PackError::BaseUnreadable {
                path: base_path.to_path_buf(),
                source,
            }
        })?;
        let base_name = naming::encode(&base.manifest.app);
        if base.is_delta()
            || base_name != section.base_filename
            || naming::compare_versions(&base.manifest.app.version, &section.base_version)
                != Ordering::Equal
        {
            return Err(PackError::BaseVersionMismatch {
                expected: section.base_filename.clone(),
                actual: base_name,
            });
        }

        // Base content as recorded at diff time.
        for file in &section.base_files {
            integrity(
                &file.path,
                &file.sha256,
                base.payload.get(&file.path).map(Vec::as_slice),
            )?;
        }

        let mut output: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for entry in &section.entries {
            check_cancel(cancel)?;
            let declared = target_manifest.file(&entry.path).ok_or_else(|| {
                PackError::MalformedDelta(format!("{} is not in the target manifest", entry.path))
            })?;
            let data = match &entry.operation {
                DeltaOperation::Copy => {
                    let data = base.payload.get(&entry.path);
                    integrity(&entry.path, &declared.sha256, data.map(Vec::as_slice))?;
                    data.cloned().unwrap_or_default()
                }
                DeltaOperation::Patch { base_sha256 } => {
                    let source = base.payload.get(&entry.path);
                    integrity(&entry.path, base_sha256, source.map(Vec::as_slice))?;
                    let stream = delta.diffs.get(&entry.path).ok_or_else(|| {
                        PackError::MalformedDelta(format!("no diff stream for {}", entry.path))
                    })?;
                    let source = source.map(Vec::as_slice).unwrap_or_default();
                    self.diff_backend().patch(source, stream).map_err(|source| {
                        PackError::Diff {
                            path: entry.path.clone(),
                            source,
                        }
                    })?
                }
                DeltaOperation::Add => delta.payload.get(&entry.path).cloned().ok_or_else(|| {
                    PackError::MalformedDelta(format!("no payload for added {}", entry.path))
                })?,
            };

            if data.len() as u64 != declared.size {
                return Err(PackError::IntegrityMismatch {
                    path: entry.path.clone(),
                    expected: format!("{} bytes", declared.size),
                    actual: format!("{} bytes", data.len()),
                });
            }
            integrity(&entry.path, &declared.sha256, Some(data.as_slice()))?;
            if output.insert(entry.path.clone(), data).is_some() {
                return Err(PackError::MalformedDelta(format!(
                    "{} listed more than once",
                    entry.path
                )));
            }
        }

        if output.len() != target_manifest.files.len() {
            return Err(PackError::MalformedDelta(format!(
                "reconstructed {} files, manifest declares {}",
                output.len(),
                target_manifest.files.len()
            )));
        }
        if let Some(path) = section.removed.iter().find(|p| output.contains_key(*p)) {
            return Err(PackError::MalformedDelta(format!(
                "{path} is both removed and present"
            )));
        }

        check_cancel(cancel)?;
        let app = target_manifest.app.as_full();
        let manifest = PackageManifest {
            app: app.clone(),
            ..target_manifest.clone()
        };
        let bytes = archive::write_full(&manifest, &output)?;
        log::debug!(
            "Reassembled {} from {} ({} files)",
            naming::encode(&app),
            section.base_filename,
            output.len()
        );
        Ok((bytes, app))
    }

    /// [`reassemble`](Self::reassemble) and write the result under its
    /// canonical filename in `out_dir`.
    ///
    /// The artifact appears at its final path only once fully written.
    pub fn reassemble_into(
        &self,
        delta_path: &Path,
        base_path: &Path,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, App), PackError> {
        let (bytes, app) = self.reassemble(delta_path, base_path, cancel)?;
        check_cancel(cancel)?;
        let path = out_dir.join(naming::encode(&app));
        archive::write_atomic(&path, &bytes)?;
        Ok((path, app))
    }
}
