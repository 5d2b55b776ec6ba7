// Full and delta package builder.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::archive::{
    self, Artifact, DeltaEntry, DeltaManifest, DeltaOperation, FileEntry, PackageManifest,
};
use crate::diff::{BlockDiff, ByteDiff};
use crate::progress::Progress;
use crate::release::{App, DeltaSummary, naming};

use super::PackError;
use super::template;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Everything needed to build one full artifact. Consumed by a single build.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub base_directory: PathBuf,
    pub template_path: PathBuf,
    pub progress: Progress,
    pub app: App,
}

/// A serialized artifact together with the descriptor embedded in it.
#[derive(Debug, Clone)]
pub struct BuiltArtifact {
    pub app: App,
    pub bytes: Vec<u8>,
}

impl BuiltArtifact {
    /// Canonical filename for this artifact.
    pub fn filename(&self) -> String {
        naming::encode(&self.app)
    }

    /// Write the artifact under its canonical filename in `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(self.filename());
        archive::write_atomic(&path, &self.bytes)?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PackageBuilder<D = BlockDiff> {
    diff: D,
}

impl PackageBuilder<BlockDiff> {
    pub fn new() -> Self {
        Self { diff: BlockDiff }
    }
}

fn open_full(
    path: &Path,
    unreadable: impl Fn(PathBuf, archive::ArchiveError) -> PackError,
) -> Result<Artifact, PackError> {
    let artifact = archive::open_artifact(path).map_err(|e| unreadable(path.to_path_buf(), e))?;
    if artifact.is_delta() {
        return Err(PackError::IncompatiblePackages(format!(
            "{} is a delta artifact",
            path.display()
        )));
    }
    artifact
        .verify_payload()
        .map_err(|e| unreadable(path.to_path_buf(), e))?;
    Ok(artifact)
}

impl<D: ByteDiff> PackageBuilder<D> {
    pub fn with_diff(diff: D) -> Self {
        Self { diff }
    }

    pub(crate) fn diff_backend(&self) -> &D {
        &self.diff
    }

    /// Build a full artifact from `spec`.
    pub fn build_full(&self, spec: &BuildSpec) -> Result<BuiltArtifact, PackError> {
        let app = &spec.app;
        app.validate()?;
        if app.delta {
            return Err(PackError::IncompatiblePackages(
                "a full artifact cannot embed a delta descriptor".to_string(),
            ));
        }
        if !spec.template_path.is_file() {
            return Err(PackError::ManifestMissing(spec.template_path.clone()));
        }
        spec.progress.report(0);

        let rendered = template::render(&spec.template_path, app, &spec.base_directory)?;
        if rendered.files.is_empty() {
            return Err(PackError::EmptyPayload(spec.base_directory.clone()));
        }

        let mut payload = BTreeMap::new();
        for (target, source) in &rendered.files {
            payload.insert(target.clone(), std::fs::read(source)?);
        }
        let files = payload
            .iter()
            .map(|(path, data)| FileEntry::describe(path.clone(), data))
            .collect();
        spec.progress.report(50);

        let manifest = PackageManifest {
            title: rendered.title,
            description: rendered.description,
            authors: rendered.authors,
            ..PackageManifest::new(app.clone(), files)
        };
        let bytes = archive::write_full(&manifest, &payload)?;
        spec.progress.report(100);

        log::info!(
            "Built full package {} ({} files, {} bytes)",
            naming::encode(app),
            payload.len(),
            bytes.len()
        );
        Ok(BuiltArtifact {
            app: app.clone(),
            bytes,
        })
    }

    /// Diff two full artifacts into a delta artifact.
    ///
    /// Returns the artifact and the delta descriptor embedded in it.
    pub fn build_delta(
        &self,
        base_path: &Path,
        target_path: &Path,
        progress: &Progress,
    ) -> Result<(BuiltArtifact, App), PackError> {
        let base = open_full(base_path, |path, source| PackError::BaseUnreadable {
            path,
            source,
        })?;
        let target = open_full(target_path, |path, source| PackError::TargetUnreadable {
            path,
            source,
        })?;

        let base_app = &base.manifest.app;
        let target_app = &target.manifest.app;
        if base_app.id != target_app.id || base_app.target.rid != target_app.target.rid {
            return Err(PackError::IncompatiblePackages(format!(
                "{} {} cannot be diffed against {} {}",
                target_app.id, target_app.target.rid, base_app.id, base_app.target.rid
            )));
        }
        if naming::compare_versions(&target_app.version, &base_app.version) != Ordering::Greater {
            return Err(PackError::VersionNotGreater {
                base: base_app.version.clone(),
                target: target_app.version.clone(),
            });
        }
        progress.report(0);

        let mut entries = Vec::with_capacity(target.manifest.files.len());
        let mut added = BTreeMap::new();
        let mut diffs = BTreeMap::new();
        let mut files = target.manifest.files.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        for file in &files {
            let data = &target.payload[&file.path];
            let operation = match base.manifest.file(&file.path) {
                Some(old) if old.sha256 == file.sha256 => DeltaOperation::Copy,
                Some(old) => {
                    let diff = self.diff.diff(&base.payload[&old.path], data);
                    if diff.len() < data.len() {
                        diffs.insert(file.path.clone(), diff);
                        DeltaOperation::Patch {
                            base_sha256: old.sha256.clone(),
                        }
                    } else {
                        added.insert(file.path.clone(), data.clone());
                        DeltaOperation::Add
                    }
                }
                None => {
                    added.insert(file.path.clone(), data.clone());
                    DeltaOperation::Add
                }
            };
            entries.push(DeltaEntry {
                path: file.path.clone(),
                operation,
            });
        }
        let removed: Vec<String> = base
            .manifest
            .files
            .iter()
            .filter(|old| target.manifest.file(&old.path).is_none())
            .map(|old| old.path.clone())
            .collect();
        progress.report(50);

        let base_filename = naming::encode(base_app);
        let delta_app = target_app.as_delta(DeltaSummary {
            full_filename: base_filename.clone(),
            base_version: base_app.version.clone(),
        });
        let manifest = PackageManifest {
            app: delta_app.clone(),
            ..target.manifest.clone()
        };
        let delta = DeltaManifest {
            base_filename,
            base_version: base_app.version.clone(),
            base_files: base.manifest.files.clone(),
            entries,
            removed,
        };
        let bytes = archive::write_delta(&manifest, &delta, &added, &diffs)?;
        progress.report(100);

        log::info!(
            "Built delta package {} against {} ({} patched, {} added, {} removed, {} bytes)",
            naming::encode(&delta_app),
            delta.base_filename,
            diffs.len(),
            added.len(),
            delta.removed.len(),
            bytes.len()
        );
        Ok((
            BuiltArtifact {
                app: delta_app.clone(),
                bytes,
            },
            delta_app,
        ))
    }

    /// Re-embed `app` into the full artifact at `full_path` without touching
    /// the payload.
    pub fn rebrand(&self, full_path: &Path, app: &App) -> Result<BuiltArtifact, PackError> {
        app.validate()?;
        let artifact = open_full(full_path, |path, source| PackError::BaseUnreadable {
            path,
            source,
        })?;
        let current = &artifact.manifest.app;
        if app.delta
            || current.id != app.id
            || current.target.rid != app.target.rid
            || current.version != app.version
        {
            return Err(PackError::IncompatiblePackages(format!(
                "cannot rebrand {} as {}",
                naming::encode(current),
                naming::encode(app)
            )));
        }
        let manifest = PackageManifest {
            app: app.clone(),
            ..artifact.manifest
        };
        let bytes = archive::write_full(&manifest, &artifact.payload)?;
        Ok(BuiltArtifact {
            app: app.clone(),
            bytes,
        })
    }
}
