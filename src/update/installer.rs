// Installer boundary and the directory installer.
//
// Layout under the install root:
//
//   <root>/app-<version>/...                    installed payload
//   <root>/app-<version>/.oxipack-release.json  descriptor of that install
//   <root>/.app-<version>.partial/              staging, renamed on success

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use semver::Version;
use tokio_util::sync::CancellationToken;

use crate::archive::{self, ArchiveError};
use crate::release::App;

/// Descriptor file written into every installed version directory.
pub const RELEASE_MARKER: &str = ".oxipack-release.json";

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("cannot install {}: {source}", path.display())]
    Artifact { path: PathBuf, source: ArchiveError },
    #[error("{} is a delta artifact; only full artifacts can be installed", .0.display())]
    NotAFullPackage(PathBuf),
    #[error("{} already exists and holds a different release", .0.display())]
    Occupied(PathBuf),
    #[error("install I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid release marker: {0}")]
    Marker(#[from] serde_json::Error),
    #[error("install task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("operation cancelled")]
    Cancelled,
}

/// Applies a verified full artifact to an install root.
///
/// Implementations must be idempotent and all-or-nothing.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(
        &self,
        artifact: &Path,
        root_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<App, InstallError>;
}

/// Directory that holds `version` under `root`.
pub fn app_directory(root: &Path, version: &Version) -> PathBuf {
    root.join(format!("app-{version}"))
}

/// Descriptor recorded in an install directory, if any.
pub fn installed_release(app_dir: &Path) -> Result<Option<App>, InstallError> {
    match fs::read(app_dir.join(RELEASE_MARKER)) {
        Ok(json) => Ok(Some(serde_json::from_slice(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Extracts full artifacts into `<root>/app-<version>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryInstaller;

#[async_trait]
impl Installer for DirectoryInstaller {
    async fn install(
        &self,
        artifact: &Path,
        root_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<App, InstallError> {
        let artifact = artifact.to_path_buf();
        let root_dir = root_dir.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || install_blocking(&artifact, &root_dir, &cancel)).await?
    }
}

fn install_blocking(
    artifact_path: &Path,
    root_dir: &Path,
    cancel: &CancellationToken,
) -> Result<App, InstallError> {
    let unreadable = |source| InstallError::Artifact {
        path: artifact_path.to_path_buf(),
        source,
    };
    let artifact = archive::open_artifact(artifact_path).map_err(unreadable)?;
    if artifact.is_delta() {
        return Err(InstallError::NotAFullPackage(artifact_path.to_path_buf()));
    }
    artifact.verify_payload().map_err(unreadable)?;
    let app = artifact.manifest.app;

    let target = app_directory(root_dir, &app.version);
    if target.exists() {
        return match installed_release(&target)? {
            Some(existing) if existing == app => {
                log::info!("{} {} is already installed", app.id, app.version);
                Ok(app)
            }
            _ => Err(InstallError::Occupied(target)),
        };
    }

    let staging = root_dir.join(format!(".app-{}.partial", app.version));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let result = (|| {
        for (rel, data) in &artifact.payload {
            if cancel.is_cancelled() {
                return Err(InstallError::Cancelled);
            }
            let path = staging.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, data)?;
        }
        fs::create_dir_all(&staging)?;
        fs::write(staging.join(RELEASE_MARKER), serde_json::to_vec_pretty(&app)?)?;
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        fs::rename(&staging, &target)?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    log::info!(
        "Installed {} {} into {}",
        app.id,
        app.version,
        target.display()
    );
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{FileEntry, PackageManifest, write_full};
    use crate::release::tests::demo_app;
    use std::collections::BTreeMap;

    fn artifact_in(dir: &Path, version: &str) -> (PathBuf, App) {
        let mut payload = BTreeMap::new();
        payload.insert("bin/app.exe".to_string(), b"exe".to_vec());
        payload.insert("readme.txt".to_string(), version.as_bytes().to_vec());
        let files = payload
            .iter()
            .map(|(p, d)| FileEntry::describe(p.clone(), d))
            .collect();
        let app = demo_app(version);
        let bytes = write_full(&PackageManifest::new(app.clone(), files), &payload).unwrap();
        let path = dir.join(crate::release::naming::encode(&app));
        fs::write(&path, bytes).unwrap();
        (path, app)
    }

    #[tokio::test]
    async fn installs_into_versioned_directory() {
        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("root");
        let (path, app) = artifact_in(work.path(), "1.2.0");
        let cancel = CancellationToken::new();

        let installed = DirectoryInstaller.install(&path, &root, &cancel).await.unwrap();
        assert_eq!(installed, app);
        let dir = app_directory(&root, &app.version);
        assert_eq!(fs::read(dir.join("readme.txt")).unwrap(), b"1.2.0");
        assert_eq!(installed_release(&dir).unwrap(), Some(app.clone()));
        assert!(!root.join(".app-1.2.0.partial").exists());

        let again = DirectoryInstaller.install(&path, &root, &cancel).await.unwrap();
        assert_eq!(again, app);
    }

    #[tokio::test]
    async fn foreign_directory_is_not_overwritten() {
        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("root");
        let (path, app) = artifact_in(work.path(), "1.2.0");
        fs::create_dir_all(app_directory(&root, &app.version)).unwrap();

        let err = DirectoryInstaller
            .install(&path, &root, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Occupied(_)));
    }

    #[tokio::test]
    async fn cancelled_install_leaves_nothing() {
        let work = tempfile::tempdir().unwrap();
        let root = work.path().join("root");
        let (path, app) = artifact_in(work.path(), "1.2.0");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = DirectoryInstaller.install(&path, &root, &cancel).await.unwrap_err();
        assert!(matches!(err, InstallError::Cancelled));
        assert!(!app_directory(&root, &app.version).exists());
        assert!(!root.join(".app-1.2.0.partial").exists());
    }
}
