// Package registry boundary and the directory-backed feed.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::archive::writer::partial_path;
use crate::release::{Feed, PackageName, naming};
use crate::retry::Transient;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("feed '{name}' is not reachable at {source_path}")]
    FeedNotFound { name: String, source_path: String },
    #[error("feed source '{0}' is not supported by this registry")]
    UnsupportedSource(String),
    #[error("package {0} not found")]
    PackageNotFound(String),
    #[error("'{}' is not a package file", .0.display())]
    InvalidPackageName(PathBuf),
    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

impl Transient for RegistryError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::NotFound
                    | io::ErrorKind::PermissionDenied
                    | io::ErrorKind::InvalidInput
            ),
            _ => false,
        }
    }
}

/// A package as listed by a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: PackageName,
    pub feed: Feed,
}

/// Transport for opaque package blobs.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Every version published under `package_id`, ascending.
    async fn list_versions(
        &self,
        package_id: &str,
        feed: &Feed,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageMetadata>, RegistryError>;

    /// Download `package` into `dest_dir` under its canonical filename.
    async fn download(
        &self,
        package: &PackageMetadata,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, RegistryError>;

    /// Publish the package file at `local_path` to `feed`.
    async fn push(
        &self,
        local_path: &Path,
        feed: &Feed,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError>;
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), RegistryError> {
    if cancel.is_cancelled() {
        Err(RegistryError::Cancelled)
    } else {
        Ok(())
    }
}

/// Copy `from` to `to` through a temporary sibling so `to` only ever holds a
/// complete file.
async fn copy_atomic(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = partial_path(to);
    let result = async {
        tokio::fs::copy(from, &temp).await?;
        tokio::fs::rename(&temp, to).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}

/// Registry whose feeds are plain directories of package files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryRegistry;

impl DirectoryRegistry {
    fn feed_dir(feed: &Feed) -> Result<PathBuf, RegistryError> {
        if feed.source.contains("://") {
            return Err(RegistryError::UnsupportedSource(feed.source.clone()));
        }
        Ok(PathBuf::from(&feed.source))
    }
}

#[async_trait]
impl PackageRegistry for DirectoryRegistry {
    async fn list_versions(
        &self,
        package_id: &str,
        feed: &Feed,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageMetadata>, RegistryError> {
        ensure_live(cancel)?;
        let dir = Self::feed_dir(feed)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RegistryError::FeedNotFound {
                    name: feed.name.clone(),
                    source_path: feed.source.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().and_then(naming::decode) else {
                continue;
            };
            if name.package_id() == package_id {
                found.push(PackageMetadata {
                    name,
                    feed: feed.clone(),
                });
            }
        }
        found.sort_by(|a, b| naming::compare_versions(&a.name.version, &b.name.version));
        Ok(found)
    }

    async fn download(
        &self,
        package: &PackageMetadata,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, RegistryError> {
        ensure_live(cancel)?;
        let filename = package.name.filename();
        let source = Self::feed_dir(&package.feed)?.join(&filename);
        if !tokio::fs::try_exists(&source).await? {
            return Err(RegistryError::PackageNotFound(package.name.to_string()));
        }
        let dest = dest_dir.join(&filename);
        copy_atomic(&source, &dest).await?;
        log::debug!("Downloaded {filename} from feed {}", package.feed.name);
        Ok(dest)
    }

    async fn push(
        &self,
        local_path: &Path,
        feed: &Feed,
        cancel: &CancellationToken,
    ) -> Result<(), RegistryError> {
        ensure_live(cancel)?;
        let Some(filename) = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| naming::decode(n).is_some())
        else {
            return Err(RegistryError::InvalidPackageName(local_path.to_path_buf()));
        };
        let dest = Self::feed_dir(feed)?.join(filename);
        copy_atomic(local_path, &dest).await?;
        log::info!("Pushed {filename} to feed {}", feed.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMES: [&str; 4] = [
        "demoapp_full_win7-x64_test_1.10.0.oxpkg",
        "demoapp_full_win7-x64_test_1.2.0.oxpkg",
        "demoapp_delta_win7-x64_test_1.2.0.oxpkg",
        "demoapp_full_win7-x64_staging_1.2.0.oxpkg",
    ];

    fn feed_with(names: &[&str]) -> (tempfile::TempDir, Feed) {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let feed = Feed::new("local", dir.path().to_string_lossy());
        (dir, feed)
    }

    #[tokio::test]
    async fn list_filters_by_package_id_and_sorts() {
        let (_dir, feed) = feed_with(&NAMES);
        let cancel = CancellationToken::new();
        let listed = DirectoryRegistry
            .list_versions("demoapp_full_win7-x64_test", &feed, &cancel)
            .await
            .unwrap();
        let versions: Vec<_> = listed.iter().map(|m| m.name.version.to_string()).collect();
        assert_eq!(versions, ["1.2.0", "1.10.0"]);
    }

    #[tokio::test]
    async fn download_and_push_copy_files() {
        let (_dir, feed) = feed_with(&NAMES);
        let cache = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let meta = PackageMetadata {
            name: naming::decode(NAMES[1]).unwrap(),
            feed: feed.clone(),
        };
        let path = DirectoryRegistry
            .download(&meta, cache.path(), &cancel)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), NAMES[1].as_bytes());

        let (other_dir, other) = feed_with(&[]);
        DirectoryRegistry.push(&path, &other, &cancel).await.unwrap();
        assert!(other_dir.path().join(NAMES[1]).is_file());
    }

    #[tokio::test]
    async fn missing_package_and_feed_are_errors() {
        let (dir, feed) = feed_with(&[]);
        let cancel = CancellationToken::new();
        let meta = PackageMetadata {
            name: naming::decode(NAMES[0]).unwrap(),
            feed: feed.clone(),
        };
        let err = DirectoryRegistry
            .download(&meta, dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::PackageNotFound(_)));
        assert!(!err.is_transient());

        let gone = Feed::new("gone", dir.path().join("missing").to_string_lossy());
        assert!(matches!(
            DirectoryRegistry.list_versions("x", &gone, &cancel).await,
            Err(RegistryError::FeedNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_operations() {
        let (_dir, feed) = feed_with(&NAMES);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            DirectoryRegistry.list_versions("x", &feed, &cancel).await,
            Err(RegistryError::Cancelled)
        ));
    }
}
