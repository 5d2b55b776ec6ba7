// Update orchestrator.
//
// One update attempt is an explicit state machine:
//
//   QueryDeltas -> DownloadDeltas -> ValidateDeltaChain -> ReassembleChain
//               -> InstallReassembled -> Done
//   QueryFull   -> DownloadFull   -> InstallFull -> Done
//
// Any failure on the delta path (other than cancellation) re-enters at
// QueryFull. Failures on the full path end the attempt.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::archive::{self, ArchiveError};
use crate::diff::{BlockDiff, ByteDiff};
use crate::pack::{PackError, PackageBuilder};
use crate::progress::{Progress, ProgressSink};
use crate::release::{App, Feed, PackageKind, naming};
use crate::retry::{self, RetryPolicy, with_retry};

use super::installer::{InstallError, Installer};
use super::registry::{PackageMetadata, PackageRegistry, RegistryError};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("installed release has no current channel")]
    NoCurrentChannel,
    #[error("{failed} of {total} delta downloads failed")]
    DownloadsFailed { failed: usize, total: usize },
    #[error("delta chain is invalid: {0}")]
    ChainInvalid(String),
    #[error("{} does not hold the listed release: {reason}", path.display())]
    UnexpectedRelease { path: PathBuf, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("update cancelled")]
    Cancelled,
}

impl UpdateError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Registry(RegistryError::Cancelled)
                | Self::Pack(PackError::Cancelled)
                | Self::Install(InstallError::Cancelled)
        )
    }
}

/// Result of one update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Installed(App),
    NoUpdate,
}

enum Step {
    QueryDeltas,
    DownloadDeltas(Vec<PackageMetadata>),
    ValidateDeltaChain(Vec<(PackageMetadata, PathBuf)>),
    ReassembleChain(Vec<(PathBuf, App)>),
    InstallReassembled(PathBuf),
    QueryFull,
    DownloadFull(PackageMetadata),
    InstallFull(PathBuf),
    Done(UpdateOutcome),
}

impl Step {
    fn on_delta_path(&self) -> bool {
        matches!(
            self,
            Self::QueryDeltas
                | Self::DownloadDeltas(_)
                | Self::ValidateDeltaChain(_)
                | Self::ReassembleChain(_)
                | Self::InstallReassembled(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Drives update attempts for one installed release.
pub struct UpdateManager<D = BlockDiff> {
    installed: App,
    registry: Arc<dyn PackageRegistry>,
    installer: Arc<dyn Installer>,
    builder: PackageBuilder<D>,
    packages_dir: PathBuf,
    root_dir: PathBuf,
    retry: RetryPolicy,
}

impl UpdateManager<BlockDiff> {
    pub fn new(
        installed: App,
        registry: Arc<dyn PackageRegistry>,
        installer: Arc<dyn Installer>,
        packages_dir: impl Into<PathBuf>,
        root_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            installed,
            registry,
            installer,
            builder: PackageBuilder::new(),
            packages_dir: packages_dir.into(),
            root_dir: root_dir.into(),
            retry: RetryPolicy::default(),
        }
    }
}

impl<D> UpdateManager<D>
where
    D: ByteDiff + Clone + 'static,
{
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the package builder (and with it the diff backend).
    pub fn with_builder<E: ByteDiff + Clone + 'static>(
        self,
        builder: PackageBuilder<E>,
    ) -> UpdateManager<E> {
        UpdateManager {
            installed: self.installed,
            registry: self.registry,
            installer: self.installer,
            builder,
            packages_dir: self.packages_dir,
            root_dir: self.root_dir,
            retry: self.retry,
        }
    }

    pub fn installed(&self) -> &App {
        &self.installed
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Try to move to the newest release on the current channel.
    ///
    /// Never fails: errors are logged and reported as `None`, as is the
    /// absence of any newer release.
    pub async fn update_to_latest_release(
        &self,
        progress: Option<Arc<dyn ProgressSink>>,
        cancel: &CancellationToken,
    ) -> Option<App> {
        let progress = Progress::from_option(progress);
        match self.try_update(&progress, cancel).await {
            Ok(UpdateOutcome::Installed(app)) => {
                log::info!("Updated {} to {}", app.id, app.version);
                Some(app)
            }
            Ok(UpdateOutcome::NoUpdate) => {
                log::info!(
                    "{} {} is up to date",
                    self.installed.id,
                    self.installed.version
                );
                None
            }
            Err(e) => {
                log::error!("Update of {} failed: {e}", self.installed.id);
                None
            }
        }
    }

    /// One update attempt with errors surfaced.
    pub async fn try_update(
        &self,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<UpdateOutcome, UpdateError> {
        let feed = self
            .installed
            .current_channel()
            .map(|c| c.update_feed.clone())
            .ok_or(UpdateError::NoCurrentChannel)?;

        let mut full_progress: Option<Progress> = None;
        let mut step = Step::QueryDeltas;
        loop {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            let on_delta_path = step.on_delta_path();
            let result = match step {
                Step::Done(outcome) => {
                    progress.report(100);
                    return Ok(outcome);
                }
                Step::QueryDeltas => self.query_deltas(&feed, progress, cancel).await,
                Step::DownloadDeltas(deltas) => {
                    self.download_deltas(deltas, progress, cancel).await
                }
                Step::ValidateDeltaChain(downloaded) => {
                    self.validate_chain(downloaded, progress).await
                }
                Step::ReassembleChain(chain) => {
                    self.reassemble_chain(chain, progress, cancel).await
                }
                Step::InstallReassembled(path) => self.install(&path, progress, cancel).await,
                Step::QueryFull => {
                    let p = full_progress.get_or_insert_with(|| progress.remaining()).clone();
                    self.query_full(&feed, &p, cancel).await
                }
                Step::DownloadFull(meta) => {
                    let p = full_progress.get_or_insert_with(|| progress.remaining()).clone();
                    self.download_full(meta, &p, cancel).await
                }
                Step::InstallFull(path) => {
                    let p = full_progress.get_or_insert_with(|| progress.remaining()).clone();
                    self.install(&path, &p, cancel).await
                }
            };
            step = match result {
                Ok(next) => next,
                Err(e) if e.is_cancelled() => return Err(UpdateError::Cancelled),
                Err(e) if on_delta_path => {
                    log::warn!("Delta update failed: {e}. Falling back to full package.");
                    Step::QueryFull
                }
                Err(e) => return Err(e),
            };
        }
    }

    fn is_newer(&self, meta: &PackageMetadata, kind: PackageKind) -> bool {
        let name = &meta.name;
        name.kind == kind
            && name.id == self.installed.id
            && name.rid == self.installed.target.rid
            && naming::compare_versions(&name.version, &self.installed.version)
                == Ordering::Greater
    }

    async fn list(
        &self,
        kind: PackageKind,
        feed: &Feed,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageMetadata>, UpdateError> {
        let package_id = self.installed.package_id(kind);
        let mut listed = with_retry(&self.retry, &format!("list {package_id}"), || {
            self.registry.list_versions(&package_id, feed, cancel)
        })
        .await?;
        listed.retain(|m| self.is_newer(m, kind));
        listed.sort_by(|a, b| naming::compare_versions(&a.name.version, &b.name.version));
        Ok(listed)
    }

    async fn download(
        &self,
        meta: &PackageMetadata,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, RegistryError> {
        with_retry(&self.retry, &format!("download {}", meta.name), || {
            self.registry.download(meta, &self.packages_dir, cancel)
        })
        .await
    }

    // -- delta path ---------------------------------------------------------

    async fn query_deltas(
        &self,
        feed: &Feed,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Step, UpdateError> {
        progress.report(0);
        let deltas = self.list(PackageKind::Delta, feed, cancel).await?;
        progress.report(10);
        if deltas.is_empty() {
            log::info!("No delta updates found for {}", self.installed.id);
            return Ok(Step::QueryFull);
        }
        log::info!(
            "Found {} delta update(s) for {} {}: {}",
            deltas.len(),
            self.installed.id,
            self.installed.version,
            deltas
                .iter()
                .map(|m| m.name.version.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Step::DownloadDeltas(deltas))
    }

    async fn download_deltas(
        &self,
        deltas: Vec<PackageMetadata>,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Step, UpdateError> {
        progress.report(20);
        let total = deltas.len();
        let results = retry::for_each_bounded(deltas, |meta| async move {
            let result = self.download(&meta, cancel).await;
            if let Err(e) = &result {
                log::warn!("Failed to download {}: {e}", meta.name);
            }
            result.map(|path| (meta, path))
        })
        .await;

        let mut downloaded = Vec::with_capacity(total);
        let mut failed = 0;
        for result in results {
            match result {
                Ok(pair) => downloaded.push(pair),
                Err(RegistryError::Cancelled) => return Err(UpdateError::Cancelled),
                Err(_) => failed += 1,
            }
        }
        if failed > 0 {
            return Err(UpdateError::DownloadsFailed { failed, total });
        }
        progress.report(40);
        Ok(Step::ValidateDeltaChain(downloaded))
    }

    async fn validate_chain(
        &self,
        downloaded: Vec<(PackageMetadata, PathBuf)>,
        progress: &Progress,
    ) -> Result<Step, UpdateError> {
        let installed = self.installed.clone();
        let packages_dir = self.packages_dir.clone();
        let chain = tokio::task::spawn_blocking(move || {
            validate_chain_blocking(&installed, downloaded, &packages_dir)
        })
        .await??;
        progress.report(50);
        Ok(Step::ReassembleChain(chain))
    }

    async fn reassemble_chain(
        &self,
        chain: Vec<(PathBuf, App)>,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Step, UpdateError> {
        let steps = chain.len();
        let mut last = None;
        for (i, (delta_path, delta_app)) in chain.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            let base_name = delta_app
                .delta_summary
                .as_ref()
                .map(|s| s.full_filename.clone())
                .ok_or_else(|| {
                    UpdateError::ChainInvalid(format!("{} has no base", delta_path.display()))
                })?;
            let base_path = self.packages_dir.join(&base_name);
            if !base_path.is_file() {
                return Err(UpdateError::ChainInvalid(format!(
                    "base package {base_name} is not available locally"
                )));
            }

            let builder = self.builder.clone();
            let out_dir = self.packages_dir.clone();
            let token = cancel.clone();
            let (path, app) = tokio::task::spawn_blocking(move || {
                builder.reassemble_into(&delta_path, &base_path, &out_dir, &token)
            })
            .await??;
            log::info!("Reassembled {} {} from {base_name}", app.id, app.version);
            progress.report(60 + (10 * (i + 1) / steps) as u8);
            last = Some(path);
        }
        let path = last.ok_or_else(|| UpdateError::ChainInvalid("empty delta chain".to_string()))?;
        Ok(Step::InstallReassembled(path))
    }

    // -- full path ----------------------------------------------------------

    async fn query_full(
        &self,
        feed: &Feed,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Step, UpdateError> {
        progress.report(0);
        let fulls = self.list(PackageKind::Full, feed, cancel).await?;
        progress.report(10);
        match fulls.into_iter().last() {
            Some(latest) => {
                log::info!(
                    "Full update available: {} {}",
                    latest.name.id,
                    latest.name.version
                );
                Ok(Step::DownloadFull(latest))
            }
            None => Ok(Step::Done(UpdateOutcome::NoUpdate)),
        }
    }

    async fn download_full(
        &self,
        meta: PackageMetadata,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Step, UpdateError> {
        let path = self.download(&meta, cancel).await?;
        let installed = self.installed.clone();
        let checked = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), UpdateError> {
            let app = archive::read_manifest(&checked)?.app;
            check_release(&installed, &meta, &app).map_err(|reason| {
                UpdateError::UnexpectedRelease {
                    path: checked,
                    reason,
                }
            })
        })
        .await??;
        progress.report(50);
        Ok(Step::InstallFull(path))
    }

    async fn install(
        &self,
        artifact: &Path,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<Step, UpdateError> {
        let app = self.installer.install(artifact, &self.root_dir, cancel).await?;
        progress.report(100);
        Ok(Step::Done(UpdateOutcome::Installed(app)))
    }
}

/// Compare the descriptor embedded in a downloaded artifact with the listing
/// it was chosen from.
fn check_release(installed: &App, meta: &PackageMetadata, app: &App) -> Result<(), String> {
    let name = &meta.name;
    if app.delta != (name.kind == PackageKind::Delta) {
        return Err(format!("listed as {} but holds a {} package", name.kind, kind_of(app)));
    }
    if app.id != installed.id || app.target.rid != installed.target.rid {
        return Err(format!(
            "holds {} {} instead of {} {}",
            app.id, app.target.rid, installed.id, installed.target.rid
        ));
    }
    if naming::compare_versions(&app.version, &name.version) != Ordering::Equal {
        return Err(format!("listed as {} but holds {}", name.version, app.version));
    }
    if naming::compare_versions(&app.version, &installed.version) != Ordering::Greater {
        return Err(format!(
            "{} is not newer than installed {}",
            app.version, installed.version
        ));
    }
    Ok(())
}

fn kind_of(app: &App) -> PackageKind {
    if app.delta {
        PackageKind::Delta
    } else {
        PackageKind::Full
    }
}

/// Check that every downloaded artifact is the listed delta and that the
/// deltas form one contiguous chain starting at a base present in
/// `packages_dir`.
fn validate_chain_blocking(
    installed: &App,
    downloaded: Vec<(PackageMetadata, PathBuf)>,
    packages_dir: &Path,
) -> Result<Vec<(PathBuf, App)>, UpdateError> {
    let mut chain: Vec<(PathBuf, App)> = Vec::with_capacity(downloaded.len());
    for (meta, path) in downloaded {
        let app = archive::read_manifest(&path)?.app;
        check_release(installed, &meta, &app).map_err(|reason| {
            UpdateError::ChainInvalid(format!("{}: {reason}", path.display()))
        })?;
        let Some(summary) = app.delta_summary.as_ref().filter(|_| app.delta) else {
            return Err(UpdateError::ChainInvalid(format!(
                "{} is not a delta package",
                path.display()
            )));
        };
        match chain.last() {
            None => {
                if !packages_dir.join(&summary.full_filename).is_file() {
                    return Err(UpdateError::ChainInvalid(format!(
                        "base package {} is not available locally",
                        summary.full_filename
                    )));
                }
            }
            Some((_, previous)) => {
                let expected = naming::encode(&previous.as_full());
                if summary.full_filename != expected {
                    return Err(UpdateError::ChainInvalid(format!(
                        "{} {} expects base {}, previous step produces {expected}",
                        app.id, app.version, summary.full_filename
                    )));
                }
            }
        }
        chain.push((path, app));
    }
    Ok(chain)
}
