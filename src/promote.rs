// Channel promotion.
//
// Promotion moves the current flag of a release to another channel. The
// promoted artifact is pushed to that channel's feed, so promotion is refused
// when the feed already carries the same version.

use std::cmp::Ordering;

use tokio_util::sync::CancellationToken;

use crate::release::{App, PackageKind, ReleaseError, naming};
use crate::retry::{RetryPolicy, with_retry};
use crate::update::{PackageRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("{0} has a single channel; nothing to promote to")]
    SingleChannel(String),
    #[error("channel '{0}' does not exist")]
    UnknownChannel(String),
    #[error("'{0}' is already the current channel")]
    AlreadyCurrent(String),
    #[error("'{0}' is the last channel; nothing to promote to")]
    NothingToPromote(String),
    #[error("{package_id} {version} is already published")]
    AlreadyPublished { package_id: String, version: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// Resolve the channel `app` should be promoted to.
///
/// With no explicit name this is the channel after the current one.
/// Names are matched case-insensitively.
pub fn promotion_target<'a>(
    app: &'a App,
    requested: Option<&str>,
) -> Result<&'a str, PromoteError> {
    if app.channels.len() < 2 {
        return Err(PromoteError::SingleChannel(app.id.clone()));
    }
    let current = app.channel_name();
    let target = match requested {
        Some(name) => app
            .channels
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| c.name.as_str())
            .ok_or_else(|| PromoteError::UnknownChannel(name.to_string()))?,
        None => {
            let position = app
                .channels
                .iter()
                .position(|c| c.name == current)
                .unwrap_or(0);
            app.channels
                .get(position + 1)
                .map(|c| c.name.as_str())
                .ok_or_else(|| PromoteError::NothingToPromote(current.to_string()))?
        }
    };
    if target == current {
        return Err(PromoteError::AlreadyCurrent(target.to_string()));
    }
    Ok(target)
}

/// Descriptor of `app` with `channel` as the single current channel.
pub fn promote(app: &App, channel: &str) -> Result<App, PromoteError> {
    if app.channel_name() == channel {
        return Err(PromoteError::AlreadyCurrent(channel.to_string()));
    }
    let promoted = app.as_full().with_current_channel(channel)?;
    promoted.validate()?;
    Ok(promoted)
}

/// Fail if the push feed of `promoted`'s current channel already holds its
/// version.
pub async fn ensure_not_published(
    registry: &dyn PackageRegistry,
    promoted: &App,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(), PromoteError> {
    let channel = promoted
        .current_channel()
        .ok_or_else(|| PromoteError::UnknownChannel(promoted.channel_name().to_string()))?;
    let package_id = promoted.package_id(PackageKind::Full);
    let published = match with_retry(retry, &format!("list {package_id}"), || {
        registry.list_versions(&package_id, &channel.push_feed, cancel)
    })
    .await
    {
        Ok(published) => published,
        Err(RegistryError::FeedNotFound { .. }) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    if published
        .iter()
        .any(|m| naming::compare_versions(&m.name.version, &promoted.version) == Ordering::Equal)
    {
        return Err(PromoteError::AlreadyPublished {
            package_id,
            version: promoted.version.to_string(),
        });
    }
    Ok(())
}
