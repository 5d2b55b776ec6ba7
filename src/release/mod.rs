// Release descriptors: the identity and metadata embedded in every artifact.
//
// Descriptors are values. Every version bump, channel re-flag or delta
// marking produces a new `App` rather than mutating a shared one.

pub mod naming;

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

pub use naming::{PackageKind, PackageName};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for descriptor validation and channel selection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    #[error("release {0} has no channels")]
    NoChannels(String),
    #[error("channel '{0}' is declared more than once")]
    DuplicateChannel(String),
    #[error("exactly one channel must be current, found {0}")]
    CurrentChannelCount(usize),
    #[error("channel '{0}' does not exist")]
    UnknownChannel(String),
    #[error("invalid {field}: '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("delta flag and delta summary disagree")]
    DeltaSummaryMismatch,
}

// ---------------------------------------------------------------------------
// Target platform
// ---------------------------------------------------------------------------

/// Operating system family a release is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Windows,
    Linux,
    Macos,
}

impl OsFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "osx" => Ok(Self::Macos),
            other => Err(format!("unknown operating system '{other}'")),
        }
    }
}

/// Platform descriptor: OS family, runtime identifier and framework moniker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub os: OsFamily,
    pub rid: String,
    pub framework: String,
    /// Manifest template filename, relative to the templates directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

// ---------------------------------------------------------------------------
// Channels and feeds
// ---------------------------------------------------------------------------

/// A package feed. `source` is a directory path or a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub name: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Feed {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            api_key: None,
            username: None,
            password: None,
        }
    }

    /// Whether the feed carries credentials that end up in published descriptors.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.username.is_some() || self.password.is_some()
    }
}

/// A named release track with its own push and update feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub push_feed: Feed,
    pub update_feed: Feed,
    #[serde(default)]
    pub current: bool,
}

/// Code-signing certificate reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub name: String,
    pub csn: String,
    pub sha256: String,
}

/// Link from a delta release to the full artifact it was diffed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSummary {
    /// Canonical filename of the base full artifact.
    pub full_filename: String,
    pub base_version: Version,
}

// ---------------------------------------------------------------------------
// Release descriptor
// ---------------------------------------------------------------------------

/// Release descriptor embedded in every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub version: Version,
    pub target: Target,
    /// Ordered by promotion: the first channel is the default target.
    pub channels: Vec<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,
    #[serde(default)]
    pub delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_summary: Option<DeltaSummary>,
}

impl App {
    /// Check the structural invariants of the descriptor.
    pub fn validate(&self) -> Result<(), ReleaseError> {
        if self.id.is_empty() || self.id.contains(['/', '\\']) {
            return Err(ReleaseError::InvalidIdentifier {
                field: "app id",
                value: self.id.clone(),
            });
        }
        if !naming::is_component(&self.target.rid) {
            return Err(ReleaseError::InvalidIdentifier {
                field: "runtime identifier",
                value: self.target.rid.clone(),
            });
        }
        if self.channels.is_empty() {
            return Err(ReleaseError::NoChannels(self.id.clone()));
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if !naming::is_component(&channel.name) {
                return Err(ReleaseError::InvalidIdentifier {
                    field: "channel name",
                    value: channel.name.clone(),
                });
            }
            if self.channels[..i].iter().any(|c| c.name == channel.name) {
                return Err(ReleaseError::DuplicateChannel(channel.name.clone()));
            }
        }
        let current = self.channels.iter().filter(|c| c.current).count();
        if current != 1 {
            return Err(ReleaseError::CurrentChannelCount(current));
        }
        if self.delta != self.delta_summary.is_some() {
            return Err(ReleaseError::DeltaSummaryMismatch);
        }
        Ok(())
    }

    /// The channel flagged as current, if any.
    pub fn current_channel(&self) -> Option<&Channel> {
        self.channels.iter().find(|c| c.current)
    }

    /// The first channel in promotion order.
    pub fn default_channel(&self) -> Option<&Channel> {
        self.channels.first()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Name used in identities: the current channel, else the first one.
    pub fn channel_name(&self) -> &str {
        self.current_channel()
            .or_else(|| self.default_channel())
            .map(|c| c.name.as_str())
            .unwrap_or("")
    }

    pub fn kind(&self) -> PackageKind {
        if self.delta {
            PackageKind::Delta
        } else {
            PackageKind::Full
        }
    }

    /// Descriptor of the full release of this app at `version`.
    pub fn with_version(&self, version: Version) -> App {
        App {
            version,
            ..self.as_full()
        }
    }

    /// Same release with the delta marking cleared.
    pub fn as_full(&self) -> App {
        App {
            delta: false,
            delta_summary: None,
            ..self.clone()
        }
    }

    /// Same release marked as a delta against the given base.
    pub fn as_delta(&self, summary: DeltaSummary) -> App {
        App {
            delta: true,
            delta_summary: Some(summary),
            ..self.clone()
        }
    }

    /// Same release with `name` as the single current channel.
    pub fn with_current_channel(&self, name: &str) -> Result<App, ReleaseError> {
        if self.channel(name).is_none() {
            return Err(ReleaseError::UnknownChannel(name.to_string()));
        }
        let channels = self
            .channels
            .iter()
            .map(|c| Channel {
                current: c.name == name,
                ..c.clone()
            })
            .collect();
        Ok(App {
            channels,
            ..self.clone()
        })
    }

    /// Canonical identity of this release.
    pub fn package_name(&self) -> PackageName {
        PackageName {
            id: self.id.clone(),
            kind: self.kind(),
            rid: self.target.rid.clone(),
            channel: self.channel_name().to_string(),
            version: self.version.clone(),
        }
    }

    /// Registry package id for `kind` packages of this app on its current channel.
    pub fn package_id(&self, kind: PackageKind) -> String {
        naming::package_id(&self.id, kind, &self.target.rid, self.channel_name())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn channel(name: &str, current: bool) -> Channel {
        let feed = Feed::new("local", "/tmp/feed");
        Channel {
            name: name.to_string(),
            push_feed: feed.clone(),
            update_feed: feed,
            current,
        }
    }

    pub(crate) fn demo_app(version: &str) -> App {
        App {
            id: "demoapp".to_string(),
            version: Version::parse(version).unwrap(),
            target: Target {
                os: OsFamily::Windows,
                rid: "win7-x64".to_string(),
                framework: "netcoreapp2.1".to_string(),
                template: Some("test.toml".to_string()),
            },
            channels: vec![
                channel("test", true),
                channel("staging", false),
                channel("production", false),
            ],
            certificate: Some(Certificate {
                name: "mycertificate".to_string(),
                csn: "mycompany".to_string(),
                sha256: "311FE3FEED16B9CD8DF0F8B1517BE5CB86048707DF4889BA8DC37D4D68866D02"
                    .to_string(),
            }),
            delta: false,
            delta_summary: None,
        }
    }

    #[test]
    fn demo_app_is_valid() {
        demo_app("1.0.0").validate().unwrap();
    }

    #[test]
    fn validate_rejects_two_current_channels() {
        let mut app = demo_app("1.0.0");
        app.channels[1].current = true;
        assert_eq!(app.validate(), Err(ReleaseError::CurrentChannelCount(2)));
    }

    #[test]
    fn validate_rejects_duplicate_channel() {
        let mut app = demo_app("1.0.0");
        app.channels[2].name = "test".to_string();
        assert_eq!(
            app.validate(),
            Err(ReleaseError::DuplicateChannel("test".to_string()))
        );
    }

    #[test]
    fn validate_rejects_underscore_in_rid() {
        let mut app = demo_app("1.0.0");
        app.target.rid = "win_x64".to_string();
        assert!(matches!(
            app.validate(),
            Err(ReleaseError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn validate_rejects_orphan_delta_flag() {
        let mut app = demo_app("1.0.0");
        app.delta = true;
        assert_eq!(app.validate(), Err(ReleaseError::DeltaSummaryMismatch));
    }

    #[test]
    fn with_version_leaves_original_untouched() {
        let app = demo_app("1.0.0");
        let bumped = app.with_version(Version::new(1, 1, 0));
        assert_eq!(app.version, Version::new(1, 0, 0));
        assert_eq!(bumped.version, Version::new(1, 1, 0));
        assert_eq!(bumped.channels, app.channels);
    }

    #[test]
    fn with_current_channel_moves_flag() {
        let app = demo_app("1.0.0");
        let promoted = app.with_current_channel("staging").unwrap();
        let current: Vec<_> = promoted
            .channels
            .iter()
            .filter(|c| c.current)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(current, ["staging"]);
        assert_eq!(app.current_channel().unwrap().name, "test");
        assert!(app.with_current_channel("nightly").is_err());
    }

    #[test]
    fn delta_marking_roundtrips() {
        let app = demo_app("1.1.0");
        let delta = app.as_delta(DeltaSummary {
            full_filename: "demoapp_full_win7-x64_test_1.0.0.oxpkg".to_string(),
            base_version: Version::new(1, 0, 0),
        });
        assert_eq!(delta.kind(), PackageKind::Delta);
        delta.validate().unwrap();
        assert_eq!(delta.as_full(), app);
    }

    #[test]
    fn descriptor_serializes_version_as_string() {
        let app = demo_app("1.0.0-beta.2");
        let json = serde_json::to_value(&app).unwrap();
        assert_eq!(json["version"], "1.0.0-beta.2");
        let back: App = serde_json::from_value(json).unwrap();
        assert_eq!(back, app);
    }
}
