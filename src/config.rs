// Project configuration (`oxipack.toml`).
//
//   [generic]
//   packages = "oxipack/packages/$id$/$rid$"
//   artifacts = "oxipack/artifacts/$id$/$rid$/$version$"
//   templates = "oxipack/templates"
//   pack_strategy = "push"
//
//   [[feeds]]
//   name = "local"
//   source = "feeds/local"
//
//   [[channels]]
//   name = "test"
//   push_feed = "local"
//   update_feed = "local"
//
//   [[apps]]
//   id = "demoapp"
//   channels = ["test", "staging", "production"]
//   [[apps.targets]]
//   os = "windows"
//   rid = "win7-x64"
//   framework = "netcoreapp2.1"
//
// Relative directories and feed sources resolve against the directory holding
// the file.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::Deserialize;

use crate::pack::template::expand_properties;
use crate::release::{App, Certificate, Channel, Feed, ReleaseError, Target};
use crate::retry::RetryPolicy;

pub const CONFIG_FILENAME: &str = "oxipack.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown app '{0}'")]
    UnknownApp(String),
    #[error("app '{app}' has no target for runtime identifier '{rid}'")]
    UnknownTarget { app: String, rid: String },
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("unknown feed '{0}'")]
    UnknownFeed(String),
    #[error("unknown certificate '{0}'")]
    UnknownCertificate(String),
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

/// What `pack` does with the artifacts it builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStrategy {
    #[default]
    None,
    Push,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenericConfig {
    pub packages: String,
    pub artifacts: String,
    pub templates: String,
    pub pack_strategy: PackStrategy,
}

impl Default for GenericConfig {
    fn default() -> Self {
        Self {
            packages: "oxipack/packages/$id$/$rid$".to_string(),
            artifacts: "oxipack/artifacts/$id$/$rid$/$version$".to_string(),
            templates: "oxipack/templates".to_string(),
            pack_strategy: PackStrategy::None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub push_feed: String,
    pub update_feed: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub id: String,
    #[serde(default)]
    pub certificate: Option<String>,
    pub channels: Vec<String>,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub generic: GenericConfig,
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub certificates: Vec<Certificate>,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::parse(&text, base_dir)
    }

    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Feed named `name`, with a relative directory source resolved against
    /// the configuration directory.
    fn feed(&self, name: &str) -> Result<Feed, ConfigError> {
        let mut feed = self
            .feeds
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownFeed(name.to_string()))?;
        if !feed.source.contains("://") && Path::new(&feed.source).is_relative() {
            feed.source = self.base_dir.join(&feed.source).to_string_lossy().into_owned();
        }
        Ok(feed)
    }

    /// Release descriptor for `id` on `rid` at `version`. The first channel
    /// listed for the app is current.
    pub fn build_app(&self, id: &str, rid: &str, version: Version) -> Result<App, ConfigError> {
        let app = self
            .apps
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| ConfigError::UnknownApp(id.to_string()))?;
        let target = app
            .targets
            .iter()
            .find(|t| t.rid.eq_ignore_ascii_case(rid))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownTarget {
                app: id.to_string(),
                rid: rid.to_string(),
            })?;

        let mut channels = Vec::with_capacity(app.channels.len());
        for (i, name) in app.channels.iter().enumerate() {
            let channel = self
                .channels
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| ConfigError::UnknownChannel(name.clone()))?;
            channels.push(Channel {
                name: channel.name.clone(),
                push_feed: self.feed(&channel.push_feed)?,
                update_feed: self.feed(&channel.update_feed)?,
                current: i == 0,
            });
        }

        let certificate = match &app.certificate {
            Some(name) => Some(
                self.certificates
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownCertificate(name.clone()))?,
            ),
            None => None,
        };

        let app = App {
            id: app.id.clone(),
            version,
            target,
            channels,
            certificate,
            delta: false,
            delta_summary: None,
        };
        app.validate()?;
        Ok(app)
    }

    fn resolve(&self, pattern: &str, app: &App) -> PathBuf {
        let expanded = expand_properties(
            pattern,
            &[
                ("id", app.id.clone()),
                ("rid", app.target.rid.clone()),
                ("version", app.version.to_string()),
            ],
        );
        self.base_dir.join(expanded)
    }

    /// Local packages directory for `app`.
    pub fn packages_dir(&self, app: &App) -> PathBuf {
        self.resolve(&self.generic.packages, app)
    }

    /// Directory holding the files to package for `app`.
    pub fn artifacts_dir(&self, app: &App) -> PathBuf {
        self.resolve(&self.generic.artifacts, app)
    }

    /// Manifest template for `app`'s target, `<id>.toml` unless configured.
    pub fn template_path(&self, app: &App) -> PathBuf {
        let name = app
            .target
            .template
            .clone()
            .unwrap_or_else(|| format!("{}.toml", app.id));
        self.resolve(&self.generic.templates, app).join(name)
    }
}
