// Manifest templates.
//
// A template is a TOML document rendered with release properties before it
// is parsed:
//
//   title = "$id$ $version$"
//   authors = ["Example Corp"]
//   exclude = ["**/*.pdb"]
//
//   [[files]]
//   src = "**/*"
//   target = "bin"
//   exclude = ["logs/**"]
//
// Without any `[[files]]` rule every file under the base directory is
// included.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use walkdir::WalkDir;

use crate::archive::format::validate_relative_path;
use crate::release::App;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("cannot read template: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid template: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("cannot enumerate base directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("'{0}' is not a valid payload path")]
    UnsafePath(String),
    #[error("two files map to payload path '{0}'")]
    DuplicateTarget(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileRule {
    pub src: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestTemplate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileRule>,
    /// Applied to every rule.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Template after rendering and file enumeration.
#[derive(Debug, Clone)]
pub struct RenderedTemplate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<String>,
    /// Payload path -> file on disk.
    pub files: BTreeMap<String, PathBuf>,
}

/// Replace every `$name$` occurrence with its value.
pub fn expand_properties(text: &str, properties: &[(&str, String)]) -> String {
    properties
        .iter()
        .fold(text.to_string(), |acc, (name, value)| {
            acc.replace(&format!("${name}$"), value)
        })
}

/// Properties available to templates for `app`.
pub fn release_properties(app: &App, base_directory: &Path) -> Vec<(&'static str, String)> {
    vec![
        ("id", app.id.clone()),
        ("version", app.version.to_string()),
        ("rid", app.target.rid.clone()),
        ("channel", app.channel_name().to_string()),
        ("os", app.target.os.to_string()),
        ("framework", app.target.framework.clone()),
        (
            "basedirectory",
            base_directory.to_string_lossy().replace('\\', "/"),
        ),
    ]
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, TemplateError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| TemplateError::Pattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Relative forward-slash paths of every file under `base`, sorted.
fn list_files(base: &Path) -> Result<Vec<(String, PathBuf)>, TemplateError> {
    let mut out = Vec::new();
    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(base) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((rel, entry.into_path()));
    }
    Ok(out)
}

impl ManifestTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        Ok(toml::from_str(text)?)
    }

    /// Enumerate the payload under `base_directory`.
    pub fn enumerate(
        &self,
        base_directory: &Path,
    ) -> Result<BTreeMap<String, PathBuf>, TemplateError> {
        let available = list_files(base_directory)?;
        let global_exclude = compile(&self.exclude)?;
        let default_rule = [FileRule {
            src: "**/*".to_string(),
            ..FileRule::default()
        }];
        let rules = if self.files.is_empty() {
            &default_rule[..]
        } else {
            &self.files[..]
        };

        let mut files = BTreeMap::new();
        for rule in rules {
            let include = compile(std::slice::from_ref(&rule.src))?;
            let exclude = compile(&rule.exclude)?;
            let prefix = rule
                .target
                .as_deref()
                .map(|t| t.trim_matches('/'))
                .filter(|t| !t.is_empty());

            for (rel, path) in &available {
                let hit = |p: &Pattern| p.matches_with(rel, MATCH);
                if !include.iter().any(hit)
                    || exclude.iter().any(hit)
                    || global_exclude.iter().any(hit)
                {
                    continue;
                }
                let target = match prefix {
                    Some(prefix) => format!("{prefix}/{rel}"),
                    None => rel.clone(),
                };
                validate_relative_path(&target)
                    .map_err(|_| TemplateError::UnsafePath(target.clone()))?;
                if files.insert(target.clone(), path.clone()).is_some() {
                    return Err(TemplateError::DuplicateTarget(target));
                }
            }
        }
        Ok(files)
    }
}

/// Render the template at `path` for `app` and enumerate its payload.
///
/// The template file itself is never part of the payload, even when it sits
/// under `base_directory`.
pub fn render(
    path: &Path,
    app: &App,
    base_directory: &Path,
) -> Result<RenderedTemplate, TemplateError> {
    let text = std::fs::read_to_string(path)?;
    let text = expand_properties(&text, &release_properties(app, base_directory));
    let template = ManifestTemplate::parse(&text)?;
    let mut files = template.enumerate(base_directory)?;
    let own = std::fs::canonicalize(path)?;
    files.retain(|_, src| std::fs::canonicalize(src).map_or(true, |src| src != own));
    Ok(RenderedTemplate {
        title: template.title,
        description: template.description,
        authors: template.authors,
        files,
    })
}
