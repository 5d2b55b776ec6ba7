// Canonical package filenames.
//
// Layout: `{id}_{kind}_{rid}_{channel}_{version}.oxpkg`
//
// `rid` and `channel` never contain `_`, semantic versions cannot contain it
// either, so parsing splits from the right and the id may keep underscores.

use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use semver::Version;

use super::App;

/// Extension of every artifact filename (without the dot).
pub const PACKAGE_EXTENSION: &str = "oxpkg";

const SEPARATOR: char = '_';

/// Full or delta package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageKind {
    Full,
    Delta,
}

impl PackageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "delta" => Ok(Self::Delta),
            _ => Err(()),
        }
    }
}

/// Decoded package identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName {
    pub id: String,
    pub kind: PackageKind,
    pub rid: String,
    pub channel: String,
    pub version: Version,
}

impl PackageName {
    /// Registry package id: the filename without version and extension.
    pub fn package_id(&self) -> String {
        package_id(&self.id, self.kind, &self.rid, &self.channel)
    }

    pub fn filename(&self) -> String {
        format!(
            "{}{SEPARATOR}{}.{PACKAGE_EXTENSION}",
            self.package_id(),
            self.version
        )
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.package_id(), self.version)
    }
}

/// Whether `s` may be used as an rid or channel name.
pub(crate) fn is_component(s: &str) -> bool {
    !s.is_empty() && !s.contains([SEPARATOR, '/', '\\'])
}

pub fn package_id(id: &str, kind: PackageKind, rid: &str, channel: &str) -> String {
    format!("{id}{SEPARATOR}{kind}{SEPARATOR}{rid}{SEPARATOR}{channel}")
}

/// Canonical local filename for `app`. The app is expected to be valid.
pub fn encode(app: &App) -> String {
    app.package_name().filename()
}

/// Parse a filename produced by [`encode`].
///
/// Returns `None` for anything malformed instead of failing, so untrusted
/// directory listings can be filtered cheaply.
pub fn decode(filename: &str) -> Option<PackageName> {
    let stem = filename.strip_suffix(PACKAGE_EXTENSION)?.strip_suffix('.')?;
    let mut parts = stem.rsplitn(5, SEPARATOR);
    let version = parts.next()?;
    let channel = parts.next()?;
    let rid = parts.next()?;
    let kind = parts.next()?;
    let id = parts.next()?;

    if id.is_empty() || !is_component(rid) || !is_component(channel) {
        return None;
    }
    let kind = kind.parse().ok()?;
    let version = Version::parse(version).ok()?;

    Some(PackageName {
        id: id.to_string(),
        kind,
        rid: rid.to_string(),
        channel: channel.to_string(),
        version,
    })
}

/// Semantic-version precedence (build metadata ignored).
pub fn compare_versions(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
}

/// Valid packages in `dir` for (id, rid, channel), newest first.
///
/// For equal versions the full package sorts before the delta.
pub fn scan_directory(
    dir: &Path,
    id: &str,
    rid: &str,
    channel: &str,
) -> io::Result<Vec<(PackageName, PathBuf)>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().and_then(decode) else {
            continue;
        };
        if name.id == id && name.rid == rid && name.channel == channel {
            found.push((name, entry.path()));
        }
    }
    found.sort_by(|(a, _), (b, _)| {
        compare_versions(&b.version, &a.version).then(a.kind.cmp(&b.kind))
    });
    Ok(found)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::tests::demo_app;

    #[test]
    fn encode_full_filename() {
        let app = demo_app("1.2.3");
        assert_eq!(encode(&app), "demoapp_full_win7-x64_test_1.2.3.oxpkg");
    }

    #[test]
    fn decode_inverts_encode() {
        let app = demo_app("2.0.0-rc.1");
        let name = decode(&encode(&app)).unwrap();
        assert_eq!(name, app.package_name());
    }

    #[test]
    fn decode_keeps_underscores_in_id() {
        let name = decode("my_app_delta_linux-x64_beta_0.1.0.oxpkg").unwrap();
        assert_eq!(name.id, "my_app");
        assert_eq!(name.kind, PackageKind::Delta);
        assert_eq!(name.rid, "linux-x64");
        assert_eq!(name.channel, "beta");
        assert_eq!(name.version, Version::new(0, 1, 0));
    }

    #[test]
    fn decode_rejects_malformed_names() {
        for bad in [
            "",
            "demoapp_full_win7-x64_test_1.0.0",
            "demoapp_full_win7-x64_test_1.0.0.zip",
            "demoapp_partial_win7-x64_test_1.0.0.oxpkg",
            "demoapp_full_win7-x64_test_one.oxpkg",
            "full_win7-x64_test_1.0.0.oxpkg",
            "_full_win7-x64_test_1.0.0.oxpkg",
            "demoapp_full__test_1.0.0.oxpkg",
            "demoapp_full_win7-x64__1.0.0.oxpkg",
            ".oxpkg",
        ] {
            assert!(decode(bad).is_none(), "accepted {bad:?}");
        }
    }

    #[test]
    fn precedence_ignores_build_metadata() {
        let a = Version::parse("1.0.0+build.1").unwrap();
        let b = Version::parse("1.0.0+build.2").unwrap();
        assert_eq!(compare_versions(&a, &b), Ordering::Equal);
        let pre = Version::parse("1.0.0-alpha.10").unwrap();
        let pre2 = Version::parse("1.0.0-alpha.9").unwrap();
        assert_eq!(compare_versions(&pre, &pre2), Ordering::Greater);
        assert_eq!(compare_versions(&pre, &Version::new(1, 0, 0)), Ordering::Less);
    }

    #[test]
    fn scan_directory_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        for file in [
            "demoapp_full_win7-x64_test_1.0.0.oxpkg",
            "demoapp_full_win7-x64_test_1.2.0.oxpkg",
            "demoapp_delta_win7-x64_test_1.2.0.oxpkg",
            "demoapp_full_win7-x64_test_1.10.0.oxpkg",
            "demoapp_full_win7-x64_production_9.0.0.oxpkg",
            "otherapp_full_win7-x64_test_5.0.0.oxpkg",
            "garbage.txt",
        ] {
            std::fs::write(dir.path().join(file), b"x").unwrap();
        }

        let found = scan_directory(dir.path(), "demoapp", "win7-x64", "test").unwrap();
        let order: Vec<_> = found
            .iter()
            .map(|(n, _)| (n.version.to_string(), n.kind))
            .collect();
        assert_eq!(
            order,
            [
                ("1.10.0".to_string(), PackageKind::Full),
                ("1.2.0".to_string(), PackageKind::Full),
                ("1.2.0".to_string(), PackageKind::Delta),
                ("1.0.0".to_string(), PackageKind::Full),
            ]
        );
    }
}
