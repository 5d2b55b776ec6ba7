// Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use oxipack::pack::{BuildSpec, PackageBuilder};
use oxipack::progress::Progress;
use oxipack::release::{App, Channel, Feed, OsFamily, Target};
use semver::Version;

pub fn app_on(feed_source: &str, version: &str) -> App {
    let feed = Feed::new("local", feed_source);
    let channel = |name: &str, current| Channel {
        name: name.to_string(),
        push_feed: feed.clone(),
        update_feed: feed.clone(),
        current,
    };
    App {
        id: "demoapp".to_string(),
        version: Version::parse(version).unwrap(),
        target: Target {
            os: OsFamily::Windows,
            rid: "win7-x64".to_string(),
            framework: "netcoreapp2.1".to_string(),
            template: None,
        },
        channels: vec![
            channel("test", true),
            channel("staging", false),
            channel("production", false),
        ],
        certificate: None,
        delta: false,
        delta_summary: None,
    }
}

pub fn app(version: &str) -> App {
    app_on("/tmp/oxipack-feed", version)
}

pub fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut s = seed;
    (0..size)
        .map(|_| {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
            (s >> 33) as u8
        })
        .collect()
}

/// Build a full package of `release` from `files` and store it in `dir`.
pub fn build_full(dir: &Path, release: &App, files: &[(&str, Vec<u8>)]) -> PathBuf {
    let base = dir.join(format!("src-{}-{}", release.target.rid, release.version));
    for (path, data) in files {
        let path = base.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
    let template = base.join("template.toml");
    fs::write(
        &template,
        "title = \"$id$\"\nauthors = [\"Demo\"]\n[[files]]\nsrc = \"app/**/*\"\n",
    )
    .unwrap();
    let spec = BuildSpec {
        base_directory: base,
        template_path: template,
        progress: Progress::none(),
        app: release.clone(),
    };
    PackageBuilder::new()
        .build_full(&spec)
        .unwrap()
        .write_to_dir(dir)
        .unwrap()
}

/// Diff `target` against `base` and store the delta in `dir`.
pub fn build_delta(dir: &Path, base: &Path, target: &Path) -> PathBuf {
    let (delta, _) = PackageBuilder::new()
        .build_delta(base, target, &Progress::none())
        .unwrap();
    delta.write_to_dir(dir).unwrap()
}

pub fn v1_files() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("app/app.exe", gen_data(16 * 1024, 1)),
        ("app/config.json", b"{\"theme\":\"dark\"}".to_vec()),
        ("app/obsolete.dll", gen_data(512, 2)),
    ]
}

pub fn v2_files() -> Vec<(&'static str, Vec<u8>)> {
    let mut exe = gen_data(16 * 1024, 1);
    for i in (0..exe.len()).step_by(4096) {
        exe[i] = exe[i].wrapping_add(1);
    }
    exe.extend_from_slice(b"appended section");
    vec![
        ("app/app.exe", exe),
        ("app/config.json", b"{\"theme\":\"dark\"}".to_vec()),
        ("app/plugins/new.dll", gen_data(300, 3)),
    ]
}

pub fn v3_files() -> Vec<(&'static str, Vec<u8>)> {
    let mut files = v2_files();
    files[1].1 = b"{\"theme\":\"light\"}".to_vec();
    files[0].1.extend_from_slice(b"second appended section");
    files
}
