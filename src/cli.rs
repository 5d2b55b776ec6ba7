// Command-line interface for oxipack.
//
// Subcommands: `pack` builds the full package (and a delta against the
// previous local full package) and optionally pushes them, `promote` moves a
// release to another channel, `reassemble` and `info` are diagnostics.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use semver::Version;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::archive::{self, write_atomic};
use crate::config::{CONFIG_FILENAME, PackStrategy, ProjectConfig};
use crate::pack::{BuildSpec, PackageBuilder};
use crate::progress::{LogProgress, Progress};
use crate::promote::{self, PromoteError};
use crate::release::{App, Feed, PackageKind, naming};
use crate::retry::{self, RetryPolicy, with_retry};
use crate::update::{DirectoryRegistry, PackageRegistry, RegistryError};

/// Exit code for every handled failure.
const FAILURE: i32 = -1;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Release packaging for delta-updatable applications.
#[derive(Parser, Debug)]
#[command(
    name = "oxipack",
    version,
    about = "Build, promote and inspect delta-capable release packages",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Overwrite existing packages and output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build the full package and a delta against the previous release.
    Pack(PackArgs),
    /// Promote a release to another channel.
    Promote(PromoteArgs),
    /// Rebuild a full package from a base package and a delta.
    Reassemble(ReassembleArgs),
    /// Print the manifest embedded in a package.
    Info(InfoArgs),
}

fn parse_version(s: &str) -> Result<Version, String> {
    Version::parse(s).map_err(|e| format!("invalid semantic version '{s}': {e}"))
}

#[derive(Args, Debug)]
struct ProjectArgs {
    /// Project configuration file.
    #[arg(long, default_value = CONFIG_FILENAME, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Application id.
    #[arg(long)]
    app: String,

    /// Runtime identifier of the target.
    #[arg(long)]
    rid: String,

    /// Release version.
    #[arg(long, value_parser = parse_version)]
    version: Version,
}

#[derive(Args, Debug)]
struct PackArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Push the built packages to the current channel's push feed.
    #[arg(long)]
    push: bool,
}

#[derive(Args, Debug)]
struct PromoteArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Channel the release is currently on (defaults to the first channel).
    #[arg(long)]
    from: Option<String>,

    /// Channel to promote to (defaults to the next channel).
    #[arg(long)]
    channel: Option<String>,
}

#[derive(Args, Debug)]
struct ReassembleArgs {
    /// Delta package.
    #[arg(long, value_hint = ValueHint::FilePath)]
    delta: PathBuf,

    /// Base full package the delta was built against.
    #[arg(long, value_hint = ValueHint::FilePath)]
    base: PathBuf,

    /// Output file, or directory to write the canonical filename into.
    #[arg(long, short = 'o', value_hint = ValueHint::AnyPath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Package to inspect.
    #[arg(value_hint = ValueHint::FilePath)]
    artifact: PathBuf,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn runtime() -> Result<Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start async runtime: {e}"))
}

fn load_app(args: &ProjectArgs) -> Result<(ProjectConfig, App), String> {
    let config = ProjectConfig::load(&args.config).map_err(|e| e.to_string())?;
    let app = config
        .build_app(&args.app, &args.rid, args.version.clone())
        .map_err(|e| e.to_string())?;
    Ok((config, app))
}

/// Push `paths` to `feed` with bounded parallelism.
fn push_all(
    rt: &Runtime,
    paths: Vec<PathBuf>,
    feed: &Feed,
    retry: &RetryPolicy,
) -> Result<(), RegistryError> {
    let registry = DirectoryRegistry;
    let registry = &registry;
    let cancel = CancellationToken::new();
    let cancel = &cancel;
    rt.block_on(async {
        let results = retry::for_each_bounded(paths, |path| async move {
            with_retry(retry, &format!("push {}", path.display()), || {
                registry.push(&path, feed, cancel)
            })
            .await
        })
        .await;
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    })
}

// ---------------------------------------------------------------------------
// pack
// ---------------------------------------------------------------------------

fn cmd_pack(args: &PackArgs, force: bool) -> i32 {
    let (config, app) = match load_app(&args.project) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("oxipack: {e}");
            return FAILURE;
        }
    };
    match pack(&config, &app, args.push, force) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("oxipack: {e}");
            FAILURE
        }
    }
}

fn pack(config: &ProjectConfig, app: &App, push: bool, force: bool) -> Result<(), String> {
    let packages_dir = config.packages_dir(app);
    std::fs::create_dir_all(&packages_dir)
        .map_err(|e| format!("packages directory {}: {e}", packages_dir.display()))?;

    let existing =
        naming::scan_directory(&packages_dir, &app.id, &app.target.rid, app.channel_name())
            .map_err(|e| format!("cannot scan {}: {e}", packages_dir.display()))?;
    let fulls: Vec<_> = existing
        .iter()
        .filter(|(name, _)| name.kind == PackageKind::Full)
        .collect();
    if let Some((newest, _)) = fulls.first() {
        match naming::compare_versions(&newest.version, &app.version) {
            std::cmp::Ordering::Greater => {
                return Err(format!(
                    "a newer version {} already exists in {}",
                    newest.version,
                    packages_dir.display()
                ));
            }
            std::cmp::Ordering::Equal if !force => {
                return Err(format!(
                    "version {} already exists in {}; use --force to overwrite",
                    app.version,
                    packages_dir.display()
                ));
            }
            _ => {}
        }
    }
    let previous = fulls.iter().find(|(name, _)| {
        naming::compare_versions(&name.version, &app.version) == std::cmp::Ordering::Less
    });

    let builder = PackageBuilder::new();
    let spec = BuildSpec {
        base_directory: config.artifacts_dir(app),
        template_path: config.template_path(app),
        progress: Progress::new(Arc::new(LogProgress)),
        app: app.clone(),
    };
    let full = builder.build_full(&spec).map_err(|e| e.to_string())?;
    let full_path = full
        .write_to_dir(&packages_dir)
        .map_err(|e| format!("cannot write {}: {e}", full.filename()))?;
    println!("Created full package: {}", full_path.display());
    let mut produced = vec![full_path.clone()];

    match previous {
        Some((base, base_path)) => {
            log::info!("Building delta against {}", base.filename());
            let progress = Progress::new(Arc::new(LogProgress));
            let (delta, _) = builder
                .build_delta(base_path, &full_path, &progress)
                .map_err(|e| e.to_string())?;
            let delta_path = delta
                .write_to_dir(&packages_dir)
                .map_err(|e| format!("cannot write {}: {e}", delta.filename()))?;
            println!("Created delta package: {}", delta_path.display());
            produced.push(delta_path);
        }
        None => log::info!("No previous full package found; skipping delta"),
    }

    if push || config.generic.pack_strategy == PackStrategy::Push {
        let channel = app
            .current_channel()
            .ok_or_else(|| "release has no current channel".to_string())?;
        if channel.update_feed.has_credentials() {
            log::warn!(
                "Update feed '{}' of channel '{}' carries credentials; \
                 they are readable by every client",
                channel.update_feed.name,
                channel.name
            );
        }
        let rt = runtime()?;
        push_all(&rt, produced, &channel.push_feed, &config.retry).map_err(|e| e.to_string())?;
        println!("Pushed to feed '{}'", channel.push_feed.name);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// promote
// ---------------------------------------------------------------------------

fn cmd_promote(args: &PromoteArgs) -> i32 {
    match promote_release(args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("oxipack: {e}");
            FAILURE
        }
    }
}

fn promote_release(args: &PromoteArgs) -> Result<(), String> {
    let (config, app) = load_app(&args.project)?;
    let app = match &args.from {
        Some(from) => {
            let name = app
                .channels
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(from))
                .map(|c| c.name.clone())
                .ok_or_else(|| PromoteError::UnknownChannel(from.clone()).to_string())?;
            app.with_current_channel(&name).map_err(|e| e.to_string())?
        }
        None => app,
    };
    let target = promote::promotion_target(&app, args.channel.as_deref())
        .map_err(|e| e.to_string())?
        .to_string();
    let promoted = promote::promote(&app, &target).map_err(|e| e.to_string())?;

    let packages_dir = config.packages_dir(&app);
    let source = packages_dir.join(naming::encode(&app));
    if !source.is_file() {
        return Err(format!("package {} not found", source.display()));
    }

    let rt = runtime()?;
    let cancel = CancellationToken::new();
    rt.block_on(promote::ensure_not_published(
        &DirectoryRegistry,
        &promoted,
        &config.retry,
        &cancel,
    ))
    .map_err(|e| e.to_string())?;

    let rebranded = PackageBuilder::new()
        .rebrand(&source, &promoted)
        .map_err(|e| e.to_string())?;
    let path = rebranded
        .write_to_dir(&packages_dir)
        .map_err(|e| format!("cannot write {}: {e}", rebranded.filename()))?;

    let channel = promoted
        .current_channel()
        .ok_or_else(|| "promoted release has no current channel".to_string())?;
    push_all(&rt, vec![path], &channel.push_feed, &config.retry).map_err(|e| e.to_string())?;
    println!(
        "Promoted {} {} from '{}' to '{}'",
        app.id,
        app.version,
        app.channel_name(),
        target
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// reassemble / info
// ---------------------------------------------------------------------------

fn cmd_reassemble(args: &ReassembleArgs, force: bool) -> i32 {
    let builder = PackageBuilder::new();
    let cancel = CancellationToken::new();
    let (bytes, app) = match builder.reassemble(&args.delta, &args.base, &cancel) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("oxipack: {e}");
            return FAILURE;
        }
    };
    let output = if args.output.is_dir() {
        args.output.join(naming::encode(&app))
    } else {
        args.output.clone()
    };
    if output.exists() && !force {
        eprintln!(
            "oxipack: output file exists, use -f to overwrite: {}",
            output.display()
        );
        return FAILURE;
    }
    if let Err(e) = write_atomic(&output, &bytes) {
        eprintln!("oxipack: output file: {}: {e}", output.display());
        return FAILURE;
    }
    println!("Reassembled {} {}: {}", app.id, app.version, output.display());
    0
}

fn cmd_info(args: &InfoArgs) -> i32 {
    match info_json(&args.artifact) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("oxipack: {}: {e}", args.artifact.display());
            FAILURE
        }
    }
}

fn info_json(path: &Path) -> Result<String, String> {
    let artifact = archive::open_artifact(path).map_err(|e| e.to_string())?;
    let value = serde_json::json!({
        "filename": naming::encode(&artifact.manifest.app),
        "manifest": artifact.manifest,
        "delta": artifact.delta,
    });
    serde_json::to_string_pretty(&value).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn log_filter(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    }
}

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.quiet, cli.verbose)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let exit_code = match &cli.command {
        Cmd::Pack(args) => cmd_pack(args, cli.force),
        Cmd::Promote(args) => cmd_promote(args),
        Cmd::Reassemble(args) => cmd_reassemble(args, cli.force),
        Cmd::Info(args) => cmd_info(args),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let argv: Vec<String> = std::iter::once("oxipack".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        Cli::try_parse_from(argv).expect("cli parse failed")
    }

    #[test]
    fn pack_subcommand_maps_correctly() {
        let cli = parse(&[
            "-f", "pack", "--app", "demoapp", "--rid", "win7-x64", "--version", "1.2.0", "--push",
        ]);
        assert!(cli.force);
        let Cmd::Pack(args) = cli.command else {
            panic!("expected pack");
        };
        assert_eq!(args.project.app, "demoapp");
        assert_eq!(args.project.version, Version::new(1, 2, 0));
        assert_eq!(args.project.config, PathBuf::from(CONFIG_FILENAME));
        assert!(args.push);
    }

    #[test]
    fn invalid_version_is_rejected() {
        let argv = ["oxipack", "pack", "--app", "a", "--rid", "r", "--version", "1.x"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn promote_channel_is_optional() {
        let cli = parse(&[
            "promote", "--app", "demoapp", "--rid", "win7-x64", "--version", "1.0.0",
        ]);
        let Cmd::Promote(args) = cli.command else {
            panic!("expected promote");
        };
        assert!(args.channel.is_none());
        assert!(args.from.is_none());
    }

    #[test]
    fn reassemble_and_info_parse() {
        let cli = parse(&["reassemble", "--delta", "d.oxpkg", "--base", "b.oxpkg", "-o", "out"]);
        assert!(matches!(cli.command, Cmd::Reassemble(_)));
        let cli = parse(&["info", "x.oxpkg"]);
        assert!(matches!(cli.command, Cmd::Info(_)));
    }

    #[test]
    fn quiet_and_verbose_levels() {
        assert_eq!(log_filter(true, 0), "error");
        assert_eq!(log_filter(false, 0), "info");
        assert_eq!(log_filter(false, 1), "debug");
        assert_eq!(log_filter(false, 5), "trace");
        assert!(Cli::try_parse_from(["oxipack", "-q", "-v", "info", "x"]).is_err());
    }
}
