use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chronofs::config;
use chronofs::fs::Fs;

/// Mount a versioning overlay filesystem: every write is a new, immutable
/// revision, and deletes are tombstones rather than removals.
#[derive(Debug, Parser)]
#[command(verbatim_doc_comment)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Allow other users (and root) to access the mount.
    #[arg(long)]
    allow_other: bool,

    /// Reject every operation that would create a new revision.
    #[arg(long)]
    read_only: bool,

    /// Directory holding the versioned node tree.
    backing_root: Utf8PathBuf,

    /// Where to mount the filesystem.
    mountpoint: Utf8PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = config::load().context("Couldn't load configuration")?;
    init_logging(args.verbose.max(config.verbosity));

    let root = args
        .backing_root
        .canonicalize_utf8()
        .with_context(|| format!("Couldn't canonicalize {}", args.backing_root))?;
    if !root.is_dir() {
        bail!("{root} is not a directory");
    }

    let mut options = vec![fuser::MountOption::FSName("chronofs".to_owned())];
    if args.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if args.read_only {
        options.push(fuser::MountOption::RO);
    }

    let attr_ttl = std::time::Duration::from_secs(config.attr_ttl_secs);
    let fs = Fs::new(root.clone(), attr_ttl);

    info!(%root, mountpoint = %args.mountpoint, "mounting");
    fuser::mount2(fs, &args.mountpoint, &options)
        .with_context(|| format!("Couldn't mount {} at {}", root, args.mountpoint))
}

/// Map `-v` occurrences to a tracing level, same convention this project
/// has always used, now wired through `tracing-subscriber` instead of the
/// old `simplelog` setup.
fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
