use anyhow::{Result, bail};
#[cfg(feature = "fuse")]
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;

use marty::pool::Pool;
#[cfg(feature = "fuse")]
use marty::resolve;

#[cfg(feature = "fuse")]
use super::{full_name, split_remote_name};

/// Mount a backup or tree read-only at a directory. `remote` is only present
/// when three positional names are given.
#[derive(Debug, Parser)]
pub struct MountArgs {
    #[clap(value_name = "REMOTE|NAME")]
    a: String,
    #[clap(value_name = "NAME|MOUNTPOINT")]
    b: String,
    #[clap(value_name = "MOUNTPOINT")]
    c: Option<Utf8PathBuf>,
}

/// Explore a backup or tree by mounting it into a temporary directory
#[derive(Debug, Parser)]
pub struct ExploreArgs {
    #[clap(value_name = "REMOTE|NAME")]
    a: String,
    #[clap(value_name = "NAME")]
    b: Option<String>,
}

#[cfg(feature = "fuse")]
pub fn run_mount(pool: std::sync::Arc<Pool>, args: MountArgs) -> Result<()> {
    let (remote, name, mountpoint) = match args.c {
        Some(mountpoint) => (Some(args.a), args.b, mountpoint),
        None => (None, args.a, Utf8PathBuf::from(args.b)),
    };
    if !mountpoint.exists() {
        bail!("mountpoint {mountpoint} does not exist");
    }
    let name = full_name(&remote, &name);
    let tree = pool.resolve_tree(resolve::resolve(&pool, &name)?)?;
    marty::vfs::mount(pool, tree, mountpoint.as_std_path())
}

#[cfg(not(feature = "fuse"))]
pub fn run_mount(_pool: std::sync::Arc<Pool>, _args: MountArgs) -> Result<()> {
    bail!("this build was compiled without the \"fuse\" feature")
}

#[cfg(feature = "fuse")]
pub fn run_explore(pool: std::sync::Arc<Pool>, args: ExploreArgs) -> Result<()> {
    let (remote, n) = split_remote_name(args.a, args.b);
    let name = full_name(&remote, &n);
    let tree = pool.resolve_tree(resolve::resolve(&pool, &name)?)?;

    let dir = tempfile::tempdir().context("creating a scratch mountpoint")?;
    let session = marty::vfs::spawn(pool, tree, dir.path())?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());
    std::process::Command::new(shell)
        .current_dir(dir.path())
        .status()
        .context("running a shell in the exploration mount")?;

    drop(session);
    Ok(())
}

#[cfg(not(feature = "fuse"))]
pub fn run_explore(_pool: std::sync::Arc<Pool>, _args: ExploreArgs) -> Result<()> {
    bail!("this build was compiled without the \"fuse\" feature")
}
