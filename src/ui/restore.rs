use anyhow::{Context, Result};
use camino::Utf8Path;
use clap::Parser;

use marty::config::Configuration;
use marty::pool::Pool;
use marty::{resolve, restore};

use super::build_remote;

/// Restore a backup onto its remote
#[derive(Debug, Parser)]
pub struct Args {
    remote: String,
    name: String,
    /// Subtree to restore, defaults to the whole backup
    #[clap(default_value = "/")]
    path: String,
}

pub fn run(pool: &Pool, config: &Configuration, args: Args) -> Result<()> {
    let remote_config = config
        .remotes
        .get(&args.remote)
        .with_context(|| format!("no remote named {:?} in the config", args.remote))?;
    let mut remote = build_remote(remote_config)?;

    let trimmed = args.path.trim_matches('/');
    let name = if trimmed.is_empty() {
        format!("{}/{}", args.remote, args.name)
    } else {
        format!("{}/{}:{trimmed}", args.remote, args.name)
    };
    let tree = pool.resolve_tree(resolve::resolve(pool, &name)?)?;

    restore::restore(pool, &mut *remote, &tree, Utf8Path::new("/"))
}
