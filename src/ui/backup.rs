use anyhow::{Context, Result, bail};
use clap::Parser;
use jiff::Timestamp;
use tracing::*;

use marty::config::Configuration;
use marty::pool::Pool;
use marty::{resolve, walker};

use super::{build_remote, full_name};

/// Create a new backup of a remote
#[derive(Debug, Parser)]
pub struct Args {
    remote: String,

    /// Defaults to the current time
    name: Option<String>,

    /// Overwrite an existing backup with this name
    #[clap(short, long)]
    overwrite: bool,

    /// Name of the parent backup
    #[clap(short, long)]
    parent: Option<String>,

    /// Show statistics about the backup
    #[clap(short, long)]
    stats: bool,
}

pub fn run(pool: &Pool, config: &Configuration, args: Args) -> Result<()> {
    let remote_config = config
        .remotes
        .get(&args.remote)
        .with_context(|| format!("no remote named {:?} in the config", args.remote))?;
    let mut remote = build_remote(remote_config)?;

    let now = Timestamp::now();
    let name = args
        .name
        .unwrap_or_else(|| now.strftime("%Y-%m-%d_%H-%M-%S").to_string());
    let backup_label = format!("{}/{name}", args.remote);

    if !args.overwrite && pool.read_label(&backup_label)?.is_some() {
        bail!("a backup named {backup_label:?} already exists");
    }

    let parent = match &args.parent {
        Some(p) => Some(resolve::resolve(pool, &full_name(&Some(args.remote.clone()), p))?),
        None => None,
    };

    let (backup_ref, backup) = walker::create_backup(pool, &mut *remote, parent, Timestamp::now)?;

    pool.set_label(&backup_label, backup_ref, args.overwrite)?;
    pool.set_label(&format!("{}/latest", args.remote), backup_ref, true)?;

    let duration = backup.end_date.as_second() - backup.start_date.as_second();
    println!("Duration: {duration}s");
    println!("Root: {}", backup.root);

    if !backup.errors.is_empty() {
        println!("\n{} error(s):", backup.errors.len());
        for (path, err) in &backup.errors {
            println!(" - {path}: {err}");
            warn!("{path}: {err}");
        }
    }

    if args.stats {
        println!();
        for (k, v) in &backup.stats {
            println!("{k:>20}: {v}");
        }
    }

    Ok(())
}
