use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::Level;

use marty::config;
use marty::pool::Pool;

mod ui;

/// Git-inspired, content-addressed backup engine
#[derive(Debug, Parser)]
struct Args {
    /// Verbosity (-v, -vv, -vvv, ...)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file, defaults to ~/.config/marty.toml
    #[clap(short, long)]
    config: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    subcommand: Subcommand_,
}

#[derive(Debug, Subcommand)]
enum Subcommand_ {
    /// Create a new backup of a remote
    Backup(ui::backup::Args),
    /// Check all objects in the pool
    Check(ui::check::Args),
    /// Compare a tree to another
    Diff(ui::diff::Args),
    /// Export a backup to a directory
    Export(ui::export::Args),
    /// Garbage collect unused objects in the pool
    Gc(ui::gc::Args),
    /// List backups
    List(ui::list::Args),
    /// Mount a backup or tree read-only at a directory
    Mount(ui::mount::MountArgs),
    /// Explore a backup or tree by mounting it into a temporary directory
    Explore(ui::mount::ExploreArgs),
    /// Show the list of configured remotes
    Remotes(ui::remotes::Args),
    /// Restore a backup onto its remote
    Restore(ui::restore::Args),
    /// Run the scheduler
    Scheduler(ui::scheduler::Args),
    /// Show details about a backup
    Show(ui::show::ShowBackupArgs),
    /// Show the direct children of a tree
    Ls(ui::show::ShowTreeArgs),
    /// Recursively show a tree
    Tree(ui::show::TreeArgs),
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose);

    let config = config::load(args.config.as_ref())?;
    let pool = Arc::new(Pool::open(config.storage.location.clone())?);

    match args.subcommand {
        Subcommand_::Backup(a) => ui::backup::run(&pool, &config, a),
        Subcommand_::Check(a) => ui::check::run(&pool, a),
        Subcommand_::Diff(a) => ui::diff::run(&pool, a),
        Subcommand_::Export(a) => ui::export::run(&pool, a),
        Subcommand_::Gc(a) => ui::gc::run(&pool, a),
        Subcommand_::List(a) => ui::list::run(&pool, a),
        Subcommand_::Mount(a) => ui::mount::run_mount(pool, a),
        Subcommand_::Explore(a) => ui::mount::run_explore(pool, a),
        Subcommand_::Remotes(a) => ui::remotes::run(&pool, &config, a),
        Subcommand_::Restore(a) => ui::restore::run(&pool, &config, a),
        Subcommand_::Scheduler(a) => ui::scheduler::run(pool, config, a),
        Subcommand_::Show(a) => ui::show::run_show_backup(&pool, a),
        Subcommand_::Ls(a) => ui::show::run_show_tree(&pool, a),
        Subcommand_::Tree(a) => ui::show::run_tree(&pool, a),
    }
}

/// Set up tracing to spit messages to stderr, leveled from `-v` occurrences.
fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}
