use anyhow::{Result, bail};
use clap::Parser;
use tracing::*;

use marty::check;
use marty::pool::Pool;

/// Check all objects in the pool
#[derive(Debug, Parser)]
pub struct Args;

pub fn run(pool: &Pool, _args: Args) -> Result<()> {
    let mismatches = check::check(pool)?;
    for m in &mismatches {
        error!("{}: hash mismatch", m.0);
    }
    if mismatches.is_empty() {
        println!("Done. No problems found.");
        Ok(())
    } else {
        bail!("{} corrupted object(s)", mismatches.len());
    }
}
