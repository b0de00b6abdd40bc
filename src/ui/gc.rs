use anyhow::Result;
use byte_unit::{Byte, UnitType};
use clap::Parser;

use marty::gc;
use marty::pool::Pool;

/// Garbage collect unused objects in the pool
#[derive(Debug, Parser)]
pub struct Args {
    /// Do not delete the selected objects
    #[clap(short = 'r', long)]
    dry_run: bool,
}

pub fn run(pool: &Pool, args: Args) -> Result<()> {
    let (count, size) = gc::gc(pool, args.dry_run)?;
    if count > 0 {
        let size = Byte::from_u64(size).get_appropriate_unit(UnitType::Binary);
        println!("Done. Deleted {count} objects, total size: {size}");
    } else {
        println!("Done. Nothing to delete.");
    }
    Ok(())
}
