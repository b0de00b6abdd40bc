use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};

use marty::pool::Pool;
use marty::remote::LocalFilesystem;
use marty::{resolve, restore};

use super::full_name;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Dir,
    Tar,
    Targz,
    Tarbz2,
    Tarxz,
}

/// Export a backup to a directory. `remote` is only present when three
/// positional names are given; with two, `name` is taken relative to the
/// pool directly.
#[derive(Debug, Parser)]
pub struct Args {
    #[clap(value_name = "REMOTE|NAME")]
    a: String,
    #[clap(value_name = "NAME|OUTPUT")]
    b: String,
    #[clap(value_name = "OUTPUT")]
    c: Option<Utf8PathBuf>,
    /// Output format
    #[clap(short, long, value_enum, default_value = "dir")]
    format: Format,
}

pub fn run(pool: &Pool, args: Args) -> Result<()> {
    match args.format {
        Format::Dir => {}
        Format::Tar | Format::Targz | Format::Tarbz2 | Format::Tarxz => {
            bail!("archive export formats aren't implemented, only \"dir\" is")
        }
    }

    let (remote, name, output) = match args.c {
        Some(output) => (Some(args.a), args.b, output),
        None => (None, args.a, Utf8PathBuf::from(args.b)),
    };
    let name = full_name(&remote, &name);
    let tree = pool.resolve_tree(resolve::resolve(pool, &name)?)?;

    std::fs::create_dir(&output)
        .with_context(|| format!("creating export directory {output}"))?;
    let mut remote = LocalFilesystem::new(output, &[], &[]);

    restore::restore(pool, &mut remote, &tree, camino::Utf8Path::new("/"))
}
