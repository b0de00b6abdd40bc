use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use jiff::Timestamp;

use marty::pool::Pool;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Order {
    Name,
    Date,
    Duration,
}

/// List backups
#[derive(Debug, Parser)]
pub struct Args {
    remote: Option<String>,

    #[clap(short, long)]
    since: Option<String>,

    #[clap(short, long)]
    until: Option<String>,

    #[clap(short, long, value_enum, default_value = "name")]
    order: Order,
}

pub fn run(pool: &Pool, args: Args) -> Result<()> {
    let since = args
        .since
        .as_deref()
        .map(|s| s.parse::<Timestamp>())
        .transpose()
        .context("parsing --since")?;
    let until = args
        .until
        .as_deref()
        .map(|s| s.parse::<Timestamp>())
        .transpose()
        .context("parsing --until")?;

    let prefix = args.remote.as_deref().map(|r| format!("{r}/"));

    let mut rows = Vec::new();
    for label in pool.list_labels()? {
        if label.ends_with("/latest") {
            continue;
        }
        if let Some(prefix) = &prefix
            && !label.starts_with(prefix.as_str())
        {
            continue;
        }
        let Some(r) = pool.read_label(&label)? else {
            continue;
        };
        let Ok(backup) = pool.get_backup(r) else {
            continue;
        };
        if since.is_some_and(|s| backup.start_date < s) {
            continue;
        }
        if until.is_some_and(|u| backup.start_date > u) {
            continue;
        }
        rows.push((label, backup));
    }

    match args.order {
        Order::Name => rows.sort_by(|a, b| a.0.cmp(&b.0)),
        Order::Date => rows.sort_by_key(|(_, b)| b.start_date),
        Order::Duration => {
            rows.sort_by_key(|(_, b)| b.end_date.as_second() - b.start_date.as_second())
        }
    }

    println!("{:<30} {:<25} {:>10} FLAGS", "NAME", "START DATE", "DURATION");
    for (label, backup) in &rows {
        let mut flags = String::new();
        if backup.parent.is_some() {
            flags.push('P');
        }
        if !backup.errors.is_empty() {
            flags.push('E');
        }
        let duration = backup.end_date.as_second() - backup.start_date.as_second();
        println!("{label:<30} {:<25} {duration:>9}s {flags}", backup.start_date);
    }
    println!("\nFlags: P have parent, E have errors");

    Ok(())
}
