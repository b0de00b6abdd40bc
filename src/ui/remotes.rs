use anyhow::Result;
use clap::Parser;

use marty::config::Configuration;
use marty::pool::Pool;

/// Show the list of configured remotes
#[derive(Debug, Parser)]
pub struct Args;

pub fn run(pool: &Pool, config: &Configuration, _args: Args) -> Result<()> {
    println!("{:<20} {:<10} {:<25} SCHEDULED", "NAME", "METHOD", "LAST");
    let mut names: Vec<&String> = config.remotes.keys().collect();
    names.sort();
    for name in names {
        let remote = &config.remotes[name];
        let latest = pool.read_label(&format!("{name}/latest"))?;
        let last = match latest.and_then(|r| pool.get_backup(r).ok()) {
            Some(backup) => backup.start_date.to_string(),
            None => "-".to_owned(),
        };
        let scheduled = if remote.schedule.enabled {
            format!("every {}m", remote.schedule.interval)
        } else {
            "-".to_owned()
        };
        println!("{name:<20} {:<10} {last:<25} {scheduled}", remote.method);
    }
    Ok(())
}
