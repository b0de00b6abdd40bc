use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Mutex;

use marty::config::Configuration;
use marty::pool::Pool;
use marty::remote::RemoteMethod;
use marty::scheduler::{Scheduler, ScheduledRemote};

use super::build_remote;

/// Run the scheduler, backing up every due remote on its configured interval
#[derive(Debug, Parser)]
pub struct Args;

pub fn run(pool: Arc<Pool>, config: Configuration, _args: Args) -> Result<()> {
    let mut scheduled = Vec::new();
    for (name, remote_config) in config.scheduled_remotes() {
        let remote = build_remote(remote_config)?;
        scheduled.push(ScheduledRemote {
            name: name.clone(),
            remote: Arc::new(Mutex::new(remote as Box<dyn RemoteMethod + Send>)),
            interval_minutes: remote_config.schedule.interval,
        });
    }

    let scheduler = Scheduler::new(pool, scheduled, config.scheduler.workers);
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(scheduler.run_forever(Duration::from_secs(config.scheduler.loop_interval)))
}
