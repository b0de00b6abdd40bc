//! Scheduler (C10): a bounded worker pool that polls configured remotes and
//! kicks off a backup once each one's interval has elapsed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jiff::{Timestamp, tz::TimeZone};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::*;

use crate::object::Backup;
use crate::pool::Pool;
use crate::remote::RemoteMethod;
use crate::walker;

/// A remote under scheduler control: its name (used as the label prefix)
/// and how often it should be backed up.
pub struct ScheduledRemote {
    pub name: String,
    pub remote: Arc<Mutex<Box<dyn RemoteMethod + Send>>>,
    pub interval_minutes: u64,
}

/// Polls `remotes` on a fixed interval, running at most `workers` backups
/// concurrently. One remote is never backed up twice at once: a remote
/// already in `running` is skipped until its task completes.
pub struct Scheduler {
    pool: Arc<Pool>,
    remotes: Vec<ScheduledRemote>,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(pool: Arc<Pool>, remotes: Vec<ScheduledRemote>, workers: usize) -> Self {
        Scheduler {
            pool,
            remotes,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Run forever, polling every `loop_interval`.
    pub async fn run_forever(&self, loop_interval: Duration) -> ! {
        let mut running: HashMap<String, JoinHandle<Result<Backup>>> = HashMap::new();
        info!("scheduler started for {} remotes", self.remotes.len());
        loop {
            self.tick(&mut running, Timestamp::now).await;
            tokio::time::sleep(loop_interval).await;
        }
    }

    /// One polling iteration: submit due remotes, reap completed ones.
    /// Exposed separately from [`Self::run_forever`] so it can be driven
    /// deterministically in tests.
    pub async fn tick(
        &self,
        running: &mut HashMap<String, JoinHandle<Result<Backup>>>,
        now: impl Fn() -> Timestamp,
    ) {
        for scheduled in &self.remotes {
            if running.contains_key(&scheduled.name) {
                continue;
            }

            let latest_label = format!("{}/latest", scheduled.name);
            let parent = match self.pool.read_label(&latest_label) {
                Ok(Some(r)) => Some(r),
                _ => None,
            };

            let due = match parent.and_then(|r| self.pool.get_backup(r).ok()) {
                Some(backup) => {
                    let interval_secs = (scheduled.interval_minutes * 60) as i64;
                    let next_due = backup.start_date.as_second() + interval_secs;
                    now().as_second() >= next_due
                }
                None => true,
            };

            if !due {
                continue;
            }

            let pool = Arc::clone(&self.pool);
            let remote = Arc::clone(&scheduled.remote);
            let semaphore = Arc::clone(&self.semaphore);
            let name = scheduled.name.clone();
            let now_fn_result = now();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                run_scheduled_backup(pool, remote, name, parent, now_fn_result).await
            });
            info!("queued a new backup for {}", scheduled.name);
            running.insert(scheduled.name.clone(), handle);
        }

        let mut done = Vec::new();
        for (name, handle) in running.iter() {
            if handle.is_finished() {
                done.push(name.clone());
            }
        }
        for name in done {
            let handle = running.remove(&name).unwrap();
            match handle.await {
                Ok(Ok(backup)) => {
                    let seconds = backup.end_date.as_second() - backup.start_date.as_second();
                    info!("backup for {name} completed in {seconds}s");
                }
                Ok(Err(e)) => error!("backup for {name} failed: {e:#}"),
                Err(e) => error!("backup task for {name} panicked: {e}"),
            }
        }
    }
}

async fn run_scheduled_backup(
    pool: Arc<Pool>,
    remote: Arc<Mutex<Box<dyn RemoteMethod + Send>>>,
    name: String,
    parent: Option<crate::object::Ref>,
    start: Timestamp,
) -> Result<Backup> {
    tokio::task::spawn_blocking(move || {
        let label = start.to_zoned(TimeZone::UTC).strftime("%Y-%m-%d_%H-%M-%S").to_string();
        let mut remote = remote.blocking_lock();
        let (backup_ref, backup) = walker::create_backup(&pool, &mut **remote, parent, || start)
            .with_context(|| format!("backing up {name}"))?;
        pool.set_label(&format!("{name}/{label}"), backup_ref, false)?;
        pool.set_label(&format!("{name}/latest"), backup_ref, true)?;
        Ok(backup)
    })
    .await
    .context("backup task panicked")?
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::remote::LocalFilesystem;
    use camino::Utf8PathBuf;
    use std::fs;

    fn pool() -> (tempfile::TempDir, Arc<Pool>) {
        let dir = tempfile::tempdir().unwrap();
        let p = Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap();
        (dir, Arc::new(p))
    }

    #[tokio::test]
    async fn first_tick_backs_up_a_due_remote() {
        let (_pdir, pool) = pool();
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hi").unwrap();
        let root = Utf8PathBuf::from_path_buf(src.path().to_owned()).unwrap();
        let remote = LocalFilesystem::new(root, &[], &[]);

        let scheduler = Scheduler::new(
            Arc::clone(&pool),
            vec![ScheduledRemote {
                name: "home".to_owned(),
                remote: Arc::new(Mutex::new(Box::new(remote) as Box<dyn RemoteMethod + Send>)),
                interval_minutes: 60,
            }],
            1,
        );

        let mut running = HashMap::new();
        let t0: Timestamp = "2020-01-01T00:00:00Z".parse().unwrap();
        scheduler.tick(&mut running, move || t0).await;

        // Give the spawned task a chance to run to completion.
        for _ in 0..50 {
            if running.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            scheduler.tick(&mut running, move || t0).await;
        }

        assert!(pool.read_label("home/latest").unwrap().is_some());
    }

    #[tokio::test]
    async fn not_due_yet_is_skipped() {
        let (_pdir, pool) = pool();
        let src = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(src.path().to_owned()).unwrap();
        let remote = LocalFilesystem::new(root, &[], &[]);

        let scheduler = Scheduler::new(
            Arc::clone(&pool),
            vec![ScheduledRemote {
                name: "home".to_owned(),
                remote: Arc::new(Mutex::new(Box::new(remote) as Box<dyn RemoteMethod + Send>)),
                interval_minutes: 60,
            }],
            1,
        );

        let t0: Timestamp = "2020-01-01T00:00:00Z".parse().unwrap();
        let mut running = HashMap::new();
        scheduler.tick(&mut running, move || t0).await;
        for _ in 0..50 {
            if running.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            scheduler.tick(&mut running, move || t0).await;
        }
        assert!(pool.read_label("home/latest").unwrap().is_some());

        // One minute later: interval is 60 minutes, so nothing should run.
        let t1: Timestamp = "2020-01-01T00:01:00Z".parse().unwrap();
        let mut running2 = HashMap::new();
        scheduler.tick(&mut running2, move || t1).await;
        assert!(running2.is_empty());
    }
}
