//! On-disk configuration (§6): storage location, scheduled remotes, and
//! scheduler tuning. TOML, loaded the way `backpak::config` loads its own
//! (much smaller) config file.

use std::collections::HashMap;
use std::fs;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use serde_derive::Deserialize;

fn default_schedule_interval() -> u64 {
    1440
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_loop_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_schedule_interval")]
    pub interval: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            enabled: false,
            interval: default_schedule_interval(),
        }
    }
}

/// One `remotes.<name>` table. `method` selects the concrete `RemoteMethod`
/// impl (see [`crate::remote`]); everything past `includes`/`excludes`/
/// `schedule` is method-specific and just carried along (only `local`'s
/// `root` is consumed today; an `ssh` method is not implemented, see the
/// crate-level note on remote transports).
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub method: String,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub root: Option<Utf8PathBuf>,
    pub server: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub location: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_loop_interval")]
    pub loop_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            workers: default_workers(),
            loop_interval: default_loop_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    pub storage: StorageConfig,
    #[serde(default)]
    pub remotes: HashMap<String, RemoteConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Configuration {
    /// Remotes with `schedule.enabled = true`, the set the scheduler polls.
    pub fn scheduled_remotes(&self) -> impl Iterator<Item = (&String, &RemoteConfig)> {
        self.remotes.iter().filter(|(_, r)| r.schedule.enabled)
    }
}

/// Load from `path`, or `~/.config/marty.toml` if `path` is `None`. Unlike
/// `backpak`'s config (which is all-optional and defaults cleanly),
/// `storage` has no sensible default, so a missing file is an error here.
pub fn load(path: Option<&Utf8PathBuf>) -> Result<Configuration> {
    let confpath = match path {
        Some(p) => p.clone(),
        None => {
            let mut home: Utf8PathBuf = home::home_dir()
                .context("can't find home directory")?
                .try_into()
                .context("home directory isn't UTF-8")?;
            home.extend([".config", "marty.toml"]);
            home
        }
    };
    let s = fs::read_to_string(&confpath).with_context(|| format!("opening {confpath}"))?;
    toml::from_str(&s).with_context(|| format!("parsing {confpath}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_storage_and_remotes() {
        let toml = r#"
            [storage]
            type = "local"
            location = "/var/backups/marty"

            [remotes.home]
            method = "local"
            root = "/home/user"
            includes = ["/home/user/docs"]
            excludes = ["/home/user/docs/tmp"]

            [remotes.home.schedule]
            enabled = true
            interval = 60

            [scheduler]
            workers = 4
            loop_interval = 30
        "#;

        let conf: Configuration = toml::from_str(toml).unwrap();
        assert_eq!(conf.storage.kind, "local");
        assert_eq!(conf.storage.location, "/var/backups/marty");
        let home = &conf.remotes["home"];
        assert_eq!(home.method, "local");
        assert_eq!(home.root.as_deref(), Some(camino::Utf8Path::new("/home/user")));
        assert!(home.schedule.enabled);
        assert_eq!(home.schedule.interval, 60);
        assert_eq!(conf.scheduler.workers, 4);
        assert_eq!(conf.scheduler.loop_interval, 30);
        assert_eq!(conf.scheduled_remotes().count(), 1);
    }

    #[test]
    fn schedule_defaults_to_disabled_daily() {
        let toml = r#"
            [storage]
            type = "local"
            location = "/var/backups/marty"

            [remotes.home]
            method = "local"
            root = "/home/user"
        "#;

        let conf: Configuration = toml::from_str(toml).unwrap();
        let home = &conf.remotes["home"];
        assert!(!home.schedule.enabled);
        assert_eq!(home.schedule.interval, 1440);
        assert_eq!(conf.scheduled_remotes().count(), 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Utf8PathBuf::from_path_buf(dir.path().join("nope.toml")).unwrap();
        assert!(load(Some(&missing)).is_err());
    }
}
