//! CLI subcommands (§6). Each submodule owns one command's `clap::Args`
//! and its `run`.

pub mod backup;
pub mod check;
pub mod diff;
pub mod export;
pub mod gc;
pub mod list;
pub mod mount;
pub mod remotes;
pub mod restore;
pub mod scheduler;
pub mod show;

use anyhow::{Context, Result, bail};
use marty::config::RemoteConfig;
use marty::remote::{LocalFilesystem, RemoteMethod};

/// `remote/name`, or just `name` when no remote was given — the naming
/// convention labels live under (`<remote>/<label>`).
pub fn full_name(remote: &Option<String>, name: &str) -> String {
    match remote {
        Some(r) => format!("{r}/{name}"),
        None => name.to_owned(),
    }
}

/// clap won't let an optional positional precede a required one, so these
/// commands take `(a, b?)` instead of `(remote?, name)` and sort it out here:
/// `b` present means `a` was the remote.
pub fn split_remote_name(a: String, b: Option<String>) -> (Option<String>, String) {
    match b {
        Some(name) => (Some(a), name),
        None => (None, a),
    }
}

/// Instantiate the concrete `RemoteMethod` a config entry names.
pub fn build_remote(cfg: &RemoteConfig) -> Result<Box<dyn RemoteMethod + Send>> {
    match cfg.method.as_str() {
        "local" => {
            let root = cfg
                .root
                .clone()
                .context("a \"local\" remote needs a \"root\" path")?;
            Ok(Box::new(LocalFilesystem::new(root, &cfg.includes, &cfg.excludes)))
        }
        other => bail!("remote method {other:?} isn't implemented (only \"local\" is)"),
    }
}
