use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

/// A pool directory, a remote source directory, and the config file wiring
/// a "home" remote to it.
pub struct Fixture {
    pub dir: TempDir,
    pub config: std::path::PathBuf,
    pub src: std::path::PathBuf,
    pub pool: std::path::PathBuf,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let pool = dir.path().join("pool");
    fs::create_dir(&src).unwrap();

    let config = dir.path().join("marty.toml");
    fs::write(
        &config,
        format!(
            r#"
            [storage]
            type = "local"
            location = {pool:?}

            [remotes.home]
            method = "local"
            root = {src:?}
            "#
        ),
    )
    .unwrap();

    Fixture {
        dir,
        config,
        src,
        pool,
    }
}

pub fn marty(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("marty").unwrap();
    cmd.arg("-c").arg(config);
    cmd
}
