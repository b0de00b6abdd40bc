mod common;

use std::fs;
use std::os::unix::fs::MetadataExt;

use predicates::prelude::*;

use common::{fixture, marty};

#[test]
fn first_time_backup_of_a_local_directory() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();

    marty(&fx.config)
        .args(["backup", "home", "first", "--stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("new-blob: 1"))
        .stdout(predicate::str::contains("new-tree: 1"));

    marty(&fx.config)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("home/first"));
}

#[test]
fn incremental_backup_skips_unchanged_files() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();

    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    marty(&fx.config)
        .args(["backup", "home", "second", "-p", "first", "--stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped-blob: 1"))
        .stdout(predicate::str::contains("reused-tree: 1"));
}

#[test]
fn incremental_backup_reingests_modified_files() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    // Bump the mtime so the walker sees the file as changed.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(fx.src.join("f"), "world").unwrap();

    marty(&fx.config)
        .args(["backup", "home", "second", "-p", "first", "--stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("new-blob: 1"));
}

#[test]
fn gc_sweeps_objects_only_reachable_from_a_deleted_label() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(fx.src.join("f"), "world").unwrap();
    marty(&fx.config)
        .args(["backup", "home", "second", "-p", "first"])
        .assert()
        .success();

    // Drop the first label (and its now-orphaned "latest" pointer stays on
    // second), leaving the "hello" blob reachable from nothing.
    let labels_dir = fx.pool.join("labels");
    fs::remove_file(labels_dir.join("home").join("first")).unwrap();

    marty(&fx.config)
        .args(["gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));

    marty(&fx.config).args(["check"]).assert().success();
}

#[test]
fn restore_round_trips_a_backup_onto_its_remote() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    fs::create_dir(fx.src.join("sub")).unwrap();
    fs::write(fx.src.join("sub").join("g"), "world").unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    fs::remove_file(fx.src.join("f")).unwrap();
    fs::remove_dir_all(fx.src.join("sub")).unwrap();

    marty(&fx.config).args(["restore", "home", "first"]).assert().success();

    assert_eq!(fs::read_to_string(fx.src.join("f")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(fx.src.join("sub").join("g")).unwrap(), "world");
}

#[test]
fn export_writes_a_plain_directory() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    let out = fx.dir.path().join("export");
    marty(&fx.config)
        .args(["export", "home", "first", out.to_str().unwrap()])
        .assert()
        .success();

    assert_eq!(fs::read_to_string(out.join("f")).unwrap(), "hello");
}

#[test]
fn export_refuses_archive_formats() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    let out = fx.dir.path().join("export.tar");
    marty(&fx.config)
        .args(["export", "home", "first", out.to_str().unwrap(), "-f", "tar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("archive export formats"));
}

#[test]
fn diff_shows_added_and_changed_paths() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    fs::write(fx.src.join("g"), "new").unwrap();
    marty(&fx.config)
        .args(["backup", "home", "second", "-p", "first"])
        .assert()
        .success();

    marty(&fx.config)
        .args(["diff", "home/first", "home/second"])
        .assert()
        .success()
        .stdout(predicate::str::contains("g"));
}

#[test]
// `size` on a backed-up file's tree attributes should match the on-disk size.
fn tree_attributes_record_the_source_files_size() {
    let fx = fixture();
    fs::write(fx.src.join("f"), "hello").unwrap();
    let meta = fs::metadata(fx.src.join("f")).unwrap();
    marty(&fx.config).args(["backup", "home", "first"]).assert().success();

    marty(&fx.config)
        .args(["ls", "home/first"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("size:Integer({})", meta.size())));
}
