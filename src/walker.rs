//! The incremental backup walker (C6): remote -> pool, parent-aware
//! skip/reuse/new blob classification, per-item error isolation.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use jiff::Timestamp;
use tracing::*;

use crate::object::{Backup, Ref, Tree, TreeItem, Value, item_ref, item_type};
use crate::pool::Pool;
use crate::remote::RemoteMethod;

fn bump(stats: &mut BTreeMap<String, u64>, key: &str, n: u64) {
    *stats.entry(key.to_owned()).or_insert(0) += n;
}

fn set_ref(item: &mut TreeItem, r: Ref) {
    item.insert("ref".to_owned(), Value::String(r.to_hex()));
}

fn join(path: &Utf8Path, name: &str) -> Utf8PathBuf {
    path.join(name)
}

/// Recursively walk `remote` starting at `path`, ingesting into `pool`, and
/// diffing against `parent` (the corresponding subtree of the previous
/// backup, if any). Returns the new tree's ref along with the errors and
/// stats accumulated at this level and below.
///
/// A blob-ingest failure propagates out of this call entirely (§4.5): the
/// caller, if it's walking a parent directory, catches it and drops this
/// whole subtree rather than a half-built one.
pub fn walk(
    remote: &dyn RemoteMethod,
    pool: &Pool,
    path: &Utf8Path,
    parent: Option<&Tree>,
) -> Result<(Ref, BTreeMap<String, String>, BTreeMap<String, u64>)> {
    let mut errors = BTreeMap::new();
    let mut stats = BTreeMap::new();
    let mut tree = remote
        .get_tree(path)
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("listing {path}"))?;

    let names: Vec<String> = tree.keys().cloned().collect();
    for name in names {
        let fullname = join(path, &name);
        if !remote.policy().included(fullname.as_str()) {
            tree.remove(&name);
            continue;
        }

        let parent_item = parent.and_then(|p| p.get(&name));
        let mut item = tree.remove(&name).expect("just listed");

        match item_type(&item) {
            Some("blob") => {
                bump(&mut stats, "total-blob", 1);
                match ingest_blob(remote, pool, &fullname, &item, parent_item, &mut stats) {
                    Ok(r) => {
                        set_ref(&mut item, r);
                        tree.insert(name, item);
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        debug!("blob {fullname}: {msg}");
                        errors.insert(fullname.to_string(), msg.clone());
                        return Err(anyhow!(msg)).with_context(|| format!("ingesting {fullname}"));
                    }
                }
            }
            Some("tree") => {
                let parent_subtree = parent_item
                    .filter(|pi| item_type(pi) == Some("tree"))
                    .and_then(item_ref)
                    .and_then(|r| pool.get_tree(r).ok());

                match walk(remote, pool, &fullname, parent_subtree.as_ref()) {
                    Ok((child_ref, child_errors, child_stats)) => {
                        set_ref(&mut item, child_ref);
                        tree.insert(name, item);
                        errors.extend(child_errors);
                        for (k, v) in child_stats {
                            bump(&mut stats, &k, v);
                        }
                    }
                    Err(e) => {
                        debug!("tree {fullname}: {e}");
                        errors.insert(fullname.to_string(), e.to_string());
                        // Subtree dropped; do not propagate (§4.5).
                    }
                }
            }
            _ => {
                // Links, fifos, and anything else: carried as-is.
                tree.insert(name, item);
            }
        }
    }

    bump(&mut stats, "total-tree", 1);
    let (tree_ref, size, stored_size) = pool.ingest_tree(&tree)?;
    if stored_size > 0 {
        bump(&mut stats, "new-tree", 1);
        bump(&mut stats, "new-tree-size", size);
        bump(&mut stats, "new-tree-stored-size", stored_size);
        trace!("tree {path}: NEW");
    } else {
        bump(&mut stats, "reused-tree", 1);
        bump(&mut stats, "reused-tree-size", size);
        trace!("tree {path}: REUSED");
    }

    Ok((tree_ref, errors, stats))
}

fn ingest_blob(
    remote: &dyn RemoteMethod,
    pool: &Pool,
    fullname: &Utf8Path,
    item: &TreeItem,
    parent_item: Option<&TreeItem>,
    stats: &mut BTreeMap<String, u64>,
) -> Result<Ref> {
    if let Some(parent_item) = parent_item {
        if item_type(parent_item) == Some("blob") && !remote.newer(item, parent_item) {
            let r = item_ref(parent_item).context("parent blob item has no ref")?;
            let size = pool.size(r).unwrap_or(0);
            bump(stats, "skipped-blob", 1);
            bump(stats, "skipped-blob-size", size);
            trace!("blob {fullname}: SKIP");
            return Ok(r);
        }
    }

    if let Some(checksum) = remote.checksum(fullname).map_err(|e| anyhow!("{e}"))? {
        if let Ok(r) = checksum.parse::<Ref>() {
            if pool.exists(r) {
                bump(stats, "reused-blob", 1);
                bump(stats, "reused-blob-size", pool.size(r).unwrap_or(0));
                trace!("blob {fullname}: REUSE (checksum hit)");
                return Ok(r);
            }
        }
    }

    let source = remote.get_blob(fullname).map_err(|e| anyhow!("{e}"))?;
    let (r, size, stored_size) = pool.ingest(source)?;
    if stored_size > 0 {
        bump(stats, "new-blob", 1);
        bump(stats, "new-blob-size", size);
        bump(stats, "new-blob-stored-size", stored_size);
        trace!("blob {fullname}: NEW");
    } else {
        bump(stats, "reused-blob", 1);
        bump(stats, "reused-blob-size", size);
        trace!("blob {fullname}: REUSE");
    }
    Ok(r)
}

/// Run a full backup of `remote`, optionally diffing against `parent`
/// (a ref naming a previous `Backup`). Returns the new backup's ref and the
/// decoded `Backup` record.
pub fn create_backup(
    pool: &Pool,
    remote: &mut dyn RemoteMethod,
    parent: Option<Ref>,
    now: impl Fn() -> Timestamp,
) -> Result<(Ref, Backup)> {
    let parent_root = match parent {
        Some(r) => {
            let backup = pool
                .get_backup(r)
                .with_context(|| format!("{r} isn't a backup"))?;
            Some(pool.get_tree(backup.root)?)
        }
        None => None,
    };

    let start_date = now();
    remote.initialize().map_err(|e| anyhow!("{e}"))?;
    let walk_result = walk(remote, pool, Utf8Path::new("/"), parent_root.as_ref());
    remote.shutdown().map_err(|e| anyhow!("{e}"))?;
    let (root, errors, stats) = walk_result?;
    let end_date = now();

    let backup = Backup {
        root,
        parent,
        stats,
        errors,
        start_date,
        end_date,
    };
    let (r, ..) = pool.ingest_backup(&backup)?;
    Ok((r, backup))
}
