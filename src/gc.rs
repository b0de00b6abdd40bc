//! Garbage collector (C8): mark-and-sweep over the label-rooted reachability
//! closure.

use std::collections::HashSet;

use anyhow::Result;
use tracing::trace;

use crate::object::{Ref, Tree, item_ref, item_type};
use crate::pool::Pool;

fn mark_tree(pool: &Pool, tree: &Tree, known: &mut HashSet<Ref>) -> Result<()> {
    for item in tree.values() {
        let Some(r) = item_ref(item) else { continue };
        match item_type(item) {
            Some("blob") => {
                known.insert(r);
            }
            Some("tree") => {
                mark_subtree(pool, r, known)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn mark_subtree(pool: &Pool, r: Ref, known: &mut HashSet<Ref>) -> Result<()> {
    if !known.insert(r) {
        return Ok(());
    }
    let tree = pool.get_tree(r)?;
    mark_tree(pool, &tree, known)
}

/// Every ref reachable from a label (§4.7's mark phase).
pub fn walk_used(pool: &Pool) -> Result<HashSet<Ref>> {
    let mut known = HashSet::new();
    for label in pool.list_labels()? {
        let Some(r) = pool.read_label(&label)? else {
            continue;
        };
        known.insert(r);
        let backup = pool.get_backup(r)?;
        mark_subtree(pool, backup.root, &mut known)?;
    }
    Ok(known)
}

/// Every ref in the pool that isn't reachable from any label.
pub fn iter_unused(pool: &Pool) -> Result<Vec<Ref>> {
    let known = walk_used(pool)?;
    Ok(pool
        .list()?
        .into_iter()
        .filter(|r| !known.contains(r))
        .collect())
}

/// Delete every unreachable object (unless `dry_run`). Returns the count and
/// total size of objects considered, computed before any deletion.
pub fn gc(pool: &Pool, dry_run: bool) -> Result<(u64, u64)> {
    let mut count = 0u64;
    let mut size = 0u64;
    for r in iter_unused(pool)? {
        trace!("removing {r}");
        size += pool.size(r)?;
        count += 1;
        if !dry_run {
            pool.delete(r)?;
        }
    }
    Ok((count, size))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::Value;
    use camino::Utf8PathBuf;

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let p = Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap();
        (dir, p)
    }

    #[test]
    fn unlabeled_objects_are_collected() {
        let (_dir, pool) = pool();
        let (orphan_ref, ..) = pool.ingest(&b"orphan"[..]).unwrap();

        let mut tree = Tree::new();
        let mut item = crate::object::TreeItem::new();
        item.insert("type".to_owned(), Value::String("blob".to_owned()));
        let (kept_ref, ..) = pool.ingest(&b"kept"[..]).unwrap();
        item.insert("ref".to_owned(), Value::String(kept_ref.to_hex()));
        tree.insert("f".to_owned(), item);
        let (tree_ref, ..) = pool.ingest_tree(&tree).unwrap();

        let backup = crate::object::Backup {
            root: tree_ref,
            parent: None,
            stats: Default::default(),
            errors: Default::default(),
            start_date: "2020-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2020-01-01T00:00:01Z".parse().unwrap(),
        };
        let (backup_ref, ..) = pool.ingest_backup(&backup).unwrap();
        pool.set_label("keep", backup_ref, true).unwrap();

        let unused = iter_unused(&pool).unwrap();
        assert_eq!(unused, vec![orphan_ref]);

        let (count, size) = gc(&pool, false).unwrap();
        assert_eq!(count, 1);
        assert_eq!(size, 6);
        assert!(!pool.exists(orphan_ref));
        assert!(pool.exists(kept_ref));
        assert!(pool.exists(tree_ref));
        assert!(pool.exists(backup_ref));
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let (_dir, pool) = pool();
        let (orphan_ref, ..) = pool.ingest(&b"orphan"[..]).unwrap();
        let (count, _) = gc(&pool, true).unwrap();
        assert_eq!(count, 1);
        assert!(pool.exists(orphan_ref));
    }
}
