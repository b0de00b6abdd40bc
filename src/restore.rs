//! Restore walker (C7): materialize a tree out of the pool into a remote.

use anyhow::{Result, anyhow};
use camino::Utf8Path;

use crate::object::{Tree, item_ref, item_type};
use crate::pool::Pool;
use crate::remote::RemoteMethod;

/// Materialize `tree` under `prefix` in `remote`, depth-first (§4.6).
pub fn restore(pool: &Pool, remote: &mut dyn RemoteMethod, tree: &Tree, prefix: &Utf8Path) -> Result<()> {
    remote.initialize().map_err(|e| anyhow!("{e}"))?;
    let result = restore_tree(pool, remote, tree, prefix);
    remote.shutdown().map_err(|e| anyhow!("{e}"))?;
    result
}

fn restore_tree(pool: &Pool, remote: &mut dyn RemoteMethod, tree: &Tree, prefix: &Utf8Path) -> Result<()> {
    remote.put_tree(tree, prefix).map_err(|e| anyhow!("{e}"))?;

    for (name, item) in tree {
        let fullname = prefix.join(name);
        match item_type(item) {
            Some("tree") => {
                let r = item_ref(item).ok_or_else(|| anyhow!("{fullname} has no tree ref"))?;
                let subtree = pool.get_tree(r)?;
                restore_tree(pool, remote, &subtree, &fullname)?;
            }
            Some("blob") => {
                let r = item_ref(item).ok_or_else(|| anyhow!("{fullname} has no blob ref"))?;
                let mut blob = pool.get_blob(r)?;
                remote
                    .put_blob(&mut blob, &fullname)
                    .map_err(|e| anyhow!("{e}"))?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::remote::LocalFilesystem;
    use crate::walker::create_backup;
    use camino::Utf8PathBuf;
    use std::fs;

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let p = Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap();
        (dir, p)
    }

    #[test]
    fn round_trips_a_backup() {
        let (_pdir, pool) = pool();
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), b"world").unwrap();

        let src_root = Utf8PathBuf::from_path_buf(src.path().to_owned()).unwrap();
        let mut src_remote = LocalFilesystem::new(src_root, &[], &[]);
        let (_r, backup) = create_backup(&pool, &mut src_remote, None, || {
            "2020-01-01T00:00:00Z".parse().unwrap()
        })
        .unwrap();

        let dst = tempfile::tempdir().unwrap();
        let dst_root = Utf8PathBuf::from_path_buf(dst.path().to_owned()).unwrap();
        let mut dst_remote = LocalFilesystem::new(dst_root, &[], &[]);

        let tree = pool.get_tree(backup.root).unwrap();
        restore(&pool, &mut dst_remote, &tree, Utf8Path::new("/")).unwrap();

        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dst.path().join("sub/b.txt")).unwrap(), b"world");
    }
}
