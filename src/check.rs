//! Integrity check (C9): recompute every object's hash and compare against
//! its ref. Never modifies the pool.

use anyhow::{Context, Result};
use tracing::*;

use crate::object::Ref;
use crate::pool::Pool;

const READ_SIZE: usize = 4096;

/// A ref whose stored bytes don't hash back to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch(pub Ref);

/// Stream every object in the pool and recompute its hash. Returns the refs
/// that don't match their stored contents.
pub fn check(pool: &Pool) -> Result<Vec<Mismatch>> {
    use sha1::{Digest, Sha1};
    use std::io::Read;

    let mut mismatches = Vec::new();
    for r in pool.list()? {
        trace!("checking {r}");
        let mut object = pool
            .open_object(r)
            .with_context(|| format!("opening {r}"))?;
        let mut hasher = Sha1::new();
        let mut buf = [0u8; READ_SIZE];
        loop {
            let n = object.read(&mut buf).with_context(|| format!("reading {r}"))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = hasher.finalize();
        if digest.as_slice() != r.as_bytes() {
            warn!("{r}: hash mismatch");
            mismatches.push(Mismatch(r));
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod test {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn clean_pool_has_no_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap();
        pool.ingest(&b"hello"[..]).unwrap();
        pool.ingest(&b"world"[..]).unwrap();
        assert!(check(&pool).unwrap().is_empty());
    }

    #[test]
    fn corrupted_object_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap();
        let (r, ..) = pool.ingest(&b"hello"[..]).unwrap();

        // Corrupt the stored object in place.
        let hex = r.to_hex();
        let path = dir
            .path()
            .join("pool")
            .join(&hex[0..1])
            .join(&hex[1..2])
            .join(&hex[2..3])
            .join(&hex);
        std::fs::write(&path, b"tampered").unwrap();

        let mismatches = check(&pool).unwrap();
        assert_eq!(mismatches, vec![Mismatch(r)]);
    }
}
