//! The content-addressed object store (C2) and its label namespace (C3).
//!
//! Objects live under `pool/<xx>/<yy>/<zz>/<full-40-hex>`; labels live
//! under `labels/<name>`. Both are plain files on a local filesystem -
//! there is no remote pool backend in this crate (§1 fixes the wire format
//! but leaves transport to operators who mount a shared filesystem).

use std::fs::{self, File};
use std::io::prelude::*;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, bail, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use sha1::{Digest, Sha1};
use tracing::*;

use crate::object::{self, Backup, Ref, Tree};

/// Labels match `^[^/?<>\:*|"]+(/[^/?<>\:*|"]+)*$`.
///
/// §9's open question on label validation is resolved per the permissive
/// form: no restriction on `.`, so timestamps and file-extension-looking
/// paths are both valid label components.
fn label_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^[^/?<>:*|"]+(/[^/?<>:*|"]+)*$"#).unwrap())
}

pub fn check_label(name: &str) -> Result<()> {
    ensure!(label_regex().is_match(name), "{name:?} isn't a valid label");
    Ok(())
}

/// A content-addressed object pool rooted at `location`.
pub struct Pool {
    location: Utf8PathBuf,
    // Protects the ingest "exists? -> link" critical section (§4.2, §9).
    // Concurrent ingest across threads in this process is safe; across
    // processes it is not (§5's documented limitation).
    ingest_lock: Mutex<()>,
}

const FANOUT_DEPTH: usize = 3;

impl Pool {
    /// Open (creating if needed) a pool at `location`.
    pub fn open(location: impl Into<Utf8PathBuf>) -> Result<Self> {
        let location = location.into();
        fs::create_dir_all(location.join("pool"))
            .with_context(|| format!("couldn't create {location}/pool"))?;
        fs::create_dir_all(location.join("labels"))
            .with_context(|| format!("couldn't create {location}/labels"))?;
        Ok(Pool {
            location,
            ingest_lock: Mutex::new(()),
        })
    }

    pub fn location(&self) -> &Utf8Path {
        &self.location
    }

    fn pool_dir(&self, hex: &str) -> PathBuf {
        let mut p = PathBuf::from(self.location.as_std_path()).join("pool");
        for i in 0..FANOUT_DEPTH {
            p.push(&hex[i..i + 1]);
        }
        p
    }

    fn pool_path(&self, r: Ref) -> PathBuf {
        let hex = r.to_hex();
        self.pool_dir(&hex).join(hex)
    }

    fn label_path(&self, name: &str) -> Result<PathBuf> {
        check_label(name)?;
        Ok(PathBuf::from(self.location.as_std_path())
            .join("labels")
            .join(name))
    }

    /// Ingest a streaming byte source. Returns `(ref, size, stored_size)`;
    /// `stored_size == 0` means the object already existed (a dedup hit).
    pub fn ingest<R: Read>(&self, mut source: R) -> Result<(Ref, u64, u64)> {
        let mut tmp = tempfile::Builder::new()
            .prefix(".marty-tmp-")
            .tempfile_in(&self.location)
            .context("couldn't create a temp file for ingest")?;

        let mut hasher = Sha1::new();
        let mut size = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = source.read(&mut buf).context("reading ingest source")?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n]).context("writing temp object")?;
            size += n as u64;
        }
        tmp.flush().ok();

        let digest = hasher.finalize();
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&digest);
        let r = Ref::from_hex_bytes(raw);

        let _guard = self.ingest_lock.lock().unwrap();
        let stored_size = if self.exists(r) {
            trace!("{r} already in pool, discarding temp file");
            0
        } else {
            let dir = self.pool_dir(&r.to_hex());
            fs::create_dir_all(&dir)
                .with_context(|| format!("couldn't create {}", dir.display()))?;
            let dest = self.pool_path(r);
            tmp.persist(&dest)
                .with_context(|| format!("couldn't link new object into {}", dest.display()))?;
            size
        };
        // tmp is consumed by persist() on the new-object path; on the
        // dedup-hit path it's dropped here, cleaning itself up.
        Ok((r, size, stored_size))
    }

    pub fn exists(&self, r: Ref) -> bool {
        self.pool_path(r).exists()
    }

    pub fn open_object(&self, r: Ref) -> Result<File> {
        File::open(self.pool_path(r)).with_context(|| format!("{r} isn't in the pool"))
    }

    pub fn size(&self, r: Ref) -> Result<u64> {
        Ok(fs::metadata(self.pool_path(r))
            .with_context(|| format!("{r} isn't in the pool"))?
            .len())
    }

    /// Every ref currently stored, in no particular order.
    pub fn list(&self) -> Result<Vec<Ref>> {
        let mut out = Vec::new();
        let pool_root = PathBuf::from(self.location.as_std_path()).join("pool");
        for xx in read_hex_dirs(&pool_root)? {
            for yy in read_hex_dirs(&xx)? {
                for zz in read_hex_dirs(&yy)? {
                    for entry in fs::read_dir(&zz)
                        .with_context(|| format!("reading {}", zz.display()))?
                    {
                        let entry = entry?;
                        if let Some(name) = entry.file_name().to_str() {
                            if let Ok(r) = name.parse() {
                                out.push(r);
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn delete(&self, r: Ref) -> Result<()> {
        fs::remove_file(self.pool_path(r)).with_context(|| format!("deleting {r}"))
    }

    /// Read and decode the raw bytes stored at `r`.
    pub fn read_bytes(&self, r: Ref) -> Result<Vec<u8>> {
        object::read_all(self.open_object(r)?).with_context(|| format!("reading {r}"))
    }

    pub fn get_blob(&self, r: Ref) -> Result<File> {
        self.open_object(r)
    }

    pub fn get_tree(&self, r: Ref) -> Result<Tree> {
        object::decode_tree(&self.read_bytes(r)?)
    }

    pub fn get_backup(&self, r: Ref) -> Result<Backup> {
        object::decode_backup(&self.read_bytes(r)?)
    }

    /// Decode `r` as a Tree; failing that, decode it as a Backup and return
    /// its root tree (§4.3) - lets callers pass a backup label wherever a
    /// tree is expected.
    pub fn resolve_tree(&self, r: Ref) -> Result<Tree> {
        let bytes = self.read_bytes(r)?;
        match object::decode_tree(&bytes) {
            Ok(t) => Ok(t),
            Err(_) => {
                let backup = object::decode_backup(&bytes)
                    .with_context(|| format!("{r} is neither a tree nor a backup"))?;
                self.get_tree(backup.root)
            }
        }
    }

    pub fn ingest_tree(&self, tree: &Tree) -> Result<(Ref, u64, u64)> {
        let (bytes, _) = object::encode_tree(tree)?;
        self.ingest(&bytes[..])
    }

    pub fn ingest_backup(&self, backup: &Backup) -> Result<(Ref, u64, u64)> {
        let (bytes, _) = object::encode_backup(backup)?;
        self.ingest(&bytes[..])
    }

    // --- Labels (C3) ---

    pub fn set_label(&self, name: &str, r: Ref, overwrite: bool) -> Result<()> {
        let path = self.label_path(name)?;
        if path.exists() && !overwrite {
            bail!("label {name:?} already exists");
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("couldn't create {}", parent.display()))?;
        }
        fs::write(&path, r.to_hex()).with_context(|| format!("writing label {name:?}"))
    }

    pub fn read_label(&self, name: &str) -> Result<Option<Ref>> {
        let path = self.label_path(name)?;
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let hex = contents.get(..40).unwrap_or(&contents);
                Ok(Some(hex.parse().with_context(|| {
                    format!("label {name:?} doesn't contain a valid ref")
                })?))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading label {name:?}")),
        }
    }

    pub fn delete_label(&self, name: &str) -> Result<()> {
        let path = self.label_path(name)?;
        fs::remove_file(&path).with_context(|| format!("deleting label {name:?}"))
    }

    /// All labels, as their `/`-separated names relative to `labels/`.
    pub fn list_labels(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let root = PathBuf::from(self.location.as_std_path()).join("labels");
        walk_labels(&root, &root, &mut out)?;
        out.sort();
        Ok(out)
    }
}

fn walk_labels(root: &std::path::Path, dir: &std::path::Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_labels(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            if let Some(s) = rel.to_str() {
                out.push(s.replace(std::path::MAIN_SEPARATOR, "/"));
            }
        }
    }
    Ok(())
}

fn read_hex_dirs(dir: &std::path::Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    Ok(out)
}
