//! A remote rooted at a directory on the local filesystem.
//!
//! This is the one concrete [`RemoteMethod`] this crate ships: enough to
//! exercise the walker and the end-to-end backup/restore path without a
//! real transport. SFTP, object storage, etc. are left to whoever embeds
//! this crate (§1 fixes the wire format but leaves transport to them).

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

use camino::{Utf8Path, Utf8PathBuf};

use crate::object::{Tree, TreeItem, Value};

use super::{PathPolicy, RemoteError, RemoteMethod};

pub struct LocalFilesystem {
    root: Utf8PathBuf,
    policy: PathPolicy,
}

impl LocalFilesystem {
    pub fn new(root: impl Into<Utf8PathBuf>, includes: &[String], excludes: &[String]) -> Self {
        LocalFilesystem {
            root: root.into(),
            policy: PathPolicy::new(includes, excludes),
        }
    }

    fn full(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn op_err(context: &str, err: std::io::Error) -> RemoteError {
        RemoteError(format!("{context}: {err}"))
    }
}

impl RemoteMethod for LocalFilesystem {
    fn get_tree(&self, path: &Utf8Path) -> Result<Tree, RemoteError> {
        let directory = self.full(path);
        let entries =
            fs::read_dir(&directory).map_err(|e| Self::op_err(&format!("listing {directory}"), e))?;

        let mut tree = Tree::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::op_err(&format!("reading {directory}"), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry
                .metadata()
                .map_err(|e| Self::op_err(&format!("stat {}", entry.path().display()), e))?;
            let ft = meta.file_type();

            let mut item = TreeItem::new();
            if ft.is_file() {
                item.insert("type".into(), Value::String("blob".into()));
                item.insert("filetype".into(), Value::String("regular".into()));
            } else if ft.is_dir() {
                item.insert("type".into(), Value::String("tree".into()));
                item.insert("filetype".into(), Value::String("directory".into()));
            } else if ft.is_symlink() {
                item.insert("filetype".into(), Value::String("link".into()));
                if let Ok(target) = fs::read_link(entry.path()) {
                    item.insert(
                        "link".into(),
                        Value::String(target.to_string_lossy().into_owned()),
                    );
                }
            } else if ft.is_fifo() {
                item.insert("filetype".into(), Value::String("fifo".into()));
            } else {
                continue; // sockets, block/char devices: skip.
            }

            item.insert("uid".into(), Value::Integer(meta.uid() as i64));
            item.insert("gid".into(), Value::Integer(meta.gid() as i64));
            item.insert(
                "mode".into(),
                Value::Integer((meta.permissions().mode() & 0o7777) as i64),
            );
            item.insert("atime".into(), Value::Integer(meta.atime()));
            item.insert("mtime".into(), Value::Integer(meta.mtime()));
            item.insert("ctime".into(), Value::Integer(meta.ctime()));
            item.insert("size".into(), Value::Integer(meta.size() as i64));

            tree.insert(name, item);
        }
        Ok(tree)
    }

    fn put_tree(&self, tree: &Tree, path: &Utf8Path) -> Result<(), RemoteError> {
        let directory = self.full(path);
        for (name, item) in tree {
            let full = directory.join(name);
            let filetype = item.get("filetype").and_then(|v| match v {
                Value::String(s) => Some(s.as_str()),
                _ => None,
            });

            match filetype {
                Some("regular") => {
                    File::create(&full).map_err(|e| Self::op_err(&format!("creating {full}"), e))?;
                }
                Some("directory") => match fs::create_dir(&full) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(Self::op_err(&format!("creating {full}"), e)),
                },
                Some("link") => {
                    if let Some(Value::String(target)) = item.get("link") {
                        let _ = fs::remove_file(&full);
                        std::os::unix::fs::symlink(target, &full)
                            .map_err(|e| Self::op_err(&format!("symlinking {full}"), e))?;
                    }
                }
                Some("fifo") => {
                    // mkfifo(3) has no libstd wrapper; best-effort via Command.
                    let _ = std::process::Command::new("mkfifo").arg(full.as_str()).status();
                }
                _ => {}
            }

            if let Some(Value::Integer(mode)) = item.get("mode") {
                let _ = fs::set_permissions(&full, fs::Permissions::from_mode(*mode as u32));
            }
        }
        Ok(())
    }

    fn get_blob(&self, path: &Utf8Path) -> Result<Box<dyn Read + Send>, RemoteError> {
        let full = self.full(path);
        let f = File::open(&full).map_err(|e| Self::op_err(&format!("opening {full}"), e))?;
        Ok(Box::new(f))
    }

    fn put_blob(&self, blob: &mut dyn Read, path: &Utf8Path) -> Result<(), RemoteError> {
        let full = self.full(path);
        let mut f = File::create(&full).map_err(|e| Self::op_err(&format!("creating {full}"), e))?;
        std::io::copy(blob, &mut f).map_err(|e| Self::op_err(&format!("writing {full}"), e))?;
        Ok(())
    }

    fn checksum(&self, path: &Utf8Path) -> Result<Option<String>, RemoteError> {
        use sha1::{Digest, Sha1};

        let full = self.full(path);
        let mut f = match File::open(&full) {
            Ok(f) => f,
            Err(e) => return Err(Self::op_err(&format!("opening {full}"), e)),
        };
        let mut hasher = Sha1::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = f
                .read(&mut buf)
                .map_err(|e| Self::op_err(&format!("reading {full}"), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Some(data_encoding::HEXLOWER.encode(&hasher.finalize())))
    }

    fn policy(&self) -> &PathPolicy {
        &self.policy
    }
}
