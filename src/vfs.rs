//! Read-only FUSE mount of a tree (C11). Gated behind the `fuse` feature:
//! see the crate-level note on why it isn't a hard dependency.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEntry, ReplyOpen, Request,
};
use tracing::*;

use crate::object::{Tree, TreeItem, Value, item_ref, item_type};
use crate::pool::Pool;

const ROOT_INODE: u64 = 1;
const DEFAULT_MODE: u16 = 0o555;
const TTL: Duration = Duration::from_secs(1);

/// What a registered inode refers to: either a tree (with its decoded
/// children) or a plain item carried through from its parent tree.
enum Node {
    Tree(Tree),
    Item(TreeItem),
}

struct Inode {
    node: Node,
    // Populated lazily as children are looked up or listed, mirroring the
    // original's register-on-first-touch inode assignment.
    children: HashMap<String, u64>,
}

/// A single-mount, read-only view of a tree, backed by the pool.
pub struct MartyFs {
    pool: Arc<Pool>,
    inodes: HashMap<u64, Inode>,
    next_inode: u64,
    open_files: HashMap<u64, std::fs::File>,
    next_fh: u64,
}

impl MartyFs {
    pub fn new(pool: Arc<Pool>, root: Tree) -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_INODE,
            Inode {
                node: Node::Tree(root),
                children: HashMap::new(),
            },
        );
        MartyFs {
            pool,
            inodes,
            next_inode: ROOT_INODE + 1,
            open_files: HashMap::new(),
            next_fh: 0,
        }
    }

    fn register_child(&mut self, parent: u64, name: &str) -> Option<u64> {
        if let Some(&ino) = self.inodes.get(&parent)?.children.get(name) {
            return Some(ino);
        }

        let item = match &self.inodes.get(&parent)?.node {
            Node::Tree(tree) => tree.get(name)?.clone(),
            Node::Item(_) => return None,
        };

        let node = if item_type(&item) == Some("tree") {
            let r = item_ref(&item)?;
            let tree = self.pool.get_tree(r).ok()?;
            Node::Tree(tree)
        } else {
            Node::Item(item)
        };

        let ino = self.next_inode;
        self.next_inode += 1;
        self.inodes.insert(
            ino,
            Inode {
                node,
                children: HashMap::new(),
            },
        );
        self.inodes.get_mut(&parent)?.children.insert(name.to_owned(), ino);
        Some(ino)
    }

    fn attr_for(&self, ino: u64) -> Option<FileAttr> {
        let inode = self.inodes.get(&ino)?;
        let (kind, size, mode) = match &inode.node {
            Node::Tree(_) => (FileType::Directory, 0, DEFAULT_MODE),
            Node::Item(item) => match item_type(item) {
                Some("blob") => {
                    let size = item_ref(item).and_then(|r| self.pool.size(r).ok()).unwrap_or(0);
                    (FileType::RegularFile, size, item_mode(item))
                }
                _ => match item.get("filetype") {
                    Some(Value::String(s)) if s == "link" => (FileType::Symlink, 0, DEFAULT_MODE),
                    Some(Value::String(s)) if s == "fifo" => (FileType::NamedPipe, 0, DEFAULT_MODE),
                    _ => return None,
                },
            },
        };

        let epoch = SystemTime::UNIX_EPOCH;
        Some(FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: epoch,
            mtime: epoch,
            ctime: epoch,
            crtime: epoch,
            kind,
            perm: mode,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
            flags: 0,
        })
    }
}

fn item_mode(item: &TreeItem) -> u16 {
    match item.get("mode") {
        Some(Value::Integer(m)) => (*m & 0o7777) as u16,
        _ => DEFAULT_MODE,
    }
}

impl Filesystem for MartyFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        match self.register_child(parent, name) {
            Some(ino) => match self.attr_for(ino) {
                Some(attr) => reply.entry(&TTL, &attr, 0),
                None => reply.error(libc::ENOENT),
            },
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.attr_for(ino) {
            Some(attr) => reply.attr(&TTL, &attr),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.inodes.get(&ino).map(|i| &i.node) {
            Some(Node::Item(item)) => match item.get("link") {
                Some(Value::String(target)) => reply.data(target.as_bytes()),
                _ => reply.error(libc::ENOENT),
            },
            _ => reply.error(libc::ENOENT),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let r = match self.inodes.get(&ino).map(|i| &i.node) {
            Some(Node::Item(item)) if item_type(item) == Some("blob") => item_ref(item),
            _ => None,
        };
        let Some(r) = r else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.pool.get_blob(r) {
            Ok(file) => {
                let fh = self.next_fh;
                self.next_fh += 1;
                self.open_files.insert(fh, file);
                reply.opened(fh, 0);
            }
            Err(e) => {
                warn!("open {r}: {e}");
                reply.error(libc::EIO);
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        use std::io::{Read, Seek, SeekFrom};
        let Some(file) = self.open_files.get_mut(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        if file.seek(SeekFrom::Start(offset as u64)).is_err() {
            reply.error(libc::EIO);
            return;
        }
        let mut buf = vec![0u8; size as usize];
        match file.read(&mut buf) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => {
                warn!("read fh {fh}: {e}");
                reply.error(libc::EIO);
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.open_files.remove(&fh);
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(Node::Tree(tree)) = self.inodes.get(&ino).map(|i| &i.node) else {
            reply.error(libc::ENOENT);
            return;
        };
        let names: Vec<String> = tree.keys().cloned().collect();

        for (i, name) in names.iter().enumerate().skip(offset as usize) {
            let Some(child_ino) = self.register_child(ino, name) else {
                continue;
            };
            let kind = match self.attr_for(child_ino) {
                Some(attr) => attr.kind,
                None => continue,
            };
            if reply.add(child_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }
}

fn mount_options() -> [MountOption; 2] {
    [MountOption::RO, MountOption::FSName("marty".to_owned())]
}

/// Mount `root` read-only at `mountpoint`, blocking until unmounted.
pub fn mount(pool: Arc<Pool>, root: Tree, mountpoint: &std::path::Path) -> anyhow::Result<()> {
    let fs = MartyFs::new(pool, root);
    fuser::mount2(fs, mountpoint, &mount_options())?;
    Ok(())
}

/// Mount `root` read-only at `mountpoint` in a background thread. The
/// filesystem unmounts when the returned session is dropped.
pub fn spawn(
    pool: Arc<Pool>,
    root: Tree,
    mountpoint: &std::path::Path,
) -> anyhow::Result<fuser::BackgroundSession> {
    let fs = MartyFs::new(pool, root);
    Ok(fuser::spawn_mount2(fs, mountpoint, &mount_options())?)
}

#[cfg(test)]
mod test {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn lists_root_children() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap(),
        );

        let mut tree = Tree::new();
        let mut item = TreeItem::new();
        item.insert("type".to_owned(), Value::String("blob".to_owned()));
        let (blob_ref, ..) = pool.ingest(&b"hi"[..]).unwrap();
        item.insert("ref".to_owned(), Value::String(blob_ref.to_hex()));
        item.insert("mode".to_owned(), Value::Integer(0o644));
        tree.insert("f".to_owned(), item);

        let mut fs = MartyFs::new(Arc::clone(&pool), tree);
        let ino = fs.register_child(ROOT_INODE, "f").unwrap();
        let attr = fs.attr_for(ino).unwrap();
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 2);
    }
}
