//! Capability interface the backup walker consumes, and the include/exclude
//! path policy every remote embeds (C5, §4.4).

use std::fmt;
use std::io::Read;

use anyhow::Result;
use camino::Utf8Path;

use crate::object::Tree;

mod local;
pub use local::LocalFilesystem;

/// Error surfaced by a remote operation; distinct from a pool or codec
/// failure so the walker can tell "this file vanished" from "the pool is
/// corrupt".
#[derive(Debug)]
pub struct RemoteError(pub String);

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for RemoteError {}

/// The capability set a backup/restore walk needs from wherever files
/// actually live (§4.4). Transports beyond the local filesystem (SFTP,
/// object storage, ...) are out of scope here; this trait is the contract
/// they'd implement against.
pub trait RemoteMethod {
    /// Called once before any other operation.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once after the walk is done, on every exit path.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// List `path`'s direct children as a [`Tree`] of their attributes.
    fn get_tree(&self, path: &Utf8Path) -> Result<Tree, RemoteError>;

    /// Materialize `tree`'s items at `path`.
    fn put_tree(&self, tree: &Tree, path: &Utf8Path) -> Result<(), RemoteError>;

    /// Open `path` for streaming read.
    fn get_blob(&self, path: &Utf8Path) -> Result<Box<dyn Read + Send>, RemoteError>;

    /// Write `blob`'s bytes to `path`.
    fn put_blob(&self, blob: &mut dyn Read, path: &Utf8Path) -> Result<(), RemoteError>;

    /// The remote's own content hash for `path`, same algorithm as the pool
    /// (hex-encoded SHA-1). `None` means the remote can't compute one.
    fn checksum(&self, path: &Utf8Path) -> Result<Option<String>, RemoteError>;

    /// Does `attr_new` look newer than `attr_old`? Each remote chooses its
    /// own comparison; the default below is `mtime` inequality.
    fn newer(&self, attr_new: &crate::object::TreeItem, attr_old: &crate::object::TreeItem) -> bool {
        attr_new.get("mtime") != attr_old.get("mtime")
    }

    /// The embedded include/exclude policy.
    fn policy(&self) -> &PathPolicy;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Include,
    Exclude,
}

struct Rule {
    prefix: String,
    verdict: Verdict,
    recursive: bool,
}

/// Deterministic include/exclude decision function over absolute paths
/// (§4.4). Built once from a remote's configured `includes`/`excludes` and
/// then consulted for every entry the walker visits.
pub struct PathPolicy {
    rules: Vec<Rule>,
}

impl PathPolicy {
    pub fn new(includes: &[String], excludes: &[String]) -> Self {
        use std::collections::HashMap;

        let mut roots: HashMap<String, Verdict> = HashMap::new();
        for p in includes {
            roots.insert(Self::normalize(p), Verdict::Include);
        }
        for p in excludes {
            roots.insert(Self::normalize(p), Verdict::Exclude);
        }

        let mut rules = Vec::new();
        for (prefix, verdict) in &roots {
            rules.push(Rule {
                prefix: prefix.clone(),
                verdict: *verdict,
                recursive: true,
            });

            if *verdict == Verdict::Include {
                let mut parent = parent_of(prefix);
                while parent != "/" {
                    if roots.get(&parent) != Some(&Verdict::Include) {
                        rules.push(Rule {
                            prefix: parent.clone(),
                            verdict: Verdict::Include,
                            recursive: false,
                        });
                    }
                    parent = parent_of(&parent);
                }
            }
        }

        // Longest-prefix first; ties broken by name (desc), then
        // non-recursive rules before recursive ones (so a directory that's
        // an ancestor of an include stays walkable even if something less
        // specific excludes it outright).
        rules.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| b.prefix.cmp(&a.prefix))
                .then_with(|| a.recursive.cmp(&b.recursive))
        });

        PathPolicy { rules }
    }

    fn normalize(path: &str) -> String {
        let joined = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };
        normpath(&joined)
    }

    /// Should `path` (absolute) be kept in the walk? Longest matching
    /// prefix wins; among equal-length prefixes a non-recursive rule wins
    /// over a recursive one, so an ancestor directory of an include stays
    /// walkable even when a shorter exclude would otherwise swallow it.
    pub fn included(&self, path: &str) -> bool {
        let path = Self::normalize(path);
        for rule in &self.rules {
            let matches = if rule.recursive {
                path.starts_with(&rule.prefix)
            } else {
                path == rule.prefix
            };
            if matches {
                return rule.verdict == Verdict::Include;
            }
        }
        true // Default policy is to include.
    }
}

fn parent_of(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => "/".to_owned(),
        Some(i) => path[..i].to_owned(),
        None => "/".to_owned(),
    }
}

/// Collapse `.`/`..`/repeated slashes the way `os.path.normpath` does.
fn normpath(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}
