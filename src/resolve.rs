//! Name resolution: `name^^:sub/path` (C4, §4.3).
//!
//! `name` is either a raw ref or a label. Trailing `^`s follow `parent`
//! that many times; a trailing `:sub/path` descends into subtrees.

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::object::Ref;
use crate::pool::Pool;

#[derive(Debug)]
pub struct ParsedName {
    pub base: String,
    pub parents: usize,
    pub path: Vec<String>,
}

fn grammar() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<ref>[^:^]+)(?P<parents>\^+)?(?::(?P<path>.+))?$").unwrap())
}

/// Parse `NAME = REF_OR_LABEL ("^"+)? (":" SUB_PATH)?`.
pub fn parse(value: &str) -> ParsedName {
    match grammar().captures(value) {
        Some(caps) => ParsedName {
            base: caps.name("ref").unwrap().as_str().to_owned(),
            parents: caps
                .name("parents")
                .map(|m| m.as_str().len())
                .unwrap_or(0),
            path: caps
                .name("path")
                .map(|m| {
                    m.as_str()
                        .trim_matches('/')
                        .split('/')
                        .filter(|c| !c.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        },
        None => ParsedName {
            base: value.to_owned(),
            parents: 0,
            path: Vec::new(),
        },
    }
}

/// Resolve a name expression to a ref, per §4.3's algorithm.
pub fn resolve(pool: &Pool, name: &str) -> Result<Ref> {
    let parsed = parse(name);

    let mut current = match parsed.base.parse::<Ref>() {
        Ok(r) if pool.exists(r) => r,
        _ => pool
            .read_label(&parsed.base)
            .with_context(|| format!("resolving {:?}", parsed.base))?
            .with_context(|| format!("unknown reference or label {:?}", parsed.base))?,
    };

    for _ in 0..parsed.parents {
        let backup = pool
            .get_backup(current)
            .with_context(|| format!("{current} isn't a backup; can't follow its parent"))?;
        current = backup
            .parent
            .with_context(|| format!("backup {current} has no parent"))?;
    }

    for component in &parsed.path {
        let tree = pool.resolve_tree(current)?;
        let item = tree
            .get(component)
            .with_context(|| format!("unknown component {component:?} in {name:?}"))?;
        match crate::object::item_type(item) {
            Some("tree") => {
                current = crate::object::item_ref(item)
                    .with_context(|| format!("{component:?} has no ref"))?;
            }
            _ => bail!("{component:?} isn't a tree in {name:?}"),
        }
    }

    Ok(current)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::{Backup, Tree, TreeItem, Value};
    use camino::Utf8PathBuf;
    use std::collections::BTreeMap;

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let p = Pool::open(Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()).unwrap();
        (dir, p)
    }

    #[test]
    fn parses_ref_only() {
        let p = parse("deadbeef");
        assert_eq!(p.base, "deadbeef");
        assert_eq!(p.parents, 0);
        assert!(p.path.is_empty());
    }

    #[test]
    fn parses_parents_and_path() {
        let p = parse("r/b2^:sub/dir");
        assert_eq!(p.base, "r/b2");
        assert_eq!(p.parents, 1);
        assert_eq!(p.path, vec!["sub".to_owned(), "dir".to_owned()]);
    }

    #[test]
    fn resolves_parent_chain_and_subtree() {
        let (_dir, pool) = pool();

        let mut sub = Tree::new();
        let mut sub_item = TreeItem::new();
        sub_item.insert("type".to_owned(), Value::String("blob".to_owned()));
        let (blob_ref, ..) = pool.ingest(&b"hi"[..]).unwrap();
        sub_item.insert("ref".to_owned(), Value::String(blob_ref.to_hex()));
        sub.insert("f".to_owned(), sub_item);
        let (sub_ref, ..) = pool.ingest_tree(&sub).unwrap();

        let mut root1 = Tree::new();
        let mut tree_item = TreeItem::new();
        tree_item.insert("type".to_owned(), Value::String("tree".to_owned()));
        tree_item.insert("ref".to_owned(), Value::String(sub_ref.to_hex()));
        root1.insert("sub".to_owned(), tree_item.clone());
        let (root1_ref, ..) = pool.ingest_tree(&root1).unwrap();

        let b1 = Backup {
            root: root1_ref,
            parent: None,
            stats: BTreeMap::new(),
            errors: BTreeMap::new(),
            start_date: "2020-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2020-01-01T00:00:01Z".parse().unwrap(),
        };
        let (b1_ref, ..) = pool.ingest_backup(&b1).unwrap();
        pool.set_label("r/b1", b1_ref, true).unwrap();

        let b2 = Backup {
            root: root1_ref,
            parent: Some(b1_ref),
            stats: BTreeMap::new(),
            errors: BTreeMap::new(),
            start_date: "2020-01-02T00:00:00Z".parse().unwrap(),
            end_date: "2020-01-02T00:00:01Z".parse().unwrap(),
        };
        let (b2_ref, ..) = pool.ingest_backup(&b2).unwrap();
        pool.set_label("r/b2", b2_ref, true).unwrap();

        // r/b2^ follows the parent -> b1.
        assert_eq!(resolve(&pool, "r/b2^").unwrap(), b1_ref);
        // r/b2^:sub descends into b1's root tree's "sub" entry.
        assert_eq!(resolve(&pool, "r/b2^:sub").unwrap(), sub_ref);
    }

    #[test]
    fn no_parent_fails() {
        let (_dir, pool) = pool();
        let root = Tree::new();
        let (root_ref, ..) = pool.ingest_tree(&root).unwrap();
        let b = Backup {
            root: root_ref,
            parent: None,
            stats: BTreeMap::new(),
            errors: BTreeMap::new(),
            start_date: "2020-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2020-01-01T00:00:01Z".parse().unwrap(),
        };
        let (b_ref, ..) = pool.ingest_backup(&b).unwrap();
        pool.set_label("only", b_ref, true).unwrap();
        assert!(resolve(&pool, "only^").is_err());
    }
}
