use anyhow::{Context, Result};
use clap::Parser;

use marty::object::{Tree, Value, item_ref, item_type};
use marty::pool::Pool;
use marty::resolve;

use super::full_name;

/// Compare a tree to another. `remote` is only present when three names are
/// given; with two, both names are taken relative to the pool directly.
#[derive(Debug, Parser)]
pub struct Args {
    a: String,
    b: String,
    c: Option<String>,
}

pub fn run(pool: &Pool, args: Args) -> Result<()> {
    let (remote, ref_name, name) = match args.c {
        Some(c) => (Some(args.a), args.b, c),
        None => (None, args.a, args.b),
    };
    let ref_name = full_name(&remote, &ref_name);
    let other_name = full_name(&remote, &name);

    let ref_tree = pool.resolve_tree(resolve::resolve(pool, &ref_name)?)?;
    let other_tree = pool.resolve_tree(resolve::resolve(pool, &other_name)?)?;

    print_diff_tree(pool, Some(&ref_tree), &other_tree, &mut Vec::new())
}

fn print_diff_tree(pool: &Pool, ref_tree: Option<&Tree>, tree: &Tree, level: &mut Vec<bool>) -> Result<()> {
    use std::collections::BTreeSet;

    let ref_names: BTreeSet<&String> = ref_tree.map(|t| t.keys().collect()).unwrap_or_default();
    let names: BTreeSet<&String> = tree.keys().collect();
    let all: BTreeSet<&String> = ref_names.union(&names).copied().collect();

    let count = all.len();
    for (i, name) in all.into_iter().enumerate() {
        let last = i + 1 == count;
        let mut header = String::new();
        for parent_last in level.iter() {
            header.push_str(if *parent_last { "    " } else { "\u{2502}   " });
        }
        header.push_str(if last { "\u{2514}\u{2500}\u{2500} " } else { "\u{251c}\u{2500}\u{2500} " });

        let (color, item, ref_item) = if !ref_names.contains(name) {
            ("+", tree.get(name).unwrap(), None)
        } else if !names.contains(name) {
            ("-", ref_tree.unwrap().get(name).unwrap(), ref_tree.and_then(|t| t.get(name)))
        } else {
            (" ", tree.get(name).unwrap(), ref_tree.and_then(|t| t.get(name)))
        };

        let changed = ref_item.is_none() || item_ref(item) != ref_item.and_then(item_ref);
        if !changed {
            continue;
        }

        if item_type(item) == Some("tree") {
            println!("{color} {header}{name}");
            let sub_ref = ref_item
                .map(|ri| {
                    let r = item_ref(ri).with_context(|| format!("{name} has no tree ref"))?;
                    pool.get_tree(r)
                })
                .transpose()?;
            let r = item_ref(item).with_context(|| format!("{name} has no tree ref"))?;
            let sub = pool.get_tree(r)?;
            level.push(last);
            print_diff_tree(pool, sub_ref.as_ref(), &sub, level)?;
            level.pop();
        } else if item_type(item) == Some("link") || matches!(item.get("filetype"), Some(Value::String(s)) if s == "link") {
            let target = match item.get("link") {
                Some(Value::String(s)) => s.as_str(),
                _ => "?",
            };
            println!("{color} {header}{name} -> {target}");
        } else {
            println!("{color} {header}{name}");
        }
    }
    Ok(())
}
