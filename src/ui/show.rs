use anyhow::{Context, Result};
use clap::Parser;

use marty::object::{Tree, item_ref, item_type};
use marty::pool::Pool;
use marty::resolve;

use super::{full_name, split_remote_name};

/// Show details about a backup
#[derive(Debug, Parser)]
pub struct ShowBackupArgs {
    #[clap(value_name = "REMOTE|NAME")]
    a: String,
    #[clap(value_name = "NAME")]
    b: Option<String>,
}

pub fn run_show_backup(pool: &Pool, args: ShowBackupArgs) -> Result<()> {
    let (remote, n) = split_remote_name(args.a, args.b);
    let name = full_name(&remote, &n);
    let backup = pool.get_backup(resolve::resolve(pool, &name)?)?;

    let duration = backup.end_date.as_second() - backup.start_date.as_second();
    println!("Date: {} -> {} ({duration}s)", backup.start_date, backup.end_date);
    println!("Root: {}", backup.root);
    if let Some(parent) = backup.parent {
        println!("Parent: {parent}");
    }
    if !backup.errors.is_empty() {
        println!("\n{} error(s):", backup.errors.len());
        for (path, err) in &backup.errors {
            println!(" - {path}: {err}");
        }
    }
    if !backup.stats.is_empty() {
        println!("\n{}", "-".repeat(40));
        for (k, v) in &backup.stats {
            println!("{k:>20}: {v}");
        }
    }
    Ok(())
}

/// Show the direct children of a tree
#[derive(Debug, Parser)]
pub struct ShowTreeArgs {
    #[clap(value_name = "REMOTE|NAME")]
    a: String,
    #[clap(value_name = "NAME")]
    b: Option<String>,
}

pub fn run_show_tree(pool: &Pool, args: ShowTreeArgs) -> Result<()> {
    let (remote, n) = split_remote_name(args.a, args.b);
    let name = full_name(&remote, &n);
    let tree = pool.resolve_tree(resolve::resolve(pool, &name)?)?;

    println!("{:<30} {:<8} {:<42} ATTRIBUTES", "NAME", "TYPE", "REF");
    for (name, item) in &tree {
        let kind = item_type(item).unwrap_or("");
        let r = item_ref(item).map(|r| r.to_string()).unwrap_or_default();
        let attrs: Vec<String> = item
            .iter()
            .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "ref")
            .map(|(k, v)| format!("{k}:{v:?}"))
            .collect();
        println!("{name:<30} {kind:<8} {r:<42} {}", attrs.join(" "));
    }
    Ok(())
}

/// Recursively show a tree
#[derive(Debug, Parser)]
pub struct TreeArgs {
    #[clap(value_name = "REMOTE|NAME")]
    a: String,
    #[clap(value_name = "NAME")]
    b: Option<String>,
}

pub fn run_tree(pool: &Pool, args: TreeArgs) -> Result<()> {
    let (remote, n) = split_remote_name(args.a, args.b);
    let name = full_name(&remote, &n);
    let tree = pool.resolve_tree(resolve::resolve(pool, &name)?)?;
    println!(".");
    print_tree(pool, &tree, &mut Vec::new())
}

fn print_tree(pool: &Pool, tree: &Tree, level: &mut Vec<bool>) -> Result<()> {
    let count = tree.len();
    for (i, (name, item)) in tree.iter().enumerate() {
        let last = i + 1 == count;
        let mut header = String::new();
        for parent_last in level.iter() {
            header.push_str(if *parent_last { "    " } else { "\u{2502}   " });
        }
        header.push_str(if last { "\u{2514}\u{2500}\u{2500} " } else { "\u{251c}\u{2500}\u{2500} " });

        if item_type(item) == Some("tree") {
            println!("{header}{name}");
            let r = item_ref(item).with_context(|| format!("{name} has no tree ref"))?;
            let sub = pool.get_tree(r)?;
            level.push(last);
            print_tree(pool, &sub, level)?;
            level.pop();
        } else if let Some(marty::object::Value::String(target)) = item.get("link") {
            println!("{header}{name} -> {target}");
        } else {
            println!("{header}{name}");
        }
    }
    Ok(())
}
