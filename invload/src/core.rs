use std::path::{Path, PathBuf};

use anyhow::Result;
use invload_common::error::Error;
use serde::Serialize;

use crate::{
    cli::{Cli, CliCmd},
    config::{find_config, load_config},
    inventory::{self, InventoryFormat},
    snapshot::{ConfigSnapshot, Group},
};

pub fn start(cli: &Cli) -> Result<()> {
    match &cli.cmd {
        CliCmd::Load {
            path,
            format,
            hosts,
            compact,
        } => {
            let snapshot = load_or_exit(path, *format);
            if *hosts {
                print_json(&snapshot.host_config(), *compact)?;
            } else {
                print_json(&snapshot.group_config(), *compact)?;
            }
        }
        CliCmd::Check { paths } => {
            let mut failed = false;
            for path in paths {
                match inventory::load(path) {
                    Ok(snapshot) => println!(
                        "{}: {} groups, {} hosts",
                        path.to_string_lossy(),
                        snapshot.groups().len(),
                        snapshot.hosts().len()
                    ),
                    Err(e) => {
                        e.report_stderr();
                        failed = true;
                    }
                }
            }
            if failed {
                std::process::exit(1);
            }
            println!("successfully checked");
        }
        CliCmd::Graph { path, format } => {
            let snapshot = load_or_exit(path, *format);
            print!("{}", graph(&snapshot));
        }
        CliCmd::Host { path, name, format } => {
            let snapshot = load_or_exit(path, *format);
            let Some(host) = snapshot
                .host_config()
                .into_iter()
                .find(|h| &h.host_name == name)
            else {
                print_fatal_error(Error::not_found(format!(
                    "host {name} isn't in {}",
                    path.to_string_lossy()
                )));
            };
            print_json(&host, false)?;
        }
        CliCmd::Config { path, compact } => {
            let path = match path {
                Some(path) => path.clone(),
                None => config_path()?,
            };
            let loaded = load_config(&path).unwrap_or_else(|e| print_fatal_error(e));
            print_json(&loaded, *compact)?;
        }
    }
    Ok(())
}

fn config_path() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(find_config(&cwd).unwrap_or_else(|e| print_fatal_error(e)))
}

fn load_or_exit(path: &Path, format: Option<InventoryFormat>) -> ConfigSnapshot {
    inventory::load_with_format(path, format).unwrap_or_else(|e| print_fatal_error(e))
}

pub fn print_fatal_error(err: Error) -> ! {
    err.report_stderr();
    // the error was fatal whether or not printing it worked
    std::process::exit(1);
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let out = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{out}");
    Ok(())
}

/// The group tree in the shape `ansible-inventory --graph` prints it, child
/// groups before hosts.
pub fn graph(snapshot: &ConfigSnapshot) -> String {
    let mut out = String::new();
    graph_group(snapshot, snapshot.all(), 0, &mut out);
    out
}

fn graph_group(snapshot: &ConfigSnapshot, group: &Group, depth: usize, out: &mut String) {
    out.push_str(&prefix(depth));
    out.push_str(&format!("@{}:\n", group.name()));
    for child in group.children() {
        if let Some(child) = snapshot.group(child) {
            graph_group(snapshot, child, depth + 1, out);
        }
    }
    for host in group.hosts() {
        out.push_str(&prefix(depth + 1));
        out.push_str(host);
        out.push('\n');
    }
}

fn prefix(depth: usize) -> String {
    if depth == 0 {
        return String::new();
    }
    format!("{}|--", "  |".repeat(depth - 1) + "  ")
}

#[cfg(test)]
mod tests {
    use crate::inventory::InventorySource;

    use super::*;

    #[test]
    fn graph_output() {
        let snapshot = InventorySource::from_string(
            "hosts.ini",
            "[prod:children]\nweb\n\n[prod]\nbastion\n\n[web]\nw1\nw2\n\n[db]\nd1\n",
            None,
        )
        .load()
        .unwrap();
        assert_eq!(
            graph(&snapshot),
            "@all:\n  |--@prod:\n  |  |--@web:\n  |  |  |--w1\n  |  |  |--w2\n  |  |--bastion\n  |--@db:\n  |  |--d1\n"
        );
    }
}
