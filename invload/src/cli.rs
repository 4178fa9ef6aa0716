use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::inventory::InventoryFormat;

#[derive(Parser)]
#[clap(name = "invload")]
#[clap(about = "Load Ansible-style inventories")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: CliCmd,
}

#[derive(Debug, Subcommand)]
pub enum CliCmd {
    /// Load an inventory and print its groups as JSON
    Load {
        /// The inventory file
        path: PathBuf,
        /// ini, yaml or hcl
        ///
        /// Detected from the file extension, then the content, if unspecified
        #[arg(long)]
        format: Option<InventoryFormat>,
        /// Print hosts instead of groups
        #[arg(long)]
        hosts: bool,
        /// Print JSON on a single line
        #[arg(long)]
        compact: bool,
    },
    /// Check inventories without printing them
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show the group tree of an inventory
    Graph {
        path: PathBuf,
        #[arg(long)]
        format: Option<InventoryFormat>,
    },
    /// Show the resolved variables of one host
    Host {
        path: PathBuf,
        name: String,
        #[arg(long)]
        format: Option<InventoryFormat>,
    },
    /// Load an extension config with its inventory and var files
    Config {
        /// Path to the config file.
        ///
        /// Looks for invload.yml in the current directory and its parents if
        /// unspecified
        #[arg(env = "INVLOAD_CONFIG")]
        path: Option<PathBuf>,
        #[arg(long)]
        compact: bool,
    },
}
