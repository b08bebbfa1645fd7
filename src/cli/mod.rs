// src/cli/mod.rs
//! CLI definitions for sideloader
//!
//! Argument parsing only; the handlers live in the `commands` module.
//!
//! - `install` - Install APKs, split bundles or modules
//! - `uninstall` - Remove an installed package
//! - `config` - Manage install profiles, bindings and global preferences
//! - `init` - Create the database

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;

pub use config::ConfigCommands;

#[derive(Parser)]
#[command(name = "sideloader")]
#[command(version)]
#[command(about = "Install split APKs, bundles and modules through a privileged backend", long_about = None)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Directory for downloads and extracted entries
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install one or more APKs, split bundles or module archives
    Install {
        /// Files or http(s) URLs
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Don't ask before installing over a differently-signed app
        #[arg(short, long)]
        yes: bool,

        /// Print progress as log lines instead of bars
        #[arg(long)]
        background: bool,

        /// Backend to install through (none, root, shizuku, dhizuku, customize)
        #[arg(long)]
        authorizer: Option<String>,

        /// Shell command for the customize backend
        #[arg(long)]
        customize: Option<String>,

        /// Package that requested the install; picks its bound config
        #[arg(long)]
        caller: Option<String>,

        /// Command used to open a root shell
        #[arg(long)]
        su: Option<String>,
    },

    /// Remove an installed package
    Uninstall {
        /// Package name
        package: String,

        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Backend to uninstall through
        #[arg(long)]
        authorizer: Option<String>,

        /// Command used to open a root shell
        #[arg(long)]
        su: Option<String>,
    },

    /// Install profiles and preferences
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Create the database and seed the device default profile
    Init,
}
