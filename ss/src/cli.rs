//! CLI argument parsing for snapstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Latest-only JSON document store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides config)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the latest document for a key
    Get {
        /// Key to fetch
        #[arg(required = true)]
        key: String,
    },

    /// List all keys
    List,

    /// Delete the document for a key
    Delete {
        /// Key to delete
        #[arg(required = true)]
        key: String,
    },
}
