use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use snapstore::SnapStore;
use snapstore::cli::Cli;
use snapstore::config::Config;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.dir.unwrap_or(config.store_path);

    info!("snapstore starting");

    let store = SnapStore::open(&store_path)?;

    match cli.command {
        snapstore::cli::Command::Get { key } => match store.load_raw(&key)? {
            Some(json) => println!("{}", json),
            None => {
                eprintln!("{} No document for key: {}", "✗".red(), key);
                std::process::exit(1);
            }
        },
        snapstore::cli::Command::List => {
            let keys = store.list()?;
            if keys.is_empty() {
                println!("No documents found");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
        snapstore::cli::Command::Delete { key } => {
            store.delete(&key)?;
            println!("{} Deleted key: {}", "✓".green(), key);
        }
    }

    Ok(())
}
