//! EMAT Storage command line
//!
//! Inspects and maintains an EMAT database.
//!
//! ## Usage
//!
//! ```bash
//! # Database location and row counts
//! emat-storage info
//!
//! # Use a specific database file
//! emat-storage --database /data/road_test.db scopes
//!
//! # Scopes holding a given design
//! emat-storage scopes --design lhs
//!
//! # Designs, variables and boxes of a scope
//! emat-storage designs road_test
//! emat-storage variables road_test
//! emat-storage boxes road_test
//!
//! # Remove a scope with everything recorded under it
//! emat-storage delete-scope road_test
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use emat_storage::config::default_storage_dir;
use emat_storage::{Database, SqliteDatabase, StorageConfig, VariableKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "emat-storage")]
#[command(about = "Inspect and maintain an EMAT experiment database")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(long, env = "EMAT_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show database location and row counts
    Info,

    /// List scopes
    Scopes {
        /// Only scopes holding experiments of this design
        #[arg(long)]
        design: Option<String>,
    },

    /// List the designs of a scope
    Designs { scope: String },

    /// List the variables and measures of a scope
    Variables { scope: String },

    /// List the boxes of a scope with their parents
    Boxes { scope: String },

    /// Delete a scope and everything stored under it
    DeleteScope { scope: String },
}

fn load_config(args: &Args) -> anyhow::Result<StorageConfig> {
    let mut config = match &args.config {
        Some(path) => StorageConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            let path = default_storage_dir().join("config.toml");
            if path.exists() {
                StorageConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
            } else {
                StorageConfig::default()
            }
        }
    };

    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("emat_storage=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let db = SqliteDatabase::open(&config)?;

    match args.command {
        Command::Info => {
            println!("{}", db.get_db_info());
            println!("{}", serde_json::to_string_pretty(&db.stats()?)?);
        }
        Command::Scopes { design } => {
            for name in db.read_scope_names(design.as_deref())? {
                println!("{}", name);
            }
        }
        Command::Designs { scope } => {
            for name in db.read_design_names(&scope)? {
                println!("{}", name);
            }
        }
        Command::Variables { scope } => {
            for kind in [VariableKind::Uncertainty, VariableKind::Lever, VariableKind::Constant] {
                for name in db.read_variables(&scope, kind)? {
                    println!("{}\t{}", kind, name);
                }
            }
            for name in db.read_measures(&scope)? {
                println!("measure\t{}", name);
            }
        }
        Command::Boxes { scope } => {
            for (name, parent) in db.read_box_parent_names(&scope)? {
                match parent {
                    Some(parent) => println!("{}\t{}", name, parent),
                    None => println!("{}", name),
                }
            }
        }
        Command::DeleteScope { scope } => {
            if !db.delete_scope(&scope)? {
                bail!("no scope named '{}'", scope);
            }
            info!(scope = %scope, "Scope deleted");
        }
    }

    Ok(())
}
