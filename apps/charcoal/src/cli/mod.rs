//! # Charcoal CLI Module
//!
//! ## Available Commands
//!
//! - `describe` - Print the merged metadata of a type
//! - `resolve` - Print the class a type identifier resolves to
//! - `migrate` - Create or alter storage tables
//! - `import` - Save items read from a JSON file
//! - `get` - Print one stored item
//! - `list` - Print a filtered, ordered, paginated list of items
//! - `cache clear` - Drop every cached metadata document

mod commands;

use charcoal_core::CharcoalError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Charcoal - metadata-driven models
///
/// Inspect metadata, reconcile tables and read or write items from the
/// command line.
#[derive(Parser, Debug)]
#[command(name = "charcoal")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "charcoal.toml")]
    pub config: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged metadata of a type
    Describe {
        /// Type identifier (e.g. cms/news)
        ident: String,
    },

    /// Print the class a type identifier resolves to
    Resolve {
        /// Type identifier
        ident: String,
    },

    /// Create or alter the tables of one or more types
    Migrate {
        /// Type identifiers
        #[arg(required = true)]
        idents: Vec<String>,
    },

    /// Save items read from a JSON file (array or single object)
    Import {
        /// Type identifier
        ident: String,

        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print one stored item
    Get {
        /// Type identifier
        ident: String,

        /// Item key
        id: String,
    },

    /// List stored items
    List {
        /// Type identifier
        ident: String,

        /// Equality filter, `property=value` (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Property to order by
        #[arg(short, long)]
        order: Option<String>,

        /// Order descending
        #[arg(long)]
        desc: bool,

        /// Page number (one-based)
        #[arg(long)]
        page: Option<u64>,

        /// Items per page
        #[arg(long)]
        per_page: Option<u64>,
    },

    /// Metadata cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Drop every cached metadata document
    Clear,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), CharcoalError> {
    let runtime = Runtime::open(&cli.config)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Describe { ident } => cmd_describe(&runtime, json_mode, &ident),
        Commands::Resolve { ident } => cmd_resolve(&runtime, json_mode, &ident),
        Commands::Migrate { idents } => cmd_migrate(&runtime, json_mode, &idents),
        Commands::Import { ident, file } => cmd_import(&runtime, json_mode, &ident, &file),
        Commands::Get { ident, id } => cmd_get(&runtime, json_mode, &ident, &id),
        Commands::List {
            ident,
            filters,
            order,
            desc,
            page,
            per_page,
        } => {
            let args = ListArgs {
                filters,
                order,
                desc,
                page,
                per_page,
            };
            cmd_list(&runtime, json_mode, &ident, &args)
        }
        Commands::Cache {
            action: CacheAction::Clear,
        } => cmd_cache_clear(&runtime, json_mode),
    }
}
