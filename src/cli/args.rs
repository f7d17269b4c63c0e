//! CLI argument definitions using clap
//!
//! Commands:
//! - metadoc init --config <path>
//! - metadoc validate --config <path> [--entity <name>]
//! - metadoc meta --config <path> --entity <name>
//! - metadoc list --config <path> --entity <name> [--limit --offset --filter]
//! - metadoc get --config <path> --entity <name> --name <name>
//! - metadoc save --config <path>
//! - metadoc delete --config <path> --entity <name> --name <name>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// metadoc - metadata-driven document records
#[derive(Parser, Debug)]
#[command(name = "metadoc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize a new metadoc data directory
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,
    },

    /// Build every stored entity type and report spec violations
    Validate {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,

        /// Only validate this entity type
        #[arg(long)]
        entity: Option<String>,
    },

    /// Print the merged Meta of an entity type
    Meta {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,

        #[arg(long)]
        entity: String,
    },

    /// List records of an entity type
    List {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,

        #[arg(long)]
        entity: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Filter such as `status=Paid` or `amount>=100`; repeatable
        #[arg(long)]
        filter: Vec<String>,
    },

    /// Load one document with its virtual fields
    Get {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,

        #[arg(long)]
        entity: String,

        #[arg(long)]
        name: String,
    },

    /// Save one document read as JSON from stdin
    ///
    /// Input: `{"entity_type": "...", "values": {...}}`
    Save {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,
    },

    /// Delete one document
    Delete {
        /// Path to configuration file
        #[arg(long, default_value = "./metadoc.json")]
        config: PathBuf,

        #[arg(long)]
        entity: String,

        #[arg(long)]
        name: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
