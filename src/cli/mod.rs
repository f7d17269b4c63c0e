//! Command-line interface for metadoc
//!
//! - init: Create the data directory layout
//! - validate: Build every entity type and report spec violations
//! - meta: Print a merged Meta
//! - list / get / save / delete: One-shot document operations

mod args;
mod commands;
mod config;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    boot, get_json, init, list_json, meta_json, run, run_command, save_json, validate_report,
};
pub use config::Config;
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{parse_request, read_request, write_error, write_response};
