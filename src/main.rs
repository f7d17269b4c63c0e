//! metadoc CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. A failed command
//! prints an error envelope on stdout, the message on stderr, and exits
//! non-zero. No other logic lives here.

use metadoc::cli;

fn main() {
    if let Err(e) = cli::run() {
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
