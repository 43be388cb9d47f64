//! ariadb command-line entry point
//!
//! Parsing and dispatch live in `cli`; this only reports the error and
//! sets the exit code.

use ariadb::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
