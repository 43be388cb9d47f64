//! Command-line tools
//!
//! - read-log: display, check or apply the transaction log
//! - remote-copy: copy tables to or from a remote object store
//! - checkpoint: take a checkpoint of a stopped engine
//! - recover: run crash recovery and print its report

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, LevelArg, ReadLogArgs, ReadLogMode, RemoteCopyArgs};
pub use commands::{checkpoint, read_log, recover, remote_copy, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::format_record;

/// Parse the process arguments and run the command
pub fn run() -> CliResult<()> {
    run_command(Cli::parse_args().command)
}
