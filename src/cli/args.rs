//! CLI argument definitions using clap
//!
//! Commands:
//! - ariadb read-log --log-dir <dir> [--display|--apply|--check]
//! - ariadb remote-copy (--to|--from|--delete) --table <db/name> --remote-root <dir>
//! - ariadb checkpoint --config <path>
//! - ariadb recover --config <path>

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::lsn::Lsn;

/// Aria storage engine tools
#[derive(Parser, Debug)]
#[command(name = "ariadb")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Display, check or apply the transaction log
    ReadLog(ReadLogArgs),

    /// Copy tables to or from a remote object store
    RemoteCopy(RemoteCopyArgs),

    /// Open the engine, take a checkpoint and close it
    Checkpoint {
        /// Path to configuration file
        #[arg(long, default_value = "./aria.json")]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = LevelArg::Full)]
        level: LevelArg,
    },

    /// Run crash recovery and report what it did
    Recover {
        /// Path to configuration file
        #[arg(long, default_value = "./aria.json")]
        config: PathBuf,

        /// Downgrade damaged records and pages to warnings
        #[arg(long)]
        best_effort: bool,
    },
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("mode").args(["display", "apply", "check"])))]
pub struct ReadLogArgs {
    /// Directory holding the log files
    #[arg(long)]
    pub log_dir: PathBuf,

    /// Print one line per record (the default)
    #[arg(long)]
    pub display: bool,

    /// Replay the log into the tables
    #[arg(long)]
    pub apply: bool,

    /// Verify every record and fail on damage
    #[arg(long)]
    pub check: bool,

    /// First LSN, as `file:offset` or a raw number
    #[arg(long, value_parser = parse_lsn)]
    pub start_lsn: Option<Lsn>,

    /// Stop before this LSN
    #[arg(long, value_parser = parse_lsn)]
    pub end_lsn: Option<Lsn>,

    /// Engine configuration, needed by --apply for the data directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// With --apply, leave incomplete transactions as they are
    #[arg(long)]
    pub no_undo: bool,

    /// With --apply, continue past damaged records and pages
    #[arg(long)]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLogMode {
    Display,
    Apply,
    Check,
}

impl ReadLogArgs {
    pub fn mode(&self) -> ReadLogMode {
        if self.apply {
            ReadLogMode::Apply
        } else if self.check {
            ReadLogMode::Check
        } else {
            ReadLogMode::Display
        }
    }
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("direction").required(true).args(["to", "from", "delete"])))]
pub struct RemoteCopyArgs {
    /// Copy a local table to the remote store
    #[arg(long)]
    pub to: bool,

    /// Copy a table from the remote store into the data directory
    #[arg(long)]
    pub from: bool,

    /// Delete a table from the remote store
    #[arg(long)]
    pub delete: bool,

    /// Table name, `database/table`
    #[arg(long)]
    pub table: String,

    /// Directory standing in for the object store
    #[arg(long)]
    pub remote_root: PathBuf,

    #[arg(long, default_value = "aria")]
    pub bucket: String,

    /// Data directory of the local table
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Engine configuration; supplies the data directory and key file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Compress pages in the remote copy
    #[arg(long)]
    pub compress: bool,

    /// Replace an existing table at the destination
    #[arg(long)]
    pub force: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelArg {
    Indirect,
    Medium,
    Full,
}

fn parse_lsn(text: &str) -> Result<Lsn, String> {
    Lsn::parse(text).ok_or_else(|| format!("'{}' is not an LSN", text))
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_log_modes() {
        let cli = Cli::try_parse_from(["ariadb", "read-log", "--log-dir", "/tmp/l", "--check"]).unwrap();
        let Command::ReadLog(args) = cli.command else {
            panic!("expected read-log");
        };
        assert_eq!(args.mode(), ReadLogMode::Check);

        let cli = Cli::try_parse_from(["ariadb", "read-log", "--log-dir", "/tmp/l"]).unwrap();
        let Command::ReadLog(args) = cli.command else {
            panic!("expected read-log");
        };
        assert_eq!(args.mode(), ReadLogMode::Display);
    }

    #[test]
    fn test_modes_are_exclusive() {
        assert!(Cli::try_parse_from(["ariadb", "read-log", "--log-dir", "/l", "--apply", "--check"]).is_err());
    }

    #[test]
    fn test_lsn_arguments() {
        let cli = Cli::try_parse_from([
            "ariadb",
            "read-log",
            "--log-dir",
            "/l",
            "--start-lsn",
            "1:0x40",
        ])
        .unwrap();
        let Command::ReadLog(args) = cli.command else {
            panic!("expected read-log");
        };
        assert_eq!(args.start_lsn, Some(Lsn::new(1, 0x40)));
    }

    #[test]
    fn test_remote_copy_needs_direction() {
        assert!(Cli::try_parse_from(["ariadb", "remote-copy", "--table", "db/t", "--remote-root", "/r"]).is_err());
        assert!(Cli::try_parse_from([
            "ariadb",
            "remote-copy",
            "--to",
            "--table",
            "db/t",
            "--remote-root",
            "/r"
        ])
        .is_ok());
    }
}
