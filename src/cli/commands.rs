//! CLI command implementations
//!
//! `read-log` in display and check mode works on the log directory alone
//! and never modifies it. Every other command opens an engine, which runs
//! recovery first, so the tables it touches are in a consistent state.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::config::{CheckpointLevel, EngineConfig};
use crate::engine::Engine;
use crate::lsn::Lsn;
use crate::observability::{Logger, Severity};
use crate::recovery::{RecoveryOptions, RecoveryReport};
use crate::remote::{
    copy_from_remote, copy_to_remote, delete_from_remote, CopyOptions, CopyReport, LocalBackend, ObjectBackend,
    RemoteTable,
};
use crate::wal::WalScanner;

use super::args::{Command, LevelArg, ReadLogArgs, ReadLogMode, RemoteCopyArgs};
use super::errors::{CliError, CliResult};
use super::io::{format_record, write_line, write_report, write_warning_count};

/// Dispatch a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::ReadLog(args) => read_log(&args),
        Command::RemoteCopy(args) => remote_copy(&args),
        Command::Checkpoint { config, level } => checkpoint(&config, level),
        Command::Recover { config, best_effort } => recover(&config, best_effort),
    }
}

/// Engines opened by the tools do not run the background checkpointer
fn load_config(path: &Path) -> CliResult<EngineConfig> {
    let mut config = EngineConfig::load(path)?;
    config.checkpoint_interval_secs = 0;
    Ok(config)
}

pub fn read_log(args: &ReadLogArgs) -> CliResult<()> {
    // The listing goes to stdout; keep engine INFO lines out of it
    if Logger::min_severity() < Severity::Warn {
        Logger::set_min_severity(Severity::Warn);
    }
    match args.mode() {
        ReadLogMode::Display => {
            let scan = scan_log(args, true)?;
            write_warning_count(scan.warnings)
        }
        ReadLogMode::Check => {
            let scan = scan_log(args, false)?;
            write_line(&format!("{} record(s) checked", scan.records))?;
            write_warning_count(scan.warnings)?;
            if scan.damaged > 0 {
                return Err(CliError::log_damaged(scan.damaged));
            }
            Ok(())
        }
        ReadLogMode::Apply => apply_log(args),
    }
}

#[derive(Debug, Default)]
struct LogScan {
    records: u64,
    warnings: usize,
    /// Records that could not be read or decoded
    damaged: usize,
}

fn scan_log(args: &ReadLogArgs, print: bool) -> CliResult<LogScan> {
    let start = args.start_lsn.unwrap_or(Lsn::IMPOSSIBLE);
    let mut scanner = WalScanner::open(&args.log_dir, start, None)?;
    if let Some(end) = args.end_lsn {
        scanner = scanner.with_end(end);
    }
    let mut scan = LogScan::default();
    loop {
        match scanner.next_record() {
            Ok(Some(record)) => {
                scan.records += 1;
                match format_record(&record) {
                    Ok(line) if print => write_line(&line)?,
                    Ok(_) => {}
                    Err(reason) => {
                        scan.warnings += 1;
                        scan.damaged += 1;
                        write_line(&format!(
                            "warning: {} record at {} does not decode: {}",
                            record.record_type, record.lsn, reason
                        ))?;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                scan.warnings += 1;
                scan.damaged += 1;
                write_line(&format!("warning: {}", e))?;
                if !scanner.skip_damaged()? {
                    write_line(&format!("warning: cannot read past {}", scanner.position()))?;
                    scan.warnings += 1;
                    break;
                }
            }
        }
    }
    if let Some((lsn, reason)) = scanner.torn_tail() {
        scan.warnings += 1;
        write_line(&format!("warning: log ends with an incomplete record at {}: {}", lsn, reason))?;
    }
    Ok(scan)
}

fn apply_log(args: &ReadLogArgs) -> CliResult<()> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let mut config = EngineConfig::new(args.log_dir.clone());
            config.checkpoint_interval_secs = 0;
            config
        }
    };
    config.log_dir = Some(args.log_dir.clone());
    let options = RecoveryOptions {
        best_effort: args.best_effort,
        start_lsn: args.start_lsn,
        end_lsn: args.end_lsn,
        undo: !args.no_undo,
    };
    let engine = Engine::open_with(config, options)?;
    let report = engine.recovery_report().clone();
    engine.close()?;

    for warning in &report.warnings {
        write_line(&format!("warning: {}", warning))?;
    }
    write_line(&format!(
        "{} record(s) read, {} applied, {} skipped, {} undone, {} transaction(s) rolled back",
        report.records_scanned, report.redo_applied, report.redo_skipped, report.undo_applied, report.trns_undone
    ))?;
    write_warning_count(report.warning_count())
}

fn report_json(report: &RecoveryReport) -> serde_json::Value {
    let tables: Vec<serde_json::Value> = report
        .tables
        .iter()
        .map(|t| {
            json!({
                "table": t.table,
                "rows": t.rows,
                "index_entries": t.index_entries,
                "bitmap_mismatches": t.bitmap_mismatches,
            })
        })
        .collect();
    json!({
        "phase": report.phase.name(),
        "start_lsn": report.start_lsn.to_string(),
        "from_checkpoint": report.from_checkpoint,
        "records_scanned": report.records_scanned,
        "redo_applied": report.redo_applied,
        "redo_skipped": report.redo_skipped,
        "undo_applied": report.undo_applied,
        "trns_undone": report.trns_undone,
        "max_trid": report.max_trid.raw(),
        "tables": tables,
        "warnings": report.warnings,
    })
}

pub fn recover(config: &Path, best_effort: bool) -> CliResult<()> {
    let config = load_config(config)?;
    let options = RecoveryOptions {
        best_effort,
        ..RecoveryOptions::default()
    };
    let engine = Engine::open_with(config, options)?;
    let report = report_json(engine.recovery_report());
    engine.close()?;
    write_report(report)
}

pub fn checkpoint(config: &Path, level: LevelArg) -> CliResult<()> {
    let level = match level {
        LevelArg::Indirect => CheckpointLevel::Indirect,
        LevelArg::Medium => CheckpointLevel::Medium,
        LevelArg::Full => CheckpointLevel::Full,
    };
    let engine = Engine::open(load_config(config)?)?;
    let outcome = engine.checkpoint(level)?;
    engine.close()?;
    write_report(json!({
        "level": level.name(),
        "record_lsn": outcome.record_lsn.to_string(),
        "checkpoint_lsn": outcome.checkpoint_lsn.to_string(),
        "pages_flushed": outcome.pages_flushed,
        "dirty_pages": outcome.dirty_pages,
        "active_trns": outcome.active_trns,
        "files_purged": outcome.files_purged,
    }))
}

pub fn remote_copy(args: &RemoteCopyArgs) -> CliResult<()> {
    let (database, table) = args.table.split_once('/').ok_or_else(|| {
        CliError::config_error(format!("table '{}' must be given as database/table", args.table))
    })?;
    let backend: Arc<dyn ObjectBackend> = Arc::new(LocalBackend::new(&args.remote_root, &args.bucket)?);
    let remote = RemoteTable::new(backend, database, table)?;

    if args.delete {
        delete_from_remote(&remote)?;
        Logger::info("REMOTE_COPY_CLI", &[("action", "delete"), ("table", &args.table)]);
        return write_report(json!({ "deleted": args.table }));
    }

    let config = match (&args.config, &args.data_dir) {
        (Some(path), data_dir) => {
            let mut config = load_config(path)?;
            if let Some(dir) = data_dir {
                config.data_dir = dir.clone();
            }
            config
        }
        (None, Some(dir)) => {
            let mut config = EngineConfig::new(dir.clone());
            config.checkpoint_interval_secs = 0;
            config
        }
        (None, None) => return Err(CliError::config_error("--data-dir or --config is required")),
    };
    let options = CopyOptions {
        compress: args.compress,
        force: args.force,
    };
    let engine = Engine::open(config)?;
    let result = if args.to {
        copy_to_remote(engine.registry(), &args.table, &remote, options)
    } else {
        copy_from_remote(engine.registry(), &remote, &args.table, options)
    };
    engine.close()?;
    let report: CopyReport = result?;
    write_report(json!({
        "table": args.table,
        "direction": if args.to { "to" } else { "from" },
        "index_blocks": report.index_blocks,
        "data_blocks": report.data_blocks,
        "bytes": report.bytes,
        "compressed": args.compress,
    }))
}
