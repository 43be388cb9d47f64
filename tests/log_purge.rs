//! Log rotation, purge and checkpoint ordering
//!
//! - A purge removes whole files strictly below the given LSN
//! - The current file and everything from the purge floor up stay readable
//! - Checkpoint LSNs never move backwards, and an open transaction holds
//!   the log it may still need to undo

use std::sync::Arc;

use ariadb::config::{CheckpointLevel, EngineConfig, LogPurge};
use ariadb::engine::Engine;
use ariadb::lsn::Lsn;
use ariadb::observability::MetricsRegistry;
use ariadb::table::TableOptions;
use ariadb::trn::TrnId;
use ariadb::wal::{list_files, RecordType, Wal, WalOptions};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Test Utilities
// =============================================================================

fn small_log(dir: &TempDir) -> Wal {
    let mut options = WalOptions::new(dir.path(), Uuid::new_v4());
    options.max_file_size = 64 * 1024;
    options.sync = false;
    Wal::open(options, Arc::new(MetricsRegistry::new())).unwrap()
}

/// Write `count` commit records with a 200 byte body each
fn fill(wal: &Wal, count: u32) -> Vec<Lsn> {
    let body = [0x5au8; 200];
    (0..count)
        .map(|i| {
            wal.write_record(RecordType::Commit, TrnId::new(i as u64 + 1), &[&body])
                .unwrap()
        })
        .collect()
}

// =============================================================================
// Purge
// =============================================================================

/// 1000 records across several files, purged up to record 500: earlier
/// files are gone, record 500 and everything after it can still be read.
#[test]
fn test_purge_up_to_record_500() {
    let dir = TempDir::new().unwrap();
    let wal = small_log(&dir);
    let lsns = fill(&wal, 1000);
    wal.flush_all().unwrap();

    let files_before = list_files(dir.path()).unwrap().len();
    assert!(files_before > 2, "expected rotation, got {} file(s)", files_before);

    let target = lsns[499];
    let removed = wal.purge(target).unwrap();
    assert_eq!(removed as u32, target.file_no() - 1);
    assert_eq!(wal.first_file_no(), target.file_no());
    assert_eq!(list_files(dir.path()).unwrap().len(), files_before - removed);

    let record = wal.read_record(target).unwrap();
    assert_eq!(record.trn, TrnId::new(500));
    assert!(wal.read_record(lsns[0]).is_err());

    let mut scanner = wal.scan_from(wal.first_lsn_in_log()).unwrap();
    let mut seen = Vec::new();
    while let Some(record) = scanner.next_record().unwrap() {
        seen.push(record.lsn);
    }
    assert!(seen.first().copied().unwrap() <= target);
    assert_eq!(seen.last().copied(), lsns.last().copied());
    assert!(seen.contains(&target));
}

/// Purging past the end never removes the file being written
#[test]
fn test_purge_keeps_current_file() {
    let dir = TempDir::new().unwrap();
    let wal = small_log(&dir);
    fill(&wal, 1000);
    wal.flush_all().unwrap();

    wal.purge(Lsn::MAX).unwrap();
    assert_eq!(wal.first_file_no(), wal.current_file_no());
    assert_eq!(list_files(dir.path()).unwrap().len(), 1);

    let lsn = wal.write_record(RecordType::Commit, TrnId::new(9999), &[]).unwrap();
    assert_eq!(wal.read_record(lsn).unwrap().trn, TrnId::new(9999));
}

/// The purge floor wins over a larger requested LSN
#[test]
fn test_purge_floor_limits_purge() {
    let dir = TempDir::new().unwrap();
    let wal = small_log(&dir);
    let lsns = fill(&wal, 1000);
    wal.flush_all().unwrap();

    wal.set_purge_floor(lsns[100]);
    wal.purge(lsns[999]).unwrap();
    assert!(wal.first_file_no() <= lsns[100].file_no());
    assert!(wal.read_record(lsns[100]).is_ok());
}

// =============================================================================
// Checkpoints
// =============================================================================

fn engine_config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::new(dir.path());
    config.checkpoint_interval_secs = 0;
    config.page_cache_pages = 64;
    config.log_file_size = 64 * 1024;
    config.block_size = 1024;
    config.sync_log = false;
    config
}

fn insert_rows(engine: &Engine, name: &str, rows: u32) {
    let table = engine.open_table(name).unwrap();
    for i in 0..rows {
        let trn = engine.begin().unwrap();
        table.insert(&trn, &[i as u8; 120]).unwrap();
        engine.commit(&trn).unwrap();
    }
}

/// Checkpoint LSNs only ever grow, whatever the level
#[test]
fn test_checkpoint_lsn_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(&dir)).unwrap();
    engine
        .create_table("db/t", &TableOptions::block_record().with_block_size(1024))
        .unwrap();

    let mut last = engine.checkpoint_lsn();
    for level in [
        CheckpointLevel::Indirect,
        CheckpointLevel::Medium,
        CheckpointLevel::Indirect,
        CheckpointLevel::Full,
        CheckpointLevel::Medium,
    ] {
        insert_rows(&engine, "db/t", 20);
        let outcome = engine.checkpoint(level).unwrap();
        assert!(
            outcome.checkpoint_lsn >= last,
            "{} checkpoint moved back from {} to {}",
            level.name(),
            last,
            outcome.checkpoint_lsn
        );
        assert!(outcome.record_lsn >= outcome.checkpoint_lsn);
        assert_eq!(engine.checkpoint_lsn(), outcome.checkpoint_lsn);
        last = outcome.checkpoint_lsn;
    }
}

/// A full checkpoint over a quiet engine lets old log files go
#[test]
fn test_full_checkpoint_purges_old_files() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(&dir)).unwrap();
    engine
        .create_table("db/t", &TableOptions::block_record().with_block_size(1024))
        .unwrap();
    insert_rows(&engine, "db/t", 600);
    assert!(engine.wal().current_file_no() > 1);

    let outcome = engine.checkpoint(CheckpointLevel::Full).unwrap();
    assert!(outcome.files_purged > 0);
    assert_eq!(outcome.dirty_pages, 0);
    assert!(engine.wal().first_file_no() > 1);
}

/// An open transaction keeps the files holding its undo chain, however
/// much other tables log after it
#[test]
fn test_active_transaction_holds_back_purge() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(engine_config(&dir)).unwrap();
    for name in ["db/t", "db/busy"] {
        engine
            .create_table(name, &TableOptions::block_record().with_block_size(1024))
            .unwrap();
    }

    let table = engine.open_table("db/t").unwrap();
    let old = engine.begin().unwrap();
    table.insert(&old, &[0xee; 120]).unwrap();
    let first_file = engine.wal().current_file_no();

    insert_rows(&engine, "db/busy", 600);
    assert!(engine.wal().current_file_no() > first_file);

    let outcome = engine.checkpoint(CheckpointLevel::Full).unwrap();
    assert_eq!(outcome.active_trns, 1);
    assert!(outcome.checkpoint_lsn.file_no() <= first_file);
    assert!(engine.wal().first_file_no() <= first_file);

    engine.rollback(&old).unwrap();
    assert!(table.scan().unwrap().is_empty());
    assert_eq!(engine.open_table("db/busy").unwrap().scan().unwrap().len(), 600);
}

/// With external purging, checkpoints only move the floor; files go when
/// the caller asks
#[test]
fn test_external_purge_waits_for_request() {
    let dir = TempDir::new().unwrap();
    let mut config = engine_config(&dir);
    config.log_purge = LogPurge::External;
    let engine = Engine::open(config).unwrap();
    engine
        .create_table("db/t", &TableOptions::block_record().with_block_size(1024))
        .unwrap();
    insert_rows(&engine, "db/t", 600);

    let outcome = engine.checkpoint(CheckpointLevel::Full).unwrap();
    assert_eq!(outcome.files_purged, 0);
    assert_eq!(engine.wal().first_file_no(), 1);

    let removed = engine.purge_logs().unwrap();
    assert!(removed > 0);
    assert_eq!(engine.wal().first_file_no(), outcome.checkpoint_lsn.file_no());
    assert_eq!(list_files(dir.path()).unwrap().len(), engine.wal().current_file_no() as usize - removed);
}
