//! Crashes in the middle of table operations
//!
//! - Crash after a row change is logged: the change is rolled back
//! - Crash before cached pages are written: every commit survives
//! - Crash while the header is being rewritten: the table stays usable

use tempfile::TempDir;

use crate::crash::harness::{child_dir, child_name, report_failure, run_child};
use crate::crash::utils::{commit_rows, config, create_table, row, row_numbers, TABLE};
use ariadb::crash_point::points;
use ariadb::engine::Engine;

/// A table with rows 0..5, closed cleanly
fn prepare(dir: &TempDir) {
    let engine = Engine::open(config(dir.path())).unwrap();
    create_table(&engine);
    commit_rows(&engine, 0..5);
    engine.close().unwrap();
}

// =============================================================================
// Children
// =============================================================================

#[test]
#[ignore]
fn child_insert_uncommitted() {
    let Some(dir) = child_dir() else { return };
    let engine = Engine::open(config(&dir)).unwrap();
    let table = engine.open_table(TABLE).unwrap();
    let trn = engine.begin().unwrap();
    table.insert(&trn, &row(99)).unwrap();
}

#[test]
#[ignore]
fn child_commit_then_checkpoint() {
    let Some(dir) = child_dir() else { return };
    let engine = Engine::open(config(&dir)).unwrap();
    commit_rows(&engine, 5..60);
    engine.checkpoint(ariadb::config::CheckpointLevel::Full).unwrap();
}

#[test]
#[ignore]
fn child_open_table() {
    let Some(dir) = child_dir() else { return };
    let engine = Engine::open(config(&dir)).unwrap();
    let _table = engine.open_table(TABLE).unwrap();
}

// =============================================================================
// Scenarios
// =============================================================================

/// The row record reached the log but the transaction never ended
#[test]
fn test_crash_after_row_logged_rolls_back() {
    let dir = TempDir::new().unwrap();
    prepare(&dir);

    let point = points::TABLE_AFTER_ROW_LOGGED;
    let result = run_child(&child_name(module_path!(), "child_insert_uncommitted"), point, dir.path());
    if !result.hit(point) {
        report_failure(point, "child aborts after logging the insert", &result);
        panic!("crash point not reached");
    }

    let engine = Engine::open(config(dir.path())).unwrap();
    assert_eq!(row_numbers(&engine), vec![0, 1, 2, 3, 4]);
}

/// Commits whose pages never left the cache come back from the log
#[test]
fn test_crash_before_page_write_keeps_commits() {
    let dir = TempDir::new().unwrap();
    prepare(&dir);

    let point = points::PAGE_BEFORE_WRITE;
    let result = run_child(&child_name(module_path!(), "child_commit_then_checkpoint"), point, dir.path());
    if !result.hit(point) {
        report_failure(point, "child aborts on the first page write", &result);
        panic!("crash point not reached");
    }

    let mut expected: Vec<u32> = (0..5).collect();
    expected.extend(result.reported("committed"));
    let engine = Engine::open(config(dir.path())).unwrap();
    assert_eq!(row_numbers(&engine), expected);
}

/// A header write cut short while opening the table
#[test]
fn test_crash_before_header_write() {
    let dir = TempDir::new().unwrap();
    prepare(&dir);

    let point = points::TABLE_BEFORE_HEADER_WRITE;
    let result = run_child(&child_name(module_path!(), "child_open_table"), point, dir.path());
    if !result.hit(point) {
        report_failure(point, "child aborts before writing the table header", &result);
        panic!("crash point not reached");
    }

    let engine = Engine::open(config(dir.path())).unwrap();
    assert_eq!(row_numbers(&engine), vec![0, 1, 2, 3, 4]);
}
