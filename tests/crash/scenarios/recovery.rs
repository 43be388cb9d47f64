//! Crashes during recovery
//!
//! Recovery must survive being interrupted itself. Undo writes a CLR for
//! every compensation, so a second run continues where the first stopped
//! and never undoes a change twice.

use tempfile::TempDir;

use crate::crash::harness::{child_dir, child_name, report_failure, run_child};
use crate::crash::utils::{commit_rows, config, create_table, row, row_numbers, TABLE};
use ariadb::config::CheckpointLevel;
use ariadb::crash_point::points;
use ariadb::engine::Engine;

#[test]
#[ignore]
fn child_recover() {
    let Some(dir) = child_dir() else { return };
    let _engine = Engine::open(config(&dir)).unwrap();
}

/// Rows 0..3 committed, rows 100..110 written by a transaction that never
/// finished and flushed to the table by a checkpoint
fn prepare(dir: &TempDir) {
    let engine = Engine::open(config(dir.path())).unwrap();
    create_table(&engine);
    commit_rows(&engine, 0..3);
    let table = engine.open_table(TABLE).unwrap();
    let trn = engine.begin().unwrap();
    for i in 100..110 {
        table.insert(&trn, &row(i)).unwrap();
    }
    engine.checkpoint(CheckpointLevel::Full).unwrap();
    engine.crash();
}

fn crash_recovery_at(point: &str) {
    let dir = TempDir::new().unwrap();
    prepare(&dir);

    let result = run_child(&child_name(module_path!(), "child_recover"), point, dir.path());
    if !result.hit(point) {
        report_failure(point, "child aborts inside recovery", &result);
        panic!("crash point {} not reached", point);
    }

    let engine = Engine::open(config(dir.path())).unwrap();
    assert_eq!(engine.recovery_report().trns_undone, 1);
    assert_eq!(row_numbers(&engine), vec![0, 1, 2]);
}

#[test]
fn test_crash_after_redo() {
    crash_recovery_at(points::RECOVERY_AFTER_REDO);
}

/// The first undo is logged as a CLR, then the process dies
#[test]
fn test_crash_during_undo() {
    crash_recovery_at(points::RECOVERY_DURING_UNDO);
}

/// Undo finished and the abort was logged, but nothing was checkpointed
#[test]
fn test_crash_after_undo() {
    let dir = TempDir::new().unwrap();
    prepare(&dir);

    let point = points::RECOVERY_AFTER_UNDO;
    let result = run_child(&child_name(module_path!(), "child_recover"), point, dir.path());
    if !result.hit(point) {
        report_failure(point, "child aborts after the undo pass", &result);
        panic!("crash point not reached");
    }

    let engine = Engine::open(config(dir.path())).unwrap();
    assert_eq!(engine.recovery_report().trns_undone, 0);
    assert_eq!(row_numbers(&engine), vec![0, 1, 2]);
}
