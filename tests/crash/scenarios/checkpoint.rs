//! Crashes inside a checkpoint
//!
//! The checkpoint that follows recovery is cut short at each of its steps.
//! Whatever step it died in, the next open recovers the same rows.

use tempfile::TempDir;

use crate::crash::harness::{child_dir, child_name, report_failure, run_child};
use crate::crash::utils::{commit_rows, config, create_table, row_numbers};
use ariadb::crash_point::points;
use ariadb::engine::Engine;

#[test]
#[ignore]
fn child_reopen() {
    let Some(dir) = child_dir() else { return };
    let _engine = Engine::open(config(&dir)).unwrap();
}

/// Twenty committed rows, then an unclean stop
fn prepare(dir: &TempDir) {
    let engine = Engine::open(config(dir.path())).unwrap();
    create_table(&engine);
    commit_rows(&engine, 0..20);
    engine.crash();
}

#[test]
fn test_crash_at_each_checkpoint_step() {
    for point in [
        points::CHECKPOINT_START,
        points::CHECKPOINT_AFTER_RECORD,
        points::CHECKPOINT_BEFORE_CONTROL,
        points::CHECKPOINT_AFTER_CONTROL,
    ] {
        let dir = TempDir::new().unwrap();
        prepare(&dir);

        let result = run_child(&child_name(module_path!(), "child_reopen"), point, dir.path());
        if !result.hit(point) {
            report_failure(point, "child aborts in the post-recovery checkpoint", &result);
            panic!("crash point {} not reached", point);
        }

        let engine = Engine::open(config(dir.path())).unwrap();
        assert_eq!(
            row_numbers(&engine),
            (0..20).collect::<Vec<u32>>(),
            "after crash at {}",
            point
        );
        assert_eq!(engine.recovery_report().trns_undone, 0);
    }
}
