//! Crash point injection for durability testing
//!
//! A crash point is a named location in the engine where the process can be
//! made to die on purpose. Setting `ARIADB_CRASH_POINT=<name>` makes the
//! matching `maybe_crash` call abort the process with no unwinding and no
//! cleanup, which is what a power cut looks like to the files on disk.
//!
//! ```ignore
//! use ariadb::crash_point::{maybe_crash, points};
//!
//! maybe_crash(points::LOG_AFTER_FLUSH);
//! ```

use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn get_crash_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("ARIADB_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `ARIADB_CRASH_POINT` names this point
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    get_crash_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    // Log
    pub const LOG_BEFORE_APPEND: &str = "log_before_append";
    pub const LOG_AFTER_APPEND: &str = "log_after_append";
    pub const LOG_BEFORE_FLUSH: &str = "log_before_flush";
    pub const LOG_AFTER_FLUSH: &str = "log_after_flush";
    pub const LOG_AFTER_ROTATE: &str = "log_after_rotate";
    pub const LOG_BEFORE_PURGE: &str = "log_before_purge";

    // Page cache
    pub const PAGE_BEFORE_WRITE: &str = "page_before_write";
    pub const PAGE_AFTER_WRITE: &str = "page_after_write";

    // Checkpoint
    pub const CHECKPOINT_START: &str = "checkpoint_start";
    pub const CHECKPOINT_AFTER_RECORD: &str = "checkpoint_after_record";
    pub const CHECKPOINT_BEFORE_CONTROL: &str = "checkpoint_before_control";
    pub const CHECKPOINT_AFTER_CONTROL: &str = "checkpoint_after_control";

    // Recovery
    pub const RECOVERY_AFTER_REDO: &str = "recovery_after_redo";
    pub const RECOVERY_DURING_UNDO: &str = "recovery_during_undo";
    pub const RECOVERY_AFTER_UNDO: &str = "recovery_after_undo";

    // Tables
    pub const TABLE_AFTER_ROW_LOGGED: &str = "table_after_row_logged";
    pub const TABLE_BEFORE_HEADER_WRITE: &str = "table_before_header_write";

    pub fn all() -> &'static [&'static str] {
        &[
            LOG_BEFORE_APPEND,
            LOG_AFTER_APPEND,
            LOG_BEFORE_FLUSH,
            LOG_AFTER_FLUSH,
            LOG_AFTER_ROTATE,
            LOG_BEFORE_PURGE,
            PAGE_BEFORE_WRITE,
            PAGE_AFTER_WRITE,
            CHECKPOINT_START,
            CHECKPOINT_AFTER_RECORD,
            CHECKPOINT_BEFORE_CONTROL,
            CHECKPOINT_AFTER_CONTROL,
            RECOVERY_AFTER_REDO,
            RECOVERY_DURING_UNDO,
            RECOVERY_AFTER_UNDO,
            TABLE_AFTER_ROW_LOGGED,
            TABLE_BEFORE_HEADER_WRITE,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_disabled_by_default() {
        assert!(!crash_point_enabled("test_point"));
    }

    #[test]
    fn test_all_crash_points_defined() {
        let all = points::all();
        assert_eq!(all.len(), 17);
        assert!(all.contains(&"log_after_flush"));
        assert!(all.contains(&"checkpoint_before_control"));
        assert!(all.contains(&"recovery_during_undo"));
    }

    #[test]
    fn test_crash_point_names_are_lowercase_with_underscores() {
        for point in points::all() {
            assert!(
                point.chars().all(|c| c.is_lowercase() || c == '_'),
                "Crash point '{}' should be lowercase with underscores",
                point
            );
        }
    }
}
