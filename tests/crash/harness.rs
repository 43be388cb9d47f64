//! Subprocess management for crash tests
//!
//! The parent test prepares a data directory and re-runs this test binary
//! with a single ignored child test selected. The child finds the
//! directory in `ARIADB_CRASH_DIR`, does its work and dies at the crash
//! point named by `ARIADB_CRASH_POINT`. The parent then reopens the
//! directory and checks what survived.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

pub const CRASH_DIR_ENV: &str = "ARIADB_CRASH_DIR";
pub const CRASH_POINT_ENV: &str = "ARIADB_CRASH_POINT";

/// Result of a child run
#[derive(Debug)]
pub struct CrashTestResult {
    /// Whether the process died instead of exiting cleanly
    pub crashed: bool,
    pub exit_status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

impl CrashTestResult {
    /// Whether the child reached the crash point it was given
    pub fn hit(&self, crash_point: &str) -> bool {
        self.crashed
            && self
                .stderr
                .contains(&format!("Triggering crash at point: {}", crash_point))
    }

    /// Values the child printed as `label=<n>` lines
    pub fn reported(&self, label: &str) -> Vec<u32> {
        let prefix = format!("{}=", label);
        self.stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .filter_map(|n| n.parse().ok())
            .collect()
    }
}

/// Full libtest name of `child` declared in the module at `module`
/// (as given by `module_path!()`)
pub fn child_name(module: &str, child: &str) -> String {
    match module.split_once("::") {
        Some((_, rest)) => format!("{}::{}", rest, child),
        None => child.to_string(),
    }
}

/// Run one ignored child test of this binary with the crash point set
pub fn run_child(child: &str, crash_point: &str, data_dir: &Path) -> CrashTestResult {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            return CrashTestResult {
                crashed: false,
                exit_status: None,
                stdout: String::new(),
                stderr: format!("cannot locate test binary: {}", e),
            }
        }
    };
    let output = Command::new(exe)
        .args([child, "--exact", "--ignored", "--nocapture", "--test-threads=1"])
        .env(CRASH_POINT_ENV, crash_point)
        .env(CRASH_DIR_ENV, data_dir)
        .output();

    match output {
        Ok(output) => CrashTestResult {
            crashed: !output.status.success(),
            exit_status: Some(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(e) => CrashTestResult {
            crashed: false,
            exit_status: None,
            stdout: String::new(),
            stderr: format!("Failed to execute: {}", e),
        },
    }
}

/// The directory a child works in; `None` when the child test was run by
/// hand without a parent
pub fn child_dir() -> Option<PathBuf> {
    std::env::var_os(CRASH_DIR_ENV).map(PathBuf::from)
}

/// Print what went wrong with a crash run
pub fn report_failure(crash_point: &str, expected: &str, result: &CrashTestResult) {
    eprintln!("=== CRASH TEST FAILURE ===");
    eprintln!("Crash point: {}", crash_point);
    eprintln!("Expected: {}", expected);
    eprintln!("Exit status: {:?}", result.exit_status);
    eprintln!("Child stdout:\n{}", result.stdout);
    eprintln!("Child stderr:\n{}", result.stderr);
    eprintln!("==========================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_name_drops_crate_segment() {
        assert_eq!(
            child_name("crash_tests::crash::scenarios::table", "child_insert"),
            "crash::scenarios::table::child_insert"
        );
        assert_eq!(child_name("crash_tests", "child"), "child");
    }

    #[test]
    fn test_reported_values_are_parsed() {
        let result = CrashTestResult {
            crashed: true,
            exit_status: None,
            stdout: "running 1 test\ncommitted=0\ncommitted=1\nnoise\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(result.reported("committed"), vec![0, 1]);
        assert!(!result.hit("page_before_write"));
    }
}
