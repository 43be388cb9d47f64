//! Crash testing framework
//!
//! Crashes are real: the child process aborts at a crash point, so nothing
//! cached in memory reaches disk.

pub mod harness;
pub mod scenarios;
pub mod utils;
