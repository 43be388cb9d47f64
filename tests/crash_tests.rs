//! Crash tests
//!
//! Every scenario kills a child process at a named crash point and checks
//! the directory it left behind. Run with `cargo test --test crash_tests`.

mod crash;
