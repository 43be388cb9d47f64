//! Crash scenarios, grouped by the subsystem the crash point lives in

pub mod checkpoint;
pub mod recovery;
pub mod table;
