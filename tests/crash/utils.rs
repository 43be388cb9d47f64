//! Crash testing utilities

use std::path::Path;

use ariadb::config::EngineConfig;
use ariadb::engine::Engine;
use ariadb::table::{RowId, TableOptions};

pub const TABLE: &str = "db/crash";

/// Engine settings shared by parents and children
pub fn config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::new(dir);
    config.checkpoint_interval_secs = 0;
    config.page_cache_pages = 128;
    config.log_file_size = 1 << 20;
    config.block_size = 1024;
    config
}

pub fn row(i: u32) -> Vec<u8> {
    let mut row = i.to_be_bytes().to_vec();
    row.extend_from_slice(&[i as u8; 28]);
    row
}

pub fn create_table(engine: &Engine) {
    engine
        .create_table(TABLE, &TableOptions::block_record().with_block_size(1024))
        .unwrap();
}

/// Commit `rows`, one transaction each, printing `committed=<i>` after each
/// commit returns
pub fn commit_rows(engine: &Engine, rows: std::ops::Range<u32>) {
    let table = engine.open_table(TABLE).unwrap();
    for i in rows {
        let trn = engine.begin().unwrap();
        table.insert(&trn, &row(i)).unwrap();
        engine.commit(&trn).unwrap();
        println!("committed={}", i);
    }
}

pub fn scan(engine: &Engine) -> Vec<(RowId, Vec<u8>)> {
    engine.open_table(TABLE).unwrap().scan().unwrap()
}

/// First four bytes of every row, sorted
pub fn row_numbers(engine: &Engine) -> Vec<u32> {
    let mut numbers: Vec<u32> = scan(engine)
        .iter()
        .map(|(_, row)| u32::from_be_bytes([row[0], row[1], row[2], row[3]]))
        .collect();
    numbers.sort_unstable();
    numbers
}
