//! Copying tables to and from a remote object backend
//!
//! The backend is a local directory, laid out the way an object store
//! would hold the table: `db/table/{index,data}/NNNNNN`, `aria` and `frm`.

use std::sync::Arc;

use ariadb::config::EngineConfig;
use ariadb::engine::Engine;
use ariadb::remote::{
    copy_from_remote, copy_to_remote, delete_from_remote, CopyOptions, LocalBackend, ObjectBackend,
    RemoteError, RemoteTable,
};
use ariadb::table::{RowId, TableOptions};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Fields drop in order: the engine shuts down before its directories go
struct Fixture {
    engine: Engine,
    backend: Arc<dyn ObjectBackend>,
    _data: TempDir,
    _remote_root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let data = TempDir::new().unwrap();
        let remote_root = TempDir::new().unwrap();
        let mut config = EngineConfig::new(data.path());
        config.checkpoint_interval_secs = 0;
        config.page_cache_pages = 64;
        config.log_file_size = 1 << 20;
        config.block_size = 1024;
        let engine = Engine::open(config).unwrap();
        let backend: Arc<dyn ObjectBackend> = Arc::new(LocalBackend::new(remote_root.path(), "aria").unwrap());
        Self {
            engine,
            backend,
            _data: data,
            _remote_root: remote_root,
        }
    }

    fn remote(&self, database: &str, table: &str) -> RemoteTable {
        RemoteTable::new(Arc::clone(&self.backend), database, table).unwrap()
    }

    /// A closed BLOCK_RECORD table with `rows` compressible rows
    fn table_with_rows(&self, name: &str, rows: u32) -> Vec<(RowId, Vec<u8>)> {
        self.engine
            .create_table(name, &TableOptions::block_record().with_block_size(1024))
            .unwrap();
        let table = self.engine.open_table(name).unwrap();
        let trn = self.engine.begin().unwrap();
        for i in 0..rows {
            let mut row = i.to_be_bytes().to_vec();
            row.extend_from_slice(&[b'x'; 60]);
            table.insert(&trn, &row).unwrap();
        }
        self.engine.commit(&trn).unwrap();
        let scan = table.scan().unwrap();
        drop(table);
        scan
    }

    fn scan(&self, name: &str) -> Vec<(RowId, Vec<u8>)> {
        self.engine.open_table(name).unwrap().scan().unwrap()
    }
}

// =============================================================================
// Round trips
// =============================================================================

/// to-remote then from-remote under another name gives back the same rows
#[test]
fn test_round_trip_uncompressed() {
    let fx = Fixture::new();
    let rows = fx.table_with_rows("db/t1", 200);
    let remote = fx.remote("db", "t1");

    let out = copy_to_remote(fx.engine.registry(), "db/t1", &remote, CopyOptions::default()).unwrap();
    assert!(out.data_blocks > 0);
    assert!(remote.exists().unwrap());
    let definition = remote.definition().unwrap();
    assert_eq!(definition.rows, 200);
    assert!(!definition.compressed);

    let back = copy_from_remote(fx.engine.registry(), &remote, "db2/t1", CopyOptions::default()).unwrap();
    assert_eq!(back.data_blocks, out.data_blocks);
    assert_eq!(fx.scan("db2/t1"), rows);
}

/// Compressed copies store fewer bytes and come back uncompressed
#[test]
fn test_round_trip_compressed() {
    let fx = Fixture::new();
    let rows = fx.table_with_rows("db/t1", 200);

    let plain = copy_to_remote(fx.engine.registry(), "db/t1", &fx.remote("db", "plain"), CopyOptions::default())
        .unwrap();
    let packed = copy_to_remote(
        fx.engine.registry(),
        "db/t1",
        &fx.remote("db", "packed"),
        CopyOptions {
            compress: true,
            force: false,
        },
    )
    .unwrap();
    assert!(packed.bytes < plain.bytes, "{} >= {}", packed.bytes, plain.bytes);
    assert!(fx.remote("db", "packed").header().unwrap().compressed);

    copy_from_remote(fx.engine.registry(), &fx.remote("db", "packed"), "db/t2", CopyOptions::default()).unwrap();
    let local = fx.engine.open_table("db/t2").unwrap();
    assert!(!local.share().header().compressed);
    assert_eq!(local.scan().unwrap(), rows);
}

// =============================================================================
// Remote tables in place
// =============================================================================

/// A remote table can be read without copying it back, and refuses writes
#[test]
fn test_open_remote_read_only() {
    let fx = Fixture::new();
    let rows = fx.table_with_rows("db/t1", 50);
    let remote = fx.remote("db", "t1");
    copy_to_remote(
        fx.engine.registry(),
        "db/t1",
        &remote,
        CopyOptions {
            compress: true,
            force: false,
        },
    )
    .unwrap();

    let view = fx.engine.open_remote_table(&remote, "remote/t1").unwrap();
    assert_eq!(view.scan().unwrap(), rows);
    assert_eq!(view.read(rows[7].0).unwrap(), rows[7].1);

    let trn = fx.engine.begin().unwrap();
    let err = view.insert(&trn, b"not allowed").unwrap_err();
    assert_eq!(err.code_str(), "ARIA_TABLE_READ_ONLY");
    fx.engine.rollback(&trn).unwrap();
}

// =============================================================================
// Refusals and deletion
// =============================================================================

#[test]
fn test_existing_destinations_need_force() {
    let fx = Fixture::new();
    fx.table_with_rows("db/t1", 10);
    let remote = fx.remote("db", "t1");
    copy_to_remote(fx.engine.registry(), "db/t1", &remote, CopyOptions::default()).unwrap();

    let err = copy_to_remote(fx.engine.registry(), "db/t1", &remote, CopyOptions::default()).unwrap_err();
    assert!(matches!(err, RemoteError::TableExists(_)));
    let force = CopyOptions {
        compress: false,
        force: true,
    };
    copy_to_remote(fx.engine.registry(), "db/t1", &remote, force).unwrap();

    let err = copy_from_remote(fx.engine.registry(), &remote, "db/t1", CopyOptions::default()).unwrap_err();
    assert!(matches!(err, RemoteError::LocalExists(_)));
    copy_from_remote(fx.engine.registry(), &remote, "db/t1", force).unwrap();
    assert_eq!(fx.scan("db/t1").len(), 10);
}

/// An open table is not copied
#[test]
fn test_open_table_is_not_copied() {
    let fx = Fixture::new();
    fx.table_with_rows("db/t1", 10);
    let _open = fx.engine.open_table("db/t1").unwrap();
    let err = copy_to_remote(fx.engine.registry(), "db/t1", &fx.remote("db", "t1"), CopyOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "ARIA_TABLE_IN_USE");
}

/// Only BLOCK_RECORD tables go to remote storage
#[test]
fn test_fixed_table_is_not_copyable() {
    let fx = Fixture::new();
    fx.engine
        .create_table("db/f", &TableOptions::fixed(8).non_transactional())
        .unwrap();
    let err = copy_to_remote(fx.engine.registry(), "db/f", &fx.remote("db", "f"), CopyOptions::default())
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotCopyable(_, _)));
}

#[test]
fn test_delete_removes_every_object() {
    let fx = Fixture::new();
    fx.table_with_rows("db/t1", 30);
    let remote = fx.remote("db", "t1");
    copy_to_remote(fx.engine.registry(), "db/t1", &remote, CopyOptions::default()).unwrap();
    assert!(!fx.backend.list("db/t1").unwrap().is_empty());

    delete_from_remote(&remote).unwrap();
    assert!(!remote.exists().unwrap());
    assert!(fx.backend.list("db/t1").unwrap().is_empty());

    let err = delete_from_remote(&remote).unwrap_err();
    assert!(matches!(err, RemoteError::TableNotFound(_)));
    let err = copy_from_remote(fx.engine.registry(), &remote, "db/t3", CopyOptions::default()).unwrap_err();
    assert!(matches!(err, RemoteError::TableNotFound(_)));
    assert!(!fx.engine.registry().exists("db/t3"));
}
