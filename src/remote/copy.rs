//! Copying tables between local files and a remote backend
//!
//! Every page is decoded with the pipeline it was stored with and encoded
//! again with the pipeline of the destination, so compression can be added
//! on the way out and dropped on the way back. Encryption and the key
//! version stay as they are.
//!
//! Object order matters for readers that discover tables by the `frm`
//! object: it is written last on copy and deleted last on removal.

use std::fs::{self, File, OpenOptions};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::ObjectBackend;
use super::errors::{RemoteError, RemoteResult};
use super::store::{block_key, table_prefix, BlockKind, RemoteBlockStore, DEFINITION_OBJECT, HEADER_OBJECT};
use crate::hooks::{SharedPipeline, TransformContext};
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::page::{is_blank, PageNo};
use crate::pagecache::{BlockStore, FileBlockStore};
use crate::table::{validate_name, Share, TableError, TableHeader, TableOptions, TableRegistry};

/// Contents of the `frm` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub database: String,
    pub table: String,
    pub options: TableOptions,
    pub compressed: bool,
    pub rows: u64,
    pub copied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyOptions {
    /// Store pages compressed in the remote backend
    pub compress: bool,
    /// Replace a table that already exists at the destination
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CopyReport {
    pub index_blocks: u64,
    pub data_blocks: u64,
    pub bytes: u64,
}

/// A table inside a remote backend
#[derive(Debug, Clone)]
pub struct RemoteTable {
    pub backend: Arc<dyn ObjectBackend>,
    pub database: String,
    pub table: String,
}

impl RemoteTable {
    pub fn new(backend: Arc<dyn ObjectBackend>, database: &str, table: &str) -> RemoteResult<Self> {
        for part in [database, table] {
            if part.is_empty() || part.contains('/') || part == "." || part == ".." {
                return Err(RemoteError::InvalidKey(format!("{}/{}", database, table)));
            }
        }
        Ok(Self {
            backend,
            database: database.to_string(),
            table: table.to_string(),
        })
    }

    fn key(&self, object: &str) -> String {
        format!("{}/{}", table_prefix(&self.database, &self.table), object)
    }

    fn block(&self, kind: BlockKind, block: u64) -> String {
        block_key(&self.database, &self.table, kind, block)
    }

    pub fn exists(&self) -> RemoteResult<bool> {
        Ok(self.backend.exists(&self.key(HEADER_OBJECT))? || self.backend.exists(&self.key(DEFINITION_OBJECT))?)
    }

    pub fn header(&self) -> RemoteResult<TableHeader> {
        let page = self.backend.get(&self.key(HEADER_OBJECT)).map_err(|e| match e {
            RemoteError::ObjectNotFound(_) => RemoteError::TableNotFound(self.display()),
            other => other,
        })?;
        Ok(TableHeader::decode(&page)?)
    }

    pub fn definition(&self) -> RemoteResult<TableDefinition> {
        let data = self.backend.get(&self.key(DEFINITION_OBJECT))?;
        serde_json::from_slice(&data).map_err(|e| RemoteError::Definition(e.to_string()))
    }

    fn display(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Decode a stored block, or a zero page for a hole
fn decode_block(pipeline: &SharedPipeline, page: PageNo, block_size: usize, stored: Option<Vec<u8>>) -> RemoteResult<Vec<u8>> {
    match stored {
        Some(block) if !is_blank(&block) => {
            let ctx = TransformContext { page_no: page, block_size };
            Ok(pipeline.decode(&ctx, block)?)
        }
        _ => Ok(vec![0u8; block_size]),
    }
}

fn encode_page(pipeline: &SharedPipeline, page: PageNo, block_size: usize, data: &[u8]) -> RemoteResult<Vec<u8>> {
    let ctx = TransformContext { page_no: page, block_size };
    Ok(pipeline.encode(&ctx, data)?)
}

/// Copy a closed local table to `remote`
pub fn copy_to_remote(
    registry: &TableRegistry,
    name: &str,
    remote: &RemoteTable,
    options: CopyOptions,
) -> RemoteResult<CopyReport> {
    validate_name(name)?;
    if registry.share(name).is_some() {
        return Err(TableError::in_use(name).into());
    }
    let paths = registry.paths(name);
    if !paths.exists() {
        return Err(TableError::not_found(name).into());
    }
    let index_file = File::open(&paths.index)
        .map_err(|e| TableError::io(format!("cannot open {}", paths.index.display()), e))?;
    let mut header = TableHeader::read_from(&index_file)?;
    if !header.row_format.supports_remote() {
        return Err(RemoteError::NotCopyable(
            name.to_string(),
            format!("row format {} is not BLOCK_RECORD", header.row_format.name()),
        ));
    }
    if header.crashed || header.open_count > 0 {
        return Err(RemoteError::NotCopyable(
            name.to_string(),
            "table was not closed cleanly; recover or repair it first".to_string(),
        ));
    }
    if remote.exists()? {
        if !options.force {
            return Err(RemoteError::TableExists(remote.display()));
        }
        delete_from_remote(remote)?;
    }

    log_event_with_fields(
        Event::RemoteCopyStart,
        &[
            ("table", name),
            ("remote", &remote.display()),
            ("direction", "to"),
        ],
    );
    let bs = header.block_size as usize;
    let local = registry.pipeline_for(&header.crypt, false)?;
    let target = registry.pipeline_for(&header.crypt, options.compress)?;
    let mut report = CopyReport::default();

    let index = FileBlockStore::open_read_only(&paths.index, bs)?;
    for page in 1..index.block_count()? {
        let data = decode_block(&local, page, bs, index.read_block(page)?)?;
        let stored = encode_page(&target, page, bs, &data)?;
        if let Some(number) = BlockKind::Index.block_number(page) {
            remote.backend.put(&remote.block(BlockKind::Index, number), &stored)?;
        }
        report.index_blocks += 1;
        report.bytes += stored.len() as u64;
    }

    let data_store = FileBlockStore::open_read_only(&paths.data, bs)?;
    for page in 0..data_store.block_count()? {
        let data = decode_block(&local, page, bs, data_store.read_block(page)?)?;
        let stored = encode_page(&target, page, bs, &data)?;
        if let Some(number) = BlockKind::Data.block_number(page) {
            remote.backend.put(&remote.block(BlockKind::Data, number), &stored)?;
        }
        report.data_blocks += 1;
        report.bytes += stored.len() as u64;
    }

    header.compressed = options.compress;
    remote.backend.put(&remote.key(HEADER_OBJECT), &header.encode()?)?;
    let definition = TableDefinition {
        database: remote.database.clone(),
        table: remote.table.clone(),
        options: header.options(),
        compressed: options.compress,
        rows: header.row_count,
        copied_at: Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&definition).map_err(|e| RemoteError::Definition(e.to_string()))?;
    remote.backend.put(&remote.key(DEFINITION_OBJECT), &json)?;

    log_event_with_fields(
        Event::RemoteCopyComplete,
        &[
            ("table", name),
            ("remote", &remote.display()),
            ("index_blocks", &report.index_blocks.to_string()),
            ("data_blocks", &report.data_blocks.to_string()),
        ],
    );
    Ok(report)
}

/// Copy `remote` into a new local table `name`
pub fn copy_from_remote(
    registry: &TableRegistry,
    remote: &RemoteTable,
    name: &str,
    options: CopyOptions,
) -> RemoteResult<CopyReport> {
    validate_name(name)?;
    if registry.share(name).is_some() {
        return Err(TableError::in_use(name).into());
    }
    let paths = registry.paths(name);
    if paths.exists() {
        if !options.force {
            return Err(RemoteError::LocalExists(name.to_string()));
        }
        registry.drop_table(name)?;
    }
    let mut header = remote.header()?;
    let bs = header.block_size as usize;
    let source = registry.pipeline_for(&header.crypt, header.compressed)?;
    let local = registry.pipeline_for(&header.crypt, false)?;

    log_event_with_fields(
        Event::RemoteCopyStart,
        &[
            ("table", name),
            ("remote", &remote.display()),
            ("direction", "from"),
        ],
    );
    if let Some(dir) = paths.index.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut report = CopyReport::default();
    let stored_size = if header.compressed { None } else { Some(bs) };

    let result = (|| -> RemoteResult<()> {
        let index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&paths.index)?;
        let index_src = RemoteBlockStore::open(
            Arc::clone(&remote.backend),
            &remote.database,
            &remote.table,
            BlockKind::Index,
            stored_size,
        )?;
        let index_dst = FileBlockStore::open(&paths.index, bs)?;
        for page in 1..index_src.block_count()? {
            let data = decode_block(&source, page, bs, index_src.read_block(page)?)?;
            index_dst.write_block(page, &encode_page(&local, page, bs, &data)?)?;
            report.index_blocks += 1;
        }

        let data_src = RemoteBlockStore::open(
            Arc::clone(&remote.backend),
            &remote.database,
            &remote.table,
            BlockKind::Data,
            stored_size,
        )?;
        let data_dst = FileBlockStore::open(&paths.data, bs)?;
        for page in 0..data_src.block_count()? {
            let data = decode_block(&source, page, bs, data_src.read_block(page)?)?;
            data_dst.write_block(page, &encode_page(&local, page, bs, &data)?)?;
            report.data_blocks += 1;
        }
        data_dst.sync()?;
        index_dst.sync()?;

        header.compressed = false;
        header.open_count = 0;
        header.write_to(&index_file)?;
        Ok(())
    })();

    if let Err(e) = result {
        for path in [&paths.index, &paths.data] {
            let _ = fs::remove_file(path);
        }
        return Err(e);
    }
    report.bytes = (report.index_blocks + report.data_blocks) * bs as u64;
    log_event_with_fields(
        Event::RemoteCopyComplete,
        &[
            ("table", name),
            ("remote", &remote.display()),
            ("index_blocks", &report.index_blocks.to_string()),
            ("data_blocks", &report.data_blocks.to_string()),
        ],
    );
    Ok(report)
}

/// Remove every object of `remote`
pub fn delete_from_remote(remote: &RemoteTable) -> RemoteResult<()> {
    if !remote.exists()? {
        return Err(RemoteError::TableNotFound(remote.display()));
    }
    let mut removed = 0usize;
    for kind in [BlockKind::Index, BlockKind::Data] {
        let prefix = format!("{}/{}", table_prefix(&remote.database, &remote.table), kind.dir());
        for key in remote.backend.list(&prefix)? {
            remote.backend.delete(&key)?;
            removed += 1;
        }
    }
    for object in [HEADER_OBJECT, DEFINITION_OBJECT] {
        match remote.backend.delete(&remote.key(object)) {
            Ok(()) => removed += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Logger::info(
        "REMOTE_DELETE",
        &[("remote", &remote.display()), ("objects", &removed.to_string())],
    );
    Ok(())
}

/// Open `remote` read-only under the local name `name`
pub fn open_remote(registry: &TableRegistry, remote: &RemoteTable, name: &str) -> RemoteResult<Arc<Share>> {
    let header = remote.header()?;
    let bs = header.block_size as usize;
    let stored_size = if header.compressed { None } else { Some(bs) };
    let index = RemoteBlockStore::open(
        Arc::clone(&remote.backend),
        &remote.database,
        &remote.table,
        BlockKind::Index,
        stored_size,
    )?;
    let data = RemoteBlockStore::open(
        Arc::clone(&remote.backend),
        &remote.database,
        &remote.table,
        BlockKind::Data,
        stored_size,
    )?;
    Ok(registry.attach_remote(name, header, Arc::new(index), Arc::new(data))?)
}
