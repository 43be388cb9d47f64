//! Open tables and table ids
//!
//! The registry is the engine's context object for tables: it creates and
//! opens table files, hands out one [`Share`] per open table and binds
//! each transactional table to a short [`TableId`] for the log. The first
//! bind of a table in a run writes a `FileId` record; the checkpoint
//! record repeats every binding so recovery does not depend on that record
//! surviving a purge.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dynamic::DynamicFile;
use super::errors::{TableError, TableResult};
use super::fixed::FixedFile;
use super::header::TableHeader;
use super::share::{DataFile, ShareParts};
use super::{RowFormat, Share, TableOptions, TableState, DATA_EXT, INDEX_EXT};
use crate::hooks::{CryptData, KeyProvider, PageEncryptor, Pipeline, SharedPipeline};
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::pagecache::{BlockStore, FileBlockStore, FileId, PageCache};
use crate::trn::TrnId;
use crate::wal::{sync_dir, CheckpointTable, FileIdRecord, RecordType, TableId, Wal};

/// The two files of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePaths {
    pub index: PathBuf,
    pub data: PathBuf,
}

impl TablePaths {
    pub fn new(data_dir: &Path, name: &str) -> Self {
        Self {
            index: data_dir.join(format!("{}.{}", name, INDEX_EXT)),
            data: data_dir.join(format!("{}.{}", name, DATA_EXT)),
        }
    }

    pub fn exists(&self) -> bool {
        self.index.exists()
    }
}

/// Names are relative paths below the data directory, `db/table` style
pub fn validate_name(name: &str) -> TableResult<()> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(TableError::unsupported(format!("invalid table name '{}'", name)));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct TableIds {
    by_name: HashMap<String, TableId>,
    by_id: HashMap<TableId, String>,
    next: u16,
    logged: HashSet<TableId>,
}

#[derive(Debug)]
pub struct TableRegistry {
    data_dir: PathBuf,
    cache: Arc<PageCache>,
    wal: Arc<Wal>,
    keys: Option<Arc<dyn KeyProvider>>,
    shares: Mutex<HashMap<String, Arc<Share>>>,
    ids: Mutex<TableIds>,
}

impl TableRegistry {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        cache: Arc<PageCache>,
        wal: Arc<Wal>,
        keys: Option<Arc<dyn KeyProvider>>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache,
            wal,
            keys,
            shares: Mutex::new(HashMap::new()),
            ids: Mutex::new(TableIds {
                next: 1,
                ..TableIds::default()
            }),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn paths(&self, name: &str) -> TablePaths {
        TablePaths::new(&self.data_dir, name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.paths(name).exists()
    }

    /// Write the files of a new, empty table
    pub fn create(&self, name: &str, options: &TableOptions) -> TableResult<()> {
        validate_name(name)?;
        options.validate()?;
        let paths = self.paths(name);
        if paths.exists() || self.shares.lock().contains_key(name) {
            return Err(TableError::exists(name));
        }
        let crypt = if options.encrypted {
            let version = self
                .keys
                .as_ref()
                .and_then(|k| k.latest_version())
                .ok_or_else(|| {
                    TableError::unsupported("encrypted tables need an encryption key").with_table(name)
                })?;
            CryptData::generate(version)
        } else {
            CryptData::none()
        };
        if !options.transactional && crypt.is_encrypted() {
            return Err(TableError::unsupported("encrypted tables must be transactional").with_table(name));
        }

        let header = TableHeader::new(options, crypt, self.wal.horizon());
        let dir = paths
            .index
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.data_dir.clone());
        fs::create_dir_all(&dir)
            .map_err(|e| TableError::io(format!("cannot create {}", dir.display()), e))?;
        let index = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&paths.index)
            .map_err(|e| TableError::io(format!("cannot create {}", paths.index.display()), e))?;
        header.write_to(&index)?;
        let data = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&paths.data)
            .map_err(|e| TableError::io(format!("cannot create {}", paths.data.display()), e))?;
        data.sync_all()
            .map_err(|e| TableError::io("cannot sync new data file", e))?;
        sync_dir(&dir).map_err(|e| TableError::io(format!("cannot sync {}", dir.display()), e))?;

        log_event_with_fields(
            Event::TableCreate,
            &[
                ("table", name),
                ("row_format", options.row_format.name()),
                ("transactional", if options.transactional { "true" } else { "false" }),
                ("encrypted", if crypt.is_encrypted() { "true" } else { "false" }),
            ],
        );
        Ok(())
    }

    /// The page pipeline for a table with `crypt`
    pub(crate) fn pipeline_for(&self, crypt: &CryptData, compressed: bool) -> TableResult<SharedPipeline> {
        let encryptor = if crypt.is_encrypted() {
            let keys = self.keys.clone().ok_or_else(|| {
                TableError::unsupported("table is encrypted but no key file is configured")
            })?;
            Some(PageEncryptor::new(*crypt, keys)?)
        } else {
            None
        };
        Ok(Arc::new(Pipeline::standard(compressed, encryptor)))
    }

    fn register(
        &self,
        label: String,
        store: Arc<dyn BlockStore>,
        crypt: &CryptData,
        compressed: bool,
        block_size: usize,
    ) -> TableResult<FileId> {
        let pipeline = self.pipeline_for(crypt, compressed)?;
        Ok(self.cache.register_file(label, store, pipeline, block_size)?)
    }

    fn build_local(&self, name: &str, status: TableState) -> TableResult<Arc<Share>> {
        let paths = self.paths(name);
        if !paths.exists() {
            return Err(TableError::not_found(name));
        }
        let header_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&paths.index)
            .map_err(|e| TableError::io(format!("cannot open {}", paths.index.display()), e))?;
        let header = TableHeader::read_from(&header_file).map_err(|e| e.with_table(name))?;
        if header.compressed {
            return Err(TableError::unsupported(
                "compressed tables can only be opened from a remote backend",
            )
            .with_table(name));
        }
        let bs = header.block_size as usize;
        let index_store = FileBlockStore::open(&paths.index, bs)
            .map_err(|e| TableError::io(format!("cannot open {}", paths.index.display()), e))?;
        let index = self.register(
            format!("{}.{}", name, INDEX_EXT),
            Arc::new(index_store),
            &header.crypt,
            false,
            bs,
        )?;
        let data = match header.row_format {
            RowFormat::BlockRecord => {
                let store = FileBlockStore::open(&paths.data, bs).map_err(|e| {
                    TableError::io(format!("cannot open {}", paths.data.display()), e)
                });
                let registered = store.and_then(|store| {
                    self.register(
                        format!("{}.{}", name, DATA_EXT),
                        Arc::new(store),
                        &header.crypt,
                        false,
                        bs,
                    )
                });
                match registered {
                    Ok(file) => DataFile::Paged(file),
                    Err(e) => {
                        self.cache.unregister_file(index);
                        return Err(e);
                    }
                }
            }
            RowFormat::Fixed => DataFile::Fixed(FixedFile::open(&paths.data, header.reclength, false)?),
            RowFormat::Dynamic => DataFile::Dynamic(DynamicFile::open(&paths.data, false)?),
        };
        let table_id = self.bind(name, header.transactional)?;
        Ok(Arc::new(Share::new(ShareParts {
            name: name.to_string(),
            table_id,
            cache: Arc::clone(&self.cache),
            wal: Arc::clone(&self.wal),
            header_file: Some(header_file),
            header,
            index,
            data,
            status,
        })))
    }

    /// Open a table for callers.
    ///
    /// A table whose header shows it was open when the engine stopped gets
    /// its derived state rebuilt (transactional) or is marked crashed
    /// until repaired (otherwise).
    pub fn open(&self, name: &str) -> TableResult<Arc<Share>> {
        validate_name(name)?;
        let mut shares = self.shares.lock();
        if let Some(share) = shares.get(name) {
            match share.state() {
                TableState::Closed => {
                    shares.remove(name);
                }
                TableState::Open | TableState::Crashed => return Ok(Arc::clone(share)),
                other => {
                    return Err(TableError::unsupported(format!("table is {}", other)).with_table(name))
                }
            }
        }

        let share = self.build_local(name, TableState::Opening)?;
        let header = share.header();
        if header.crashed {
            share.set_state(TableState::Crashed);
        } else if header.open_count > 0 && header.transactional {
            Logger::warn(
                "TABLE_NOT_CLOSED",
                &[("table", name), ("action", "rebuild")],
            );
            share.set_state(TableState::Recovery);
            share
                .rebuild_derived(self.wal.horizon())
                .map_err(|e| e.with_table(name))?;
        } else if header.open_count > 0 {
            share.mark_crashed(&TableError::crashed(name));
        }

        if share.state() != TableState::Crashed {
            {
                let mut header = share.header_mut();
                header.open_count = 1;
                share.write_header_locked(&header)?;
            }
            share.set_state(TableState::Open);
        }
        log_event_with_fields(
            Event::TableOpen,
            &[("table", name), ("state", share.state().name())],
        );
        shares.insert(name.to_string(), Arc::clone(&share));
        Ok(share)
    }

    /// Open a table named by the log for recovery. Missing files give
    /// `None`; the caller decides whether that is worth a warning.
    pub fn open_for_recovery(&self, name: &str) -> TableResult<Option<Arc<Share>>> {
        if validate_name(name).is_err() || !self.exists(name) {
            return Ok(None);
        }
        let mut shares = self.shares.lock();
        if let Some(share) = shares.get(name) {
            if share.state() != TableState::Closed {
                return Ok(Some(Arc::clone(share)));
            }
        }
        let share = self.build_local(name, TableState::Recovery)?;
        shares.insert(name.to_string(), Arc::clone(&share));
        Ok(Some(share))
    }

    /// Finish recovery of a table: clean open count, crashed flag cleared,
    /// header written. The share stays open for callers.
    pub(crate) fn finish_recovery(&self, share: &Share) -> TableResult<()> {
        let mut header = share.header_mut();
        header.open_count = 0;
        header.crashed = false;
        share.write_header_locked(&header)?;
        drop(header);
        share.set_state(TableState::Open);
        Ok(())
    }

    /// Open a table whose blocks live in remote stores. The share is
    /// read-only: it has no header file and its stores refuse writes.
    pub(crate) fn attach_remote(
        &self,
        name: &str,
        header: TableHeader,
        index_store: Arc<dyn BlockStore>,
        data_store: Arc<dyn BlockStore>,
    ) -> TableResult<Arc<Share>> {
        validate_name(name)?;
        if header.row_format != RowFormat::BlockRecord {
            return Err(TableError::unsupported("only BLOCK_RECORD tables can be remote").with_table(name));
        }
        let mut shares = self.shares.lock();
        if let Some(existing) = shares.get(name) {
            if existing.state() != TableState::Closed {
                return Err(TableError::in_use(name));
            }
        }
        let bs = header.block_size as usize;
        let index = self.register(
            format!("remote:{}.{}", name, INDEX_EXT),
            index_store,
            &header.crypt,
            header.compressed,
            bs,
        )?;
        let data = match self.register(
            format!("remote:{}.{}", name, DATA_EXT),
            data_store,
            &header.crypt,
            header.compressed,
            bs,
        ) {
            Ok(file) => file,
            Err(e) => {
                self.cache.unregister_file(index);
                return Err(e);
            }
        };
        let table_id = self.bind(name, false)?;
        let share = Arc::new(Share::new(ShareParts {
            name: name.to_string(),
            table_id,
            cache: Arc::clone(&self.cache),
            wal: Arc::clone(&self.wal),
            header_file: None,
            header,
            index,
            data: DataFile::Paged(data),
            status: TableState::Open,
        }));
        log_event_with_fields(Event::TableOpen, &[("table", name), ("state", "open"), ("remote", "true")]);
        shares.insert(name.to_string(), Arc::clone(&share));
        Ok(share)
    }

    /// Remove a table's files. It must not be in use.
    pub fn drop_table(&self, name: &str) -> TableResult<()> {
        validate_name(name)?;
        let share = self.shares.lock().remove(name);
        if let Some(share) = share {
            if !share.is_unused() && share.state() != TableState::Closed {
                self.shares.lock().insert(name.to_string(), Arc::clone(&share));
                return Err(TableError::in_use(name));
            }
            share.force_close()?;
        }
        let paths = self.paths(name);
        if !paths.exists() {
            return Err(TableError::not_found(name));
        }
        for path in [&paths.index, &paths.data] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TableError::io(format!("cannot remove {}", path.display()), e))
                }
            }
        }
        if let Some(dir) = paths.index.parent() {
            sync_dir(dir).map_err(|e| TableError::io(format!("cannot sync {}", dir.display()), e))?;
        }
        Logger::info("TABLE_DROP", &[("table", name)]);
        Ok(())
    }

    /// The id a table is logged under; the first bind in a run of a
    /// transactional table writes a `FileId` record
    pub fn bind(&self, name: &str, logged: bool) -> TableResult<TableId> {
        let mut ids = self.ids.lock();
        let id = match ids.by_name.get(name) {
            Some(id) => *id,
            None => {
                if ids.next == u16::MAX {
                    return Err(TableError::unsupported("too many tables bound in one log"));
                }
                let id = TableId(ids.next);
                ids.next += 1;
                ids.by_name.insert(name.to_string(), id);
                ids.by_id.insert(id, name.to_string());
                id
            }
        };
        if logged && !ids.logged.contains(&id) {
            let record = FileIdRecord {
                table: id,
                path: name.to_string(),
            };
            self.wal
                .write_record(RecordType::FileId, TrnId::NONE, &[&record.serialize()])?;
            ids.logged.insert(id);
        }
        Ok(id)
    }

    /// Take over a binding read from the log or a checkpoint
    pub fn bind_recovered(&self, id: TableId, name: &str) {
        let mut ids = self.ids.lock();
        if let Some(old) = ids.by_id.insert(id, name.to_string()) {
            if old != name {
                ids.by_name.remove(&old);
            }
        }
        ids.by_name.insert(name.to_string(), id);
        ids.next = ids.next.max(id.0.saturating_add(1));
    }

    /// Never hand out ids at or below `max`
    pub fn reserve_ids(&self, max: u16) {
        let mut ids = self.ids.lock();
        ids.next = ids.next.max(max.saturating_add(1));
    }

    pub fn name_for(&self, id: TableId) -> Option<String> {
        self.ids.lock().by_id.get(&id).cloned()
    }

    pub fn max_table_id(&self) -> u16 {
        self.ids.lock().next.saturating_sub(1)
    }

    /// Every binding, for the checkpoint record
    pub fn bindings(&self) -> Vec<CheckpointTable> {
        let ids = self.ids.lock();
        let mut tables: Vec<CheckpointTable> = ids
            .by_id
            .iter()
            .map(|(id, name)| CheckpointTable {
                table: *id,
                path: name.clone(),
            })
            .collect();
        tables.sort_by_key(|t| t.table);
        tables
    }

    pub fn share(&self, name: &str) -> Option<Arc<Share>> {
        self.shares
            .lock()
            .get(name)
            .filter(|s| s.state() != TableState::Closed)
            .cloned()
    }

    /// The table whose index or data pages live in `file`
    pub fn table_for_file(&self, file: FileId) -> Option<TableId> {
        self.shares
            .lock()
            .values()
            .find(|s| s.index_file() == file || s.data_file() == Some(file))
            .map(|s| s.table_id())
    }

    /// Shares that are not closed; closed ones are dropped from the map
    pub fn open_shares(&self) -> Vec<Arc<Share>> {
        let mut shares = self.shares.lock();
        shares.retain(|_, s| s.state() != TableState::Closed);
        let mut out: Vec<Arc<Share>> = shares.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Close every table; the first error is returned after all were tried
    pub fn close_all(&self) -> TableResult<()> {
        let mut first_err = None;
        for share in self.open_shares() {
            if let Err(e) = share.force_close() {
                first_err.get_or_insert(e);
            }
        }
        self.shares.lock().clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop every table without writing anything
    pub(crate) fn abandon_all(&self) {
        for share in self.open_shares() {
            share.abandon();
        }
        self.shares.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsRegistry;
    use crate::wal::WalOptions;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn registry(dir: &TempDir) -> TableRegistry {
        let metrics = Arc::new(MetricsRegistry::new());
        let wal = Arc::new(
            Wal::open(WalOptions::new(dir.path(), Uuid::new_v4()), Arc::clone(&metrics)).unwrap(),
        );
        let cache = Arc::new(PageCache::new(32, None, metrics));
        TableRegistry::new(dir.path(), cache, wal, None)
    }

    #[test]
    fn test_names_stay_below_data_dir() {
        assert!(validate_name("db/t1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../t1").is_err());
        assert!(validate_name("/etc/t1").is_err());
    }

    #[test]
    fn test_create_open_and_close() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.create("db/t1", &TableOptions::block_record()).unwrap();
        assert!(reg.create("db/t1", &TableOptions::block_record()).is_err());

        let share = reg.open("db/t1").unwrap();
        assert_eq!(share.state(), TableState::Open);
        assert_eq!(share.header().open_count, 1);
        assert!(Arc::ptr_eq(&share, &reg.open("db/t1").unwrap()));

        share.add_handle();
        share.release_handle();
        assert_eq!(share.state(), TableState::Closed);
        let file = OpenOptions::new().read(true).open(reg.paths("db/t1").index).unwrap();
        assert_eq!(TableHeader::read_from(&file).unwrap().open_count, 0);
        assert!(reg.open_shares().is_empty());
    }

    #[test]
    fn test_unclean_nontransactional_table_is_crashed() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.create("t2", &TableOptions::fixed(8)).unwrap();
        let share = reg.open("t2").unwrap();
        share.abandon();

        let again = reg.open("t2").unwrap();
        assert_eq!(again.state(), TableState::Crashed);
        assert!(again.check_readable().is_err());
        again.repair().unwrap();
        assert_eq!(again.state(), TableState::Open);
    }

    #[test]
    fn test_bind_logs_once() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let before = reg.wal().horizon();
        let a = reg.bind("a", true).unwrap();
        let after_first = reg.wal().horizon();
        assert_eq!(reg.bind("a", true).unwrap(), a);
        assert_eq!(reg.wal().horizon(), after_first);
        assert!(after_first > before);
        assert_eq!(reg.bind("b", false).unwrap(), TableId(a.0 + 1));
        assert_eq!(reg.name_for(a).as_deref(), Some("a"));
        assert_eq!(reg.bindings().len(), 2);
    }

    #[test]
    fn test_drop_requires_unused() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.create("t3", &TableOptions::dynamic()).unwrap();
        let share = reg.open("t3").unwrap();
        share.add_handle();
        assert!(reg.drop_table("t3").is_err());
        share.release_handle();
        reg.drop_table("t3").unwrap();
        assert!(!reg.exists("t3"));
    }
}
