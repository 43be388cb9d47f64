//! # Engine
//!
//! The engine owns one instance of every subsystem and wires them together
//! in dependency order:
//!
//! ```text
//! config -> control file -> log -> page cache -> tables
//!        -> recovery -> transactions -> checkpoints -> checkpointer
//! ```
//!
//! Startup always runs recovery. With nothing to recover it finds an empty
//! scan and costs one log read. Afterwards a full checkpoint makes the
//! recovered state the new starting point and every table is closed, so
//! callers open tables the normal way.

mod errors;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

pub use errors::{EngineError, EngineResult};

use crate::checkpoint::{CheckpointManager, CheckpointOutcome, Checkpointer};
use crate::config::{CheckpointLevel, EngineConfig, LogPurge};
use crate::control::ControlFile;
use crate::hooks::{FileKeyProvider, KeyProvider};
use crate::lsn::Lsn;
use crate::observability::{log_error, log_event_with_fields, Event, Logger, MetricsRegistry};
use crate::pagecache::{FlushGuard, PageCache};
use crate::recovery::{RecoveryManager, RecoveryOptions, RecoveryReport};
use crate::remote::{open_remote, RemoteTable};
use crate::table::{rollback, RebuildReport, TableHandle, TableOptions, TableRegistry};
use crate::trn::{Transaction, TrnManager};
use crate::wal::{list_files, Wal, WalOptions};

pub struct Engine {
    config: EngineConfig,
    wal: Arc<Wal>,
    registry: Arc<TableRegistry>,
    trns: Arc<TrnManager>,
    checkpoints: Arc<CheckpointManager>,
    checkpointer: Mutex<Option<Checkpointer>>,
    metrics: Arc<MetricsRegistry>,
    recovery: RecoveryReport,
    closed: AtomicBool,
}

impl Engine {
    /// Open the engine described by `config`, recovering whatever the
    /// previous run left behind
    pub fn open(config: EngineConfig) -> EngineResult<Engine> {
        Self::open_with(config, RecoveryOptions::default())
    }

    /// `open` with explicit recovery options. `best_effort` is also taken
    /// from the configuration.
    pub fn open_with(config: EngineConfig, mut recovery: RecoveryOptions) -> EngineResult<Engine> {
        config.validate()?;
        recovery.best_effort |= config.recover_best_effort;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            crate::control::ControlError::io(format!("cannot create {}", config.data_dir.display()), e)
        })?;
        let metrics = Arc::new(MetricsRegistry::new());

        let control = Self::load_control(&config)?;
        let mut wal_options = WalOptions::new(config.log_dir(), control.uuid);
        wal_options.max_file_size = config.log_file_size;
        wal_options.sync = config.sync_log;
        wal_options.start_file_no = control.last_log_file_no;
        wal_options.verify_from_file_no = control.last_log_file_no;
        let wal = Arc::new(Wal::open(wal_options, Arc::clone(&metrics))?);

        let keys: Option<Arc<dyn KeyProvider>> = match &config.encryption_key_file {
            Some(path) => Some(Arc::new(FileKeyProvider::load(path)?)),
            None => None,
        };
        let cache = Arc::new(PageCache::new(
            config.page_cache_pages,
            Some(Arc::clone(&wal) as Arc<dyn FlushGuard>),
            Arc::clone(&metrics),
        ));
        let registry = Arc::new(TableRegistry::new(
            config.data_dir.clone(),
            Arc::clone(&cache),
            Arc::clone(&wal),
            keys,
        ));

        let report = RecoveryManager::new(
            Arc::clone(&wal),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            recovery,
        )
        .run(&control)?;

        let trns = Arc::new(TrnManager::new(
            Arc::clone(&wal),
            Arc::clone(&metrics),
            report.max_trid,
        ));
        let checkpoints = Arc::new(CheckpointManager::new(
            config.data_dir.clone(),
            Arc::clone(&wal),
            cache,
            Arc::clone(&trns),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.log_purge,
            control,
        ));
        checkpoints.checkpoint(CheckpointLevel::Full)?;
        registry.close_all()?;

        let checkpointer = if config.checkpoint_interval_secs > 0 {
            Some(Checkpointer::spawn(
                Arc::downgrade(&checkpoints),
                Duration::from_secs(config.checkpoint_interval_secs),
                config.checkpoint_level,
            )?)
        } else {
            None
        };

        log_event_with_fields(
            Event::EngineOpen,
            &[
                ("data_dir", &config.data_dir.display().to_string()),
                ("horizon", &wal.horizon().to_string()),
                ("recovered_trns", &report.trns_undone.to_string()),
            ],
        );
        Ok(Engine {
            config,
            wal,
            registry,
            trns,
            checkpoints,
            checkpointer: Mutex::new(checkpointer),
            metrics,
            recovery: report,
            closed: AtomicBool::new(false),
        })
    }

    /// The control file, or a new one when this is a fresh engine. Log
    /// files without a control file are refused: their uuid cannot be
    /// checked and their checkpoint is unknown.
    fn load_control(config: &EngineConfig) -> EngineResult<ControlFile> {
        if let Some(control) = ControlFile::load(&config.data_dir)? {
            return Ok(control);
        }
        let log_dir = config.log_dir();
        let files = list_files(&log_dir).map_err(|e| {
            crate::wal::WalError::io_error(format!("cannot list {}", log_dir.display()), e)
        })?;
        if !files.is_empty() {
            return Err(EngineError::LogMismatch(format!(
                "{} holds {} log file(s) but {} has no control file",
                log_dir.display(),
                files.len(),
                config.data_dir.display()
            )));
        }
        let mut control = ControlFile::new(Uuid::new_v4());
        control.store(&config.data_dir)?;
        Logger::info("CONTROL_FILE_CREATED", &[("uuid", &control.uuid.to_string())]);
        Ok(control)
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Get the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the log
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// Get the table registry
    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Get the metrics registry
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Get the transaction manager
    pub fn transactions(&self) -> &Arc<TrnManager> {
        &self.trns
    }

    /// What startup recovery did
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// LSN of the last completed checkpoint
    pub fn checkpoint_lsn(&self) -> Lsn {
        self.checkpoints.checkpoint_lsn()
    }

    /// Create a table
    pub fn create_table(&self, name: &str, options: &TableOptions) -> EngineResult<()> {
        self.check_open()?;
        Ok(self.registry.create(name, options)?)
    }

    /// Drop a table; it must not be open
    pub fn drop_table(&self, name: &str) -> EngineResult<()> {
        self.check_open()?;
        Ok(self.registry.drop_table(name)?)
    }

    /// Open a table, returning a handle that closes it on drop
    pub fn open_table(&self, name: &str) -> EngineResult<TableHandle> {
        self.check_open()?;
        let share = self.registry.open(name)?;
        Ok(TableHandle::new(share))
    }

    /// Open a table stored in a remote backend, read-only, as `name`
    pub fn open_remote_table(&self, remote: &RemoteTable, name: &str) -> EngineResult<TableHandle> {
        self.check_open()?;
        let share = open_remote(&self.registry, remote, name)?;
        Ok(TableHandle::new(share))
    }

    /// Rebuild a crashed table from its data file
    pub fn repair_table(&self, name: &str) -> EngineResult<RebuildReport> {
        self.check_open()?;
        let share = self.registry.open(name)?;
        Ok(share.repair()?)
    }

    /// Begin a transaction
    pub fn begin(&self) -> EngineResult<Transaction> {
        self.check_open()?;
        Ok(self.trns.begin())
    }

    /// Make `trn` durable; returns the commit record's LSN
    pub fn commit(&self, trn: &Transaction) -> EngineResult<Lsn> {
        Ok(self.trns.commit(trn)?)
    }

    /// Undo every change of `trn` and end it
    pub fn rollback(&self, trn: &Transaction) -> EngineResult<()> {
        Ok(rollback(&self.trns, &self.wal, trn)?)
    }

    /// Run a checkpoint at the given level
    pub fn checkpoint(&self, level: CheckpointLevel) -> EngineResult<CheckpointOutcome> {
        self.check_open()?;
        Ok(self.checkpoints.checkpoint_detailed(level)?)
    }

    /// Delete log files recovery no longer needs. Only needed with
    /// `log_purge = external`; immediate purging does this per checkpoint.
    pub fn purge_logs(&self) -> EngineResult<usize> {
        self.check_open()?;
        if self.config.log_purge == LogPurge::Immediate {
            Logger::trace("LOG_PURGE_EXPLICIT", &[("mode", "immediate")]);
        }
        Ok(self.wal.purge(self.checkpoints.checkpoint_lsn())?)
    }

    /// Stop the engine cleanly: roll back what is still running, take a
    /// full checkpoint and close every table
    pub fn close(self) -> EngineResult<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut checkpointer) = self.checkpointer.lock().take() {
            checkpointer.stop()?;
        }
        for trn in self.trns.active() {
            Logger::warn("TRN_ROLLBACK_AT_CLOSE", &[("trn", &trn.id().to_string())]);
            rollback(&self.trns, &self.wal, &trn)?;
        }
        self.checkpoints.checkpoint(CheckpointLevel::Full)?;
        self.registry.close_all()?;
        self.wal.flush_all()?;
        log_event_with_fields(
            Event::EngineClose,
            &[("checkpoint_lsn", &self.checkpoints.checkpoint_lsn().to_string())],
        );
        Ok(())
    }

    /// Stop without flushing pages, closing tables or checkpointing. The
    /// files are left as a crash at this point would leave them; log
    /// records already written stay in the log.
    pub fn crash(self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut checkpointer) = self.checkpointer.lock().take() {
            let _ = checkpointer.stop();
        }
        self.registry.abandon_all();
        Logger::warn("ENGINE_CRASH_SIMULATED", &[]);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log_error("engine", e.code(), &e.to_string(), &[]);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("horizon", &self.wal.horizon())
            .field("checkpoint_lsn", &self.checkpoints.checkpoint_lsn())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
