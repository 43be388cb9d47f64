//! Transaction manager: id assignment, the active set, commit and the
//! final step of rollback

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::errors::{TrnError, TrnResult};
use super::{Transaction, Trn, TrnId, TrnState};
use crate::lsn::Lsn;
use crate::observability::{Logger, MetricsRegistry};
use crate::wal::{CheckpointTrn, RecordType, Wal};

pub struct TrnManager {
    wal: Arc<Wal>,
    metrics: Arc<MetricsRegistry>,
    next_id: AtomicU64,
    active: Mutex<BTreeMap<TrnId, Transaction>>,
}

impl TrnManager {
    /// Ids continue after `max_trid`, the largest id the log or the last
    /// checkpoint has seen
    pub fn new(wal: Arc<Wal>, metrics: Arc<MetricsRegistry>, max_trid: TrnId) -> Self {
        Self {
            wal,
            metrics,
            next_id: AtomicU64::new(max_trid.raw() + 1),
            active: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn begin(&self) -> Transaction {
        let id = TrnId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let trn = Arc::new(Trn::new(id));
        self.active.lock().insert(id, Arc::clone(&trn));
        Logger::trace("TRN_BEGIN", &[("trn", &id.to_string())]);
        trn
    }

    /// Make the transaction durable.
    ///
    /// A transaction that wrote nothing commits without a log record.
    /// Returns the commit record's LSN, or `IMPOSSIBLE` for that case.
    pub fn commit(&self, trn: &Trn) -> TrnResult<Lsn> {
        if !trn.is_active() {
            return Err(TrnError::not_active(trn.id()));
        }
        let mut lsn = Lsn::IMPOSSIBLE;
        if !trn.undo_lsn().is_impossible() {
            lsn = self
                .wal
                .write_record(RecordType::Commit, trn.id(), &[])
                .map_err(|e| TrnError::log_failed(trn.id(), e))?;
            self.wal
                .flush(lsn)
                .map_err(|e| TrnError::log_failed(trn.id(), e))?;
        }
        self.end(trn, TrnState::Committed);
        self.metrics.increment_trn_commits();
        Logger::trace(
            "TRN_COMMIT",
            &[("trn", &trn.id().to_string()), ("lsn", &lsn.to_string())],
        );
        Ok(lsn)
    }

    /// Close a transaction whose undo chain has been fully compensated
    pub fn finish_rollback(&self, trn: &Trn) -> TrnResult<()> {
        if !trn.is_active() {
            return Err(TrnError::not_active(trn.id()));
        }
        if !trn.first_undo_lsn().is_impossible() {
            let lsn = self
                .wal
                .write_record(RecordType::Abort, trn.id(), &[])
                .map_err(|e| TrnError::log_failed(trn.id(), e))?;
            self.wal
                .flush(lsn)
                .map_err(|e| TrnError::log_failed(trn.id(), e))?;
        }
        self.end(trn, TrnState::RolledBack);
        self.metrics.increment_trn_rollbacks();
        Ok(())
    }

    fn end(&self, trn: &Trn, state: TrnState) {
        for share in trn.finish(state) {
            share.release_trn(trn.id());
        }
        self.active.lock().remove(&trn.id());
    }

    /// Active transactions, for the checkpoint record
    pub fn snapshot(&self) -> Vec<CheckpointTrn> {
        self.active
            .lock()
            .values()
            .map(|t| CheckpointTrn {
                id: t.id(),
                first_undo_lsn: t.first_undo_lsn(),
                undo_lsn: t.undo_lsn(),
            })
            .collect()
    }

    /// Oldest undo chain start among active transactions
    pub fn min_first_undo_lsn(&self) -> Option<Lsn> {
        self.active
            .lock()
            .values()
            .map(|t| t.first_undo_lsn())
            .filter(|l| !l.is_impossible())
            .min()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn active(&self) -> Vec<Transaction> {
        self.active.lock().values().cloned().collect()
    }

    /// Largest id handed out so far
    pub fn max_trid(&self) -> TrnId {
        TrnId::new(self.next_id.load(Ordering::SeqCst) - 1)
    }
}

impl std::fmt::Debug for TrnManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrnManager")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalOptions;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn manager(dir: &TempDir) -> TrnManager {
        let metrics = Arc::new(MetricsRegistry::new());
        let wal = Wal::open(WalOptions::new(dir.path(), Uuid::new_v4()), Arc::clone(&metrics))
            .unwrap();
        TrnManager::new(Arc::new(wal), metrics, TrnId::new(41))
    }

    #[test]
    fn test_ids_continue_after_max() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        assert_eq!(mgr.begin().id(), TrnId::new(42));
        assert_eq!(mgr.begin().id(), TrnId::new(43));
        assert_eq!(mgr.max_trid(), TrnId::new(43));
        assert_eq!(mgr.active_count(), 2);
    }

    #[test]
    fn test_empty_commit_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let horizon = mgr.wal.horizon();
        let trn = mgr.begin();
        assert!(mgr.commit(&trn).unwrap().is_impossible());
        assert_eq!(mgr.wal.horizon(), horizon);
        assert_eq!(trn.state(), TrnState::Committed);
        assert_eq!(mgr.active_count(), 0);
    }

    #[test]
    fn test_commit_is_durable_and_final() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let trn = mgr.begin();
        trn.log_undoable(|_| mgr.wal.write_record(RecordType::RowInsert, trn.id(), &[b"x"]))
            .unwrap();
        let lsn = mgr.commit(&trn).unwrap();
        assert!(mgr.wal.is_durable(lsn));
        assert_eq!(mgr.wal.read_record(lsn).unwrap().record_type, RecordType::Commit);
        assert!(mgr.commit(&trn).is_err());
    }

    #[test]
    fn test_snapshot_and_min_undo() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let a = mgr.begin();
        let b = mgr.begin();
        let lsn = a
            .log_undoable(|_| mgr.wal.write_record(RecordType::RowInsert, a.id(), &[b"a"]))
            .unwrap();
        assert_eq!(mgr.min_first_undo_lsn(), Some(lsn));
        let snap = mgr.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().any(|t| t.id == b.id() && t.undo_lsn.is_impossible()));
    }
}
