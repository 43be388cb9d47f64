//! Transactions
//!
//! A [`Trn`] is the in-memory record of one transaction: its id, state and
//! undo chain. The chain is threaded through the log: each undoable record
//! stores the transaction's previous undoable LSN, and `undo_lsn` names
//! the head. A transaction owns write access to every table it changed
//! until it commits or rolls back.

mod errors;
mod manager;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::lsn::Lsn;
use crate::table::Share;

pub use errors::{TrnError, TrnErrorCode, TrnResult};
pub use manager::TrnManager;

/// Transaction id; 0 means "no transaction"
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TrnId(u64);

impl TrnId {
    pub const NONE: TrnId = TrnId(0);

    pub const fn new(raw: u64) -> Self {
        TrnId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TrnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrnState {
    Active,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct TrnInner {
    state: TrnState,
    first_undo_lsn: Lsn,
    undo_lsn: Lsn,
    tables: Vec<Arc<Share>>,
}

#[derive(Debug)]
pub struct Trn {
    id: TrnId,
    inner: Mutex<TrnInner>,
}

/// Handle callers hold while a transaction runs
pub type Transaction = Arc<Trn>;

impl Trn {
    pub(crate) fn new(id: TrnId) -> Self {
        Self {
            id,
            inner: Mutex::new(TrnInner {
                state: TrnState::Active,
                first_undo_lsn: Lsn::IMPOSSIBLE,
                undo_lsn: Lsn::IMPOSSIBLE,
                tables: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> TrnId {
        self.id
    }

    pub fn state(&self) -> TrnState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TrnState::Active
    }

    /// First undoable record, `IMPOSSIBLE` while the transaction wrote none
    pub fn first_undo_lsn(&self) -> Lsn {
        self.inner.lock().first_undo_lsn
    }

    /// Head of the undo chain
    pub fn undo_lsn(&self) -> Lsn {
        self.inner.lock().undo_lsn
    }

    /// Append an undoable record to the chain.
    ///
    /// `write` receives the current chain head and returns the new record's
    /// LSN. The chain lock is held across the write, so records of one
    /// transaction always link in log order.
    pub(crate) fn log_undoable<E>(
        &self,
        write: impl FnOnce(Lsn) -> Result<Lsn, E>,
    ) -> Result<Lsn, E> {
        let mut inner = self.inner.lock();
        let lsn = write(inner.undo_lsn)?;
        inner.undo_lsn = lsn;
        if inner.first_undo_lsn.is_impossible() {
            inner.first_undo_lsn = lsn;
        }
        Ok(lsn)
    }

    /// Move the chain head back after a record was compensated
    pub(crate) fn set_undo_lsn(&self, lsn: Lsn) {
        self.inner.lock().undo_lsn = lsn;
    }

    /// Remember a table this transaction wrote to; returns false when it
    /// was already attached
    pub(crate) fn attach_table(&self, share: &Arc<Share>) -> bool {
        let mut inner = self.inner.lock();
        if inner.tables.iter().any(|s| Arc::ptr_eq(s, share)) {
            return false;
        }
        inner.tables.push(Arc::clone(share));
        true
    }

    pub(crate) fn tables(&self) -> Vec<Arc<Share>> {
        self.inner.lock().tables.clone()
    }

    /// End the transaction, handing back the tables it held
    pub(crate) fn finish(&self, state: TrnState) -> Vec<Arc<Share>> {
        let mut inner = self.inner.lock();
        inner.state = state;
        std::mem::take(&mut inner.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_chain_links_in_order() {
        let trn = Trn::new(TrnId::new(5));
        let mut seen = Vec::new();
        for offset in [100u32, 200, 300] {
            trn.log_undoable::<()>(|prev| {
                seen.push(prev);
                Ok(Lsn::new(1, offset))
            })
            .unwrap();
        }
        assert_eq!(
            seen,
            vec![Lsn::IMPOSSIBLE, Lsn::new(1, 100), Lsn::new(1, 200)]
        );
        assert_eq!(trn.first_undo_lsn(), Lsn::new(1, 100));
        assert_eq!(trn.undo_lsn(), Lsn::new(1, 300));
    }

    #[test]
    fn test_failed_write_leaves_chain_alone() {
        let trn = Trn::new(TrnId::new(1));
        let result = trn.log_undoable(|_| Err("disk full"));
        assert!(result.is_err());
        assert!(trn.undo_lsn().is_impossible());
        assert!(trn.first_undo_lsn().is_impossible());
    }

    #[test]
    fn test_finish_changes_state() {
        let trn = Trn::new(TrnId::new(2));
        assert!(trn.is_active());
        assert!(trn.finish(TrnState::Committed).is_empty());
        assert_eq!(trn.state(), TrnState::Committed);
    }
}
