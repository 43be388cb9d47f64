//! Periodic checkpoints on a dedicated thread
//!
//! The thread holds only a weak reference to the manager and exits on its
//! own once the engine drops it. Failures are logged and counted by the
//! manager; the thread keeps going, since the next checkpoint may well
//! succeed and a missed one only lengthens recovery.

use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::coordinator::CheckpointManager;
use super::errors::{CheckpointError, CheckpointResult};
use crate::config::CheckpointLevel;
use crate::observability::Logger;

#[derive(Debug, Default)]
struct Stop {
    requested: Mutex<bool>,
    wake: Condvar,
}

#[derive(Debug)]
pub struct Checkpointer {
    stop: Arc<Stop>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Checkpointer {
    /// Start checkpointing every `interval` at `level`
    pub fn spawn(
        manager: Weak<CheckpointManager>,
        interval: Duration,
        level: CheckpointLevel,
    ) -> CheckpointResult<Self> {
        let stop = Arc::new(Stop::default());
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("aria-checkpoint".into())
            .spawn(move || {
                Logger::info(
                    "CHECKPOINTER_START",
                    &[("interval_secs", &interval.as_secs().to_string())],
                );
                loop {
                    {
                        let mut requested = thread_stop.requested.lock();
                        if !*requested {
                            thread_stop.wake.wait_for(&mut requested, interval);
                        }
                        if *requested {
                            break;
                        }
                    }
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    // Logged and counted by the manager
                    let _ = manager.checkpoint(level);
                }
                Logger::info("CHECKPOINTER_STOP", &[]);
            })
            .map_err(|e| CheckpointError::failed(format!("cannot start checkpoint thread: {}", e)))?;
        Ok(Self {
            stop,
            thread: Some(handle),
        })
    }

    /// Ask the thread to finish and wait for it. A checkpoint in progress
    /// completes first.
    pub fn stop(&mut self) -> CheckpointResult<()> {
        *self.stop.requested.lock() = true;
        self.stop.wake.notify_all();
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CheckpointError::failed("checkpoint thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogPurge;
    use crate::control::ControlFile;
    use crate::observability::MetricsRegistry;
    use crate::pagecache::PageCache;
    use crate::table::TableRegistry;
    use crate::trn::{TrnId, TrnManager};
    use crate::wal::{Wal, WalOptions};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_background_checkpoints_run_and_stop() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(MetricsRegistry::new());
        let uuid = Uuid::new_v4();
        let wal = Arc::new(Wal::open(WalOptions::new(dir.path(), uuid), Arc::clone(&metrics)).unwrap());
        let cache = Arc::new(PageCache::new(16, None, Arc::clone(&metrics)));
        let tables = Arc::new(TableRegistry::new(dir.path(), Arc::clone(&cache), Arc::clone(&wal), None));
        let trns = Arc::new(TrnManager::new(Arc::clone(&wal), Arc::clone(&metrics), TrnId::NONE));
        let manager = Arc::new(CheckpointManager::new(
            dir.path(),
            wal,
            cache,
            trns,
            tables,
            Arc::clone(&metrics),
            LogPurge::External,
            ControlFile::new(uuid),
        ));

        let mut checkpointer = Checkpointer::spawn(
            Arc::downgrade(&manager),
            Duration::from_millis(20),
            CheckpointLevel::Indirect,
        )
        .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while metrics.snapshot().checkpoints < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        checkpointer.stop().unwrap();
        assert!(metrics.snapshot().checkpoints >= 2);
        let after_stop = metrics.snapshot().checkpoints;
        thread::sleep(Duration::from_millis(60));
        assert_eq!(metrics.snapshot().checkpoints, after_stop);
    }
}
