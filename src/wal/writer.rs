//! The shared transaction log handle
//!
//! Appending is two-phase. A short critical section reserves space and
//! assigns the LSN; the bytes are then copied with a positioned write
//! outside the lock, so concurrent appenders only serialize on the
//! reservation. `flush` waits until every reservation at or below the
//! requested LSN has been copied before it fsyncs, so the durable horizon
//! never covers a hole.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use super::errors::{WalError, WalResult};
use super::file::{self, FrameRead, LogFile, LOG_HEADER_SIZE};
use super::record::{encode_frame, seal_frame, RecordType};
use crate::crash_point::{maybe_crash, points};
use crate::lsn::Lsn;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::trn::TrnId;

#[derive(Debug, Clone)]
pub struct WalOptions {
    pub dir: PathBuf,
    /// Rotation limit for one log file
    pub max_file_size: u32,
    /// fsync on flush; tests of pure ordering may turn it off
    pub sync: bool,
    /// Identity shared with the control file; existing files must match
    pub uuid: Uuid,
    /// Number for the first file of a brand new log
    pub start_file_no: u32,
    /// Truncate a corrupt record in the last file even when data follows it
    pub tolerate_corrupt_tail: bool,
    /// Files from this number on may end in a record written after the last
    /// checkpoint; open checks their tails, not only the last file's
    pub verify_from_file_no: u32,
}

impl WalOptions {
    pub fn new(dir: impl Into<PathBuf>, uuid: Uuid) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 1 << 30,
            sync: true,
            uuid,
            start_file_no: 1,
            tolerate_corrupt_tail: false,
            verify_from_file_no: 1,
        }
    }
}

struct LogState {
    /// Next LSN to hand out
    horizon: Lsn,
    current: Arc<LogFile>,
    /// Files opened for writing since open; older files are opened on demand
    files: BTreeMap<u32, Arc<LogFile>>,
    first_file_no: u32,
    /// Reserved but not yet copied records
    in_flight: BTreeSet<u64>,
    /// Checkpoint-imposed lower bound for purging
    purge_floor: Option<Lsn>,
}

pub struct Wal {
    dir: PathBuf,
    max_file_size: u32,
    sync: bool,
    uuid: Uuid,
    state: Mutex<LogState>,
    copied: Condvar,
    flush_lock: Mutex<()>,
    /// Every record starting below this LSN is durable
    flushed: AtomicU64,
    failed: AtomicBool,
    metrics: Arc<MetricsRegistry>,
}

impl Wal {
    /// Open the log in `options.dir`, creating the first file if the
    /// directory holds none. A torn tail in the last file is truncated.
    pub fn open(options: WalOptions, metrics: Arc<MetricsRegistry>) -> WalResult<Wal> {
        fs::create_dir_all(&options.dir).map_err(|e| {
            WalError::io_error(format!("cannot create {}", options.dir.display()), e)
        })?;
        let numbers = file::list_files(&options.dir)
            .map_err(|e| WalError::io_error("cannot list log directory", e))?;

        let (first_file_no, current, horizon) = match (numbers.first(), numbers.last()) {
            (Some(&first), Some(&last)) => {
                for pair in numbers.windows(2) {
                    if pair[1] != pair[0] + 1 {
                        return Err(WalError::mismatch(
                            pair[0] + 1,
                            "log file missing from the middle of the sequence",
                        ));
                    }
                }
                for file_no in options.verify_from_file_no.max(first)..last {
                    let (older, header) = LogFile::open(&options.dir, file_no, true)?;
                    if header.uuid != options.uuid {
                        return Err(WalError::mismatch(file_no, "log file belongs to another engine"));
                    }
                    Self::trim_older(&older, options.tolerate_corrupt_tail)?;
                }
                let (log_file, header) = LogFile::open(&options.dir, last, true)?;
                if header.uuid != options.uuid {
                    return Err(WalError::mismatch(last, "log file belongs to another engine"));
                }
                let horizon = Self::find_end(&log_file, options.tolerate_corrupt_tail)?;
                (first, log_file, horizon)
            }
            _ => {
                let file_no = options.start_file_no.max(1);
                let log_file = LogFile::create(&options.dir, file_no, options.uuid)?;
                (file_no, log_file, Lsn::new(file_no, LOG_HEADER_SIZE))
            }
        };

        let current = Arc::new(current);
        let mut files = BTreeMap::new();
        files.insert(current.file_no, Arc::clone(&current));

        log_event_with_fields(
            Event::LogOpen,
            &[
                ("dir", &options.dir.display().to_string()),
                ("first_file_no", &first_file_no.to_string()),
                ("horizon", &horizon.to_string()),
            ],
        );

        Ok(Wal {
            dir: options.dir,
            max_file_size: options.max_file_size,
            sync: options.sync,
            uuid: options.uuid,
            state: Mutex::new(LogState {
                horizon,
                current,
                files,
                first_file_no,
                in_flight: BTreeSet::new(),
                purge_floor: None,
            }),
            copied: Condvar::new(),
            flush_lock: Mutex::new(()),
            flushed: AtomicU64::new(horizon.raw()),
            failed: AtomicBool::new(false),
            metrics,
        })
    }

    /// Walk the last file to the end of its valid records and cut off
    /// anything after it.
    fn find_end(log_file: &LogFile, tolerate_corrupt: bool) -> WalResult<Lsn> {
        let len = log_file.len()?;
        let mut pos = Lsn::new(log_file.file_no, LOG_HEADER_SIZE);
        let mut reason = None;
        loop {
            match log_file.read_frame(pos, len)? {
                FrameRead::Record(record) => pos = record.next_lsn(),
                FrameRead::End => break,
                FrameRead::Torn(why) => {
                    reason = Some(why);
                    break;
                }
                FrameRead::Corrupt { reason: why, frame_end } => {
                    if frame_end < len && !tolerate_corrupt {
                        return Err(WalError::corruption_at(pos, why));
                    }
                    reason = Some(why);
                    break;
                }
            }
        }
        if (pos.offset() as u64) < len {
            Self::truncate_at(log_file, pos, len, reason.as_deref().unwrap_or("unused space"))?;
        }
        Ok(pos)
    }

    /// Walk a file that is no longer the last one. Its final record may
    /// have been only partly written when the process died after rotating;
    /// such a record is cut off. Damage followed by more records is an
    /// error, and a zero hole is left for the reader to skip.
    fn trim_older(log_file: &LogFile, tolerate_corrupt: bool) -> WalResult<()> {
        let len = log_file.len()?;
        let mut pos = Lsn::new(log_file.file_no, LOG_HEADER_SIZE);
        loop {
            match log_file.read_frame(pos, len)? {
                FrameRead::Record(record) => pos = record.next_lsn(),
                FrameRead::End => return Ok(()),
                FrameRead::Torn(why) => return Self::truncate_at(log_file, pos, len, &why),
                FrameRead::Corrupt { reason, frame_end } => {
                    if frame_end < len && !tolerate_corrupt {
                        return Err(WalError::corruption_at(pos, reason));
                    }
                    return Self::truncate_at(log_file, pos, len, &reason);
                }
            }
        }
    }

    fn truncate_at(log_file: &LogFile, pos: Lsn, len: u64, reason: &str) -> WalResult<()> {
        let dropped = len - pos.offset() as u64;
        log_file
            .file
            .set_len(pos.offset() as u64)
            .map_err(|e| WalError::io_error("cannot truncate torn log tail", e))?;
        log_file
            .file
            .sync_all()
            .map_err(|e| WalError::fsync_failed(log_file.file_no, e))?;
        log_event_with_fields(
            Event::LogTornTail,
            &[
                ("lsn", &pos.to_string()),
                ("bytes_dropped", &dropped.to_string()),
                ("reason", reason),
            ],
        );
        Ok(())
    }

    /// Append one record built from `parts` and return its LSN.
    ///
    /// The record is in the OS page cache when this returns; call `flush`
    /// for durability.
    pub fn write_record(&self, record_type: RecordType, trn: TrnId, parts: &[&[u8]]) -> WalResult<Lsn> {
        if self.failed.load(Ordering::Acquire) {
            return Err(WalError::log_failed());
        }
        maybe_crash(points::LOG_BEFORE_APPEND);

        let mut frame = encode_frame(record_type, 0, trn, parts);
        let len = frame.len();
        if len as u64 > (self.max_file_size - LOG_HEADER_SIZE) as u64 {
            return Err(WalError::record_too_large(len, self.max_file_size));
        }
        let len = len as u32;

        let (lsn, target) = {
            let mut state = self.state.lock();
            if state.horizon.offset() as u64 + len as u64 > self.max_file_size as u64 {
                self.rotate(&mut state)?;
            }
            let lsn = state.horizon;
            state.horizon = lsn.advance(len);
            state.in_flight.insert(lsn.raw());
            (lsn, Arc::clone(&state.current))
        };

        seal_frame(&mut frame, lsn);
        let result = target.file.write_all_at(&frame, lsn.offset() as u64);

        {
            let mut state = self.state.lock();
            state.in_flight.remove(&lsn.raw());
        }
        self.copied.notify_all();

        if let Err(e) = result {
            self.failed.store(true, Ordering::Release);
            return Err(WalError::io_error(format!("append at {} failed", lsn), e));
        }

        self.metrics.increment_log_records();
        self.metrics.add_log_bytes(len as u64);
        maybe_crash(points::LOG_AFTER_APPEND);
        Ok(lsn)
    }

    /// Switch to a new log file. Called with the state lock held.
    fn rotate(&self, state: &mut LogState) -> WalResult<()> {
        let next = state.current.file_no + 1;
        let log_file = Arc::new(LogFile::create(&self.dir, next, self.uuid)?);
        state.files.insert(next, Arc::clone(&log_file));
        state.current = log_file;
        state.horizon = Lsn::new(next, LOG_HEADER_SIZE);
        log_event_with_fields(Event::LogRotate, &[("file_no", &next.to_string())]);
        maybe_crash(points::LOG_AFTER_ROTATE);
        Ok(())
    }

    /// Make every record starting at or below `lsn` durable
    pub fn flush(&self, lsn: Lsn) -> WalResult<()> {
        self.flush_below(Lsn::from_raw(lsn.raw().saturating_add(1)))
    }

    /// Make every record appended so far durable
    pub fn flush_all(&self) -> WalResult<()> {
        let horizon = self.horizon();
        self.flush_below(horizon)
    }

    fn flush_below(&self, bound: Lsn) -> WalResult<()> {
        if bound.raw() <= self.flushed.load(Ordering::Acquire) {
            return Ok(());
        }
        let _flusher = self.flush_lock.lock();
        if bound.raw() <= self.flushed.load(Ordering::Acquire) {
            return Ok(());
        }

        let (target, files) = {
            let mut state = self.state.lock();
            while state
                .in_flight
                .iter()
                .next()
                .map_or(false, |&first| first < bound.raw())
            {
                self.copied.wait(&mut state);
            }
            let target = match state.in_flight.iter().next() {
                Some(&first) => Lsn::from_raw(first),
                None => state.horizon,
            };
            let from = Lsn::from_raw(self.flushed.load(Ordering::Acquire)).file_no();
            let files: Vec<Arc<LogFile>> = state
                .files
                .range(from..=target.file_no())
                .map(|(_, f)| Arc::clone(f))
                .collect();
            (target, files)
        };

        maybe_crash(points::LOG_BEFORE_FLUSH);
        if self.sync {
            for log_file in &files {
                if let Err(e) = log_file.file.sync_data() {
                    self.failed.store(true, Ordering::Release);
                    return Err(WalError::fsync_failed(log_file.file_no, e));
                }
            }
        }
        self.flushed.fetch_max(target.raw(), Ordering::AcqRel);
        self.metrics.increment_log_flushes();
        maybe_crash(points::LOG_AFTER_FLUSH);
        Ok(())
    }

    /// True once the record at `lsn` is durable
    pub fn is_durable(&self, lsn: Lsn) -> bool {
        lsn.raw() < self.flushed.load(Ordering::Acquire)
    }

    /// Exclusive durable bound: records starting below it are on disk
    pub fn flushed_lsn(&self) -> Lsn {
        Lsn::from_raw(self.flushed.load(Ordering::Acquire))
    }

    /// LSN the next record will get (modulo rotation)
    pub fn horizon(&self) -> Lsn {
        self.state.lock().horizon
    }

    pub fn current_file_no(&self) -> u32 {
        self.state.lock().current.file_no
    }

    /// Earliest LSN still on disk, or `Lsn::IMPOSSIBLE` for an empty log
    pub fn first_lsn_in_log(&self) -> Lsn {
        let state = self.state.lock();
        let first = Lsn::new(state.first_file_no, LOG_HEADER_SIZE);
        if first >= state.horizon {
            Lsn::IMPOSSIBLE
        } else {
            first
        }
    }

    pub fn first_file_no(&self) -> u32 {
        self.state.lock().first_file_no
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn max_file_size(&self) -> u32 {
        self.max_file_size
    }

    /// Raise the lowest LSN purge may reach. The floor never moves back.
    pub fn set_purge_floor(&self, lsn: Lsn) {
        let mut state = self.state.lock();
        state.purge_floor = Some(match state.purge_floor {
            Some(existing) => existing.max(lsn),
            None => lsn,
        });
    }

    pub fn purge_floor(&self) -> Option<Lsn> {
        self.state.lock().purge_floor
    }

    /// Delete log files whose records all lie below `up_to_lsn`.
    ///
    /// The active file is never deleted, and `up_to_lsn` is clamped to the
    /// purge floor. Returns the number of files removed.
    pub fn purge(&self, up_to_lsn: Lsn) -> WalResult<usize> {
        let doomed: Vec<(u32, Option<Arc<LogFile>>)> = {
            let mut state = self.state.lock();
            let limit = match state.purge_floor {
                Some(floor) => up_to_lsn.min(floor),
                None => up_to_lsn,
            };
            let stop = limit.file_no().min(state.current.file_no);
            let mut doomed = Vec::new();
            while state.first_file_no < stop {
                let file_no = state.first_file_no;
                doomed.push((file_no, state.files.remove(&file_no)));
                state.first_file_no += 1;
            }
            doomed
        };
        if doomed.is_empty() {
            return Ok(0);
        }

        maybe_crash(points::LOG_BEFORE_PURGE);
        for (file_no, _handle) in &doomed {
            let path = file::file_path(&self.dir, *file_no);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(WalError::io_error(format!("cannot remove {}", path.display()), e))
                }
            }
        }
        file::sync_dir(&self.dir).map_err(|e| WalError::io_error("cannot sync log directory", e))?;

        let removed = doomed.len();
        self.metrics.add_log_files_purged(removed as u64);
        log_event_with_fields(
            Event::LogPurge,
            &[
                ("files", &removed.to_string()),
                ("up_to", &up_to_lsn.to_string()),
            ],
        );
        Ok(removed)
    }

    /// Handle for reading `file_no`, shared with writers when it is open
    pub(crate) fn file_for_read(&self, file_no: u32) -> WalResult<Arc<LogFile>> {
        {
            let state = self.state.lock();
            if let Some(f) = state.files.get(&file_no) {
                return Ok(Arc::clone(f));
            }
        }
        let (log_file, header) = LogFile::open(&self.dir, file_no, false)?;
        if header.uuid != self.uuid {
            return Err(WalError::mismatch(file_no, "log file belongs to another engine"));
        }
        Ok(Arc::new(log_file))
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("dir", &self.dir)
            .field("flushed", &self.flushed_lsn())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn open_small(dir: &Path, uuid: Uuid) -> Wal {
        let mut options = WalOptions::new(dir, uuid);
        options.max_file_size = 4096;
        Wal::open(options, Arc::new(MetricsRegistry::new())).unwrap()
    }

    #[test]
    fn test_lsns_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let wal = open_small(dir.path(), Uuid::new_v4());
        let mut last = Lsn::IMPOSSIBLE;
        for i in 0..200u32 {
            let lsn = wal
                .write_record(RecordType::Commit, TrnId::new(i as u64 + 1), &[&i.to_le_bytes()])
                .unwrap();
            assert!(lsn > last);
            last = lsn;
        }
        assert!(wal.current_file_no() > 1, "small files must rotate");
    }

    #[test]
    fn test_flush_moves_durable_horizon() {
        let dir = TempDir::new().unwrap();
        let wal = open_small(dir.path(), Uuid::new_v4());
        let lsn = wal.write_record(RecordType::Commit, TrnId::new(1), &[]).unwrap();
        assert!(!wal.is_durable(lsn));
        wal.flush(lsn).unwrap();
        assert!(wal.is_durable(lsn));
    }

    #[test]
    fn test_reopen_continues_after_last_record() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::new_v4();
        let horizon = {
            let wal = open_small(dir.path(), uuid);
            for _ in 0..10 {
                wal.write_record(RecordType::Abort, TrnId::new(9), &[b"x"]).unwrap();
            }
            wal.flush_all().unwrap();
            wal.horizon()
        };
        let wal = open_small(dir.path(), uuid);
        assert_eq!(wal.horizon(), horizon);
        assert!(wal.is_durable(Lsn::from_raw(horizon.raw() - 1)));
    }

    #[test]
    fn test_foreign_log_rejected() {
        let dir = TempDir::new().unwrap();
        open_small(dir.path(), Uuid::new_v4());
        let mut options = WalOptions::new(dir.path(), Uuid::new_v4());
        options.max_file_size = 4096;
        assert!(Wal::open(options, Arc::new(MetricsRegistry::new())).is_err());
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::new_v4();
        let good_end = {
            let wal = open_small(dir.path(), uuid);
            wal.write_record(RecordType::Commit, TrnId::new(1), &[b"kept"]).unwrap();
            wal.flush_all().unwrap();
            wal.horizon()
        };
        // Half a record: a length field promising more than is there
        let path = file::file_path(dir.path(), 1);
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&200u32.to_le_bytes());
        bytes.extend_from_slice(&[7u8; 20]);
        fs::write(&path, &bytes).unwrap();

        let wal = open_small(dir.path(), uuid);
        assert_eq!(wal.horizon(), good_end);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_end.offset() as u64);
    }

    /// The last record of an older file was only partly written when the
    /// process died after rotating. Open cuts it off and the log reads on
    /// into the next file.
    #[test]
    fn test_torn_tail_of_older_file_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::new_v4();
        let body = [3u8; 500];
        let lsns: Vec<Lsn> = {
            let wal = open_small(dir.path(), uuid);
            let lsns = (0..12)
                .map(|i| wal.write_record(RecordType::Commit, TrnId::new(i + 1), &[&body]).unwrap())
                .collect();
            wal.flush_all().unwrap();
            lsns
        };
        let torn = *lsns.iter().filter(|l| l.file_no() == 1).last().unwrap();
        assert!(lsns.last().unwrap().file_no() > 1);
        let path = file::file_path(dir.path(), 1);
        fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(torn.offset() as u64 + 100)
            .unwrap();

        let wal = open_small(dir.path(), uuid);
        assert_eq!(fs::metadata(&path).unwrap().len(), torn.offset() as u64);
        let mut scanner = wal.scan_from(wal.first_lsn_in_log()).unwrap();
        let mut seen = Vec::new();
        while let Some(record) = scanner.next_record().unwrap() {
            seen.push(record.lsn);
        }
        let expected: Vec<Lsn> = lsns.iter().copied().filter(|l| *l != torn).collect();
        assert_eq!(seen, expected);
    }

    /// Damage in an older file that more records follow is not a torn tail
    #[test]
    fn test_corruption_inside_older_file_refuses_open() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::new_v4();
        let body = [3u8; 500];
        let first = {
            let wal = open_small(dir.path(), uuid);
            let first = wal.write_record(RecordType::Commit, TrnId::new(1), &[&body]).unwrap();
            for i in 0..11 {
                wal.write_record(RecordType::Commit, TrnId::new(i + 2), &[&body]).unwrap();
            }
            wal.flush_all().unwrap();
            first
        };
        let path = file::file_path(dir.path(), 1);
        let mut bytes = fs::read(&path).unwrap();
        bytes[first.offset() as usize + 40] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let mut options = WalOptions::new(dir.path(), uuid);
        options.max_file_size = 4096;
        assert!(Wal::open(options, Arc::new(MetricsRegistry::new())).is_err());
    }

    #[test]
    fn test_mid_file_corruption_refuses_open() {
        let dir = TempDir::new().unwrap();
        let uuid = Uuid::new_v4();
        let first = {
            let wal = open_small(dir.path(), uuid);
            let first = wal.write_record(RecordType::Commit, TrnId::new(1), &[b"one"]).unwrap();
            wal.write_record(RecordType::Commit, TrnId::new(2), &[b"two"]).unwrap();
            wal.flush_all().unwrap();
            first
        };
        let path = file::file_path(dir.path(), 1);
        let mut bytes = fs::read(&path).unwrap();
        bytes[first.offset() as usize + 15] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let mut options = WalOptions::new(dir.path(), uuid);
        options.max_file_size = 4096;
        assert!(Wal::open(options.clone(), Arc::new(MetricsRegistry::new())).is_err());

        options.tolerate_corrupt_tail = true;
        let wal = Wal::open(options, Arc::new(MetricsRegistry::new())).unwrap();
        assert_eq!(wal.horizon(), first);
    }

    #[test]
    fn test_concurrent_appenders_get_unique_lsns() {
        let dir = TempDir::new().unwrap();
        let wal = Arc::new(open_small(dir.path(), Uuid::new_v4()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let wal = Arc::clone(&wal);
                thread::spawn(move || {
                    (0..100)
                        .map(|i| {
                            wal.write_record(
                                RecordType::Commit,
                                TrnId::new(t * 1000 + i + 1),
                                &[&[t as u8; 16]],
                            )
                            .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<Lsn> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let count = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), count);
        wal.flush_all().unwrap();
        assert!(wal.is_durable(*all.last().unwrap()));
    }

    #[test]
    fn test_purge_respects_floor_and_active_file() {
        let dir = TempDir::new().unwrap();
        let wal = open_small(dir.path(), Uuid::new_v4());
        let mut lsns = Vec::new();
        for i in 0..300u32 {
            lsns.push(
                wal.write_record(RecordType::Commit, TrnId::new(1), &[&i.to_le_bytes(), &[0u8; 60]])
                    .unwrap(),
            );
        }
        let current = wal.current_file_no();
        assert!(current >= 3);

        wal.set_purge_floor(lsns[0]);
        assert_eq!(wal.purge(Lsn::MAX).unwrap(), 0);

        wal.set_purge_floor(Lsn::MAX);
        wal.purge(Lsn::MAX).unwrap();
        assert_eq!(wal.first_file_no(), current);
        assert_eq!(file::list_files(dir.path()).unwrap(), vec![current]);
    }

    #[test]
    fn test_first_lsn_of_empty_log_is_sentinel() {
        let dir = TempDir::new().unwrap();
        let wal = open_small(dir.path(), Uuid::new_v4());
        assert_eq!(wal.first_lsn_in_log(), Lsn::IMPOSSIBLE);
        let lsn = wal.write_record(RecordType::Commit, TrnId::new(1), &[]).unwrap();
        assert_eq!(wal.first_lsn_in_log(), lsn);
    }
}
