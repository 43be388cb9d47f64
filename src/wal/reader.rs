//! Random access and sequential reads of the log
//!
//! `Wal::read_record` serves single LSNs for undo chains. `WalScanner`
//! walks forward across file boundaries for recovery and the log tools;
//! it works on a directory alone, without a live `Wal`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use super::errors::{WalError, WalResult};
use super::file::{self, FrameRead, LogFile, LOG_HEADER_SIZE};
use super::record::WalRecord;
use super::writer::Wal;
use crate::lsn::Lsn;

impl Wal {
    /// Read the record starting at `lsn`.
    ///
    /// Fails with `ARIA_LOG_LSN_NOT_FOUND` when the LSN lies in a purged
    /// file or at or beyond the log end.
    pub fn read_record(&self, lsn: Lsn) -> WalResult<WalRecord> {
        if lsn.file_no() < self.first_file_no() {
            return Err(WalError::lsn_not_found(lsn, "log file already purged"));
        }
        if lsn >= self.horizon() {
            return Err(WalError::lsn_not_found(lsn, "LSN beyond end of log"));
        }
        if lsn.offset() < LOG_HEADER_SIZE {
            return Err(WalError::lsn_not_found(lsn, "LSN points into a file header"));
        }
        let log_file = self.file_for_read(lsn.file_no())?;
        let len = log_file.len()?;
        match log_file.read_frame(lsn, len)? {
            FrameRead::Record(record) => Ok(record),
            FrameRead::End => Err(WalError::lsn_not_found(lsn, "no record at this LSN")),
            FrameRead::Torn(reason) | FrameRead::Corrupt { reason, .. } => {
                if Self::lands_on(&log_file, lsn, len)? {
                    Err(WalError::corruption_at(lsn, reason))
                } else {
                    Err(WalError::lsn_not_found(lsn, "LSN is not the start of a record"))
                }
            }
        }
    }

    /// Whether walking the file from its first record lands on `lsn`. A
    /// walk that hits damage before getting there cannot tell and counts
    /// as landing, so the damage is reported.
    fn lands_on(log_file: &LogFile, lsn: Lsn, len: u64) -> WalResult<bool> {
        let mut pos = Lsn::new(lsn.file_no(), LOG_HEADER_SIZE);
        while pos < lsn {
            match log_file.read_frame(pos, len)? {
                FrameRead::Record(record) => pos = record.next_lsn(),
                _ => return Ok(true),
            }
        }
        Ok(pos == lsn)
    }

    /// Scanner over this log starting at `from`
    pub fn scan_from(&self, from: Lsn) -> WalResult<WalScanner> {
        let mut scanner = WalScanner::open(self.dir(), from, Some(self.uuid()))?;
        scanner.end = Some(self.horizon());
        Ok(scanner)
    }
}

/// Forward iterator over log records
pub struct WalScanner {
    dir: PathBuf,
    uuid: Option<Uuid>,
    files: Vec<u32>,
    pos: Lsn,
    current: Option<(Arc<LogFile>, u64)>,
    end: Option<Lsn>,
    torn_tail: Option<(Lsn, String)>,
}

impl WalScanner {
    /// Start scanning at `from`; `Lsn::IMPOSSIBLE` or any LSN before the
    /// first file starts at the first record on disk. When `uuid` is given
    /// every file's header must carry it.
    pub fn open(dir: &Path, from: Lsn, uuid: Option<Uuid>) -> WalResult<WalScanner> {
        let files = file::list_files(dir)
            .map_err(|e| WalError::io_error("cannot list log directory", e))?;
        let pos = match files.first() {
            Some(&first) if from.is_impossible() || from.file_no() < first => {
                if !from.is_impossible() {
                    return Err(WalError::lsn_not_found(from, "log file already purged"));
                }
                Lsn::new(first, LOG_HEADER_SIZE)
            }
            Some(_) => {
                if from.offset() < LOG_HEADER_SIZE {
                    Lsn::new(from.file_no(), LOG_HEADER_SIZE)
                } else {
                    from
                }
            }
            None => from,
        };
        Ok(WalScanner {
            dir: dir.to_path_buf(),
            uuid,
            files,
            pos,
            current: None,
            end: None,
            torn_tail: None,
        })
    }

    /// Stop before `end` (exclusive)
    pub fn with_end(mut self, end: Lsn) -> Self {
        self.end = Some(end);
        self
    }

    /// LSN of the next record to be returned
    pub fn position(&self) -> Lsn {
        self.pos
    }

    /// Set when the scan ended on an incomplete or corrupt final record
    pub fn torn_tail(&self) -> Option<&(Lsn, String)> {
        self.torn_tail.as_ref()
    }

    fn is_last_file(&self, file_no: u32) -> bool {
        self.files.last().map_or(true, |&last| file_no >= last)
    }

    fn open_current(&mut self) -> WalResult<Option<(Arc<LogFile>, u64)>> {
        if let Some((ref f, len)) = self.current {
            if f.file_no == self.pos.file_no() {
                return Ok(Some((Arc::clone(f), len)));
            }
        }
        if !self.files.contains(&self.pos.file_no()) {
            return Ok(None);
        }
        let (log_file, header) = LogFile::open(&self.dir, self.pos.file_no(), false)?;
        if let Some(uuid) = self.uuid {
            if header.uuid != uuid {
                return Err(WalError::mismatch(
                    log_file.file_no,
                    "log file belongs to another engine",
                ));
            }
        }
        let len = log_file.len()?;
        let handle = Arc::new(log_file);
        self.current = Some((Arc::clone(&handle), len));
        Ok(Some((handle, len)))
    }

    /// Next record, `None` at the end of the log.
    ///
    /// A corrupt record followed by more data is an error. A damaged
    /// record at the very end of the last file ends the scan and is
    /// reported through `torn_tail`.
    pub fn next_record(&mut self) -> WalResult<Option<WalRecord>> {
        loop {
            if let Some(end) = self.end {
                if self.pos >= end {
                    return Ok(None);
                }
            }
            let (log_file, len) = match self.open_current()? {
                Some(current) => current,
                None => return Ok(None),
            };
            match log_file.read_frame(self.pos, len)? {
                FrameRead::Record(record) => {
                    self.pos = record.next_lsn();
                    return Ok(Some(record));
                }
                FrameRead::End => {
                    if self.is_last_file(self.pos.file_no()) {
                        return Ok(None);
                    }
                    self.pos = Lsn::new(self.pos.file_no() + 1, LOG_HEADER_SIZE);
                }
                FrameRead::Torn(reason) => {
                    if self.is_last_file(self.pos.file_no()) {
                        self.torn_tail = Some((self.pos, reason));
                        return Ok(None);
                    }
                    return Err(WalError::corruption_at(self.pos, reason));
                }
                FrameRead::Corrupt { reason, frame_end } => {
                    if self.is_last_file(self.pos.file_no()) && frame_end >= len {
                        self.torn_tail = Some((self.pos, reason));
                        return Ok(None);
                    }
                    return Err(WalError::corruption_at(self.pos, reason));
                }
            }
        }
    }

    /// Skip the record at the current position after a corruption error,
    /// for tools that want to keep going. Returns false when the frame
    /// length itself is unusable.
    pub fn skip_damaged(&mut self) -> WalResult<bool> {
        let (log_file, len) = match self.open_current()? {
            Some(current) => current,
            None => return Ok(false),
        };
        match log_file.read_frame(self.pos, len)? {
            FrameRead::Corrupt { frame_end, .. } if frame_end > self.pos.offset() as u64 + 4 => {
                self.pos = Lsn::new(self.pos.file_no(), frame_end as u32);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Iterator for WalScanner {
    type Item = WalResult<WalRecord>;

    /// Iteration stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.end = Some(self.pos);
                Some(Err(e))
            }
        }
    }
}
