//! Log file naming, headers and positioned frame reads
//!
//! Log files are `aria_log.NNNNNNNN` (eight decimal digits). Each starts
//! with a fixed 64-byte header:
//! - Magic `ARIALOG\0` (8)
//! - Format version (u16 LE), reserved (u16)
//! - File number (u32 LE)
//! - Engine UUID (16), the same UUID the control file carries
//! - Creation time, unix seconds (i64 LE)
//! - Header CRC (u32 LE) over the preceding 40 bytes

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use super::checksum::compute_checksum;
use super::errors::{WalError, WalResult};
use super::record::{decode_frame, WalRecord, MIN_FRAME_SIZE};
use crate::lsn::Lsn;

pub const LOG_HEADER_SIZE: u32 = 64;
pub const LOG_MAGIC: &[u8; 8] = b"ARIALOG\0";
pub const LOG_FORMAT_VERSION: u16 = 1;
const FILE_PREFIX: &str = "aria_log.";

pub fn file_name(file_no: u32) -> String {
    format!("{}{:08}", FILE_PREFIX, file_no)
}

pub fn file_path(dir: &Path, file_no: u32) -> PathBuf {
    dir.join(file_name(file_no))
}

/// Parse a log file name back into its number
pub fn parse_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(FILE_PREFIX)?;
    if digits.len() != 8 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Sorted numbers of every log file in `dir`
pub fn list_files(dir: &Path) -> io::Result<Vec<u32>> {
    let mut numbers = Vec::new();
    if !dir.exists() {
        return Ok(numbers);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(no) = entry.file_name().to_str().and_then(parse_file_name) {
            numbers.push(no);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// fsync a directory so renames and unlinks inside it are durable
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileHeader {
    pub version: u16,
    pub file_no: u32,
    pub uuid: Uuid,
    pub created_at: DateTime<Utc>,
}

impl LogFileHeader {
    pub fn new(file_no: u32, uuid: Uuid) -> Self {
        Self {
            version: LOG_FORMAT_VERSION,
            file_no,
            uuid,
            created_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> [u8; LOG_HEADER_SIZE as usize] {
        let mut buf = [0u8; LOG_HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(LOG_MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.file_no.to_le_bytes());
        buf[16..32].copy_from_slice(self.uuid.as_bytes());
        buf[32..40].copy_from_slice(&self.created_at.timestamp().to_le_bytes());
        let crc = compute_checksum(&buf[0..40]);
        buf[40..44].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(file_no: u32, buf: &[u8]) -> WalResult<Self> {
        if buf.len() < LOG_HEADER_SIZE as usize {
            return Err(WalError::mismatch(file_no, "log file header is truncated"));
        }
        if &buf[0..8] != LOG_MAGIC {
            return Err(WalError::mismatch(file_no, "bad log file magic"));
        }
        let stored_crc = u32::from_le_bytes([buf[40], buf[41], buf[42], buf[43]]);
        if compute_checksum(&buf[0..40]) != stored_crc {
            return Err(WalError::mismatch(file_no, "log file header checksum mismatch"));
        }
        let version = u16::from_le_bytes([buf[8], buf[9]]);
        if version != LOG_FORMAT_VERSION {
            return Err(WalError::mismatch(
                file_no,
                format!("unsupported log format version {}", version),
            ));
        }
        let stored_no = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        if stored_no != file_no {
            return Err(WalError::mismatch(
                file_no,
                format!("header names file {} instead", stored_no),
            ));
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[16..32]);
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&buf[32..40]);
        let created_at = Utc
            .timestamp_opt(i64::from_le_bytes(secs), 0)
            .single()
            .unwrap_or_default();
        Ok(Self {
            version,
            file_no,
            uuid: Uuid::from_bytes(uuid),
            created_at,
        })
    }
}

/// Outcome of reading the frame that should start at some LSN
#[derive(Debug)]
pub enum FrameRead {
    Record(WalRecord),
    /// Clean end: EOF or a zero length field
    End,
    /// The frame runs past the end of the file
    Torn(String),
    /// The frame is complete on disk but fails validation
    Corrupt { reason: String, frame_end: u64 },
}

/// One open log file
#[derive(Debug)]
pub struct LogFile {
    pub file_no: u32,
    pub path: PathBuf,
    pub file: File,
}

impl LogFile {
    /// Create a new log file and make its header and directory entry durable
    pub fn create(dir: &Path, file_no: u32, uuid: Uuid) -> WalResult<LogFile> {
        let path = file_path(dir, file_no);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| WalError::io_error(format!("cannot create {}", path.display()), e))?;
        let header = LogFileHeader::new(file_no, uuid).encode();
        file.write_all_at(&header, 0)
            .map_err(|e| WalError::io_error("cannot write log file header", e))?;
        file.sync_all().map_err(|e| WalError::fsync_failed(file_no, e))?;
        sync_dir(dir).map_err(|e| WalError::fsync_failed(file_no, e))?;
        Ok(LogFile { file_no, path, file })
    }

    /// Open an existing log file and validate its header
    pub fn open(dir: &Path, file_no: u32, writable: bool) -> WalResult<(LogFile, LogFileHeader)> {
        let path = file_path(dir, file_no);
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .map_err(|e| WalError::io_error(format!("cannot open {}", path.display()), e))?;
        let mut buf = [0u8; LOG_HEADER_SIZE as usize];
        file.read_exact_at(&mut buf, 0)
            .map_err(|_| WalError::mismatch(file_no, "log file shorter than its header"))?;
        let header = LogFileHeader::decode(file_no, &buf)?;
        Ok((LogFile { file_no, path, file }, header))
    }

    pub fn len(&self) -> WalResult<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| WalError::io_error("cannot stat log file", e))
    }

    /// Read the frame starting at `lsn`, classifying what is found there
    pub fn read_frame(&self, lsn: Lsn, file_len: u64) -> WalResult<FrameRead> {
        let pos = lsn.offset() as u64;
        if pos >= file_len {
            return Ok(FrameRead::End);
        }
        let available = file_len - pos;
        if available < 4 {
            let mut tail = vec![0u8; available as usize];
            self.read_at(&mut tail, pos)?;
            if tail.iter().all(|b| *b == 0) {
                return Ok(FrameRead::End);
            }
            return Ok(FrameRead::Torn("partial length field".to_string()));
        }
        let mut len_buf = [0u8; 4];
        self.read_at(&mut len_buf, pos)?;
        let len = u32::from_le_bytes(len_buf) as u64;
        if len == 0 {
            return Ok(FrameRead::End);
        }
        if len < MIN_FRAME_SIZE as u64 {
            return Ok(FrameRead::Corrupt {
                reason: format!("record length {} below minimum", len),
                frame_end: pos + 4,
            });
        }
        if len > available {
            return Ok(FrameRead::Torn(format!(
                "record of {} bytes extends past end of file",
                len
            )));
        }
        let mut frame = vec![0u8; len as usize];
        self.read_at(&mut frame, pos)?;
        match decode_frame(lsn, &frame) {
            Ok(record) => Ok(FrameRead::Record(record)),
            Err(reason) => Ok(FrameRead::Corrupt {
                reason,
                frame_end: pos + len,
            }),
        }
    }

    fn read_at(&self, buf: &mut [u8], pos: u64) -> WalResult<()> {
        self.file
            .read_exact_at(buf, pos)
            .map_err(|e| WalError::io_error(format!("read of {} failed", self.path.display()), e))
    }
}
