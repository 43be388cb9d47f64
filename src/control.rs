//! The control file
//!
//! `aria_log_control` in the data directory records where recovery starts.
//! Fixed binary layout, little-endian:
//!
//! ```text
//! 0   magic "ARIACTL\0"
//! 8   version u16, reserved u16
//! 12  engine uuid (16)
//! 28  LSN of the last checkpoint record (u64)
//! 36  checkpoint LSN: the oldest LSN recovery needs (u64)
//! 44  last log file number (u32)
//! 48  max transaction id (u64)
//! 56  updated at, unix millis (i64)
//! 64  CRC32 of bytes 0..64
//! ```
//!
//! The file is replaced atomically: write a temp file, fsync it, rename it
//! over the old one, fsync the directory.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::lsn::Lsn;
use crate::observability::Severity;
use crate::trn::TrnId;
use crate::wal::sync_dir;

pub const CONTROL_FILE_NAME: &str = "aria_log_control";
pub const CONTROL_MAGIC: &[u8; 8] = b"ARIACTL\0";
pub const CONTROL_VERSION: u16 = 1;
pub const CONTROL_FILE_SIZE: usize = 68;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFile {
    pub uuid: Uuid,
    /// Where the last checkpoint record sits; `IMPOSSIBLE` before the first
    pub checkpoint_record_lsn: Lsn,
    /// Oldest LSN recovery still needs
    pub checkpoint_lsn: Lsn,
    pub last_log_file_no: u32,
    pub max_trid: TrnId,
    pub updated_at: DateTime<Utc>,
}

impl ControlFile {
    /// Control file for a fresh database
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            checkpoint_record_lsn: Lsn::IMPOSSIBLE,
            checkpoint_lsn: Lsn::IMPOSSIBLE,
            last_log_file_no: 1,
            max_trid: TrnId::NONE,
            updated_at: Utc::now(),
        }
    }

    /// Path of the control file inside the data directory
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join(CONTROL_FILE_NAME)
    }

    /// Returns true once a checkpoint has been recorded
    pub fn has_checkpoint(&self) -> bool {
        !self.checkpoint_record_lsn.is_impossible()
    }

    /// Serialize to the on-disk layout
    pub fn encode(&self) -> [u8; CONTROL_FILE_SIZE] {
        let mut buf = [0u8; CONTROL_FILE_SIZE];
        buf[0..8].copy_from_slice(CONTROL_MAGIC);
        buf[8..10].copy_from_slice(&CONTROL_VERSION.to_le_bytes());
        buf[12..28].copy_from_slice(self.uuid.as_bytes());
        self.checkpoint_record_lsn.write_at(&mut buf, 28);
        self.checkpoint_lsn.write_at(&mut buf, 36);
        buf[44..48].copy_from_slice(&self.last_log_file_no.to_le_bytes());
        buf[48..56].copy_from_slice(&self.max_trid.raw().to_le_bytes());
        buf[56..64].copy_from_slice(&self.updated_at.timestamp_millis().to_le_bytes());
        let crc = crc32fast::hash(&buf[..64]);
        buf[64..68].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse and verify the on-disk layout
    pub fn decode(buf: &[u8]) -> ControlResult<Self> {
        if buf.len() != CONTROL_FILE_SIZE {
            return Err(ControlError::corrupt(format!(
                "control file is {} bytes, expected {}",
                buf.len(),
                CONTROL_FILE_SIZE
            )));
        }
        if &buf[0..8] != CONTROL_MAGIC {
            return Err(ControlError::corrupt("bad magic"));
        }
        let version = u16::from_le_bytes([buf[8], buf[9]]);
        if version != CONTROL_VERSION {
            return Err(ControlError::corrupt(format!("unknown version {}", version)));
        }
        let stored = u32::from_le_bytes([buf[64], buf[65], buf[66], buf[67]]);
        if stored != crc32fast::hash(&buf[..64]) {
            return Err(ControlError::corrupt("checksum mismatch"));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[12..28]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[48..56]);
        let max_trid = TrnId::new(u64::from_le_bytes(word));
        word.copy_from_slice(&buf[56..64]);
        let millis = i64::from_le_bytes(word);
        let updated_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| ControlError::corrupt(format!("bad timestamp {}", millis)))?;

        Ok(Self {
            uuid: Uuid::from_bytes(uuid),
            checkpoint_record_lsn: Lsn::read_at(buf, 28),
            checkpoint_lsn: Lsn::read_at(buf, 36),
            last_log_file_no: u32::from_le_bytes([buf[44], buf[45], buf[46], buf[47]]),
            max_trid,
            updated_at,
        })
    }

    /// Read the control file of `data_dir`; `None` when there is none yet
    pub fn load(data_dir: &Path) -> ControlResult<Option<Self>> {
        let path = Self::path(data_dir);
        match fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ControlError::io(
                format!("cannot read {}", path.display()),
                e,
            )),
        }
    }

    /// Replace the control file of `data_dir` atomically
    pub fn store(&mut self, data_dir: &Path) -> ControlResult<()> {
        self.updated_at = Utc::now();
        let path = Self::path(data_dir);
        let tmp = data_dir.join(format!("{}.tmp", CONTROL_FILE_NAME));
        let bytes = self.encode();

        let write_tmp = || -> io::Result<()> {
            let mut file: File = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        write_tmp().map_err(|e| ControlError::io(format!("cannot write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| ControlError::io(format!("cannot replace {}", path.display()), e))?;
        sync_dir(data_dir)
            .map_err(|e| ControlError::io(format!("cannot sync {}", data_dir.display()), e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlErrorCode {
    AriaControlIoError,
    AriaControlCorrupt,
}

impl ControlErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            ControlErrorCode::AriaControlIoError => "ARIA_CONTROL_IO_ERROR",
            ControlErrorCode::AriaControlCorrupt => "ARIA_CONTROL_CORRUPT",
        }
    }
}

#[derive(Debug)]
pub struct ControlError {
    code: ControlErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl ControlError {
    /// I/O error
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: ControlErrorCode::AriaControlIoError,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Control file is corrupt
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self {
            code: ControlErrorCode::AriaControlCorrupt,
            message: message.into(),
            source: None,
        }
    }

    /// Get the error code
    pub fn code(&self) -> ControlErrorCode {
        self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for ControlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> ControlFile {
        ControlFile {
            checkpoint_record_lsn: Lsn::new(3, 0x400),
            checkpoint_lsn: Lsn::new(2, 0x80),
            last_log_file_no: 3,
            max_trid: TrnId::new(77),
            ..ControlFile::new(Uuid::new_v4())
        }
    }

    #[test]
    fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        assert!(ControlFile::load(dir.path()).unwrap().is_none());

        let mut control = sample();
        control.store(dir.path()).unwrap();
        let loaded = ControlFile::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.checkpoint_lsn, Lsn::new(2, 0x80));
        assert_eq!(loaded.max_trid, TrnId::new(77));
        assert_eq!(loaded.uuid, control.uuid);
        assert!(loaded.has_checkpoint());
        assert!(!dir.path().join("aria_log_control.tmp").exists());
    }

    #[test]
    fn test_every_byte_is_covered() {
        let bytes = sample().encode();
        for i in 0..CONTROL_FILE_SIZE {
            let mut bad = bytes;
            bad[i] ^= 0x04;
            assert!(ControlFile::decode(&bad).is_err(), "byte {}", i);
        }
    }

    #[test]
    fn test_wrong_size_is_corrupt() {
        let err = ControlFile::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err.code(), ControlErrorCode::AriaControlCorrupt);
    }
}
