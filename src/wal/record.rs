//! Log record framing
//!
//! Every record is stored as one frame:
//! - Record length (u32 LE), covering the whole frame
//! - Record type (u8)
//! - Flags (u8)
//! - Transaction id (u64 LE), 0 for records owned by no transaction
//! - Payload, the concatenation of the caller's parts
//! - Checksum (u32 LE) over everything before it, seeded with the LSN
//!
//! A record's LSN is the position of its first byte.

use std::fmt;

use super::checksum::record_checksum;
use crate::lsn::Lsn;
use crate::trn::TrnId;

pub const FRAME_HEADER_SIZE: usize = 14;
pub const FRAME_TRAILER_SIZE: usize = 4;
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Binds a short table id to a table path for this log
    FileId = 1,
    /// Row inserted: page redo plus compensating undo
    RowInsert = 2,
    /// Row deleted: page redo plus compensating undo
    RowDelete = 3,
    /// Row replaced in place
    RowUpdate = 4,
    /// Compensation record written while undoing a row record
    Clr = 5,
    Commit = 6,
    /// Written once a rollback has undone every record of a transaction
    Abort = 7,
    Checkpoint = 8,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::FileId),
            2 => Some(RecordType::RowInsert),
            3 => Some(RecordType::RowDelete),
            4 => Some(RecordType::RowUpdate),
            5 => Some(RecordType::Clr),
            6 => Some(RecordType::Commit),
            7 => Some(RecordType::Abort),
            8 => Some(RecordType::Checkpoint),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::FileId => "FILE_ID",
            RecordType::RowInsert => "ROW_INSERT",
            RecordType::RowDelete => "ROW_DELETE",
            RecordType::RowUpdate => "ROW_UPDATE",
            RecordType::Clr => "CLR",
            RecordType::Commit => "COMMIT",
            RecordType::Abort => "ABORT",
            RecordType::Checkpoint => "CHECKPOINT",
        }
    }

    /// Records that join a transaction's undo chain
    pub fn is_undoable(self) -> bool {
        matches!(
            self,
            RecordType::RowInsert | RecordType::RowDelete | RecordType::RowUpdate
        )
    }

    /// Records carrying page operations to redo
    pub fn has_redo(self) -> bool {
        self.is_undoable() || self == RecordType::Clr
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A record read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub record_type: RecordType,
    pub flags: u8,
    pub trn: TrnId,
    pub payload: Vec<u8>,
}

impl WalRecord {
    /// Total frame length on disk
    pub fn frame_len(&self) -> u32 {
        (MIN_FRAME_SIZE + self.payload.len()) as u32
    }

    /// LSN right after this record's frame
    pub fn next_lsn(&self) -> Lsn {
        self.lsn.advance(self.frame_len())
    }
}

/// Build a frame with a zero checksum; `seal_frame` fills it once the LSN
/// is known.
pub fn encode_frame(record_type: RecordType, flags: u8, trn: TrnId, parts: &[&[u8]]) -> Vec<u8> {
    let payload_len: usize = parts.iter().map(|p| p.len()).sum();
    let total = MIN_FRAME_SIZE + payload_len;
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_le_bytes());
    frame.push(record_type.as_u8());
    frame.push(flags);
    frame.extend_from_slice(&trn.raw().to_le_bytes());
    for part in parts {
        frame.extend_from_slice(part);
    }
    frame.extend_from_slice(&[0u8; FRAME_TRAILER_SIZE]);
    frame
}

pub fn seal_frame(frame: &mut [u8], lsn: Lsn) {
    let body_len = frame.len() - FRAME_TRAILER_SIZE;
    let crc = record_checksum(lsn, &frame[..body_len]);
    frame[body_len..].copy_from_slice(&crc.to_le_bytes());
}

/// Validate and decode a complete frame stored at `lsn`.
///
/// The error string says which check failed.
pub fn decode_frame(lsn: Lsn, frame: &[u8]) -> Result<WalRecord, String> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(format!("frame of {} bytes is shorter than a header", frame.len()));
    }
    let declared = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if declared != frame.len() {
        return Err(format!(
            "declared length {} does not match frame length {}",
            declared,
            frame.len()
        ));
    }
    let body_len = frame.len() - FRAME_TRAILER_SIZE;
    let stored = u32::from_le_bytes([
        frame[body_len],
        frame[body_len + 1],
        frame[body_len + 2],
        frame[body_len + 3],
    ]);
    if record_checksum(lsn, &frame[..body_len]) != stored {
        return Err("checksum mismatch".to_string());
    }
    let record_type = RecordType::from_u8(frame[4])
        .ok_or_else(|| format!("unknown record type {}", frame[4]))?;
    let mut trn = [0u8; 8];
    trn.copy_from_slice(&frame[6..14]);
    Ok(WalRecord {
        lsn,
        record_type,
        flags: frame[5],
        trn: TrnId::new(u64::from_le_bytes(trn)),
        payload: frame[FRAME_HEADER_SIZE..body_len].to_vec(),
    })
}
