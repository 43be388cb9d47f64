//! Page compression
//!
//! The page header stays in clear so later transforms can still read the
//! page type and LSN. The body is replaced by a frame:
//!
//! ```text
//! [header H][flag u8][original body length, 3 bytes LE][payload][trailer 8]
//! ```
//!
//! `flag = 1` means the payload is zlib data; `flag = 0` means the body is
//! stored as is because compression did not make it smaller. Compressed
//! pages have variable length, so only stores without a fixed block size
//! accept them.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::errors::{HookError, HookResult};
use super::{PageTransform, TransformContext};
use crate::page::{page_type, PAGE_TRAILER_SIZE};

pub const FLAG_STORED: u8 = 0;
pub const FLAG_ZLIB: u8 = 1;
/// Flag byte plus the 3-byte length
pub const COMPRESS_HEADER_SIZE: usize = 4;
const MAX_BODY_LEN: usize = 0xff_ffff;

#[derive(Debug)]
pub struct PageCompressor {
    level: Compression,
}

impl Default for PageCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

/// Clear header length for a page, from its type byte
fn clear_header_len(page: &[u8], ctx: &TransformContext) -> HookResult<usize> {
    let kind = page_type(page).ok_or_else(|| HookError::corrupt(ctx.page_no, "unknown page type"))?;
    Ok(kind.layout().header_size())
}

/// Compression flag of a stored frame, for tools and tests
pub fn frame_flag(frame: &[u8], header_len: usize) -> Option<u8> {
    frame.get(header_len).copied()
}

impl PageTransform for PageCompressor {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn encode(&self, ctx: &TransformContext, page: Vec<u8>) -> HookResult<Vec<u8>> {
        let header_len = clear_header_len(&page, ctx)?;
        let body_end = page.len() - PAGE_TRAILER_SIZE;
        let body = &page[header_len..body_end];
        if body.len() > MAX_BODY_LEN {
            return Err(HookError::corrupt(ctx.page_no, "page body too large to compress"));
        }

        let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), self.level);
        let failed = |e: std::io::Error| HookError::corrupt(ctx.page_no, format!("compression failed: {}", e));
        encoder.write_all(body).map_err(failed)?;
        let compressed = encoder.finish().map_err(failed)?;

        let (flag, payload) = if compressed.len() < body.len() {
            (FLAG_ZLIB, compressed.as_slice())
        } else {
            (FLAG_STORED, body)
        };

        let mut out =
            Vec::with_capacity(header_len + COMPRESS_HEADER_SIZE + payload.len() + PAGE_TRAILER_SIZE);
        out.extend_from_slice(&page[..header_len]);
        out.push(flag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes()[..3]);
        out.extend_from_slice(payload);
        out.extend_from_slice(&page[body_end..]);
        Ok(out)
    }

    fn decode(&self, ctx: &TransformContext, frame: Vec<u8>) -> HookResult<Vec<u8>> {
        let header_len = clear_header_len(&frame, ctx)?;
        if frame.len() < header_len + COMPRESS_HEADER_SIZE + PAGE_TRAILER_SIZE {
            return Err(HookError::corrupt(ctx.page_no, "compressed frame too short"));
        }
        let flag = frame[header_len];
        let len_bytes = &frame[header_len + 1..header_len + COMPRESS_HEADER_SIZE];
        let orig_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], 0]) as usize;
        let expected = ctx.block_size - header_len - PAGE_TRAILER_SIZE;
        if orig_len != expected {
            return Err(HookError::corrupt(
                ctx.page_no,
                format!("frame body length {} does not match page ({})", orig_len, expected),
            ));
        }
        let payload_end = frame.len() - PAGE_TRAILER_SIZE;
        let payload = &frame[header_len + COMPRESS_HEADER_SIZE..payload_end];

        let body = match flag {
            FLAG_STORED => payload.to_vec(),
            FLAG_ZLIB => {
                let mut body = Vec::with_capacity(orig_len);
                ZlibDecoder::new(payload)
                    .take(orig_len as u64 + 1)
                    .read_to_end(&mut body)
                    .map_err(|e| {
                        HookError::corrupt(ctx.page_no, format!("decompression failed: {}", e))
                    })?;
                body
            }
            other => {
                return Err(HookError::corrupt(
                    ctx.page_no,
                    format!("unknown compression flag {}", other),
                ))
            }
        };
        if body.len() != orig_len {
            return Err(HookError::corrupt(
                ctx.page_no,
                format!("body is {} bytes after decompression, expected {}", body.len(), orig_len),
            ));
        }

        let mut page = Vec::with_capacity(ctx.block_size);
        page.extend_from_slice(&frame[..header_len]);
        page.extend_from_slice(&body);
        page.extend_from_slice(&frame[payload_end..]);
        Ok(page)
    }
}
