//! Zstd frame sizing by structural walk.
//!
//! A zstd frame is laid out as
//!
//! ```text
//! magic (4) | descriptor (1) | window (0-1) | dict id (0-4) | content size (0-8)
//! block header (3) | block payload | ... | last block | checksum (0 or 4)
//! ```
//!
//! [`measure_frame`] decodes the header, then hops from block header to block
//! header using the 21-bit size field until the last-block flag is seen.  The
//! entropy decoder is never involved, so sizing cost is proportional to the
//! number of blocks, not to the payload size.

use std::io::{Read, Seek};

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::SplitError;
use crate::peek::PeekStream;

/// `0xFD2FB528` in stream order.
pub const FRAME_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
/// Largest possible frame header: magic + descriptor + window + 4-byte
/// dictionary id + 8-byte content size.
pub const MAX_FRAME_HEADER_SIZE: usize = 18;
pub const MIN_FRAME_HEADER_SIZE: usize = 5;
pub const BLOCK_HEADER_SIZE: usize = 3;
pub const CHECKSUM_SIZE: u64 = 4;
/// Upper bound for any single block's content (128 KiB).
pub const MAX_BLOCK_SIZE: u32 = 128 * 1024;

// Frame header descriptor bits.
const FHD_CHECKSUM:       u8 = 0x04;
const FHD_RESERVED:       u8 = 0x08;
const FHD_SINGLE_SEGMENT: u8 = 0x20;

// ── Frame header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub header_size:       usize,
    pub has_checksum:      bool,
    pub single_segment:    bool,
    pub window_descriptor: Option<u8>,
    pub dictionary_id:     Option<u32>,
    /// Decompressed size declared by the frame, when present.
    pub content_size:      Option<u64>,
}

impl FrameHeader {
    /// Decode a frame header from the start of `buf`.  `offset` is the
    /// absolute position of `buf[0]`, used for error reporting only.
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, SplitError> {
        if buf.len() < MIN_FRAME_HEADER_SIZE {
            return Err(truncated_header(offset, MIN_FRAME_HEADER_SIZE, buf.len()));
        }
        if buf[..4] != FRAME_MAGIC {
            return Err(SplitError::CorruptStructure {
                offset,
                what:   "zstd frame header",
                reason: format!("bad frame magic {}", hex::encode(&buf[..4])),
            });
        }

        let fhd = buf[4];
        if fhd & FHD_RESERVED != 0 {
            return Err(SplitError::CorruptStructure {
                offset: offset + 4,
                what:   "zstd frame header",
                reason: format!("reserved descriptor bit set (descriptor {fhd:#04x})"),
            });
        }
        let single_segment = fhd & FHD_SINGLE_SEGMENT != 0;
        let has_checksum   = fhd & FHD_CHECKSUM != 0;

        let window_len = if single_segment { 0 } else { 1 };
        let did_len = match fhd & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let fcs_len = match fhd >> 6 {
            0 if single_segment => 1,
            0 => 0,
            1 => 2,
            2 => 4,
            _ => 8,
        };

        let header_size = MIN_FRAME_HEADER_SIZE + window_len + did_len + fcs_len;
        if buf.len() < header_size {
            return Err(truncated_header(offset, header_size, buf.len()));
        }

        let mut pos = MIN_FRAME_HEADER_SIZE;
        let window_descriptor = (!single_segment).then(|| buf[pos]);
        pos += window_len;

        let dictionary_id = match did_len {
            0 => 0,
            1 => buf[pos] as u32,
            2 => LittleEndian::read_u16(&buf[pos..]) as u32,
            _ => LittleEndian::read_u32(&buf[pos..]),
        };
        pos += did_len;

        let content_size = match fcs_len {
            0 => None,
            1 => Some(buf[pos] as u64),
            // The two-byte form is stored with a 256 offset.
            2 => Some(LittleEndian::read_u16(&buf[pos..]) as u64 + 256),
            4 => Some(LittleEndian::read_u32(&buf[pos..]) as u64),
            _ => Some(LittleEndian::read_u64(&buf[pos..])),
        };

        Ok(Self {
            header_size,
            has_checksum,
            single_segment,
            window_descriptor,
            dictionary_id: (dictionary_id != 0).then_some(dictionary_id),
            content_size,
        })
    }
}

fn truncated_header(offset: u64, needed: usize, available: usize) -> SplitError {
    SplitError::TruncatedInput {
        offset,
        what:      "zstd frame header",
        needed:    needed as u64,
        available: available as u64,
    }
}

// ── Block header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Raw,
    Rle,
    Compressed,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub is_last:    bool,
    pub block_type: BlockType,
    /// Raw 21-bit size field.  For RLE blocks this is the regenerated size,
    /// not the on-wire payload size.
    pub block_size: u32,
}

impl BlockHeader {
    /// Decode the little-endian 24-bit block header.
    pub fn decode(bytes: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        let raw = LittleEndian::read_u24(bytes);
        let block_type = match (raw >> 1) & 0x03 {
            0 => BlockType::Raw,
            1 => BlockType::Rle,
            2 => BlockType::Compressed,
            _ => BlockType::Reserved,
        };
        Self {
            is_last: raw & 1 != 0,
            block_type,
            block_size: raw >> 3,
        }
    }

    /// Bytes of payload following the header on the wire.
    /// `None` for the reserved block type.
    pub fn payload_len(&self) -> Option<u64> {
        match self.block_type {
            BlockType::Raw | BlockType::Compressed => Some(self.block_size as u64),
            BlockType::Rle                         => Some(1),
            BlockType::Reserved                    => None,
        }
    }
}

// ── Sizing ───────────────────────────────────────────────────────────────────

/// Structural summary of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameLayout {
    pub header:      FrameHeader,
    pub block_count: usize,
    /// Header + every block + optional checksum.
    pub total_size:  u64,
}

/// Walk the frame starting at the cursor and return its layout.  The cursor
/// is left where it was.
pub fn measure_frame<R: Read + Seek>(stream: &mut PeekStream<R>) -> Result<FrameLayout, SplitError> {
    let start = stream.position()?;
    stream.restoring(|s| {
        let buf = s.peek(MAX_FRAME_HEADER_SIZE)?;
        let header = FrameHeader::decode(&buf, start)?;

        let mut size = header.header_size as u64;
        let mut block_count = 0usize;
        loop {
            let raw = s.peek_exact_at(size, BLOCK_HEADER_SIZE, "zstd block header")?;
            let block = BlockHeader::decode(&[raw[0], raw[1], raw[2]]);
            let payload = block.payload_len().ok_or_else(|| SplitError::CorruptStructure {
                offset: start + size,
                what:   "zstd block header",
                reason: "reserved block type".into(),
            })?;
            if block.block_size > MAX_BLOCK_SIZE {
                return Err(SplitError::CorruptStructure {
                    offset: start + size,
                    what:   "zstd block header",
                    reason: format!("block size {} exceeds {MAX_BLOCK_SIZE}", block.block_size),
                });
            }
            size += BLOCK_HEADER_SIZE as u64 + payload;
            block_count += 1;
            if block.is_last {
                break;
            }
        }
        if header.has_checksum {
            size += CHECKSUM_SIZE;
        }

        s.ensure_available(size, "zstd frame")?;
        Ok(FrameLayout { header, block_count, total_size: size })
    })
}

/// Exact byte length of the zstd frame at the cursor.
pub fn frame_size<R: Read + Seek>(stream: &mut PeekStream<R>) -> Result<u64, SplitError> {
    measure_frame(stream).map(|layout| layout.total_size)
}
