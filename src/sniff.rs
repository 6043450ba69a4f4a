//! Segment format detection from the first two bytes.

use std::fmt;
use std::io::{Read, Seek};

use serde::Serialize;

use crate::error::SplitError;
use crate::peek::PeekStream;

/// First two bytes of a zstd frame magic (`0xFD2FB528` little-endian).
pub const ZSTD_PREFIX: [u8; 2] = [0x28, 0xB5];
/// `"07"`, the shared prefix of every ASCII cpio magic.
pub const CPIO_PREFIX: [u8; 2] = *b"07";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentFormat {
    /// Uncompressed newc cpio archive, copied verbatim.
    RawCpio,
    /// A single zstd frame whose payload is a cpio archive.
    ZstdCpio,
}

impl SegmentFormat {
    pub fn name(self) -> &'static str {
        match self {
            SegmentFormat::RawCpio  => "raw-cpio",
            SegmentFormat::ZstdCpio => "zstd-cpio",
        }
    }

    /// Map a two-byte prefix to a format.
    pub fn from_magic(magic: [u8; 2]) -> Option<Self> {
        match magic {
            ZSTD_PREFIX => Some(SegmentFormat::ZstdCpio),
            CPIO_PREFIX => Some(SegmentFormat::RawCpio),
            _           => None,
        }
    }
}

impl fmt::Display for SegmentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Inspect the next two bytes without consuming them.
///
/// `Ok(None)` means end of stream: no bytes at all were available.  A single
/// trailing byte, or any unknown pair, is [`SplitError::UnrecognizedFormat`].
pub fn sniff<R: Read + Seek>(stream: &mut PeekStream<R>) -> Result<Option<SegmentFormat>, SplitError> {
    let magic = stream.peek(2)?;
    if magic.is_empty() {
        return Ok(None);
    }
    let format = <[u8; 2]>::try_from(magic.as_slice())
        .ok()
        .and_then(SegmentFormat::from_magic);
    match format {
        Some(format) => Ok(Some(format)),
        None => Err(SplitError::UnrecognizedFormat {
            offset:  stream.position()?,
            context: "segment",
            magic:   hex::encode(&magic),
        }),
    }
}
