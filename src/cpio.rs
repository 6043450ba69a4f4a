//! "newc" cpio archive sizing.
//!
//! Each entry is a 110-byte ASCII header followed by the NUL-terminated path
//! and the file data:
//!
//! ```text
//! header (110) | path (namesize) | pad to 4 | data (filesize) | pad to 4
//! ```
//!
//! Padding is computed against the archive's on-disk layout: the path pad
//! aligns `110 + namesize`, the data pad aligns `filesize`.  The archive ends
//! with the entry whose path is `TRAILER!!!`.

use std::io::{Read, Seek};

use serde::Serialize;

use crate::error::SplitError;
use crate::peek::PeekStream;

pub const HEADER_SIZE: usize = 110;
pub const MAGIC_NEWC:     &[u8; 6] = b"070701";
pub const MAGIC_NEWC_CRC: &[u8; 6] = b"070702";
/// Portable ASCII ("odc") magic.  Recognized, not implemented.
pub const MAGIC_ODC:      &[u8; 6] = b"070707";
/// Old binary magic, `070707` octal.  Recognized, not implemented.
pub const MAGIC_BINARY:   u16 = 0o070707;
/// Trailer path including its NUL terminator.
pub const TRAILER_PATH:   &[u8] = b"TRAILER!!!\0";

// (offset, width) of the hex fields we need.
const FILESIZE_FIELD: (usize, usize) = (54, 8);
const NAMESIZE_FIELD: (usize, usize) = (94, 8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CpioMagic {
    /// `070701`
    Newc,
    /// `070702`, same layout with a data checksum field.
    NewcCrc,
}

/// Round `n` up to the next multiple of four.
pub fn align4(n: u64) -> u64 {
    n + (4 - n % 4) % 4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub magic:     CpioMagic,
    pub file_size: u32,
    pub path_size: u32,
}

impl EntryHeader {
    /// Decode the entry header at the start of `buf`.  `offset` is the
    /// absolute position of `buf[0]`, used for error reporting only.
    pub fn decode(buf: &[u8], offset: u64) -> Result<Self, SplitError> {
        if buf.len() >= 2 {
            let half = u16::from_be_bytes([buf[0], buf[1]]);
            if half == MAGIC_BINARY || half.swap_bytes() == MAGIC_BINARY {
                return Err(SplitError::UnrecognizedFormat {
                    offset,
                    context: "binary cpio (unimplemented)",
                    magic:   hex::encode(&buf[..2]),
                });
            }
        }
        if buf.len() < MAGIC_NEWC.len() {
            return Err(truncated(offset, MAGIC_NEWC.len(), buf.len()));
        }

        let magic = match &buf[..6] {
            m if m == MAGIC_NEWC     => CpioMagic::Newc,
            m if m == MAGIC_NEWC_CRC => CpioMagic::NewcCrc,
            m if m == MAGIC_ODC      => {
                return Err(SplitError::UnrecognizedFormat {
                    offset,
                    context: "portable ASCII cpio (unimplemented)",
                    magic:   String::from_utf8_lossy(m).into_owned(),
                });
            }
            m => {
                return Err(SplitError::UnrecognizedFormat {
                    offset,
                    context: "cpio",
                    magic:   hex::encode(m),
                });
            }
        };

        if buf.len() < HEADER_SIZE {
            return Err(truncated(offset, HEADER_SIZE, buf.len()));
        }
        Ok(Self {
            magic,
            file_size: hex_field(buf, offset, FILESIZE_FIELD, "filesize")?,
            path_size: hex_field(buf, offset, NAMESIZE_FIELD, "namesize")?,
        })
    }

    /// Header, path and data of this entry including both paddings.
    pub fn entry_len(&self) -> u64 {
        align4(HEADER_SIZE as u64 + self.path_size as u64) + align4(self.file_size as u64)
    }

    fn may_be_trailer(&self) -> bool {
        self.path_size as usize == TRAILER_PATH.len()
    }
}

fn truncated(offset: u64, needed: usize, available: usize) -> SplitError {
    SplitError::TruncatedInput {
        offset,
        what:      "cpio entry header",
        needed:    needed as u64,
        available: available as u64,
    }
}

fn hex_field(
    buf:    &[u8],
    offset: u64,
    (at, width): (usize, usize),
    name:   &str,
) -> Result<u32, SplitError> {
    let field = &buf[at..at + width];
    field
        .iter()
        .try_fold(0u32, |acc, &b| (b as char).to_digit(16).map(|d| (acc << 4) | d))
        .ok_or_else(|| SplitError::CorruptStructure {
            offset: offset + at as u64,
            what:   "cpio entry header",
            reason: format!("{name} field {:?} is not hexadecimal", String::from_utf8_lossy(field)),
        })
}

// ── Sizing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveLayout {
    /// Entries including the trailer.
    pub entry_count: usize,
    pub total_size:  u64,
}

/// Walk entry headers from the cursor up to and including the trailer.  The
/// cursor is left where it was.
pub fn measure_archive<R: Read + Seek>(stream: &mut PeekStream<R>) -> Result<ArchiveLayout, SplitError> {
    let start = stream.position()?;
    stream.restoring(|s| {
        let mut size = 0u64;
        let mut entry_count = 0usize;
        loop {
            let buf = s.peek_at(size, HEADER_SIZE)?;
            let entry = EntryHeader::decode(&buf, start + size)?;
            entry_count += 1;

            if entry.may_be_trailer() {
                let path = s.peek_exact_at(size + HEADER_SIZE as u64, TRAILER_PATH.len(), "cpio path")?;
                if path == TRAILER_PATH {
                    size += entry.entry_len();
                    s.ensure_available(size, "cpio archive")?;
                    return Ok(ArchiveLayout { entry_count, total_size: size });
                }
            }
            size += entry.entry_len();
        }
    })
}

/// Exact byte length of the cpio archive at the cursor.
pub fn archive_size<R: Read + Seek>(stream: &mut PeekStream<R>) -> Result<u64, SplitError> {
    measure_archive(stream).map(|layout| layout.total_size)
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Minimal newc writer, used to produce fixtures.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    buf: Vec<u8>,
    ino: u32,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&mut self, path: &str) -> &mut Self {
        self.push_entry(path.as_bytes(), 0o040755, 2, &[])
    }

    pub fn add_file(&mut self, path: &str, data: &[u8]) -> &mut Self {
        self.push_entry(path.as_bytes(), 0o100644, 1, data)
    }

    /// Append the trailer and return the archive bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let trailer = &TRAILER_PATH[..TRAILER_PATH.len() - 1];
        self.push_entry(trailer, 0, 1, &[]);
        self.buf
    }

    fn push_entry(&mut self, path: &[u8], mode: u32, nlink: u32, data: &[u8]) -> &mut Self {
        self.ino += 1;
        let fields = [
            self.ino,
            mode,
            0, // uid
            0, // gid
            nlink,
            0, // mtime
            data.len() as u32,
            0, 0, 0, 0, // dev, rdev
            path.len() as u32 + 1,
            0, // check
        ];
        self.buf.extend_from_slice(MAGIC_NEWC);
        for field in fields {
            self.buf.extend_from_slice(format!("{field:08X}").as_bytes());
        }
        self.buf.extend_from_slice(path);
        self.buf.push(0);
        self.pad();
        self.buf.extend_from_slice(data);
        self.pad();
        self
    }

    fn pad(&mut self) {
        let len = self.buf.len() as u64;
        self.buf.resize(align4(len) as usize, 0);
    }
}
