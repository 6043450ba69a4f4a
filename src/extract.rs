//! Segment extraction and inter-segment padding.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cpio;
use crate::error::SplitError;
use crate::peek::PeekStream;
use crate::sniff::SegmentFormat;
use crate::zstd_frame;

/// Copy buffer size for both the verbatim and the decompressing path.
pub const COPY_BUF_SIZE: usize = 64 * 1024;
/// Lookahead window used when scanning zero padding.
pub const PADDING_PEEK_SIZE: usize = 4096;

// ── Descriptors ──────────────────────────────────────────────────────────────

/// One sized blob inside the input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub index:  usize,
    pub format: SegmentFormat,
    /// Absolute offset of the segment's first byte.
    pub offset: u64,
    /// Bytes the segment occupies in the input.
    pub length: u64,
}

impl Segment {
    /// Size the segment of `format` starting at the cursor.  The cursor is
    /// left where it was.
    pub fn measure<R: Read + Seek>(
        stream: &mut PeekStream<R>,
        index:  usize,
        format: SegmentFormat,
    ) -> Result<Self, SplitError> {
        let offset = stream.position()?;
        let length = match format {
            SegmentFormat::RawCpio  => cpio::archive_size(stream)?,
            SegmentFormat::ZstdCpio => zstd_frame::frame_size(stream)?,
        };
        Ok(Self { index, format, offset, length })
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Result of writing one segment to disk.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedSegment {
    #[serde(flatten)]
    pub segment:       Segment,
    pub output:        PathBuf,
    /// Bytes written to `output` (decompressed size for zstd segments).
    pub bytes_written: u64,
    /// BLAKE3 of the written bytes.
    #[serde(serialize_with = "hex_digest")]
    pub digest:        [u8; 32],
}

impl ExtractedSegment {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

fn hex_digest<S: serde::Serializer>(digest: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(digest))
}

// ── Output ───────────────────────────────────────────────────────────────────

/// Writer that hashes and counts everything passing through it.
struct DigestWriter<W> {
    inner:   W,
    hasher:  blake3::Hasher,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, hasher: blake3::Hasher::new(), written: 0 }
    }

    fn finish(mut self) -> io::Result<(u64, [u8; 32])> {
        self.inner.flush()?;
        Ok((self.written, self.hasher.finalize().into()))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Create `path`, failing with [`SplitError::OutputCollision`] if it exists.
pub fn create_fresh(path: &Path) -> Result<File, SplitError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => SplitError::OutputCollision { path: path.to_owned() },
            _ => SplitError::Io(e),
        })
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Write `segment` to a new file at `output`.
///
/// The cursor must sit at `segment.offset`.  On success it is left at
/// `segment.end()`.  On failure the partially written output is removed; a
/// pre-existing file that caused a collision is left untouched.
pub fn extract_segment<R: Read + Seek>(
    stream:  &mut PeekStream<R>,
    segment: &Segment,
    output:  &Path,
) -> Result<ExtractedSegment, SplitError> {
    let file = create_fresh(output)?;
    let mut out = DigestWriter::new(io::BufWriter::new(file));

    let written = match segment.format {
        SegmentFormat::RawCpio  => copy_verbatim(stream, segment, &mut out),
        SegmentFormat::ZstdCpio => decompress_frame(stream, segment, &mut out),
    }
    .and_then(|()| Ok(out.finish()?))
    .and_then(|done| {
        stream.seek_to(segment.end())?;
        Ok(done)
    });

    match written {
        Ok((bytes_written, digest)) => {
            log::debug!(
                "segment {} ({}) -> {}: {} bytes, blake3 {}",
                segment.index, segment.format, output.display(), bytes_written, hex::encode(digest),
            );
            Ok(ExtractedSegment {
                segment: *segment,
                output:  output.to_owned(),
                bytes_written,
                digest,
            })
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(output) {
                log::warn!("could not remove partial output {}: {rm}", output.display());
            }
            Err(e)
        }
    }
}

fn copy_verbatim<R: Read + Seek, W: Write>(
    stream:  &mut PeekStream<R>,
    segment: &Segment,
    out:     &mut W,
) -> Result<(), SplitError> {
    let copied = io::copy(&mut stream.by_ref().take(segment.length), out)?;
    if copied < segment.length {
        return Err(SplitError::TruncatedInput {
            offset:    segment.offset,
            what:      "cpio archive",
            needed:    segment.length,
            available: copied,
        });
    }
    Ok(())
}

/// Decompress exactly `segment.length` input bytes.  The decoder sees a
/// bounded reader, so it cannot run into padding or the next segment.
fn decompress_frame<R: Read + Seek, W: Write>(
    stream:  &mut PeekStream<R>,
    segment: &Segment,
    out:     &mut W,
) -> Result<(), SplitError> {
    let decode_err = |source: io::Error| SplitError::PayloadDecodeFailure {
        index:  segment.index,
        offset: segment.offset,
        source,
    };

    let bounded = stream.by_ref().take(segment.length);
    let mut decoder = zstd::stream::read::Decoder::new(bounded)
        .map_err(decode_err)?
        .single_frame();

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(decode_err(e)),
        };
        out.write_all(&buf[..n])?;
    }
    Ok(())
}

// ── Padding ──────────────────────────────────────────────────────────────────

/// Consume zero bytes at the cursor.  Stops just before the first non-zero
/// byte or at end of stream, and returns the number of bytes skipped.
pub fn skip_padding<R: Read + Seek>(stream: &mut PeekStream<R>) -> Result<u64, SplitError> {
    let mut skipped = 0u64;
    loop {
        let window = stream.peek(PADDING_PEEK_SIZE)?;
        let zeros = window.iter().take_while(|&&b| b == 0).count();
        if zeros > 0 {
            stream.advance(zeros as u64)?;
            skipped += zeros as u64;
        }
        if zeros < window.len() || window.len() < PADDING_PEEK_SIZE {
            return Ok(skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpio::ArchiveBuilder;
    use std::io::Cursor;

    fn stream(data: Vec<u8>) -> PeekStream<Cursor<Vec<u8>>> {
        PeekStream::new(Cursor::new(data))
    }

    fn small_archive() -> Vec<u8> {
        let mut b = ArchiveBuilder::new();
        b.add_file("a.txt", b"hello");
        b.finish()
    }

    #[test]
    fn skips_zero_run_and_stops_before_data() {
        let mut data = vec![0u8; 10_000];
        data.push(0x30);
        let mut s = stream(data);
        assert_eq!(skip_padding(&mut s).unwrap(), 10_000);
        assert_eq!(s.position().unwrap(), 10_000);
        assert_eq!(skip_padding(&mut s).unwrap(), 0);
    }

    #[test]
    fn skips_to_end_of_stream() {
        let mut s = stream(vec![0u8; PADDING_PEEK_SIZE * 2]);
        assert_eq!(skip_padding(&mut s).unwrap(), (PADDING_PEEK_SIZE * 2) as u64);
        assert!(s.peek(1).unwrap().is_empty());
    }

    #[test]
    fn extracts_raw_segment_and_advances() {
        let dir = tempfile::tempdir().unwrap();
        let archive = small_archive();
        let mut data = archive.clone();
        data.extend_from_slice(&[0, 0, 0, 0]);
        let mut s = stream(data);

        let seg = Segment::measure(&mut s, 0, SegmentFormat::RawCpio).unwrap();
        assert_eq!(seg.length, archive.len() as u64);
        let out = dir.path().join("segment_0");
        let done = extract_segment(&mut s, &seg, &out).unwrap();

        assert_eq!(fs::read(&out).unwrap(), archive);
        assert_eq!(done.bytes_written, archive.len() as u64);
        assert_eq!(done.digest, <[u8; 32]>::from(blake3::hash(&archive)));
        assert_eq!(s.position().unwrap(), seg.end());
    }

    #[test]
    fn extracts_zstd_segment_without_reading_past_frame() {
        let dir = tempfile::tempdir().unwrap();
        let archive = small_archive();
        let frame = zstd::encode_all(&archive[..], 3).unwrap();
        let mut data = frame.clone();
        data.extend_from_slice(&frame);
        let mut s = stream(data);

        let seg = Segment::measure(&mut s, 0, SegmentFormat::ZstdCpio).unwrap();
        assert_eq!(seg.length, frame.len() as u64);
        let out = dir.path().join("segment_0");
        extract_segment(&mut s, &seg, &out).unwrap();

        assert_eq!(fs::read(&out).unwrap(), archive);
        assert_eq!(s.position().unwrap(), frame.len() as u64);
    }

    #[test]
    fn collision_is_reported_and_existing_file_kept() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("segment_0");
        fs::write(&out, b"keep me").unwrap();

        let mut s = stream(small_archive());
        let seg = Segment::measure(&mut s, 0, SegmentFormat::RawCpio).unwrap();
        match extract_segment(&mut s, &seg, &out) {
            Err(SplitError::OutputCollision { path }) => assert_eq!(path, out),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(fs::read(&out).unwrap(), b"keep me");
        assert_eq!(s.position().unwrap(), 0);
    }

    #[test]
    fn decode_failure_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        // Structurally valid single-segment frame carrying one raw block and
        // a checksum that cannot match its content.
        let mut frame = zstd_frame::FRAME_MAGIC.to_vec();
        frame.extend_from_slice(&[0x24, 5]);
        frame.extend_from_slice(&((5u32 << 3) | 1).to_le_bytes()[..3]);
        frame.extend_from_slice(b"hello");
        frame.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut s = stream(frame.clone());
        let seg = Segment::measure(&mut s, 0, SegmentFormat::ZstdCpio).unwrap();
        assert_eq!(seg.length, frame.len() as u64);

        let out = dir.path().join("segment_0");
        assert!(matches!(
            extract_segment(&mut s, &seg, &out),
            Err(SplitError::PayloadDecodeFailure { index: 0, .. })
        ));
        assert!(!out.exists());
    }
}
