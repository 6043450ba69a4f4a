//! Driver loop: sniff, size, extract, skip padding, repeat.
//!
//! ```no_run
//! use segsplit::split::{split_file, SplitOptions};
//!
//! let opts = SplitOptions { output_dir: "out".into(), ..SplitOptions::default() };
//! let report = split_file("initrd.img", &opts)?;
//! for seg in &report.segments {
//!     println!("{} {} bytes", seg.output.display(), seg.bytes_written);
//! }
//! # Ok::<(), segsplit::SplitError>(())
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::error::SplitError;
use crate::extract::{extract_segment, skip_padding, ExtractedSegment, Segment};
use crate::peek::PeekStream;
use crate::sniff::sniff;

pub const DEFAULT_PREFIX:         &str = "segment_";
pub const DEFAULT_REMAINDER_NAME: &str = "remaining";

// ── SplitOptions ─────────────────────────────────────────────────────────────

/// Configuration for [`split_stream`] and [`split_file`].
#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Directory receiving segment outputs and the remainder file.
    pub output_dir:     PathBuf,
    /// Output names are `{prefix}{index}`.
    pub prefix:         String,
    /// Name of the file holding unread input after a failure.
    pub remainder_name: String,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            output_dir:     PathBuf::from("."),
            prefix:         DEFAULT_PREFIX.to_owned(),
            remainder_name: DEFAULT_REMAINDER_NAME.to_owned(),
        }
    }
}

impl SplitOptions {
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("{}{}", self.prefix, index))
    }

    pub fn remainder_path(&self) -> PathBuf {
        self.output_dir.join(&self.remainder_name)
    }
}

// ── SplitReport ──────────────────────────────────────────────────────────────

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub input:         Option<PathBuf>,
    pub input_size:    u64,
    pub segments:      Vec<ExtractedSegment>,
    pub padding_bytes: u64,
    /// Unix timestamp of completion.
    pub finished_at:   i64,
}

impl SplitReport {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum State {
    Scanning,
    Padding,
    Done,
    Failed {
        error:     SplitError,
        /// First byte not yet written to any output.
        resume_at: u64,
    },
}

/// Split every segment of `reader` into its own file.
///
/// On failure every byte not yet written to an output (from the start of the
/// failing segment, or from the end of the last extracted one when skipping
/// padding fails) is written to [`SplitOptions::remainder_path`], replacing
/// any file left there by an earlier run, and the original error is
/// returned.  Outputs of earlier segments are left in place.
pub fn split_stream<R: Read + Seek>(reader: R, opts: &SplitOptions) -> Result<SplitReport, SplitError> {
    let mut stream = PeekStream::new(reader);
    let input_size = stream.remaining()?;
    let mut segments = Vec::new();
    let mut padding_bytes = 0u64;

    let mut state = State::Scanning;
    loop {
        state = match state {
            State::Scanning => {
                let segment_start = stream.position()?;
                match next_segment(&mut stream, segments.len(), opts) {
                    Ok(Some(extracted)) => {
                        segments.push(extracted);
                        State::Padding
                    }
                    Ok(None)    => State::Done,
                    Err(error)  => State::Failed { error, resume_at: segment_start },
                }
            }
            State::Padding => {
                let after = stream.position()?;
                match skip_padding(&mut stream) {
                    Ok(skipped) => {
                        if skipped > 0 {
                            log::debug!("skipped {skipped} padding byte(s) at offset {after}");
                        }
                        padding_bytes += skipped;
                        State::Scanning
                    }
                    Err(error) => State::Failed { error, resume_at: after },
                }
            }
            State::Done => {
                log::info!("split {} segment(s), {} padding byte(s)", segments.len(), padding_bytes);
                return Ok(SplitReport {
                    input: None,
                    input_size,
                    segments,
                    padding_bytes,
                    finished_at: Utc::now().timestamp(),
                });
            }
            State::Failed { error, resume_at } => {
                log::error!(
                    "segment {} at offset {resume_at}: {} ({error})",
                    segments.len(), error.kind(),
                );
                let path = opts.remainder_path();
                match save_remainder(&mut stream, resume_at, &path) {
                    Ok(n)  => log::warn!("wrote {n} unread byte(s) to {}", path.display()),
                    Err(e) => log::warn!("could not save remaining input to {}: {e}", path.display()),
                }
                return Err(error);
            }
        };
    }
}

/// Open `path` read-only and run [`split_stream`] on it.
pub fn split_file<P: AsRef<Path>>(path: P, opts: &SplitOptions) -> Result<SplitReport, SplitError> {
    let path = path.as_ref();
    let mut report = split_stream(File::open(path)?, opts)?;
    report.input = Some(path.to_owned());
    Ok(report)
}

/// Sniff, size and extract one segment: `Ok(None)` at end of stream.
fn next_segment<R: Read + Seek>(
    stream: &mut PeekStream<R>,
    index:  usize,
    opts:   &SplitOptions,
) -> Result<Option<ExtractedSegment>, SplitError> {
    let Some(format) = sniff(stream)? else {
        return Ok(None);
    };
    let segment = Segment::measure(stream, index, format)?;
    log::info!(
        "segment {index}: detected {format} at offset {}, {} bytes",
        segment.offset, segment.length,
    );
    extract_segment(stream, &segment, &opts.segment_path(index)).map(Some)
}

/// Copy everything from `from` to end of stream into `path`, truncating any
/// existing file.  On failure the file is removed so a stale or partial
/// remainder is never mistaken for this run's.
fn save_remainder<R: Read + Seek>(stream: &mut PeekStream<R>, from: u64, path: &Path) -> Result<u64, SplitError> {
    let result = stream
        .seek_to(from)
        .and_then(|()| OpenOptions::new().write(true).create(true).truncate(true).open(path))
        .and_then(|mut file| stream.drain_to(&mut file));
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    Ok(result?)
}

// ── Dry run ──────────────────────────────────────────────────────────────────

/// Locate every segment without extracting anything.
pub fn scan<R: Read + Seek>(reader: R) -> Result<Vec<Segment>, SplitError> {
    let mut stream = PeekStream::new(reader);
    let mut segments = Vec::new();
    while let Some(format) = sniff(&mut stream)? {
        let segment = Segment::measure(&mut stream, segments.len(), format)?;
        stream.seek_to(segment.end())?;
        skip_padding(&mut stream)?;
        segments.push(segment);
    }
    Ok(segments)
}

/// Open `path` read-only and run [`scan`] on it.
pub fn scan_file<P: AsRef<Path>>(path: P) -> Result<Vec<Segment>, SplitError> {
    scan(File::open(path)?)
}
