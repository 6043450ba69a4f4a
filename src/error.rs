//! Error taxonomy shared by the sniffer, both sizers, the extractor and the
//! driver loop.
//!
//! Every variant is fatal to a split run: a misidentified boundary would
//! desynchronize detection of every segment after it, so nothing is retried
//! or skipped.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitError {
    /// Unknown or unsupported magic bytes, including the legacy cpio
    /// variants that are recognized but not implemented.
    #[error("Unrecognized {context} magic {magic} at offset {offset}")]
    UnrecognizedFormat {
        offset:  u64,
        context: &'static str,
        magic:   String,
    },
    /// Fewer bytes are available than a structural field requires.
    #[error("Truncated input at offset {offset}: {what} needs {needed} bytes, {available} available")]
    TruncatedInput {
        offset:    u64,
        what:      &'static str,
        needed:    u64,
        available: u64,
    },
    /// A decoded field violates a format invariant.
    #[error("Corrupt {what} at offset {offset}: {reason}")]
    CorruptStructure {
        offset: u64,
        what:   &'static str,
        reason: String,
    },
    /// The byte range was structurally well-formed but did not decompress.
    #[error("Payload of segment {index} (offset {offset}) failed to decode: {source}")]
    PayloadDecodeFailure {
        index:  usize,
        offset: u64,
        #[source]
        source: io::Error,
    },
    /// The destination file already exists; outputs are never overwritten.
    #[error("Output {} already exists", path.display())]
    OutputCollision { path: PathBuf },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SplitError {
    /// Short stable name of the variant, used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SplitError::UnrecognizedFormat { .. }   => "unrecognized-format",
            SplitError::TruncatedInput { .. }       => "truncated-input",
            SplitError::CorruptStructure { .. }     => "corrupt-structure",
            SplitError::PayloadDecodeFailure { .. } => "payload-decode-failure",
            SplitError::OutputCollision { .. }      => "output-collision",
            SplitError::Io(_)                       => "io",
        }
    }
}
