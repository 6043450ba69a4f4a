pub mod error;
pub mod peek;
pub mod sniff;
pub mod zstd_frame;
pub mod cpio;
pub mod extract;
pub mod split;

pub use error::SplitError;
pub use peek::PeekStream;
pub use sniff::{SegmentFormat, sniff};
pub use extract::{Segment, ExtractedSegment, extract_segment, skip_padding};
pub use split::{SplitOptions, SplitReport, split_stream, split_file, scan, scan_file};
