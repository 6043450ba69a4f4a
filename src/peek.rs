//! Cursor-peeking stream: non-consuming lookahead over a seekable source.
//!
//! Every peek is expressed through [`PeekStream::restoring`], which records
//! the cursor, runs the read, and seeks back on every exit path.  A sizer
//! built on these primitives therefore cannot leave the cursor displaced,
//! whether it returns a length or an error.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::SplitError;

pub struct PeekStream<R> {
    inner: R,
}

impl<R: Read + Seek> PeekStream<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Absolute cursor offset.
    pub fn position(&mut self) -> io::Result<u64> {
        self.inner.stream_position()
    }

    pub fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    /// Move the cursor forward by `n` bytes and return the new position.
    pub fn advance(&mut self, n: u64) -> io::Result<u64> {
        let pos = self.position()?;
        let target = pos.checked_add(n).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek target overflows u64")
        })?;
        self.inner.seek(SeekFrom::Start(target))
    }

    /// Run `f`, then put the cursor back where it was, even when `f` fails.
    ///
    /// An error from `f` wins over an error from the restoring seek.
    pub fn restoring<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<io::Error>,
    {
        let pos = self.position()?;
        let result = f(self);
        let restored = self.inner.seek(SeekFrom::Start(pos));
        match (result, restored) {
            (Ok(v), Ok(_))  => Ok(v),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _)     => Err(e),
        }
    }

    /// Read up to `n` bytes at the cursor without consuming them.
    /// Returns fewer than `n` bytes only at end of stream.
    pub fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        self.peek_at(0, n)
    }

    /// Read up to `n` bytes starting `offset` bytes past the cursor without
    /// moving the cursor.
    pub fn peek_at(&mut self, offset: u64, n: usize) -> io::Result<Vec<u8>> {
        self.restoring(|s| {
            if offset > 0 {
                s.advance(offset)?;
            }
            let mut buf = Vec::with_capacity(n);
            (&mut s.inner).take(n as u64).read_to_end(&mut buf)?;
            Ok(buf)
        })
    }

    /// Like [`peek_at`](Self::peek_at) but a short read is a
    /// [`SplitError::TruncatedInput`] naming the structure being read.
    pub fn peek_exact_at(
        &mut self,
        offset: u64,
        n:      usize,
        what:   &'static str,
    ) -> Result<Vec<u8>, SplitError> {
        let buf = self.peek_at(offset, n)?;
        if buf.len() < n {
            let base = self.position()?;
            return Err(SplitError::TruncatedInput {
                offset:    base + offset,
                what,
                needed:    n as u64,
                available: buf.len() as u64,
            });
        }
        Ok(buf)
    }

    /// Bytes between the cursor and end of stream.
    pub fn remaining(&mut self) -> io::Result<u64> {
        self.restoring(|s| {
            let pos = s.position()?;
            let end = s.inner.seek(SeekFrom::End(0))?;
            Ok(end.saturating_sub(pos))
        })
    }

    /// Fail with [`SplitError::TruncatedInput`] unless at least `len` bytes
    /// follow the cursor.
    pub fn ensure_available(&mut self, len: u64, what: &'static str) -> Result<(), SplitError> {
        let available = self.remaining()?;
        if available < len {
            return Err(SplitError::TruncatedInput {
                offset: self.position()?,
                what,
                needed: len,
                available,
            });
        }
        Ok(())
    }

    /// Copy everything from the cursor to end of stream into `out`.
    pub fn drain_to<W: Write>(&mut self, out: &mut W) -> io::Result<u64> {
        io::copy(&mut self.inner, out)
    }
}

impl<R: Read> Read for PeekStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
