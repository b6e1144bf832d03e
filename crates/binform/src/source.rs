//! Byte providers feeding the format parsers.
//!
//! A [`Source`] hands out bytes with one-byte lookahead and a running
//! position. Parsers only ever consume through this trait, so the same
//! state machine runs over a borrowed slice, a `std::io::Read` stream, or
//! a plain byte iterator.

use std::io;

use crate::error::{DecodeError, ErrorKind};
use crate::limits::{DEFAULT_BUFFER_SIZE, READ_CHUNK};

/// A positioned byte provider with single-byte lookahead.
///
/// `read` may return fewer bytes than requested; the provided
/// [`read_exact_into`](Source::read_exact_into) loop turns a genuine short
/// read into [`ErrorKind::UnexpectedEof`] with the caller's context string.
pub trait Source {
    /// Returns the next byte without consuming it.
    fn peek(&mut self) -> Result<Option<u8>, DecodeError>;

    /// Consumes and returns the next byte.
    fn get(&mut self) -> Result<Option<u8>, DecodeError>;

    /// Reads up to `out.len()` bytes. Returns 0 only at end of input.
    fn read(&mut self, out: &mut [u8]) -> Result<usize, DecodeError>;

    /// Skips up to `count` bytes, returning how many were actually skipped.
    fn ignore(&mut self, count: u64) -> Result<u64, DecodeError>;

    /// Number of bytes consumed so far.
    fn position(&self) -> u64;

    /// Fills `out` completely or fails with `UnexpectedEof { context }`.
    fn read_exact_into(
        &mut self,
        out: &mut [u8],
        context: &'static str,
    ) -> Result<(), DecodeError> {
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read(&mut out[filled..])?;
            if n == 0 {
                return Err(DecodeError::new(
                    ErrorKind::UnexpectedEof { context },
                    self.position(),
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Reads a length-prefixed payload into `out` (cleared first).
    ///
    /// Grows the buffer in bounded steps, so a forged declared length runs
    /// into `UnexpectedEof` instead of forcing one huge allocation up front.
    fn read_bytes_into(
        &mut self,
        len: u64,
        out: &mut Vec<u8>,
        context: &'static str,
    ) -> Result<(), DecodeError> {
        let total = usize::try_from(len).map_err(|_| {
            DecodeError::new(ErrorKind::InvalidLength { context }, self.position())
        })?;
        out.clear();
        let mut remaining = total;
        while remaining > 0 {
            let step = remaining.min(READ_CHUNK);
            let start = out.len();
            out.resize(start + step, 0);
            self.read_exact_into(&mut out[start..], context)?;
            remaining -= step;
        }
        Ok(())
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        let mut buf = [0u8; 1];
        self.read_exact_into(&mut buf, context)?;
        Ok(buf[0])
    }

    fn read_i8(&mut self, context: &'static str) -> Result<i8, DecodeError> {
        Ok(self.read_u8(context)? as i8)
    }

    fn read_u16_be(&mut self, context: &'static str) -> Result<u16, DecodeError> {
        let mut buf = [0u8; 2];
        self.read_exact_into(&mut buf, context)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32_be(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        self.read_exact_into(&mut buf, context)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u64_be(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        self.read_exact_into(&mut buf, context)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_u16_le(&mut self, context: &'static str) -> Result<u16, DecodeError> {
        let mut buf = [0u8; 2];
        self.read_exact_into(&mut buf, context)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        self.read_exact_into(&mut buf, context)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        self.read_exact_into(&mut buf, context)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_f32_be(&mut self, context: &'static str) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32_be(context)?))
    }

    fn read_f64_be(&mut self, context: &'static str) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64_be(context)?))
    }

    fn read_f64_le(&mut self, context: &'static str) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64_le(context)?))
    }
}

/// In-memory source over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl Source for SliceSource<'_> {
    fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        Ok(self.data.get(self.pos).copied())
    }

    fn get(&mut self) -> Result<Option<u8>, DecodeError> {
        match self.data.get(self.pos).copied() {
            Some(b) => {
                self.pos += 1;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, DecodeError> {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn ignore(&mut self, count: u64) -> Result<u64, DecodeError> {
        let n = u64::try_from(self.remaining()).unwrap_or(u64::MAX).min(count);
        self.pos += n as usize;
        Ok(n)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }
}

/// Buffered source over any `std::io::Read`.
///
/// Refills a fixed-size chunk buffer on demand; values that straddle a
/// refill boundary are reassembled by the `Source` read loop. Reads larger
/// than the buffer bypass it entirely once the buffered bytes are drained.
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: R,
    buffer: Box<[u8]>,
    buf_len: usize,
    buf_pos: usize,
    position: u64,
}

impl<R: io::Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Creates a source with an explicit refill chunk size (minimum 1).
    pub fn with_buffer_size(inner: R, buffer_size: usize) -> Self {
        Self {
            inner,
            buffer: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
            buf_len: 0,
            buf_pos: 0,
            position: 0,
        }
    }

    /// Returns the wrapped reader, discarding any buffered bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn io_error(&self, e: io::Error) -> DecodeError {
        DecodeError::new(
            ErrorKind::Io { message: e.to_string() },
            self.position,
        )
    }

    fn read_inner(&mut self, out: &mut [u8]) -> Result<usize, DecodeError> {
        loop {
            match self.inner.read(out) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    fn fill(&mut self) -> Result<(), DecodeError> {
        self.buf_pos = 0;
        self.buf_len = 0;
        let mut buffer = std::mem::take(&mut self.buffer);
        let result = self.read_inner(&mut buffer);
        self.buffer = buffer;
        self.buf_len = result?;
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.buf_len - self.buf_pos
    }
}

impl<R: io::Read> Source for ReadSource<R> {
    fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        if self.buffered() == 0 {
            self.fill()?;
            if self.buf_len == 0 {
                return Ok(None);
            }
        }
        Ok(Some(self.buffer[self.buf_pos]))
    }

    fn get(&mut self) -> Result<Option<u8>, DecodeError> {
        match self.peek()? {
            Some(b) => {
                self.buf_pos += 1;
                self.position += 1;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, DecodeError> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.buffered() == 0 {
            if out.len() >= self.buffer.len() {
                // Large read with nothing buffered: skip the copy through
                // the chunk buffer.
                let n = self.read_inner(out)?;
                self.position += n as u64;
                return Ok(n);
            }
            self.fill()?;
            if self.buf_len == 0 {
                return Ok(0);
            }
        }
        let n = self.buffered().min(out.len());
        out[..n].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + n]);
        self.buf_pos += n;
        self.position += n as u64;
        Ok(n)
    }

    fn ignore(&mut self, count: u64) -> Result<u64, DecodeError> {
        let mut skipped = 0u64;
        while skipped < count {
            if self.buffered() == 0 {
                self.fill()?;
                if self.buf_len == 0 {
                    break;
                }
            }
            let step = u64::try_from(self.buffered())
                .unwrap_or(u64::MAX)
                .min(count - skipped);
            self.buf_pos += step as usize;
            self.position += step;
            skipped += step;
        }
        Ok(skipped)
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Source over a plain byte iterator.
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
    peeked: Option<u8>,
    position: u64,
}

impl<I: Iterator<Item = u8>> IterSource<I> {
    pub fn new<T: IntoIterator<IntoIter = I>>(into: T) -> Self {
        Self {
            iter: into.into_iter(),
            peeked: None,
            position: 0,
        }
    }
}

impl<I: Iterator<Item = u8>> Source for IterSource<I> {
    fn peek(&mut self) -> Result<Option<u8>, DecodeError> {
        if self.peeked.is_none() {
            self.peeked = self.iter.next();
        }
        Ok(self.peeked)
    }

    fn get(&mut self) -> Result<Option<u8>, DecodeError> {
        let b = match self.peeked.take() {
            Some(b) => Some(b),
            None => self.iter.next(),
        };
        if b.is_some() {
            self.position += 1;
        }
        Ok(b)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, DecodeError> {
        let mut n = 0;
        while n < out.len() {
            match self.get()? {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn ignore(&mut self, count: u64) -> Result<u64, DecodeError> {
        let mut skipped = 0;
        while skipped < count {
            if self.get()?.is_none() {
                break;
            }
            skipped += 1;
        }
        Ok(skipped)
    }

    fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_source_basics() {
        let mut src = SliceSource::new(&[10, 20, 30]);
        assert_eq!(src.position(), 0);
        assert_eq!(src.peek().unwrap(), Some(10));
        assert_eq!(src.position(), 0);
        assert_eq!(src.get().unwrap(), Some(10));
        assert_eq!(src.position(), 1);

        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [20, 30]);
        assert_eq!(src.get().unwrap(), None);
        assert_eq!(src.peek().unwrap(), None);
        assert_eq!(src.position(), 3);
    }

    #[test]
    fn test_slice_source_ignore_clamps() {
        let mut src = SliceSource::new(&[1, 2, 3, 4]);
        assert_eq!(src.ignore(2).unwrap(), 2);
        assert_eq!(src.ignore(100).unwrap(), 2);
        assert_eq!(src.position(), 4);
    }

    #[test]
    fn test_fixed_width_readers() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x78, 0x56, 0x34, 0x12];
        let mut src = SliceSource::new(&data);
        assert_eq!(src.read_u16_be("n").unwrap(), 0x1234);
        assert_eq!(src.read_u16_le("n").unwrap(), 0x7856);
        assert_eq!(src.read_u32_le("n").unwrap(), 0x12345678);
        assert_eq!(src.position(), 8);
    }

    #[test]
    fn test_short_read_reports_context_and_position() {
        let mut src = SliceSource::new(&[0xAB]);
        let err = src.read_u32_be("array count").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::UnexpectedEof { context: "array count" }
        ));
        assert_eq!(err.position(), 1);
        assert_eq!(err.code(), "E001");
    }

    #[test]
    fn test_read_bytes_into_forged_length_hits_eof() {
        let data = vec![0u8; 64];
        let mut src = SliceSource::new(&data);
        let mut out = Vec::new();
        let err = src
            .read_bytes_into(1 << 40, &mut out, "byte string")
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnexpectedEof { .. }));
        // Growth is stepwise, so the buffer never ballooned past one chunk.
        assert!(out.capacity() <= 2 * READ_CHUNK);
    }

    #[test]
    fn test_read_source_straddles_refills() {
        let data: Vec<u8> = (0..=49u8).collect();
        let mut src = ReadSource::with_buffer_size(io::Cursor::new(data.clone()), 3);

        assert_eq!(src.peek().unwrap(), Some(0));
        assert_eq!(src.get().unwrap(), Some(0));

        // A four-byte value crossing two refill boundaries.
        assert_eq!(src.read_u32_be("n").unwrap(), u32::from_be_bytes([1, 2, 3, 4]));
        assert_eq!(src.position(), 5);

        // Skip across refills.
        assert_eq!(src.ignore(10).unwrap(), 10);
        assert_eq!(src.position(), 15);
        assert_eq!(src.get().unwrap(), Some(15));

        // Large read bypasses the 3-byte buffer.
        let mut big = [0u8; 20];
        src.read_exact_into(&mut big, "payload").unwrap();
        assert_eq!(&big[..], &data[16..36]);

        // Drain the rest, then EOF.
        assert_eq!(src.ignore(u64::MAX).unwrap(), 14);
        assert_eq!(src.get().unwrap(), None);
        assert_eq!(src.position(), 50);
    }

    #[test]
    fn test_read_source_io_error_surfaces() {
        struct Failing;
        impl io::Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk gone"))
            }
        }
        let mut src = ReadSource::with_buffer_size(Failing, 4);
        let err = src.peek().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io { .. }));
        assert_eq!(err.code(), "E013");
    }

    #[test]
    fn test_iter_source_parity_with_slice() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut a = SliceSource::new(&data);
        let mut b = IterSource::new(data.iter().copied());

        assert_eq!(a.peek().unwrap(), b.peek().unwrap());
        assert_eq!(
            a.read_u32_be("n").unwrap(),
            b.read_u32_be("n").unwrap()
        );
        assert_eq!(a.position(), b.position());
        assert_eq!(a.get().unwrap(), b.get().unwrap());
        assert_eq!(a.get().unwrap(), None);
        assert_eq!(b.get().unwrap(), None);
    }
}
