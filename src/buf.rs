use std::{error, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BufferOverflow,
    InvalidUtf8,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BufferOverflow => "read past end of buffer",
            Self::InvalidUtf8 => "string payload is not valid utf-8",
        })
    }
}

impl error::Error for Error {}

/// Append-only byte buffer for the encoder side.
///
/// Multi-byte integers are little-endian.
#[derive(Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn write_byte(&mut self, b: u8) {
        self.buffer.push(b);
    }

    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    #[inline]
    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_uint32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_uint64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Detach the accumulated bytes, leaving the writer empty.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// Index-advancing reader over a complete input buffer.
///
/// Reads borrow from the input; nothing is copied.
#[derive(Clone)]
pub struct Cursor<'input> {
    buffer: &'input [u8],
    offset: usize,
}

impl<'input> Cursor<'input> {
    #[must_use]
    pub fn new(buffer: &'input [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Peek at the next byte without advancing.
    #[inline]
    pub fn cur_byte(&self) -> Result<u8, Error> {
        self.buffer
            .get(self.offset)
            .copied()
            .ok_or(Error::BufferOverflow)
    }

    #[inline]
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        let b = self.cur_byte()?;
        self.offset += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'input [u8], Error> {
        let end = self.offset.checked_add(n).ok_or(Error::BufferOverflow)?;
        let bytes = self
            .buffer
            .get(self.offset..end)
            .ok_or(Error::BufferOverflow)?;
        self.offset = end;
        Ok(bytes)
    }

    pub fn read_string(&mut self, n: usize) -> Result<&'input str, Error> {
        std::str::from_utf8(self.read_bytes(n)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn read_uint32(&mut self) -> Result<u32, Error> {
        let (chunk, _) = self
            .buffer
            .get(self.offset..)
            .unwrap_or_default()
            .split_first_chunk::<4>()
            .ok_or(Error::BufferOverflow)?;
        self.offset += 4;
        Ok(u32::from_le_bytes(*chunk))
    }

    pub fn read_uint64(&mut self) -> Result<u64, Error> {
        let (chunk, _) = self
            .buffer
            .get(self.offset..)
            .unwrap_or_default()
            .split_first_chunk::<8>()
            .ok_or(Error::BufferOverflow)?;
        self.offset += 8;
        Ok(u64::from_le_bytes(*chunk))
    }
}

struct CursorDebugBytes<'a>(&'a [u8]);

impl fmt::Debug for CursorDebugBytes<'_> {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[0x")?;
        for &b in self.0.iter().take(200) {
            write!(f, "{b:02x}")?;
        }
        if self.0.len() > 200 {
            f.write_str("...")?;
        }
        write!(f, "; {}]", self.0.len())
    }
}

impl fmt::Debug for Cursor<'_> {
    /// Debug-print only the unread part of the internal buffer
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffer = CursorDebugBytes(self.buffer.get(self.offset..).unwrap_or_default());
        f.debug_struct("Cursor")
            .field("offset", &self.offset)
            .field("buffer", &buffer)
            .finish()
    }
}

#[test]
fn test_writer() {
    let mut w = Writer::new();
    assert!(w.is_empty());
    w.write_byte(0xab);
    w.write_bytes(&[1, 2]);
    w.write_string("hi");
    w.write_uint32(0x0403_0201);
    w.write_uint64(1);
    assert_eq!(w.len(), 17);
    assert_eq!(
        w.into_bytes(),
        [0xab, 1, 2, b'h', b'i', 1, 2, 3, 4, 1, 0, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn test_cursor_reads() {
    let mut c = Cursor::new(&[7, b'h', b'i', 1, 2, 3, 4, 8, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(7, c.cur_byte().unwrap());
    assert_eq!(7, c.read_byte().unwrap());
    assert_eq!("hi", c.read_string(2).unwrap());
    assert_eq!(0x0403_0201, c.read_uint32().unwrap());
    assert_eq!(8, c.read_uint64().unwrap());
    assert!(c.is_at_end());
    assert!(c.cur_byte().is_err());
    assert!(c.read_byte().is_err());
    assert!(c.read_uint32().is_err());
}

#[test]
fn test_cursor_bytes_borrow() {
    let data = [0, 1, 2, 3, 4];
    let mut c = Cursor::new(&data);
    assert_eq!([0, 1], c.read_bytes(2).unwrap());
    assert_eq!(3, c.remaining());
    assert!(c.read_bytes(4).is_err());
    assert_eq!(3, c.remaining());
    assert_eq!([2, 3, 4], c.read_bytes(3).unwrap());
    assert_eq!([0u8; 0], c.read_bytes(0).unwrap());
    assert!(c.read_byte().is_err());
}

#[test]
fn test_cursor_utf8() {
    let mut c = Cursor::new(&[0xff, 0xfe]);
    assert_eq!(Err(Error::InvalidUtf8), c.read_string(2));
}
