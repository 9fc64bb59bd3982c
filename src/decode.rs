use std::any::Any;
use std::rc::Rc;
use std::{error, fmt};

use crate::buf::{self, Cursor};
use crate::registry::{self, TypeInfo};
use crate::tag::Tag;

/// Decoder-side format errors.
#[derive(Debug, Clone)]
pub enum Error {
    UnexpectedTag { expected: &'static str, got: u8 },
    ReservedTag(u8),
    BadUintWidth(u8),
    BadBool(u8),
    BadTopLevel(u64),
    TypeNumOutOfRange(u64),
    RefOutOfRange(u64),
    RefTypeMismatch(&'static str),
    UnknownTypeName(String),
    ValueOverflow,
    Read(buf::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedTag { expected, got } => {
                write!(f, "expected {expected}, found tag byte {got}")
            }
            Self::ReservedTag(b) => write!(f, "reserved tag byte {b}"),
            Self::BadUintWidth(w) => write!(f, "integer width byte {w} is neither 4 nor 8"),
            Self::BadBool(b) => write!(f, "boolean byte {b} is neither 0 nor 1"),
            Self::BadTopLevel(n) => {
                write!(f, "top-level value is a {n}-element list, expected 2")
            }
            Self::TypeNumOutOfRange(n) => write!(f, "type number {n} out of range"),
            Self::RefOutOfRange(n) => write!(f, "record reference {n} out of range"),
            Self::RefTypeMismatch(name) => {
                write!(f, "back-reference does not resolve to a `{name}` record")
            }
            Self::UnknownTypeName(name) => write!(f, "type name `{name}` is not registered"),
            Self::ValueOverflow => write!(f, "decoded integer too big"),
            Self::Read(err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl From<buf::Error> for Error {
    fn from(err: buf::Error) -> Self {
        Self::Read(err)
    }
}

/// Outcome of [`Decoder::start_struct`].
#[derive(Debug, Clone)]
pub enum StructStart {
    /// The record was encoded as null.
    Nil,
    /// Back-reference to a record decoded earlier in this stream.
    Shared(Rc<dyn Any>),
    /// A new record body follows. The caller allocates the record and hands
    /// it to [`Decoder::store_ref`] before decoding any field, so that a
    /// cycle back to the record resolves to the record itself.
    Inline,
}

/// Streaming decoder over a complete in-memory buffer.
///
/// The type table is materialized from the stream's prelude on the first
/// [`Decoder::decode`] call and shared by the rest. Not for concurrent use.
pub struct Decoder<'input> {
    cursor: Cursor<'input>,
    /// Type descriptors in stream numbering, from the prelude.
    type_infos: Option<Vec<TypeInfo>>,
    /// Previously decoded records in sighting order; index = record number.
    refs: Vec<Rc<dyn Any>>,
}

impl<'input> Decoder<'input> {
    #[must_use]
    pub fn new(buf: &'input [u8]) -> Self {
        Self {
            cursor: Cursor::new(buf),
            type_infos: None,
            refs: Vec::new(),
        }
    }

    /// Whether the whole input has been consumed.
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.cursor.is_at_end()
    }

    pub fn decode_uint(&mut self) -> Result<u64, Error> {
        let b = self.cursor.read_byte()?;
        if Tag::is_immediate(b) {
            return Ok(u64::from(b));
        }
        match Tag::try_from(b) {
            Ok(Tag::NBytes) => match self.cursor.read_byte()? {
                4 => Ok(u64::from(self.cursor.read_uint32()?)),
                8 => Ok(self.cursor.read_uint64()?),
                w => Err(Error::BadUintWidth(w)),
            },
            Ok(_) => Err(Error::UnexpectedTag {
                expected: "unsigned integer",
                got: b,
            }),
            Err(_) => Err(Error::ReservedTag(b)),
        }
    }

    /// Unfold the zig-zag transform: even back to non-negative, odd back
    /// to negative.
    pub fn decode_int(&mut self) -> Result<i64, Error> {
        let u = self.decode_uint()?;
        Ok(if u & 1 == 0 {
            (u >> 1) as i64
        } else {
            !(u >> 1) as i64
        })
    }

    pub fn decode_float(&mut self) -> Result<f64, Error> {
        Ok(f64::from_bits(self.decode_uint()?))
    }

    pub fn decode_bool(&mut self) -> Result<bool, Error> {
        match self.cursor.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::BadBool(b)),
        }
    }

    /// Borrowed view of a length-prefixed byte run. Callers that outlive
    /// the input buffer must copy.
    pub fn decode_bytes(&mut self) -> Result<&'input [u8], Error> {
        self.expect_tag(Tag::NBytes, "length-prefixed bytes")?;
        let n = self.decode_len()?;
        Ok(self.cursor.read_bytes(n)?)
    }

    pub fn decode_string(&mut self) -> Result<&'input str, Error> {
        self.expect_tag(Tag::NBytes, "length-prefixed string")?;
        let n = self.decode_len()?;
        Ok(self.cursor.read_string(n)?)
    }

    /// The element count of a fixed-length sequence, or `None` for the
    /// null sequence. Decoding the elements is the caller's business.
    pub fn start_list(&mut self) -> Result<Option<u64>, Error> {
        let b = self.cursor.read_byte()?;
        match Tag::try_from(b) {
            Ok(Tag::Nil) => Ok(None),
            Ok(Tag::NValues) => Ok(Some(self.decode_uint()?)),
            _ => Err(Error::UnexpectedTag {
                expected: "sequence",
                got: b,
            }),
        }
    }

    pub fn start_struct(&mut self) -> Result<StructStart, Error> {
        let b = self.cursor.read_byte()?;
        match Tag::try_from(b) {
            Ok(Tag::Nil) => Ok(StructStart::Nil),
            Ok(Tag::Start) => Ok(StructStart::Inline),
            Ok(Tag::Ref) => {
                let index = self.decode_uint()?;
                let record = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.refs.get(i))
                    .ok_or(Error::RefOutOfRange(index))?;
                Ok(StructStart::Shared(Rc::clone(record)))
            }
            _ => Err(Error::UnexpectedTag {
                expected: "record",
                got: b,
            }),
        }
    }

    /// Assign the next record number to a newly allocated record.
    pub fn store_ref(&mut self, record: Rc<dyn Any>) {
        self.refs.push(record);
    }

    /// The next field number, or `None` when the record body is over (the
    /// closing byte is consumed).
    pub fn next_struct_field(&mut self) -> Result<Option<u64>, Error> {
        if self.cursor.cur_byte()? == Tag::End as u8 {
            self.cursor.read_byte()?;
            return Ok(None);
        }
        Ok(Some(self.decode_uint()?))
    }

    /// Skip the value of a field number this consumer does not recognize.
    /// The arguments identify the field for future diagnostics.
    pub fn unknown_field(&mut self, _type_name: &str, _field_num: u64) -> Result<(), Error> {
        self.skip()
    }

    /// Advance the cursor past exactly one encoded value of any shape.
    ///
    /// Known tags win over the immediate reading of bytes 246-248, so
    /// unknown fields holding sequences, back-references or record bodies
    /// skip correctly.
    fn skip(&mut self) -> Result<(), Error> {
        let b = self.cursor.read_byte()?;
        match Tag::try_from(b) {
            Ok(Tag::Nil) => Ok(()),
            Ok(Tag::NBytes) => {
                let n = self.decode_len()?;
                self.cursor.read_bytes(n)?;
                Ok(())
            }
            Ok(Tag::NValues) => {
                let n = self.decode_uint()?;
                for _ in 0..n {
                    self.skip()?;
                }
                Ok(())
            }
            Ok(Tag::Ref) => {
                self.decode_uint()?;
                Ok(())
            }
            Ok(Tag::Start) => {
                while self.cursor.cur_byte()? != Tag::End as u8 {
                    self.skip()?;
                }
                self.cursor.read_byte()?;
                Ok(())
            }
            Ok(Tag::End) => Err(Error::UnexpectedTag {
                expected: "value",
                got: b,
            }),
            Err(_) if Tag::is_immediate(b) => Ok(()),
            Err(_) => Err(Error::ReservedTag(b)),
        }
    }

    /// Decode one top-level value. `None` is the null value.
    pub fn decode(&mut self) -> Result<Option<Box<dyn Any>>, Error> {
        self.materialize_types()?;
        if self.cursor.cur_byte()? == 0 {
            self.cursor.read_byte()?;
            return Ok(None);
        }
        let n = self.start_list()?.ok_or(Error::UnexpectedTag {
            expected: "top-level value",
            got: Tag::Nil as u8,
        })?;
        if n != 2 {
            return Err(Error::BadTopLevel(n));
        }
        let num = self.decode_uint()?;
        let info = self.type_info(num)?;
        info.decode(self).map(Some)
    }

    /// Rebuild the stream's type numbering from the prelude, once.
    fn materialize_types(&mut self) -> Result<(), Error> {
        if self.type_infos.is_some() {
            return Ok(());
        }
        let count = self.start_list()?.ok_or(Error::UnexpectedTag {
            expected: "type name list",
            got: Tag::Nil as u8,
        })?;
        let mut infos = Vec::new();
        for _ in 0..count {
            let name = self.decode_string()?;
            let info = registry::lookup_by_name(name)
                .ok_or_else(|| Error::UnknownTypeName(name.to_owned()))?;
            infos.push(info);
        }
        self.type_infos = Some(infos);
        Ok(())
    }

    fn type_info(&self, num: u64) -> Result<TypeInfo, Error> {
        let infos = self.type_infos.as_deref().unwrap_or_default();
        usize::try_from(num)
            .ok()
            .and_then(|i| infos.get(i))
            .copied()
            .ok_or(Error::TypeNumOutOfRange(num))
    }

    fn expect_tag(&mut self, want: Tag, expected: &'static str) -> Result<(), Error> {
        let b = self.cursor.read_byte()?;
        if b == want as u8 {
            Ok(())
        } else {
            Err(Error::UnexpectedTag { expected, got: b })
        }
    }

    fn decode_len(&mut self) -> Result<usize, Error> {
        usize::try_from(self.decode_uint()?).map_err(|_| Error::ValueOverflow)
    }
}

impl fmt::Debug for Decoder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("cursor", &self.cursor)
            .field("types", &self.type_infos.as_deref().unwrap_or_default().len())
            .field("refs", &self.refs.len())
            .finish()
    }
}

#[test]
fn test_uint_forms() {
    let mut d = Decoder::new(&[0, 248, 250, 4, 249, 0, 0, 0, 250, 8, 0, 0, 0, 0, 1, 0, 0, 0]);
    assert_eq!(0, d.decode_uint().unwrap());
    assert_eq!(248, d.decode_uint().unwrap());
    assert_eq!(249, d.decode_uint().unwrap());
    assert_eq!(1 << 32, d.decode_uint().unwrap());
    assert!(d.is_at_end());
}

#[test]
fn test_uint_rejects_bad_width() {
    let mut d = Decoder::new(&[250, 2, 0, 0]);
    assert!(matches!(d.decode_uint(), Err(Error::BadUintWidth(2))));
}

#[test]
fn test_uint_rejects_reserved_tag() {
    for b in 251..=254u8 {
        let buf = [b];
        let mut d = Decoder::new(&buf);
        assert!(matches!(d.decode_uint(), Err(Error::ReservedTag(got)) if got == b));
    }
}

#[test]
fn test_int_unfold() {
    let mut d = Decoder::new(&[1, 2, 3]);
    assert_eq!(-1, d.decode_int().unwrap());
    assert_eq!(1, d.decode_int().unwrap());
    assert_eq!(-2, d.decode_int().unwrap());
}

#[test]
fn test_bool_bytes() {
    let mut d = Decoder::new(&[0, 1, 2]);
    assert!(!d.decode_bool().unwrap());
    assert!(d.decode_bool().unwrap());
    assert!(matches!(d.decode_bool(), Err(Error::BadBool(2))));
}

#[test]
fn test_truncated_bytes_run() {
    let mut d = Decoder::new(&[250, 5, b'a', b'b']);
    assert!(matches!(
        d.decode_bytes(),
        Err(Error::Read(buf::Error::BufferOverflow))
    ));
}

#[test]
fn test_skip_each_shape() {
    // immediate, nil, bytes, nested list, ref, record body, then a marker
    let mut d = Decoder::new(&[
        7, 255, 250, 2, 9, 9, 246, 2, 1, 250, 1, 9, 247, 0, 248, 0, 250, 1, 9, 249, 42,
    ]);
    for _ in 0..6 {
        d.skip().unwrap();
    }
    assert_eq!(42, d.decode_uint().unwrap());
    assert!(d.is_at_end());
}

#[test]
fn test_skip_rejects_stray_end() {
    let mut d = Decoder::new(&[249]);
    assert!(matches!(d.skip(), Err(Error::UnexpectedTag { got: 249, .. })));
}

#[test]
fn test_ref_out_of_range() {
    let mut d = Decoder::new(&[247, 5]);
    assert!(matches!(d.start_struct(), Err(Error::RefOutOfRange(5))));
}
