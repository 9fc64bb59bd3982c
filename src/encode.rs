use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use crate::buf::Writer;
use crate::registry;
use crate::tag::Tag;

/// Streaming encoder.
///
/// Values are appended with the `encode_*` operations or dispatched through
/// [`Encoder::encode`]; [`Encoder::bytes`] finalizes the stream by emitting
/// the type-name prelude in front of the accumulated payload. Not for
/// concurrent use; one stream per encoder.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Writer,
    /// Per-stream type numbers, assigned in first-use order.
    type_nums: HashMap<TypeId, u64>,
    /// Canonical names of the numbered types, in number order.
    type_names: Vec<&'static str>,
    /// Record identity (address + dynamic type) to record number,
    /// assigned in first-emission order.
    seen: HashMap<(usize, TypeId), u64>,
}

impl Encoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Writer::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Payload bytes accumulated so far, excluding the prelude.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Integers below [`Tag::End`] fit the tag byte itself; larger values
    /// take the 4- or 8-byte little-endian form behind [`Tag::NBytes`] and
    /// a literal width byte.
    pub fn encode_uint(&mut self, u: u64) {
        if u < Tag::End as u64 {
            self.buf.write_byte(u as u8);
        } else if u <= u64::from(u32::MAX) {
            self.buf.write_byte(Tag::NBytes as u8);
            self.buf.write_byte(4);
            self.buf.write_uint32(u as u32);
        } else {
            self.buf.write_byte(Tag::NBytes as u8);
            self.buf.write_byte(8);
            self.buf.write_uint64(u);
        }
    }

    /// Zig-zag fold, so small magnitudes of either sign stay small.
    pub fn encode_int(&mut self, i: i64) {
        let u = if i < 0 {
            !(i as u64) << 1 | 1
        } else {
            (i as u64) << 1
        };
        self.encode_uint(u);
    }

    pub fn encode_float(&mut self, f: f64) {
        self.encode_uint(f.to_bits());
    }

    pub fn encode_bool(&mut self, b: bool) {
        self.buf.write_byte(u8::from(b));
    }

    pub fn encode_bytes(&mut self, bytes: &[u8]) {
        self.buf.write_byte(Tag::NBytes as u8);
        self.encode_uint(bytes.len() as u64);
        self.buf.write_bytes(bytes);
    }

    pub fn encode_string(&mut self, s: &str) {
        self.buf.write_byte(Tag::NBytes as u8);
        self.encode_uint(s.len() as u64);
        self.buf.write_string(s);
    }

    pub fn encode_nil(&mut self) {
        self.buf.write_byte(Tag::Nil as u8);
    }

    /// Begin a fixed-length sequence of `len` values. The caller encodes
    /// exactly `len` values afterwards.
    pub fn start_list(&mut self, len: usize) {
        self.buf.write_byte(Tag::NValues as u8);
        self.encode_uint(len as u64);
    }

    /// Begin encoding the record `record` points at.
    ///
    /// Returns `Some` when a new record body was opened: the caller emits
    /// the fields as (number, value) pairs and closes with
    /// [`Encoder::end_struct`]. Returns `None` when nothing more must be
    /// written, either because the record is null or because it was emitted
    /// earlier in this stream and a back-reference replaced it.
    ///
    /// Identity is the referent's address plus its type, so the caller must
    /// keep the graph alive until the stream is finalized.
    pub fn start_struct<'r, T: 'static>(&mut self, record: Option<&'r Rc<T>>) -> Option<&'r Rc<T>> {
        let Some(rc) = record else {
            self.encode_nil();
            return None;
        };
        let key = (Rc::as_ptr(rc) as usize, TypeId::of::<T>());
        if let Some(&index) = self.seen.get(&key) {
            self.buf.write_byte(Tag::Ref as u8);
            self.encode_uint(index);
            return None;
        }
        let index = self.seen.len() as u64;
        self.seen.insert(key, index);
        self.buf.write_byte(Tag::Start as u8);
        Some(rc)
    }

    pub fn end_struct(&mut self) {
        self.buf.write_byte(Tag::End as u8);
    }

    /// Encode one top-level value through the type registry. `None` is the
    /// null value and costs a single byte.
    ///
    /// # Panics
    ///
    /// If the value's dynamic type was never registered.
    pub fn encode(&mut self, value: Option<&dyn Any>) {
        let Some(value) = value else {
            self.buf.write_byte(0);
            return;
        };
        let witness = value.type_id();
        let Some(info) = registry::lookup_by_witness(witness) else {
            panic!("encode of unregistered type ({witness:?})");
        };
        let num = match self.type_nums.get(&witness) {
            Some(&num) => num,
            None => {
                let num = self.type_nums.len() as u64;
                self.type_nums.insert(witness, num);
                self.type_names.push(info.name());
                num
            }
        };
        self.start_list(2);
        self.encode_uint(num);
        info.encode(self, value);
    }

    /// Finalize the stream: the type-name prelude, then the payload.
    ///
    /// The prelude cannot be written earlier because types are numbered on
    /// first use, so the payload is detached here and re-appended behind a
    /// freshly written prelude.
    #[must_use]
    pub fn bytes(mut self) -> Vec<u8> {
        let payload = self.buf.take();
        let names = std::mem::take(&mut self.type_names);
        self.start_list(names.len());
        for name in names {
            self.encode_string(name);
        }
        self.buf.write_bytes(&payload);
        self.buf.into_bytes()
    }
}

#[test]
fn test_uint_shapes() {
    let mut e = Encoder::new();
    e.encode_uint(0);
    e.encode_uint(248);
    e.encode_uint(249);
    e.encode_uint(1 << 32);
    e.encode_uint(u64::MAX);
    assert_eq!(
        e.bytes(),
        [
            246, 0, // empty prelude
            0,
            248,
            250, 4, 249, 0, 0, 0,
            250, 8, 0, 0, 0, 0, 1, 0, 0, 0,
            250, 8, 255, 255, 255, 255, 255, 255, 255, 255,
        ]
    );
}

#[test]
fn test_zigzag_small_negative_is_one_byte() {
    let mut e = Encoder::new();
    e.encode_int(-1);
    e.encode_int(124);
    e.encode_int(-124);
    assert_eq!(e.bytes(), [246, 0, 1, 248, 247]);
}

#[test]
fn test_string_and_list_shapes() {
    let mut e = Encoder::new();
    e.start_list(2);
    e.encode_string("hi");
    e.encode_string("bye");
    assert_eq!(
        e.bytes(),
        [246, 0, 246, 2, 250, 2, b'h', b'i', 250, 3, b'b', b'y', b'e']
    );
}
