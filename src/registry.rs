use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use crate::decode::{Decoder, Error};
use crate::encode::Encoder;

/// Encodes a registered value through its erased form.
///
/// The encoder dispatches by the value's `TypeId`, so the downcast inside a
/// generated function cannot fail for values routed through
/// [`Encoder::encode`].
pub type EncodeFn = fn(&mut Encoder, &dyn Any);

/// Decodes a registered value, returning it in erased form.
pub type DecodeFn = fn(&mut Decoder<'_>) -> Result<Box<dyn Any>, Error>;

/// Descriptor for one registered type: the canonical name carried on the
/// wire and the encode/decode function pair generated for it.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    name: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeInfo {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn encode(&self, e: &mut Encoder, value: &dyn Any) {
        (self.encode)(e, value);
    }

    pub(crate) fn decode(&self, d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
        (self.decode)(d)
    }
}

#[derive(Debug, Default)]
struct Registry {
    by_name: HashMap<&'static str, TypeInfo>,
    by_witness: HashMap<TypeId, TypeInfo>,
}

impl Registry {
    fn insert<T: 'static>(&mut self, name: &'static str, encode: EncodeFn, decode: DecodeFn) {
        let witness = TypeId::of::<T>();
        if self.by_name.contains_key(name) {
            panic!("type name `{name}` registered twice");
        }
        if self.by_witness.contains_key(&witness) {
            panic!("witness type of `{name}` registered twice");
        }
        let info = TypeInfo {
            name,
            encode,
            decode,
        };
        self.by_name.insert(name, info);
        self.by_witness.insert(witness, info);
    }

    fn with_builtins() -> Self {
        let mut r = Self::default();
        r.insert::<i64>("i64", encode_i64, decode_i64);
        r.insert::<u64>("u64", encode_u64, decode_u64);
        r.insert::<isize>("isize", encode_isize, decode_isize);
        r.insert::<f64>("f64", encode_f64, decode_f64);
        r.insert::<bool>("bool", encode_bool, decode_bool);
        r.insert::<String>("string", encode_string, decode_string);
        r.insert::<Vec<u8>>("bytes", encode_bytes, decode_bytes);
        r
    }
}

/// Written during single-threaded process initialization, read-only after.
/// The lock makes late registration safe rather than fast.
static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_builtins()));

/// Register the type `T` under its canonical wire name with the function
/// pair generated for it.
///
/// `T` is the witness: values of this exact type are routed to `encode` by
/// [`Encoder::encode`], and `decode` must produce a boxed value of this
/// type. Call once per type before constructing any encoder or decoder.
///
/// # Panics
///
/// If `name` or `T` has already been registered.
pub fn register<T: 'static>(name: &'static str, encode: EncodeFn, decode: DecodeFn) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert::<T>(name, encode, decode);
}

pub(crate) fn lookup_by_witness(witness: TypeId) -> Option<TypeInfo> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_witness
        .get(&witness)
        .copied()
}

pub(crate) fn lookup_by_name(name: &str) -> Option<TypeInfo> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_name
        .get(name)
        .copied()
}

fn downcast<T: 'static>(value: &dyn Any) -> &T {
    value
        .downcast_ref::<T>()
        .expect("dispatched value does not match its registered witness type")
}

fn encode_i64(e: &mut Encoder, value: &dyn Any) {
    e.encode_int(*downcast::<i64>(value));
}

fn decode_i64(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    Ok(Box::new(d.decode_int()?))
}

fn encode_u64(e: &mut Encoder, value: &dyn Any) {
    e.encode_uint(*downcast::<u64>(value));
}

fn decode_u64(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    Ok(Box::new(d.decode_uint()?))
}

// The platform-width integer travels as i64.
fn encode_isize(e: &mut Encoder, value: &dyn Any) {
    e.encode_int(*downcast::<isize>(value) as i64);
}

fn decode_isize(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    let v = isize::try_from(d.decode_int()?).map_err(|_| Error::ValueOverflow)?;
    Ok(Box::new(v))
}

fn encode_f64(e: &mut Encoder, value: &dyn Any) {
    e.encode_float(*downcast::<f64>(value));
}

fn decode_f64(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    Ok(Box::new(d.decode_float()?))
}

fn encode_bool(e: &mut Encoder, value: &dyn Any) {
    e.encode_bool(*downcast::<bool>(value));
}

fn decode_bool(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    Ok(Box::new(d.decode_bool()?))
}

fn encode_string(e: &mut Encoder, value: &dyn Any) {
    e.encode_string(downcast::<String>(value));
}

fn decode_string(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    Ok(Box::new(d.decode_string()?.to_owned()))
}

fn encode_bytes(e: &mut Encoder, value: &dyn Any) {
    e.encode_bytes(downcast::<Vec<u8>>(value));
}

fn decode_bytes(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, Error> {
    Ok(Box::new(d.decode_bytes()?.to_vec()))
}

#[test]
fn test_builtins_registered() {
    for name in ["i64", "u64", "isize", "f64", "bool", "string", "bytes"] {
        let info = lookup_by_name(name).unwrap();
        assert_eq!(name, info.name());
    }
    assert!(lookup_by_name("no-such-type").is_none());
    assert!(lookup_by_witness(TypeId::of::<u64>()).is_some());
    assert!(lookup_by_witness(TypeId::of::<u32>()).is_none());
}
