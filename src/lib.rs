//! Self-describing tagged binary codec for object graphs with shared records
//!
//! Records reached through more than one pointer are encoded once and
//! referenced by position everywhere else, so decoded graphs keep the
//! sharing structure of the originals, cycles included.

/// Byte buffer primitives
pub mod buf;
/// Decoder and format errors
pub mod decode;
/// Encoder
pub mod encode;
/// Type registry and built-in types
pub mod registry;
/// Tag byte vocabulary
pub mod tag;

pub use self::decode::{Decoder, Error as DecodeError, StructStart};
pub use self::encode::Encoder;
pub use self::registry::{DecodeFn, EncodeFn, TypeInfo, register};
pub use self::tag::Tag;
