use num_enum::TryFromPrimitive;

/// Tag bytes introducing every encoded value.
///
/// The numeric values are fixed because they appear on the wire.
/// In integer position, any byte below [`Tag::End`] stands for itself as an
/// immediate unsigned integer. Bytes 251-254 are reserved and are rejected
/// by the decoder wherever they appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum Tag {
    /// Fixed-length sequence: a uint count follows, then that many values.
    NValues = 246,
    /// Back-reference to a previously emitted record: a uint index follows.
    Ref = 247,
    /// Start of an indeterminate-length record body.
    Start = 248,
    /// End of a [`Tag::Start`] region; also the immediate-integer boundary.
    End = 249,
    /// Length-prefixed raw bytes: a uint length follows, then the payload.
    NBytes = 250,
    /// Null marker.
    Nil = 255,
}

impl Tag {
    /// Whether `byte` stands for itself as an immediate unsigned integer.
    #[inline]
    #[must_use]
    pub const fn is_immediate(byte: u8) -> bool {
        byte < Tag::End as u8
    }
}

#[test]
fn test_tag_values() {
    assert_eq!(246, Tag::NValues as u8);
    assert_eq!(247, Tag::Ref as u8);
    assert_eq!(248, Tag::Start as u8);
    assert_eq!(249, Tag::End as u8);
    assert_eq!(250, Tag::NBytes as u8);
    assert_eq!(255, Tag::Nil as u8);
}

#[test]
fn test_immediate_boundary() {
    assert!(Tag::is_immediate(0));
    assert!(Tag::is_immediate(245));
    assert!(Tag::is_immediate(248));
    assert!(!Tag::is_immediate(249));
    assert!(!Tag::is_immediate(250));
    assert!(!Tag::is_immediate(255));
}

#[test]
fn test_reserved_bytes_are_not_tags() {
    for b in 251..=254u8 {
        assert!(Tag::try_from(b).is_err());
    }
}
