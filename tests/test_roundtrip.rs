use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use tagstream::{DecodeError, Decoder, Encoder, StructStart, register};

type NodeRef = Rc<RefCell<Node>>;

/// A record shape typical of generated code: a value field and two
/// pointer fields that may share a referent or point back at the record.
#[derive(Debug, Default)]
struct Node {
    label: String,
    next: Option<NodeRef>,
    other: Option<NodeRef>,
}

fn encode_node(e: &mut Encoder, node: Option<&NodeRef>) {
    let Some(rc) = e.start_struct(node) else {
        return;
    };
    let node = rc.borrow();
    e.encode_uint(0);
    e.encode_string(&node.label);
    e.encode_uint(1);
    encode_node(e, node.next.as_ref());
    e.encode_uint(2);
    encode_node(e, node.other.as_ref());
    e.end_struct();
}

fn decode_node(d: &mut Decoder<'_>) -> Result<Option<NodeRef>, DecodeError> {
    match d.start_struct()? {
        StructStart::Nil => Ok(None),
        StructStart::Shared(record) => record
            .downcast::<RefCell<Node>>()
            .map(Some)
            .map_err(|_| DecodeError::RefTypeMismatch("Node")),
        StructStart::Inline => {
            let node: NodeRef = Rc::new(RefCell::new(Node::default()));
            d.store_ref(node.clone());
            while let Some(field) = d.next_struct_field()? {
                match field {
                    0 => node.borrow_mut().label = d.decode_string()?.to_owned(),
                    1 => {
                        let next = decode_node(d)?;
                        node.borrow_mut().next = next;
                    }
                    2 => {
                        let other = decode_node(d)?;
                        node.borrow_mut().other = other;
                    }
                    _ => d.unknown_field("Node", field)?,
                }
            }
            Ok(Some(node))
        }
    }
}

fn encode_node_value(e: &mut Encoder, value: &dyn Any) {
    let node = value
        .downcast_ref::<Option<NodeRef>>()
        .expect("dispatched as Node");
    encode_node(e, node.as_ref());
}

fn decode_node_value(d: &mut Decoder<'_>) -> Result<Box<dyn Any>, DecodeError> {
    Ok(Box::new(decode_node(d)?))
}

static REGISTER: Once = Once::new();

fn setup() {
    REGISTER.call_once(|| {
        register::<Option<NodeRef>>("Node", encode_node_value, decode_node_value);
    });
}

#[test]
fn test_builtin_round_trips() {
    let mut e = Encoder::new();
    e.encode(Some(&0i64));
    e.encode(Some(&-1i64));
    e.encode(Some(&i64::MIN));
    e.encode(Some(&i64::MAX));
    e.encode(Some(&248u64));
    e.encode(Some(&249u64));
    e.encode(Some(&u64::MAX));
    e.encode(Some(&-5isize));
    e.encode(Some(&2.5f64));
    e.encode(Some(&true));
    e.encode(Some(&String::from("héllo")));
    e.encode(Some(&vec![0u8, 251, 255]));
    let bytes = e.bytes();

    let mut d = Decoder::new(&bytes);
    assert_eq!(0, *d.decode().unwrap().unwrap().downcast::<i64>().unwrap());
    assert_eq!(-1, *d.decode().unwrap().unwrap().downcast::<i64>().unwrap());
    assert_eq!(
        i64::MIN,
        *d.decode().unwrap().unwrap().downcast::<i64>().unwrap()
    );
    assert_eq!(
        i64::MAX,
        *d.decode().unwrap().unwrap().downcast::<i64>().unwrap()
    );
    assert_eq!(248, *d.decode().unwrap().unwrap().downcast::<u64>().unwrap());
    assert_eq!(249, *d.decode().unwrap().unwrap().downcast::<u64>().unwrap());
    assert_eq!(
        u64::MAX,
        *d.decode().unwrap().unwrap().downcast::<u64>().unwrap()
    );
    assert_eq!(
        -5,
        *d.decode().unwrap().unwrap().downcast::<isize>().unwrap()
    );
    assert_eq!(2.5, *d.decode().unwrap().unwrap().downcast::<f64>().unwrap());
    assert!(*d.decode().unwrap().unwrap().downcast::<bool>().unwrap());
    assert_eq!(
        "héllo",
        *d.decode().unwrap().unwrap().downcast::<String>().unwrap()
    );
    assert_eq!(
        vec![0u8, 251, 255],
        *d.decode().unwrap().unwrap().downcast::<Vec<u8>>().unwrap()
    );
    assert!(d.is_at_end());
}

#[test]
fn test_null_top_level() {
    let mut e = Encoder::new();
    e.encode(None);
    let bytes = e.bytes();
    assert_eq!(bytes, [246, 0, 0]);

    let mut d = Decoder::new(&bytes);
    assert!(d.decode().unwrap().is_none());
    assert!(d.is_at_end());
}

#[test]
fn test_two_value_stream_layout() {
    let mut e = Encoder::new();
    e.encode(Some(&42u64));
    e.encode(Some(&String::from("x")));
    let bytes = e.bytes();
    assert_eq!(
        bytes,
        [
            // prelude: ["u64", "string"]
            246, 2, 250, 3, b'u', b'6', b'4', 250, 6, b's', b't', b'r', b'i', b'n', b'g',
            // (0, 42)
            246, 2, 0, 42, //
            // (1, "x")
            246, 2, 1, 250, 1, b'x',
        ]
    );

    let mut d = Decoder::new(&bytes);
    assert_eq!(42, *d.decode().unwrap().unwrap().downcast::<u64>().unwrap());
    assert_eq!(
        "x",
        *d.decode().unwrap().unwrap().downcast::<String>().unwrap()
    );
    assert!(d.is_at_end());
}

#[test]
fn test_signed_one_byte_payload() {
    let mut e = Encoder::new();
    e.encode_int(-1);
    assert_eq!(e.bytes(), [246, 0, 1]);
}

#[test]
fn test_string_payload_shape() {
    let mut e = Encoder::new();
    e.encode_string("hi");
    assert_eq!(e.bytes(), [246, 0, 250, 2, b'h', b'i']);
}

#[test]
fn test_list_of_strings_shape() {
    let mut e = Encoder::new();
    e.start_list(2);
    e.encode_string("hi");
    e.encode_string("bye");
    let bytes = e.bytes();
    assert_eq!(
        bytes[2..],
        [246, 2, 250, 2, b'h', b'i', 250, 3, b'b', b'y', b'e']
    );

    let mut d = Decoder::new(&bytes[2..]);
    assert_eq!(Some(2), d.start_list().unwrap());
    assert_eq!("hi", d.decode_string().unwrap());
    assert_eq!("bye", d.decode_string().unwrap());
    assert!(d.is_at_end());
}

#[test]
fn test_float_takes_the_wide_form() {
    let mut e = Encoder::new();
    e.encode_float(1.0);
    let bytes = e.bytes();
    // prelude plus tag, width byte and the 8-byte bit pattern
    assert_eq!(12, bytes.len());

    let mut d = Decoder::new(&bytes[2..]);
    assert_eq!(1.0, d.decode_float().unwrap());
}

#[test]
fn test_self_reference_byte_shape() {
    let record = Rc::new(RefCell::new(()));
    let mut e = Encoder::new();
    let rc = e.start_struct(Some(&record)).unwrap();
    e.encode_uint(0);
    assert!(e.start_struct(Some(rc)).is_none());
    e.end_struct();
    assert_eq!(e.bytes(), [246, 0, 248, 0, 247, 0, 249]);

    let mut d = Decoder::new(&[248, 0, 247, 0, 249]);
    assert!(matches!(d.start_struct().unwrap(), StructStart::Inline));
    let decoded = Rc::new(RefCell::new(()));
    d.store_ref(decoded.clone());
    assert_eq!(Some(0), d.next_struct_field().unwrap());
    match d.start_struct().unwrap() {
        StructStart::Shared(shared) => {
            let shared = shared.downcast::<RefCell<()>>().unwrap();
            assert!(Rc::ptr_eq(&shared, &decoded));
        }
        other => panic!("expected a shared record, got {other:?}"),
    }
    assert_eq!(None, d.next_struct_field().unwrap());
    assert!(d.is_at_end());
}

#[test]
fn test_shared_records_stay_shared() {
    setup();
    let child = Rc::new(RefCell::new(Node {
        label: "child".to_owned(),
        ..Node::default()
    }));
    let root: Option<NodeRef> = Some(Rc::new(RefCell::new(Node {
        label: "root".to_owned(),
        next: Some(child.clone()),
        other: Some(child),
    })));

    let mut e = Encoder::new();
    e.encode(Some(&root));
    let bytes = e.bytes();

    let mut d = Decoder::new(&bytes);
    let decoded = d.decode().unwrap().unwrap();
    let decoded = decoded.downcast::<Option<NodeRef>>().unwrap().unwrap();
    let decoded = decoded.borrow();
    let next = decoded.next.as_ref().unwrap();
    let other = decoded.other.as_ref().unwrap();
    assert!(Rc::ptr_eq(next, other));
    assert_eq!("child", next.borrow().label);
    assert!(next.borrow().next.is_none());
}

#[test]
fn test_distinct_records_stay_distinct() {
    setup();
    let root: Option<NodeRef> = Some(Rc::new(RefCell::new(Node {
        label: "root".to_owned(),
        next: Some(Rc::new(RefCell::new(Node::default()))),
        other: Some(Rc::new(RefCell::new(Node::default()))),
    })));

    let mut e = Encoder::new();
    e.encode(Some(&root));
    let bytes = e.bytes();

    let mut d = Decoder::new(&bytes);
    let decoded = d.decode().unwrap().unwrap();
    let decoded = decoded.downcast::<Option<NodeRef>>().unwrap().unwrap();
    let decoded = decoded.borrow();
    assert!(!Rc::ptr_eq(
        decoded.next.as_ref().unwrap(),
        decoded.other.as_ref().unwrap()
    ));
}

#[test]
fn test_cyclic_record_decodes_to_one_record() {
    setup();
    let root = Rc::new(RefCell::new(Node {
        label: "loop".to_owned(),
        ..Node::default()
    }));
    root.borrow_mut().next = Some(root.clone());
    let root: Option<NodeRef> = Some(root);

    let mut e = Encoder::new();
    e.encode(Some(&root));
    let bytes = e.bytes();

    let mut d = Decoder::new(&bytes);
    let decoded = d.decode().unwrap().unwrap();
    let decoded = decoded.downcast::<Option<NodeRef>>().unwrap().unwrap();
    let next = decoded.borrow().next.clone().unwrap();
    assert!(Rc::ptr_eq(&decoded, &next));
    assert_eq!("loop", decoded.borrow().label);

    // break the cycle so the test does not leak
    decoded.borrow_mut().next = None;
    root.unwrap().borrow_mut().next = None;
}

#[test]
fn test_sharing_across_top_level_values() {
    setup();
    let root: Option<NodeRef> = Some(Rc::new(RefCell::new(Node {
        label: "again".to_owned(),
        ..Node::default()
    })));

    let mut e = Encoder::new();
    e.encode(Some(&root));
    e.encode(Some(&root));
    let bytes = e.bytes();

    let mut d = Decoder::new(&bytes);
    let first = d.decode().unwrap().unwrap();
    let first = first.downcast::<Option<NodeRef>>().unwrap().unwrap();
    let second = d.decode().unwrap().unwrap();
    let second = second.downcast::<Option<NodeRef>>().unwrap().unwrap();
    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn test_unknown_fields_are_skipped() {
    // A newer producer emits fields 17 (a string) and 18 (a whole record
    // body) that this consumer's Node decoder has never heard of.
    let mut e = Encoder::new();
    let root = Rc::new(RefCell::new(()));
    e.start_struct(Some(&root)).unwrap();
    e.encode_uint(0);
    e.encode_string("known");
    e.encode_uint(17);
    e.encode_string("from the future");
    e.encode_uint(18);
    let inner = Rc::new(RefCell::new(0u32));
    if e.start_struct(Some(&inner)).is_some() {
        e.encode_uint(0);
        e.start_list(2);
        e.encode_uint(300);
        e.encode_nil();
        e.end_struct();
    }
    e.encode_uint(1);
    e.encode_nil();
    e.end_struct();
    let bytes = e.bytes();

    // skip the empty prelude; the record body is the payload
    let mut d = Decoder::new(&bytes[2..]);
    let node = decode_node(&mut d).unwrap().unwrap();
    assert_eq!("known", node.borrow().label);
    assert!(node.borrow().next.is_none());
    assert!(node.borrow().other.is_none());
    assert!(d.is_at_end());
}

#[test]
fn test_unknown_type_name_in_prelude() {
    let bytes = [246, 1, 250, 5, b'G', b'h', b'o', b's', b't', 0];
    let mut d = Decoder::new(&bytes);
    match d.decode() {
        Err(DecodeError::UnknownTypeName(name)) => assert_eq!("Ghost", name),
        other => panic!("expected an unknown type name error, got {other:?}"),
    }
}

#[test]
fn test_type_number_out_of_range() {
    let bytes = [246, 0, 246, 2, 0, 42];
    let mut d = Decoder::new(&bytes);
    assert!(matches!(
        d.decode(),
        Err(DecodeError::TypeNumOutOfRange(0))
    ));
}

#[test]
fn test_bad_top_level_list() {
    let bytes = [246, 0, 246, 3, 0, 42, 42];
    let mut d = Decoder::new(&bytes);
    assert!(matches!(d.decode(), Err(DecodeError::BadTopLevel(3))));
}

#[test]
fn test_decode_past_end_is_an_error() {
    let mut e = Encoder::new();
    e.encode(Some(&1u64));
    let bytes = e.bytes();

    let mut d = Decoder::new(&bytes);
    assert_eq!(1, *d.decode().unwrap().unwrap().downcast::<u64>().unwrap());
    assert!(d.decode().is_err());
}

#[test]
fn test_truncated_stream() {
    let mut e = Encoder::new();
    e.encode(Some(&String::from("chopped")));
    let bytes = e.bytes();

    for end in 0..bytes.len() {
        let mut d = Decoder::new(&bytes[..end]);
        assert!(d.decode().is_err(), "length {end} decoded");
    }
}

#[test]
fn test_decoded_bytes_borrow_from_input() {
    let data = [250, 3, b'a', b'b', b'c'];
    let mut d = Decoder::new(&data);
    let got = d.decode_bytes().unwrap();
    assert_eq!(b"abc", got);
    assert!(std::ptr::eq(got.as_ptr(), data[2..].as_ptr()));
}

#[test]
fn test_empty_string_and_bytes() {
    let mut e = Encoder::new();
    e.encode_string("");
    e.encode_bytes(&[]);
    e.start_list(0);
    let bytes = e.bytes();
    assert_eq!(bytes[2..], [250, 0, 250, 0, 246, 0]);

    let mut d = Decoder::new(&bytes[2..]);
    assert_eq!("", d.decode_string().unwrap());
    assert_eq!(b"", d.decode_bytes().unwrap());
    assert_eq!(Some(0), d.start_list().unwrap());
    assert!(d.is_at_end());
}

#[test]
fn test_null_list() {
    let mut e = Encoder::new();
    e.encode_nil();
    let bytes = e.bytes();
    let mut d = Decoder::new(&bytes[2..]);
    assert_eq!(None, d.start_list().unwrap());
}

fn encode_unit(_e: &mut Encoder, _value: &dyn Any) {}

fn decode_unit(_d: &mut Decoder<'_>) -> Result<Box<dyn Any>, DecodeError> {
    Ok(Box::new(()))
}

#[test]
#[should_panic(expected = "registered twice")]
fn test_duplicate_registration_panics() {
    struct Duplicate;
    register::<Duplicate>("Duplicate", encode_unit, decode_unit);
    register::<Duplicate>("Duplicate", encode_unit, decode_unit);
}

#[test]
#[should_panic(expected = "unregistered")]
fn test_unregistered_type_panics() {
    let mut e = Encoder::new();
    e.encode(Some(&42u32));
}
