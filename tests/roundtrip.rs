//! Cross-module scenario coverage: round-trips, fragmentation, and the
//! literal byte fixtures a reader could hand-verify against the published
//! MessagePack format.

use pretty_assertions::assert_eq;

use msgpack_codec::{ExtValue, Packer, Unpacker, Value};

fn pack(v: &Value) -> Vec<u8> {
    let mut p = Packer::new();
    p.write(v).unwrap();
    p.into_vec()
}

fn unpack_one(bytes: &[u8]) -> Value {
    let mut u = Unpacker::new();
    u.feed(bytes);
    u.read().unwrap().unwrap()
}

#[test]
fn nested_structure_round_trips() {
    let v = Value::Map(vec![
        (
            Value::Str("items".into()),
            Value::Array(vec![Value::Int(1), Value::Int(-1), Value::Nil]),
        ),
        (Value::Str("ok".into()), Value::Bool(true)),
    ]);
    let bytes = pack(&v);
    assert_eq!(unpack_one(&bytes), v);
}

#[test]
fn f64_values_that_narrow_losslessly_through_f32_still_round_trip_as_f64() {
    // 2.0, 0.0, 1.5, and 100.25 are all exactly representable as f32, which
    // used to cause the packer to narrow them to a binary32 wire form that
    // the unpacker then decoded back as Value::F32 instead of Value::F64.
    for f in [0.0_f64, 1.0, 1.5, 2.0, 100.25] {
        assert_eq!(unpack_one(&pack(&Value::F64(f))), Value::F64(f));
    }
}

#[test]
fn f32_values_round_trip_as_f32() {
    assert_eq!(unpack_one(&pack(&Value::F32(2.0))), Value::F32(2.0));
}

#[test]
fn large_string_uses_str16_and_round_trips() {
    let s = "x".repeat(500);
    let v = Value::Str(s.clone());
    let bytes = pack(&v);
    assert_eq!(bytes[0], 0xda);
    assert_eq!(unpack_one(&bytes), Value::Str(s));
}

#[test]
fn fragmented_feed_yields_one_completion_not_several() {
    let mut u = Unpacker::new();
    u.feed(&[0x93, 0x01]);
    assert_eq!(u.read().unwrap(), None);
    u.feed(&[0x02, 0x03]);
    assert_eq!(
        u.read().unwrap(),
        Some(Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
    );
    assert_eq!(u.read().unwrap(), None, "nothing left to complete");
}

#[test]
fn fragmenting_byte_by_byte_matches_feeding_whole() {
    let v = Value::Map(vec![
        (Value::Str("a".into()), Value::Int(1)),
        (Value::Str("b".into()), Value::Array(vec![Value::Int(2), Value::Int(3)])),
    ]);
    let bytes = pack(&v);

    let mut whole = Unpacker::new();
    whole.feed(&bytes);
    let expected = whole.read().unwrap().unwrap();

    let mut trickled = Unpacker::new();
    let mut got = None;
    for byte in &bytes {
        trickled.feed(std::slice::from_ref(byte));
        if let Some(value) = trickled.read().unwrap() {
            got = Some(value);
            break;
        }
    }
    assert_eq!(got, Some(expected));
}

#[test]
fn packing_is_byte_for_byte_deterministic() {
    let v = Value::Array(vec![
        Value::Str("same".into()),
        Value::Map(vec![(Value::Int(1), Value::Bool(false))]),
    ]);
    assert_eq!(pack(&v), pack(&v));
}

#[test]
fn stack_depth_cap_reports_error_without_growing_past_it() {
    // ten levels of single-element array nesting, capacity of 4.
    let mut bytes = Vec::new();
    for _ in 0..10 {
        bytes.push(0x91);
    }
    bytes.push(0x00);

    let mut u = Unpacker::with_config(msgpack_codec::UnpackerConfig {
        stack_capacity: 4,
        symbolize_keys: false,
    });
    u.feed(&bytes);
    let err = u.read().unwrap_err();
    assert!(matches!(err, msgpack_codec::Error::StackTooDeep { capacity: 4 }));
}

#[test]
fn symbolize_keys_only_affects_string_keyed_entries() {
    let v = Value::Map(vec![
        (Value::Str("name".into()), Value::Str("value".into())),
        (Value::Int(7), Value::Bool(true)),
    ]);
    let bytes = pack(&v);

    let mut u = Unpacker::with_config(msgpack_codec::UnpackerConfig {
        stack_capacity: 128,
        symbolize_keys: true,
    });
    u.feed(&bytes);
    let Value::Map(pairs) = u.read().unwrap().unwrap() else {
        panic!("expected a map");
    };
    assert_eq!(pairs[0].0, Value::Symbol("name".into()));
    assert_eq!(pairs[0].1, Value::Str("value".into()), "values are untouched");
    assert_eq!(pairs[1].0, Value::Int(7), "non-string keys are untouched");
}

#[test]
fn literal_scenarios_from_the_format_reference() {
    assert_eq!(pack(&Value::Nil), vec![0xc0]);
    assert_eq!(pack(&Value::Bool(true)), vec![0xc3]);
    assert_eq!(pack(&Value::Bool(false)), vec![0xc2]);
    assert_eq!(pack(&Value::Int(0)), vec![0x00]);
    assert_eq!(pack(&Value::Int(127)), vec![0x7f]);
    assert_eq!(pack(&Value::Int(-1)), vec![0xff]);
    assert_eq!(pack(&Value::Int(-32)), vec![0xe0]);
    assert_eq!(pack(&Value::Int(128)), vec![0xcc, 0x80]);
    assert_eq!(pack(&Value::Int(255)), vec![0xcc, 0xff]);
    assert_eq!(pack(&Value::Int(256)), vec![0xcd, 0x01, 0x00]);
    assert_eq!(pack(&Value::Int(-33)), vec![0xd0, 0xdf]);
    assert_eq!(pack(&Value::Int(-129)), vec![0xd1, 0xff, 0x7f]);
    assert_eq!(pack(&Value::Str("abc".into())), vec![0xa3, b'a', b'b', b'c']);
    assert_eq!(pack(&Value::Str(String::new())), vec![0xa0]);
    assert_eq!(
        pack(&Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        vec![0x93, 0x01, 0x02, 0x03]
    );
    assert_eq!(
        pack(&Value::Map(vec![
            (Value::Str("a".into()), Value::Int(1)),
            (Value::Str("b".into()), Value::Int(2)),
        ])),
        vec![0x82, 0xa1, b'a', 0x01, 0xa1, b'b', 0x02]
    );
    assert_eq!(
        pack(&Value::Ext(ExtValue::new(7, vec![1, 2, 3, 4]))),
        vec![0xd6, 0x07, 0x01, 0x02, 0x03, 0x04]
    );
    assert_eq!(
        unpack_one(&[0xc7, 0x05, 0x2a, 0x01, 0x02, 0x03, 0x04, 0x05]),
        Value::Ext(ExtValue::new(42, vec![1, 2, 3, 4, 5]))
    );
}
