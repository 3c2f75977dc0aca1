use chelate_core::{
    Codec, CodecError, FieldType, Heap, Instance, IntType, ReadOptions, SecurityPolicy,
    TypeDescriptor, TypeRegistry, Value, WriteOptions,
};
use chelate_json::{TextError, TextOptions, decode, encode};

fn codec() -> Codec {
    let mut registry = TypeRegistry::new();
    registry
        .register(TypeDescriptor::record(
            "Node",
            [
                ("label", FieldType::Str),
                ("weight", FieldType::Int(IntType::U16)),
                ("next", FieldType::named("Node")),
            ],
        ))
        .register(TypeDescriptor::record("Demo", [("value", FieldType::Int(IntType::I32))]));
    Codec::new(registry, SecurityPolicy::default())
}

fn ring(heap: &mut Heap) -> chelate_core::Handle {
    let a = heap.alloc(Instance::record("Node").with_field("label", "a").with_field("weight", 1u32));
    let b = heap.alloc(Instance::record("Node").with_field("label", "b").with_field("weight", 2u32));
    heap.set_field(a, "next", b).unwrap();
    heap.set_field(b, "next", a).unwrap();
    a
}

#[test]
fn cyclic_graph_through_text() {
    let codec = codec();
    let mut heap = Heap::new();
    let a = ring(&mut heap);

    let text = encode(&codec, &heap, &Value::Ref(a), &WriteOptions::default(), &TextOptions::default()).unwrap();
    assert_eq!(
        text,
        r#"{"@type":"Node","@id":1,"label":"a","weight":1,"next":{"label":"b","weight":2,"next":{"@ref":1}}}"#
    );

    let back = decode(&codec, &text, &ReadOptions::default()).unwrap();
    assert!(heap.graph_eq(&Value::Ref(a), &back.heap, &back.root));
}

#[test]
fn short_meta_keys_read_back() {
    let codec = codec();
    let mut heap = Heap::new();
    let a = ring(&mut heap);

    let opts = TextOptions::default().with_short_meta_keys(true).with_pretty(true);
    let text = encode(&codec, &heap, &Value::Ref(a), &WriteOptions::default(), &opts).unwrap();
    assert!(text.contains(r#""@t": "Node""#), "{text}");
    assert!(text.contains(r#""@r": 1"#), "{text}");

    let back = decode(&codec, &text, &ReadOptions::default()).unwrap();
    assert!(heap.graph_eq(&Value::Ref(a), &back.heap, &back.root));
}

#[test]
fn lenient_scalars() {
    let codec = codec();
    let back = decode(
        &codec,
        r#"{"@type": "Node", "label": 7, "weight": "12"}"#,
        &ReadOptions::default(),
    )
    .unwrap();
    let root = back.root.as_handle().unwrap();
    assert_eq!(back.heap.field(root, "label"), Some(&Value::from("7")));
    assert_eq!(back.heap.field(root, "weight"), Some(&Value::UInt(12)));
}

#[test]
fn errors_are_split_by_layer() {
    let codec = codec();

    let err = decode(&codec, r#"{"@type": "Demo", "value": 16.5}"#, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, TextError::Codec(CodecError::Coercion { .. })), "{err}");

    let err = decode(&codec, r#"[{"@ref": 4}]"#, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, TextError::Codec(CodecError::MalformedDocument { .. })), "{err}");

    let err = decode(&codec, r#"{"@ref": 0}"#, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, TextError::Json(_)), "{err}");
}
