use std::net::IpAddr;
use std::sync::Arc;

use chelate_core::{
    Codec, CodecError, CustomWriter, FieldType, Handle, Heap, Instance, IntType, NativeValue,
    Node, ObjectNode, ReadOptions, SecurityPolicy, TypeDescriptor, TypeRegistry, Value,
    WriteContext, WriteOptions,
};
use serde_json::json;

fn people() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry
        .register(TypeDescriptor::record(
            "Person",
            [("name", FieldType::Str), ("friend", FieldType::named("Person"))],
        ))
        .register(TypeDescriptor::record(
            "Team",
            [
                ("lead", FieldType::named("Person")),
                ("members", FieldType::sequence(FieldType::named("Person"))),
            ],
        ))
        .register(TypeDescriptor::record(
            "Host",
            [("addr", FieldType::named("ip")), ("backup", FieldType::named("ip"))],
        ))
        .register(TypeDescriptor::record("Demo", [("value", FieldType::Int(IntType::I32))]))
        .register_value_type::<IpAddr>("ip");
    registry
}

fn codec() -> Codec {
    Codec::new(people(), SecurityPolicy::default())
}

fn to_json(node: &Node) -> serde_json::Value {
    serde_json::to_value(node).unwrap()
}

fn doc(value: serde_json::Value) -> Node {
    serde_json::from_value(value).unwrap()
}

fn person(heap: &mut Heap, name: &str) -> Handle {
    heap.alloc(Instance::record("Person").with_field("name", name))
}

fn round_trip(codec: &Codec, heap: &Heap, root: Handle) -> chelate_core::Resolved {
    let node = codec
        .serialize(heap, &Value::Ref(root), &WriteOptions::default())
        .unwrap();
    codec.deserialize(&node, &ReadOptions::default()).unwrap()
}

#[test]
fn team_round_trips() {
    let codec = codec();
    let mut heap = Heap::new();
    let ada = person(&mut heap, "ada");
    let bob = person(&mut heap, "bob");
    heap.set_field(bob, "friend", ada).unwrap();
    let members = heap.alloc(Instance::list(vec![Value::Ref(ada), Value::Ref(bob)]));
    let team = heap.alloc(
        Instance::record("Team")
            .with_field("lead", ada)
            .with_field("members", members),
    );

    let back = round_trip(&codec, &heap, team);
    assert!(heap.graph_eq(&Value::Ref(team), &back.heap, &back.root));
    assert!(back.report.is_clean());
}

#[test]
fn shared_references_stay_shared() {
    let codec = codec();
    let mut heap = Heap::new();
    let ada = person(&mut heap, "ada");
    let members = heap.alloc(Instance::list(vec![Value::Ref(ada), Value::Ref(ada)]));
    let team = heap.alloc(
        Instance::record("Team")
            .with_field("lead", ada)
            .with_field("members", members),
    );

    let node = codec
        .serialize(&heap, &Value::Ref(team), &WriteOptions::default())
        .unwrap();
    assert_eq!(
        to_json(&node),
        json!({
            "@type": "Team",
            "lead": {"@id": 1, "name": "ada"},
            "members": [{"@ref": 1}, {"@ref": 1}]
        })
    );

    let back = codec.deserialize(&node, &ReadOptions::default()).unwrap();
    let root = back.root.as_handle().unwrap();
    let lead = back.heap.follow(root, "lead").unwrap();
    let members = back.heap.follow(root, "members").unwrap();
    let items = back.heap.get(members).unwrap().items().unwrap();
    assert_eq!(items, &[Value::Ref(lead), Value::Ref(lead)]);
}

#[test]
fn mutual_cycle() {
    let codec = codec();
    let mut heap = Heap::new();
    let a = person(&mut heap, "a");
    let b = person(&mut heap, "b");
    heap.set_field(a, "friend", b).unwrap();
    heap.set_field(b, "friend", a).unwrap();

    let node = codec
        .serialize(&heap, &Value::Ref(a), &WriteOptions::default())
        .unwrap();
    assert_eq!(
        to_json(&node),
        json!({
            "@type": "Person",
            "@id": 1,
            "name": "a",
            "friend": {"name": "b", "friend": {"@ref": 1}}
        })
    );

    let back = codec.deserialize(&node, &ReadOptions::default()).unwrap();
    let a2 = back.root.as_handle().unwrap();
    let b2 = back.heap.follow(a2, "friend").unwrap();
    assert_ne!(a2, b2);
    assert_eq!(back.heap.follow(b2, "friend"), Some(a2));
}

#[test]
fn forward_and_backward_references_are_equivalent() {
    let codec = codec();
    let forward = doc(json!([
        {"@ref": 1},
        {"@type": "Person", "@id": 1, "name": "ada"}
    ]));
    let backward = doc(json!([
        {"@type": "Person", "@id": 1, "name": "ada"},
        {"@ref": 1}
    ]));

    let f = codec.deserialize(&forward, &ReadOptions::default()).unwrap();
    let b = codec.deserialize(&backward, &ReadOptions::default()).unwrap();
    assert!(f.heap.graph_eq(&f.root, &b.heap, &b.root));

    let list = f.root.as_handle().unwrap();
    let items = f.heap.get(list).unwrap().items().unwrap();
    assert_eq!(items[0], items[1]);
}

#[test]
fn value_types_are_never_aliased() {
    let codec = codec();
    let mut heap = Heap::new();
    let ip = NativeValue::new("ip", "10.0.0.1".parse::<IpAddr>().unwrap());
    let host = heap.alloc(
        Instance::record("Host")
            .with_field("addr", ip.clone())
            .with_field("backup", ip),
    );
    let name = Value::from("same text");
    let list = heap.alloc(Instance::list(vec![Value::Ref(host), name.clone(), name]));

    let node = codec
        .serialize(&heap, &Value::Ref(list), &WriteOptions::default())
        .unwrap();
    assert_eq!(
        to_json(&node),
        json!([
            {"@type": "Host", "addr": "10.0.0.1", "backup": "10.0.0.1"},
            "same text",
            "same text"
        ])
    );

    let back = codec.deserialize(&node, &ReadOptions::default()).unwrap();
    let list = back.root.as_handle().unwrap();
    let host = back.heap.get(list).unwrap().items().unwrap()[0].as_handle().unwrap();
    let addr = back.heap.field(host, "addr").and_then(Value::as_native).unwrap();
    assert_eq!(addr.downcast_ref::<IpAddr>(), Some(&"10.0.0.1".parse::<IpAddr>().unwrap()));
}

#[test]
fn denied_types_are_written_as_null_everywhere() {
    let mut registry = people();
    registry.register(
        TypeDescriptor::record("Launcher", [("program", FieldType::Str)])
            .extends("std::process::Command"),
    );
    let codec = Codec::new(registry, SecurityPolicy::default());

    let mut heap = Heap::new();
    let cmd = heap.alloc(Instance::record("std::process::Command").with_field("program", "sh"));
    let launcher = heap.alloc(Instance::record("Launcher").with_field("program", "sh"));
    let ok = person(&mut heap, "ok");
    let list = heap.alloc(Instance::list(vec![Value::Ref(cmd), Value::Ref(ok)]));
    let by_value = heap.alloc(Instance::map(vec![(Value::from("run"), Value::Ref(cmd))]));
    let by_key = heap.alloc(Instance::map(vec![(Value::Ref(cmd), Value::from("run"))]));
    let field = heap.alloc(Instance::record("Person").with_field("friend", cmd));
    let write = |root: Handle| {
        let node = codec
            .serialize(&heap, &Value::Ref(root), &WriteOptions::default())
            .unwrap();
        to_json(&node)
    };

    assert_eq!(write(cmd), json!(null));
    // Subtypes of a denied type are denied too.
    assert_eq!(write(launcher), json!(null));
    assert_eq!(write(list), json!([null, {"@type": "Person", "name": "ok"}]));
    assert_eq!(write(by_value), json!({"run": null}));
    assert_eq!(write(by_key), json!({"@keys": [null], "@items": ["run"]}));
    assert_eq!(write(field), json!({"@type": "Person", "friend": null}));

    // The nulls hold their positions after a read back.
    let read_back = |root: Handle| {
        let node = codec
            .serialize(&heap, &Value::Ref(root), &WriteOptions::default())
            .unwrap();
        codec.deserialize(&node, &ReadOptions::default()).unwrap()
    };
    let back = read_back(by_key);
    let map = back.root.as_handle().unwrap();
    assert_eq!(
        back.heap.get(map).unwrap().entries().unwrap(),
        &[(Value::Null, Value::from("run"))]
    );
    let back = read_back(list);
    let list = back.root.as_handle().unwrap();
    let items = back.heap.get(list).unwrap().items().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Value::Null);
    assert!(items[1].as_handle().is_some());
}

#[test]
fn denied_type_on_read_becomes_null() {
    let codec = codec();
    let node = doc(json!({
        "@type": "Person",
        "name": "ada",
        "friend": {"@type": "std::process::Command", "program": "rm"}
    }));
    let back = codec.deserialize(&node, &ReadOptions::default()).unwrap();
    let root = back.root.as_handle().unwrap();
    assert_eq!(back.heap.field(root, "friend"), Some(&Value::Null));
    assert_eq!(back.report.denied.len(), 1);
    assert_eq!(back.report.denied[0].type_name.as_str(), "std::process::Command");
    // Nothing was built for the denied node.
    assert_eq!(back.heap.len(), 1);
}

#[test]
fn fractional_into_integer_field_fails() {
    let codec = codec();
    let node = doc(json!({"@type": "Demo", "value": 16.5}));
    let err = codec.deserialize(&node, &ReadOptions::default()).unwrap_err();
    assert!(matches!(err, CodecError::Coercion { .. }), "{err}");
    assert!(err.to_string().contains("$.value"), "{err}");

    let lenient = ReadOptions::default().with_truncate_fractional(true);
    let back = codec.deserialize(&node, &lenient).unwrap();
    let root = back.root.as_handle().unwrap();
    assert_eq!(back.heap.field(root, "value"), Some(&Value::Int(16)));
}

struct Labelled(&'static str);

impl CustomWriter for Labelled {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<Node, CodecError> {
        let Some(handle) = value.as_handle() else {
            return Ok(Node::Null);
        };
        let name = ctx
            .heap()
            .field(handle, "name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Node::Object(
            ObjectNode::new()
                .with_field("writer", Node::from(self.0))
                .with_field("name", Node::from(name)),
        ))
    }
}

#[test]
fn base_writer_applies_to_derived_types() {
    let mut registry = TypeRegistry::new();
    registry
        .register(TypeDescriptor::record("Base", [("name", FieldType::Str)]))
        .register(TypeDescriptor::record("Derived", [("extra", FieldType::Bool)]).extends("Base"))
        .set_writer("Base", Labelled("base"));
    let codec = Codec::new(registry, SecurityPolicy::default());

    let mut heap = Heap::new();
    let derived = heap.alloc(
        Instance::record("Derived")
            .with_field("name", "d")
            .with_field("extra", true),
    );
    let write = |codec: &Codec| {
        let node = codec
            .serialize(&heap, &Value::Ref(derived), &WriteOptions::default())
            .unwrap();
        to_json(&node)
    };

    assert_eq!(
        write(&codec),
        json!({"@type": "Derived", "writer": "base", "name": "d"})
    );

    // An exact match beats the inherited writer.
    let mut registry = codec.registry().clone();
    registry.set_writer("Derived", Labelled("derived"));
    let codec = Codec::new(registry, SecurityPolicy::default());
    assert_eq!(
        write(&codec),
        json!({"@type": "Derived", "writer": "derived", "name": "d"})
    );
}

#[test]
fn codec_is_shared_across_threads() {
    let codec = Arc::new(codec());
    let mut heap = Heap::new();
    let a = person(&mut heap, "a");
    let b = person(&mut heap, "b");
    heap.set_field(a, "friend", b).unwrap();
    heap.set_field(b, "friend", a).unwrap();
    let heap = &heap;

    std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let codec = Arc::clone(&codec);
                scope.spawn(move || {
                    for _ in 0..25 {
                        let back = round_trip(&codec, heap, a);
                        assert!(heap.graph_eq(&Value::Ref(a), &back.heap, &back.root));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    });
}
