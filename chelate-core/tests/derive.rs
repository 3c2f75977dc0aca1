use std::collections::HashMap;

use chelate_core::{
    Codec, Describe, FieldType, Heap, Instance, IntType, ReadOptions, SecurityPolicy, Shape,
    TypeDescriptor, TypeKind, TypeName, TypeRegistry, Typed, Value, WriteOptions,
};

#[derive(Describe)]
#[allow(dead_code)]
struct Person {
    name: String,
    age: u8,
    friend: Option<Box<Person>>,
    #[chelate(rename = "tags")]
    labels: Vec<String>,
    #[chelate(skip)]
    cache: HashMap<String, String>,
}

#[derive(Describe)]
#[chelate(name = "acme.Employee", extends = "Person", implements = "Payable")]
#[allow(dead_code)]
struct Employee {
    salary: i64,
    manager: Option<Box<Employee>>,
}

#[derive(Describe)]
#[allow(dead_code)]
enum Color {
    Red,
    #[chelate(rename = "GREEN")]
    Green,
    Blue,
}

#[derive(Describe)]
#[allow(dead_code)]
struct Pair<T>(T, T);

#[derive(Describe)]
#[chelate(value_type)]
#[allow(dead_code)]
struct Isbn(String);

#[test]
fn named_struct_becomes_record() {
    assert_eq!(Person::type_name(), TypeName::new("Person"));
    assert_eq!(Person::field_type(), FieldType::named("Person"));
    assert_eq!(
        Person::descriptor(),
        TypeDescriptor::record(
            "Person",
            [
                ("name", FieldType::Str),
                ("age", FieldType::Int(IntType::U8)),
                ("friend", FieldType::named("Person")),
                ("tags", FieldType::sequence(FieldType::Str)),
            ],
        )
    );
}

#[test]
fn container_attributes() {
    let descriptor = Employee::descriptor();
    assert_eq!(descriptor.name.as_str(), "acme.Employee");
    assert_eq!(descriptor.kind, TypeKind::Concrete);
    assert_eq!(descriptor.parent, Some(TypeName::new("Person")));
    assert_eq!(descriptor.capabilities, vec![TypeName::new("Payable")]);
    assert_eq!(
        descriptor.own_fields().unwrap().get("manager"),
        Some(&FieldType::named("acme.Employee"))
    );
}

#[test]
fn unit_enum_becomes_enumeration() {
    assert_eq!(
        Color::descriptor().shape,
        Shape::Enumeration(vec!["Red".into(), "GREEN".into(), "Blue".into()])
    );
    assert!(Color::descriptor().is_value_type());
}

#[test]
fn tuple_and_generic_structs() {
    assert_eq!(
        Pair::<u32>::descriptor(),
        TypeDescriptor::record(
            "Pair",
            [
                ("0", FieldType::Int(IntType::U32)),
                ("1", FieldType::Int(IntType::U32)),
            ],
        )
    );
    assert_eq!(Isbn::descriptor(), TypeDescriptor::value("Isbn"));
}

#[test]
fn derived_descriptors_drive_the_codec() {
    let mut registry = TypeRegistry::new();
    registry
        .register_type::<Person>()
        .register_type::<Employee>()
        .register(TypeDescriptor::capability("Payable"));
    assert_eq!(registry.distance(&Employee::type_name(), &Person::type_name()), Some(1));

    let codec = Codec::new(registry, SecurityPolicy::default());
    let mut heap = Heap::new();
    let boss = heap.alloc(
        Instance::record("acme.Employee")
            .with_field("name", "boss")
            .with_field("salary", 10i64),
    );
    let worker = heap.alloc(
        Instance::record("acme.Employee")
            .with_field("name", "worker")
            .with_field("manager", boss),
    );

    let node = codec
        .serialize(&heap, &Value::Ref(worker), &WriteOptions::default())
        .unwrap();
    // Inherited fields come first.
    let keys: Vec<_> = node.as_object().unwrap().fields.keys().cloned().collect();
    assert_eq!(keys, vec!["name", "manager"]);

    let back = codec.deserialize(&node, &ReadOptions::default()).unwrap();
    let root = back.root.as_handle().unwrap();
    let manager = back.heap.follow(root, "manager").unwrap();
    assert_eq!(back.heap.field(manager, "salary"), Some(&Value::Int(10)));
    assert_eq!(back.heap.field(root, "salary"), Some(&Value::Int(0)));
}
