//! Chelate turns object graphs into JSON-shaped documents and back.
//!
//! Core concepts:
//! - **Heap**: An arena of instances addressed by **Handle**s; handle equality is object identity
//! - **Node**: The order-preserving document model (`@type`, `@id`, `@ref`, `@items`)
//! - **TypeRegistry**: Type descriptors plus per-type factories, readers and writers,
//!   looked up by inheritance distance
//! - **SecurityPolicy**: A denylist enforced before any instance is written or built
//! - **Codec**: Registry and policy bundled for concurrent serialize/deserialize calls
//!
//! # Example
//!
//! ```
//! use chelate_core::{Codec, FieldType, Heap, Instance, ReadOptions, TypeDescriptor,
//!     TypeRegistry, Value, SecurityPolicy, WriteOptions};
//!
//! let mut registry = TypeRegistry::new();
//! registry.register(TypeDescriptor::record(
//!     "Person",
//!     [("name", FieldType::Str), ("friend", FieldType::named("Person"))],
//! ));
//! let codec = Codec::new(registry, SecurityPolicy::default());
//!
//! // A person who is their own friend.
//! let mut heap = Heap::new();
//! let me = heap.alloc(Instance::record("Person").with_field("name", "narcissus"));
//! heap.set_field(me, "friend", me).unwrap();
//!
//! let doc = codec.serialize(&heap, &Value::Ref(me), &WriteOptions::default()).unwrap();
//! let back = codec.deserialize(&doc, &ReadOptions::default()).unwrap();
//!
//! let root = back.root.as_handle().unwrap();
//! assert_eq!(back.heap.follow(root, "friend"), Some(root));
//! ```
//!
//! # Document shape
//!
//! - Objects: `{"@type": "Person", "@id": 1, "name": "ada"}`; `@id` only appears
//!   on values referenced more than once
//! - References: `{"@ref": 1}` and nothing else
//! - Typed or identified arrays: `{"@type": "Roster", "@items": [...]}`; all
//!   others are bare JSON arrays
//! - Maps with non-string keys: `{"@keys": [...], "@items": [...]}`

mod codec;
mod coerce;
mod describe;
mod document;
mod error;
mod heap;
mod options;
mod registry;
mod resolver;
mod schema;
mod security;
mod wire;
mod writer;

pub use codec::Codec;
pub use describe::{Describe, Typed};
pub use document::{
    ArrayNode, ID_KEY, ITEMS_KEY, IdentityId, KEYS_KEY, Node, Number, ObjectNode, REF_KEY,
    TYPE_KEY,
};
pub use error::{BoxError, CodecError, FieldPath, PathSegment};
pub use heap::{Body, Handle, Heap, HeapError, Instance, NativeData, NativeValue, SlotKey, Value};
pub use options::{
    DeniedTypePolicy, ReadOptions, ResolveMode, ShowType, TypeAliases, UnknownTypePolicy,
    WriteOptions,
};
pub use registry::{
    CustomReader, CustomWriter, Factory, Nearest, RegistryEntry, RegistryError, TieBreak,
    TypeRegistry, ValueParser,
};
pub use resolver::{
    MissingField, ReadContext, ResolveReport, Resolved, Slot, TypeEvent, deserialize,
};
pub use schema::{
    FieldType, FloatType, IntType, PRIMITIVE_NAMES, Shape, TypeDescriptor, TypeKind, TypeName,
};
pub use security::{DEFAULT_DENYLIST, SecurityPolicy};
pub use wire::{MetaKeys, Wire, WireError, classify};
pub use writer::{WriteContext, serialize};

#[cfg(feature = "derive")]
pub use chelate_derive::Describe;
