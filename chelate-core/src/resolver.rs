//! Graph resolver: turns a document back into a heap of instances.
//!
//! Resolution runs in two phases. Phase A walks the document outer to inner
//! through a FIFO worklist: every composite node is instantiated and its id
//! registered before any of its children are looked at, and a reference to an
//! id not yet seen is recorded as pending with a null placeholder. Phase B
//! patches every pending reference once all definitions exist, so reference
//! cycles of any length close without recursion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use indexmap::IndexMap;
use tracing::{debug, instrument, trace, warn};

use crate::coerce::coerce_scalar;
use crate::document::{IdentityId, ITEMS_KEY, KEYS_KEY, Node, ObjectNode};
use crate::error::{CodecError, FieldPath};
use crate::heap::{Body, Handle, Heap, Instance, SlotKey, Value};
use crate::options::{DeniedTypePolicy, ReadOptions, ResolveMode, UnknownTypePolicy};
use crate::registry::TypeRegistry;
use crate::schema::{FieldType, Shape, TypeName};
use crate::security::SecurityPolicy;

/// Outcome of resolving one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// The value is available now.
    Ready(Value),
    /// The node refers to an id whose definition has not been resolved yet.
    Forward(IdentityId),
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Slot::Ready(v)
    }
}

/// A type event recorded during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEvent {
    pub type_name: TypeName,
    pub path: FieldPath,
}

/// A document field the target record does not declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub type_name: TypeName,
    pub field: String,
    pub path: FieldPath,
}

/// Non-fatal events of a deserialize call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Types replaced by null because the security policy denies them.
    pub denied: Vec<TypeEvent>,
    /// Unknown `@type` names that were read as generic maps or arrays.
    pub unknown_types: Vec<TypeEvent>,
    /// Document fields skipped because the record does not declare them.
    pub missing_fields: Vec<MissingField>,
}

impl ResolveReport {
    pub fn is_clean(&self) -> bool {
        self.denied.is_empty() && self.unknown_types.is_empty() && self.missing_fields.is_empty()
    }
}

/// The graph built by [`deserialize`].
#[derive(Debug)]
pub struct Resolved {
    pub heap: Heap,
    pub root: Value,
    pub report: ResolveReport,
}

#[derive(Debug, Clone)]
enum Entry {
    Value(Value),
    /// The id stands for another id (a reader returned a forward slot).
    Alias(IdentityId),
}

struct FillJob<'doc> {
    handle: Handle,
    node: &'doc Node,
    expected: FieldType,
    /// Field types of the named type a maps-mode object stands for.
    schema: Option<Arc<IndexMap<String, FieldType>>>,
    path: FieldPath,
    depth: usize,
}

struct PendingReference {
    handle: Handle,
    slot: SlotKey,
    target: IdentityId,
    path: FieldPath,
}

/// State of one deserialize call, handed to custom readers and factories.
pub struct ReadContext<'r, 'doc> {
    registry: &'r TypeRegistry,
    policy: &'r SecurityPolicy,
    opts: &'r ReadOptions,
    heap: Heap,
    identities: HashMap<IdentityId, Entry>,
    jobs: VecDeque<FillJob<'doc>>,
    pending: Vec<PendingReference>,
    report: ResolveReport,
    path: FieldPath,
    depth: usize,
    references: usize,
}

/// Resolves a document into a fresh heap.
#[instrument(skip_all, fields(mode = ?opts.mode))]
pub fn deserialize(
    node: &Node,
    registry: &TypeRegistry,
    policy: &SecurityPolicy,
    opts: &ReadOptions,
) -> Result<Resolved, CodecError> {
    let mut ctx = ReadContext {
        registry,
        policy,
        opts,
        heap: Heap::new(),
        identities: HashMap::new(),
        jobs: VecDeque::new(),
        pending: Vec::new(),
        report: ResolveReport::default(),
        path: FieldPath::root(),
        depth: 0,
        references: 0,
    };

    let root = ctx.resolve(node, &FieldType::Any)?;
    ctx.drain()?;
    debug!(
        instances = ctx.heap.len(),
        pending = ctx.pending.len(),
        "instantiated document"
    );
    ctx.patch()?;

    let root = match root {
        Slot::Ready(value) => value,
        Slot::Forward(id) => ctx.lookup(id)?.ok_or_else(|| {
            CodecError::malformed(&FieldPath::root(), format!("root refers to undefined @ref {id}"))
        })?,
    };
    Ok(Resolved {
        heap: ctx.heap,
        root,
        report: ctx.report,
    })
}

impl<'r, 'doc> ReadContext<'r, 'doc> {
    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    pub fn options(&self) -> &'r ReadOptions {
        self.opts
    }

    /// Location of the node being resolved.
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn alloc(&mut self, instance: Instance) -> Handle {
        self.heap.alloc(instance)
    }

    /// Resolves a node in a slot declaring `expected`.
    ///
    /// Composite children are instantiated immediately but populated later,
    /// after the node currently being filled.
    pub fn resolve(&mut self, node: &'doc Node, expected: &FieldType) -> Result<Slot, CodecError> {
        match node {
            Node::Reference(id) => self.resolve_reference(*id),
            Node::Array(_) | Node::Object(_) => self.resolve_composite(node, expected),
            _ => self.resolve_scalar(node, expected),
        }
    }

    /// Coerces a scalar node without running custom readers.
    pub fn coerce(&self, node: &Node, expected: &FieldType) -> Result<Value, CodecError> {
        coerce_scalar(node, expected, self.registry, self.opts, &self.path)
    }

    /// Stores a resolved slot into an instance. A forward slot leaves a null
    /// placeholder that is patched once its target is defined.
    pub fn assign(&mut self, handle: Handle, slot: SlotKey, value: Slot) -> Result<(), CodecError> {
        match value {
            Slot::Ready(value) => Ok(self.heap.assign(handle, &slot, value)?),
            Slot::Forward(target) => {
                if self.pending.len() >= self.opts.max_unresolved_references {
                    return Err(CodecError::LimitExceeded(format!(
                        "more than {} unresolved references",
                        self.opts.max_unresolved_references
                    )));
                }
                trace!(id = %target, path = %self.path, "deferred forward reference");
                self.heap.assign(handle, &slot, Value::Null)?;
                self.pending.push(PendingReference {
                    handle,
                    slot,
                    target,
                    path: self.path.clone(),
                });
                Ok(())
            }
        }
    }

    fn child<T>(&mut self, path: FieldPath, f: impl FnOnce(&mut Self) -> T) -> T {
        let parent = std::mem::replace(&mut self.path, path);
        let result = f(self);
        self.path = parent;
        result
    }

    fn nested<T>(&mut self, depth: usize, f: impl FnOnce(&mut Self) -> T) -> T {
        let parent = std::mem::replace(&mut self.depth, depth);
        let result = f(self);
        self.depth = parent;
        result
    }

    fn define(&mut self, id: IdentityId, entry: Entry) -> Result<(), CodecError> {
        if self.identities.insert(id, entry).is_some() {
            return Err(CodecError::malformed(&self.path, format!("@id {id} is defined twice")));
        }
        Ok(())
    }

    /// Follows an id to its value. `None` means the id is not defined yet.
    fn lookup(&self, id: IdentityId) -> Result<Option<Value>, CodecError> {
        let mut current = id;
        let mut seen = HashSet::new();
        loop {
            match self.identities.get(&current) {
                None => return Ok(None),
                Some(Entry::Value(value)) => return Ok(Some(value.clone())),
                Some(Entry::Alias(next)) => {
                    if !seen.insert(current) {
                        return Err(CodecError::malformed(
                            &self.path,
                            format!("reference chain starting at @ref {id} is cyclic"),
                        ));
                    }
                    if seen.len() > self.opts.max_reference_chain_depth {
                        return Err(CodecError::LimitExceeded(format!(
                            "reference chain longer than {}",
                            self.opts.max_reference_chain_depth
                        )));
                    }
                    current = *next;
                }
            }
        }
    }

    fn resolve_reference(&mut self, id: IdentityId) -> Result<Slot, CodecError> {
        self.references += 1;
        if self.references > self.opts.max_object_references {
            return Err(CodecError::LimitExceeded(format!(
                "more than {} object references",
                self.opts.max_object_references
            )));
        }
        Ok(match self.lookup(id)? {
            Some(value) => Slot::Ready(value),
            None => Slot::Forward(id),
        })
    }

    fn deny(&mut self, type_name: &TypeName, node: Option<&Node>) -> Result<Slot, CodecError> {
        if self.opts.on_denied == DeniedTypePolicy::Fail {
            return Err(CodecError::SecurityDenied {
                type_name: type_name.clone(),
                path: self.path.clone(),
            });
        }
        warn!(type_name = %type_name, path = %self.path, "denied type read as null");
        self.report.denied.push(TypeEvent {
            type_name: type_name.clone(),
            path: self.path.clone(),
        });
        // Nothing under a denied node is built, but its ids still resolve.
        let mut stack: Vec<&Node> = node.into_iter().collect();
        while let Some(next) = stack.pop() {
            if let Some(id) = next.id() {
                self.define(id, Entry::Value(Value::Null))?;
            }
            stack.extend(next.children());
        }
        Ok(Slot::Ready(Value::Null))
    }

    fn resolve_scalar(&mut self, node: &'doc Node, expected: &FieldType) -> Result<Slot, CodecError> {
        if let FieldType::Named(name) = expected {
            let registry = self.registry;
            if registry.is_denied(self.policy, name) {
                return self.deny(name, None);
            }
            if self.opts.mode == ResolveMode::Typed && !node.is_null() {
                let reader = registry
                    .nearest_reader(name)?
                    .and_then(|nearest| nearest.entry.reader());
                if let Some(reader) = reader {
                    return reader.read(node, self);
                }
            }
        }
        self.coerce(node, expected).map(Slot::Ready)
    }

    fn resolve_composite(&mut self, node: &'doc Node, expected: &FieldType) -> Result<Slot, CodecError> {
        let depth = self.depth + 1;
        if depth > self.opts.max_depth {
            return Err(CodecError::LimitExceeded(format!(
                "document deeper than {}",
                self.opts.max_depth
            )));
        }

        let registry = self.registry;
        let id = node.id();
        let generic = match node {
            Node::Array(_) => TypeName::array(),
            _ => TypeName::map(),
        };
        let explicit = node
            .declared_type()
            .map(|t| self.opts.aliases.expand(t.as_str()));
        let mut type_name = match (explicit, expected) {
            (Some(t), _) => t,
            (None, FieldType::Named(t))
                if !registry.descriptor(t.as_str()).is_some_and(|d| d.is_capability()) =>
            {
                t.clone()
            }
            (None, FieldType::Sequence(_)) => TypeName::array(),
            (None, FieldType::Map { .. }) => TypeName::map(),
            _ => generic.clone(),
        };

        if registry.is_denied(self.policy, &type_name) {
            return self.deny(&type_name, Some(node));
        }

        let typed = self.opts.mode == ResolveMode::Typed;
        let mut schema = None;
        if !typed {
            if !type_name.is_generic() {
                schema = registry.fields_of(&type_name);
            }
            type_name = generic;
        } else {
            let reader = registry
                .nearest_reader(&type_name)?
                .and_then(|nearest| nearest.entry.reader());
            if let Some(reader) = reader {
                let slot = self.nested(depth, |ctx| reader.read(node, ctx))?;
                if let Some(id) = id {
                    let entry = match &slot {
                        Slot::Ready(value) => Entry::Value(value.clone()),
                        Slot::Forward(target) => Entry::Alias(*target),
                    };
                    self.define(id, entry)?;
                }
                return Ok(slot);
            }

            if registry.is_value_type(type_name.as_str()) {
                let value = self.read_value_type(node, &type_name)?;
                if let Some(id) = id {
                    self.define(id, Entry::Value(value.clone()))?;
                }
                return Ok(Slot::Ready(value));
            }

            if registry.resolve(type_name.as_str()).is_none() {
                if self.opts.unknown_type == UnknownTypePolicy::Fail {
                    return Err(CodecError::UnknownType {
                        type_name,
                        path: self.path.clone(),
                    });
                }
                warn!(type_name = %type_name, path = %self.path, "unknown type read as {generic}");
                self.report.unknown_types.push(TypeEvent {
                    type_name,
                    path: self.path.clone(),
                });
                type_name = generic;
            }
        }

        let factory = if typed {
            registry
                .nearest_factory(&type_name)?
                .and_then(|nearest| nearest.entry.factory())
        } else {
            None
        };
        let (instance, is_final) = match factory {
            Some(factory) => {
                let instance = self
                    .nested(depth, |ctx| factory.create(&type_name, node, ctx))
                    .map_err(|source| CodecError::Instantiation {
                        type_name: type_name.clone(),
                        path: self.path.clone(),
                        source,
                    })?;
                (instance, factory.is_final())
            }
            None => (self.default_instance(&type_name, node)?, false),
        };

        let handle = self.heap.alloc(instance);
        let value = Value::Ref(handle);
        if let Some(id) = id {
            self.define(id, Entry::Value(value.clone()))?;
        }
        if !is_final {
            self.jobs.push_back(FillJob {
                handle,
                node,
                expected: expected.clone(),
                schema,
                path: self.path.clone(),
                depth,
            });
        }
        Ok(Slot::Ready(value))
    }

    /// `{"@type": t, "value": ...}` for a value type in an untyped slot.
    fn read_value_type(&self, node: &Node, type_name: &TypeName) -> Result<Value, CodecError> {
        let inner = match node {
            Node::Object(object) => object.get("value"),
            _ => None,
        };
        let inner = inner.ok_or_else(|| {
            CodecError::malformed(&self.path, format!("value type {type_name} needs a `value` field"))
        })?;
        self.coerce(inner, &FieldType::Named(type_name.clone()))
    }

    fn default_instance(&self, type_name: &TypeName, node: &Node) -> Result<Instance, CodecError> {
        let registry = self.registry;
        let descriptor = registry.descriptor(type_name.as_str());
        let no_factory = |reason: &str| CodecError::Instantiation {
            type_name: type_name.clone(),
            path: self.path.clone(),
            source: reason.into(),
        };
        if descriptor.is_some_and(|d| d.is_capability()) {
            return Err(no_factory("a capability cannot be instantiated"));
        }

        match (descriptor.map(|d| &d.shape), node) {
            (Some(Shape::Record(_)), Node::Object(object)) if !object.is_keyed_map() => {
                let mut instance = Instance::record(type_name);
                if let (Some(layout), Body::Fields(fields)) =
                    (registry.fields_of(type_name), &mut instance.body)
                {
                    for (name, field_type) in layout.iter() {
                        fields.insert(name.clone(), field_type.default_value());
                    }
                }
                Ok(instance)
            }
            (Some(Shape::Sequence(_)), Node::Array(_)) => Ok(Instance::sequence(type_name, Vec::new())),
            (Some(Shape::Map { .. }), Node::Object(_)) => Ok(Instance::mapping(type_name, Vec::new())),
            (Some(Shape::Opaque), _) => Err(no_factory("no factory registered")),
            (None, Node::Array(_)) if type_name.is_generic() => Ok(Instance::list(Vec::new())),
            (None, Node::Object(_)) if type_name.is_generic() => Ok(Instance::map(Vec::new())),
            _ => Err(CodecError::malformed(
                &self.path,
                format!("{} node cannot hold {type_name}", node.kind()),
            )),
        }
    }

    /// Element type of a sequence instance.
    fn element_type(&self, type_name: &TypeName, expected: &FieldType) -> FieldType {
        if !type_name.is_generic() {
            if let Some(Shape::Sequence(element)) = self.registry.descriptor(type_name.as_str()).map(|d| &d.shape) {
                return element.clone();
            }
        }
        match expected {
            FieldType::Sequence(element) => (**element).clone(),
            _ => FieldType::Any,
        }
    }

    /// Key and value types of a mapping instance.
    fn entry_types(&self, type_name: &TypeName, expected: &FieldType) -> (FieldType, FieldType) {
        if !type_name.is_generic() {
            if let Some(Shape::Map { key, value }) = self.registry.descriptor(type_name.as_str()).map(|d| &d.shape) {
                return (key.clone(), value.clone());
            }
        }
        match expected {
            FieldType::Map { key, value } => ((**key).clone(), (**value).clone()),
            _ => (FieldType::Any, FieldType::Any),
        }
    }

    fn drain(&mut self) -> Result<(), CodecError> {
        while let Some(job) = self.jobs.pop_front() {
            self.path = job.path.clone();
            self.depth = job.depth;
            self.fill(&job)?;
        }
        self.path = FieldPath::root();
        self.depth = 0;
        Ok(())
    }

    fn fill(&mut self, job: &FillJob<'doc>) -> Result<(), CodecError> {
        let instance = self.heap.try_get(job.handle)?;
        let type_name = instance.type_name.clone();
        let body = instance.body.kind();

        match (body, job.node) {
            ("fields", Node::Object(object)) => self.fill_record(job, &type_name, object),
            ("items", Node::Array(array)) => {
                let element = self.element_type(&type_name, &job.expected);
                for (i, item) in array.items.iter().enumerate() {
                    let slot = self.child(job.path.index(i), |ctx| ctx.resolve(item, &element))?;
                    let index = self.heap.push(job.handle, Value::Null)?;
                    self.assign(job.handle, SlotKey::Index(index), slot)?;
                }
                Ok(())
            }
            ("entries", Node::Object(object)) => self.fill_map(job, &type_name, object),
            (_, node) => Err(CodecError::malformed(
                &job.path,
                format!("{type_name} cannot be populated from a {} node", node.kind()),
            )),
        }
    }

    fn fill_record(
        &mut self,
        job: &FillJob<'doc>,
        type_name: &TypeName,
        object: &'doc ObjectNode,
    ) -> Result<(), CodecError> {
        let layout = self.registry.fields_of(type_name);
        for (name, child) in object.data_fields() {
            let field_type = match &layout {
                None => FieldType::Any,
                Some(layout) => match layout.get(name.as_str()) {
                    Some(field_type) => field_type.clone(),
                    None => {
                        debug!(type_name = %type_name, field = %name, "skipped undeclared field");
                        self.report.missing_fields.push(MissingField {
                            type_name: type_name.clone(),
                            field: name.clone(),
                            path: job.path.clone(),
                        });
                        continue;
                    }
                },
            };
            let slot = self.child(job.path.field(name.as_str()), |ctx| ctx.resolve(child, &field_type))?;
            self.assign(job.handle, SlotKey::Field(name.clone()), slot)?;
        }
        Ok(())
    }

    fn fill_map(
        &mut self,
        job: &FillJob<'doc>,
        type_name: &TypeName,
        object: &'doc ObjectNode,
    ) -> Result<(), CodecError> {
        let (key_type, value_type) = self.entry_types(type_name, &job.expected);

        if object.is_keyed_map() {
            let column = |key: &str| {
                object
                    .get(key)
                    .and_then(Node::as_array)
                    .map(|array| array.items.as_slice())
                    .ok_or_else(|| CodecError::malformed(&job.path, format!("`{key}` must be an array")))
            };
            let keys = column(KEYS_KEY)?;
            let values = column(ITEMS_KEY)?;
            if keys.len() != values.len() {
                return Err(CodecError::malformed(
                    &job.path,
                    format!("{} keys but {} values", keys.len(), values.len()),
                ));
            }
            for (i, (k, v)) in keys.iter().zip(values).enumerate() {
                let path = job.path.index(i);
                let key = self.child(path.clone(), |ctx| ctx.resolve(k, &key_type))?;
                let value = self.child(path, |ctx| ctx.resolve(v, &value_type))?;
                self.put_entry(job.handle, key, value)?;
            }
            return Ok(());
        }

        for (name, child) in object.data_fields() {
            let path = job.path.field(name.as_str());
            let key_node = Node::String(name.clone());
            let key = coerce_scalar(&key_node, &key_type, self.registry, self.opts, &path)?;
            let field_type = job
                .schema
                .as_ref()
                .and_then(|schema| schema.get(name.as_str()))
                .unwrap_or(&value_type)
                .clone();
            let value = self.child(path, |ctx| ctx.resolve(child, &field_type))?;
            self.put_entry(job.handle, Slot::Ready(key), value)?;
        }
        Ok(())
    }

    fn put_entry(&mut self, handle: Handle, key: Slot, value: Slot) -> Result<(), CodecError> {
        let index = self.heap.insert_entry(handle, Value::Null, Value::Null)?;
        self.assign(handle, SlotKey::EntryKey(index), key)?;
        self.assign(handle, SlotKey::EntryValue(index), value)
    }

    fn patch(&mut self) -> Result<(), CodecError> {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for reference in pending {
            let value = self.lookup(reference.target)?.ok_or_else(|| {
                CodecError::malformed(
                    &reference.path,
                    format!("forward reference @ref {}, but no object defined", reference.target),
                )
            })?;
            self.heap.assign(reference.handle, &reference.slot, value)?;
        }
        debug!(patched = count, "resolved forward references");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CustomReader;
    use crate::schema::{IntType, TypeDescriptor};
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Node {
        serde_json::from_value(value).unwrap()
    }

    struct Redirect;

    impl CustomReader for Redirect {
        fn read<'doc>(
            &self,
            node: &'doc Node,
            ctx: &mut ReadContext<'_, 'doc>,
        ) -> Result<Slot, CodecError> {
            match node.get("to") {
                Some(to) => ctx.resolve(to, &FieldType::Any),
                None => Ok(Slot::Ready(Value::Null)),
            }
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .register(TypeDescriptor::record(
                "Person",
                [
                    ("name", FieldType::Str),
                    ("age", FieldType::Int(IntType::U8)),
                    ("friend", FieldType::named("Person")),
                ],
            ))
            .register(TypeDescriptor::record(
                "Roster",
                [("people", FieldType::sequence(FieldType::named("Person")))],
            ))
            .set_reader("Redirect", Redirect);
        registry
    }

    fn read_with(node: &Node, opts: &ReadOptions) -> Result<Resolved, CodecError> {
        deserialize(node, &registry(), &SecurityPolicy::default(), opts)
    }

    fn read(node: &Node) -> Resolved {
        read_with(node, &ReadOptions::default()).unwrap()
    }

    fn items(resolved: &Resolved) -> Vec<Value> {
        let handle = resolved.root.as_handle().unwrap();
        resolved.heap.get(handle).unwrap().items().unwrap().to_vec()
    }

    #[test]
    fn typed_record_with_defaults() {
        let r = read(&doc(json!({"@type": "Person", "name": "ada"})));
        let h = r.root.as_handle().unwrap();
        assert_eq!(r.heap.field(h, "name"), Some(&Value::from("ada")));
        // Unset primitive fields hold their zero value.
        assert_eq!(r.heap.field(h, "age"), Some(&Value::UInt(0)));
        assert_eq!(r.heap.field(h, "friend"), Some(&Value::Null));
        assert!(r.report.is_clean());
    }

    #[test]
    fn declared_field_types_drive_untagged_children() {
        let r = read(&doc(json!({"@type": "Roster", "people": [{"name": "a"}, {"name": "b"}]})));
        let root = r.root.as_handle().unwrap();
        let people = r.heap.follow(root, "people").unwrap();
        let first = r.heap.get(people).unwrap().items().unwrap()[0].as_handle().unwrap();
        assert_eq!(r.heap.get(first).unwrap().type_name.as_str(), "Person");
    }

    #[test]
    fn forward_reference_is_patched() {
        let r = read(&doc(json!([{"@ref": 1}, {"@type": "Person", "@id": 1, "name": "ada"}])));
        let items = items(&r);
        assert_eq!(items[0], items[1]);
        assert!(items[0].as_handle().is_some());
    }

    #[test]
    fn self_reference_closes_cycle() {
        let r = read(&doc(json!({"@type": "Person", "@id": 1, "friend": {"@ref": 1}})));
        let h = r.root.as_handle().unwrap();
        assert_eq!(r.heap.follow(h, "friend"), Some(h));
    }

    #[test]
    fn undefined_reference_is_malformed() {
        let err = read_with(&doc(json!([{"@ref": 9}])), &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, CodecError::MalformedDocument { .. }));
        assert!(err.to_string().contains("@ref 9"), "{err}");
    }

    #[test]
    fn duplicate_id_is_malformed() {
        let node = doc(json!([{"@id": 1, "@items": []}, {"@id": 1, "@items": []}]));
        assert!(matches!(
            read_with(&node, &ReadOptions::default()),
            Err(CodecError::MalformedDocument { .. })
        ));
    }

    #[test]
    fn denied_type_reads_as_null() {
        let node = doc(json!([{"@type": "std::process::Command", "@id": 1, "program": "sh"}, {"@ref": 1}]));
        let r = read(&node);
        assert_eq!(items(&r), vec![Value::Null, Value::Null]);
        assert_eq!(r.report.denied.len(), 1);
        assert_eq!(r.report.denied[0].path.to_string(), "$[0]");

        let strict = ReadOptions::default().with_on_denied(DeniedTypePolicy::Fail);
        assert!(matches!(
            read_with(&node, &strict),
            Err(CodecError::SecurityDenied { .. })
        ));
    }

    #[test]
    fn unknown_types_become_maps_or_fail() {
        let node = doc(json!({"@type": "Mystery", "x": 1}));
        let r = read(&node);
        let h = r.root.as_handle().unwrap();
        assert_eq!(r.heap.get(h).unwrap().type_name.as_str(), "map");
        assert_eq!(r.heap.field(h, "x"), Some(&Value::Int(1)));
        assert_eq!(r.report.unknown_types[0].type_name.as_str(), "Mystery");

        let strict = ReadOptions::default().with_unknown_type(UnknownTypePolicy::Fail);
        assert!(matches!(read_with(&node, &strict), Err(CodecError::UnknownType { .. })));
    }

    #[test]
    fn undeclared_fields_are_reported() {
        let r = read(&doc(json!({"@type": "Person", "name": "ada", "shoe_size": 38})));
        let h = r.root.as_handle().unwrap();
        assert_eq!(r.heap.field(h, "shoe_size"), None);
        assert_eq!(r.report.missing_fields.len(), 1);
        assert_eq!(r.report.missing_fields[0].field, "shoe_size");
    }

    #[test]
    fn maps_mode_ignores_types() {
        let r = read_with(&doc(json!({"@type": "Person", "name": "ada"})), &ReadOptions::maps()).unwrap();
        let h = r.root.as_handle().unwrap();
        assert_eq!(r.heap.get(h).unwrap().type_name.as_str(), "map");
        assert_eq!(r.heap.field(h, "name"), Some(&Value::from("ada")));
    }

    #[test]
    fn maps_mode_coerces_with_declared_field_types() {
        let node = doc(json!({
            "@type": "Person",
            "name": "ada",
            "age": "36",
            "friend": "",
            "nickname": "a"
        }));
        let r = read_with(&node, &ReadOptions::maps()).unwrap();
        let h = r.root.as_handle().unwrap();
        assert_eq!(r.heap.get(h).unwrap().type_name.as_str(), "map");
        assert_eq!(r.heap.field(h, "age"), Some(&Value::UInt(36)));
        // Empty text in an object-typed field is null, not a string.
        assert_eq!(r.heap.field(h, "friend"), Some(&Value::Null));
        assert_eq!(r.heap.field(h, "nickname"), Some(&Value::from("a")));
    }

    #[test]
    fn ids_inside_denied_nodes_read_as_null() {
        let node = doc(json!([
            {"@ref": 3},
            {
                "@type": "std::process::Command",
                "@id": 1,
                "arg": {"@type": "Person", "@id": 2, "friend": {"@id": 3, "name": "x"}}
            },
            {"@ref": 2},
            {"@ref": 1}
        ]));
        let r = read(&node);
        assert_eq!(items(&r), vec![Value::Null; 4]);
        assert_eq!(r.report.denied.len(), 1);
        assert_eq!(r.heap.len(), 1);
    }

    #[test]
    fn keyed_maps_restore_keys() {
        let r = read(&doc(json!({"@keys": [1, 2], "@items": ["one", "two"]})));
        let h = r.root.as_handle().unwrap();
        let entries = r.heap.get(h).unwrap().entries().unwrap();
        assert_eq!(entries[1], (Value::Int(2), Value::from("two")));
    }

    #[test]
    fn reader_forward_slots_form_chains() {
        let node = doc(json!([
            {"@ref": 2},
            {"@type": "Redirect", "@id": 2, "to": {"@ref": 3}},
            {"@type": "Person", "@id": 3, "name": "x"}
        ]));
        let r = read(&node);
        let items = items(&r);
        assert_eq!(items[0], items[2]);
        assert_eq!(items[1], items[2]);
    }

    #[test]
    fn cyclic_chains_are_rejected() {
        let node = doc(json!([
            {"@type": "Redirect", "@id": 1, "to": {"@ref": 2}},
            {"@type": "Redirect", "@id": 2, "to": {"@ref": 1}}
        ]));
        let err = read_with(&node, &ReadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("cyclic"), "{err}");
    }

    #[test]
    fn limits() {
        let deep = doc(json!([[[[1]]]]));
        assert!(matches!(
            read_with(&deep, &ReadOptions::default().with_max_depth(2)),
            Err(CodecError::LimitExceeded(_))
        ));

        let forward = doc(json!([{"@ref": 1}, {"@ref": 1}, {"@id": 1, "@items": []}]));
        assert!(matches!(
            read_with(&forward, &ReadOptions::default().with_max_unresolved_references(1)),
            Err(CodecError::LimitExceeded(_))
        ));
        assert!(matches!(
            read_with(&forward, &ReadOptions::default().with_max_object_references(1)),
            Err(CodecError::LimitExceeded(_))
        ));
        assert!(read_with(&forward, &ReadOptions::default()).is_ok());
    }

    #[test]
    fn value_types_in_untyped_slots() {
        let r = read(&doc(json!([{"@type": "char", "value": "x"}, {"@type": "i32", "value": 5}])));
        assert_eq!(items(&r), vec![Value::Char('x'), Value::Int(5)]);
    }
}
