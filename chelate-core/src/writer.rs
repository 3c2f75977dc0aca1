//! Graph writer: walks a heap from a root value and produces a document.
//!
//! Writing happens in two passes. The trace pass counts how often each
//! instance is reachable; only instances reached at least twice are given an
//! `@id`. The emit pass then walks depth-first, writing the first visit of a
//! shared instance as a definition and every later visit as `{"@ref": id}`.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

use crate::document::{
    ArrayNode, ID_KEY, ITEMS_KEY, IdentityId, KEYS_KEY, Node, Number, ObjectNode, REF_KEY, TYPE_KEY,
};
use crate::error::{CodecError, FieldPath};
use crate::heap::{Body, Handle, Heap, Instance, NativeValue, Value};
use crate::options::{ShowType, WriteOptions};
use crate::registry::{CustomWriter, TypeRegistry};
use crate::schema::{FieldType, Shape, TypeName};
use crate::security::SecurityPolicy;

/// State of one serialize call, handed to custom writers so they can write
/// nested values through the engine.
pub struct WriteContext<'a> {
    heap: &'a Heap,
    registry: &'a TypeRegistry,
    policy: &'a SecurityPolicy,
    opts: &'a WriteOptions,
    ref_counts: HashMap<Handle, usize>,
    ids: HashMap<Handle, IdentityId>,
    defined: HashSet<Handle>,
    next_id: IdentityId,
    path: FieldPath,
    depth: usize,
}

/// Serializes the graph reachable from `root`.
#[instrument(skip_all, fields(show_type = ?opts.show_type))]
pub fn serialize(
    heap: &Heap,
    root: &Value,
    registry: &TypeRegistry,
    policy: &SecurityPolicy,
    opts: &WriteOptions,
) -> Result<Node, CodecError> {
    let mut ctx = WriteContext {
        heap,
        registry,
        policy,
        opts,
        ref_counts: HashMap::new(),
        ids: HashMap::new(),
        defined: HashSet::new(),
        next_id: IdentityId::first(),
        path: FieldPath::root(),
        depth: 0,
    };
    ctx.trace_references(root)?;
    let node = ctx.write(root, &FieldType::Any)?;
    debug!(
        objects = ctx.ref_counts.len(),
        ids = ctx.ids.len(),
        "serialized object graph"
    );
    Ok(node)
}

impl<'a> WriteContext<'a> {
    pub fn heap(&self) -> &'a Heap {
        self.heap
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn options(&self) -> &'a WriteOptions {
        self.opts
    }

    /// Location of the value being written.
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// The instance behind a handle.
    pub fn instance(&self, handle: Handle) -> Result<&'a Instance, CodecError> {
        Ok(self.heap.try_get(handle)?)
    }

    fn is_denied(&self, type_name: &TypeName) -> bool {
        self.registry.is_denied(self.policy, type_name)
    }

    /// Counts how many times each instance is reachable. Denied instances are
    /// not entered; value-type instances are entered but never counted.
    fn trace_references(&mut self, root: &Value) -> Result<(), CodecError> {
        let mut stack: Vec<(Handle, usize)> = Vec::new();
        let mut entered: HashSet<Handle> = HashSet::new();
        if let Value::Ref(h) = root {
            stack.push((*h, 0));
        }

        while let Some((handle, depth)) = stack.pop() {
            if depth > self.opts.max_depth {
                return Err(CodecError::LimitExceeded(format!(
                    "object graph deeper than {}",
                    self.opts.max_depth
                )));
            }
            let instance = self.heap.try_get(handle)?;
            if self.is_denied(&instance.type_name) {
                continue;
            }
            if !self.registry.is_value_type(instance.type_name.as_str()) {
                *self.ref_counts.entry(handle).or_insert(0) += 1;
                if self.ref_counts.len() > self.opts.max_object_count {
                    return Err(CodecError::LimitExceeded(format!(
                        "more than {} objects",
                        self.opts.max_object_count
                    )));
                }
            }
            if !entered.insert(handle) {
                continue;
            }
            let children: Box<dyn Iterator<Item = &Value>> = match &instance.body {
                Body::Fields(fields) => Box::new(fields.values()),
                Body::Items(items) => Box::new(items.iter()),
                Body::Entries(entries) => Box::new(entries.iter().flat_map(|(k, v)| [k, v])),
            };
            for child in children {
                if let Value::Ref(h) = child {
                    stack.push((*h, depth + 1));
                }
            }
        }
        Ok(())
    }

    /// Writes a value whose slot declares `declared`.
    pub fn write(&mut self, value: &Value, declared: &FieldType) -> Result<Node, CodecError> {
        match value {
            Value::Null => Ok(Node::Null),
            Value::Bool(b) => Ok(Node::Bool(*b)),
            Value::Int(i) => Ok(Node::Number(Number::Int(*i))),
            Value::UInt(u) => Ok(Node::Number(Number::from_u64(*u))),
            Value::Float(f) if f.is_finite() => Ok(Node::Number(Number::Float(*f))),
            Value::Float(_) => Ok(Node::Null),
            Value::Str(s) => Ok(Node::String(s.clone())),
            Value::Char(c) => {
                let text = Node::String(c.to_string());
                if matches!(declared, FieldType::Any) && self.opts.show_type != ShowType::Never {
                    Ok(self.wrap_value(TypeName::new("char"), text))
                } else {
                    Ok(text)
                }
            }
            Value::Native(native) => self.write_native(native, declared),
            Value::Ref(handle) => self.write_instance(*handle, declared),
        }
    }

    fn wrap_value(&self, type_name: TypeName, text: Node) -> Node {
        let tag = self.opts.aliases.shorten(&type_name).to_string();
        Node::Object(ObjectNode::typed(tag).with_field("value", text))
    }

    fn write_native(&mut self, native: &NativeValue, declared: &FieldType) -> Result<Node, CodecError> {
        let type_name = native.type_name();
        if self.is_denied(type_name) {
            warn!(type_name = %type_name, path = %self.path, "denied value written as null");
            return Ok(Node::Null);
        }
        if let Some(writer) = self.custom_writer(type_name)? {
            return writer.write(&Value::Native(native.clone()), self);
        }
        let text = Node::String(native.to_text());
        let implied = match declared {
            FieldType::Named(name) => name == type_name || name.unboxed().as_ref() == Some(type_name),
            _ => false,
        };
        if implied || self.opts.show_type == ShowType::Never {
            Ok(text)
        } else {
            Ok(self.wrap_value(type_name.clone(), text))
        }
    }

    fn custom_writer(&self, type_name: &TypeName) -> Result<Option<Arc<dyn CustomWriter>>, CodecError> {
        let registry = self.registry;
        Ok(registry
            .nearest_writer(type_name)?
            .and_then(|nearest| nearest.entry.writer().cloned()))
    }

    /// The `@type` to emit for an instance in a slot declaring `declared`.
    fn type_tag(&self, type_name: &TypeName, declared: &FieldType) -> Option<TypeName> {
        let implied = match declared {
            FieldType::Named(name) => name == type_name,
            FieldType::Sequence(_) => type_name.as_str() == TypeName::ARRAY,
            FieldType::Map { .. } => type_name.as_str() == TypeName::MAP,
            FieldType::Any => type_name.is_generic(),
            _ => false,
        };
        let show = match self.opts.show_type {
            ShowType::Always => true,
            ShowType::Never => false,
            ShowType::Minimal => !implied,
        };
        show.then(|| TypeName::new(self.opts.aliases.shorten(type_name)))
    }

    fn write_instance(&mut self, handle: Handle, declared: &FieldType) -> Result<Node, CodecError> {
        let instance = self.instance(handle)?;
        let type_name = &instance.type_name;
        if self.is_denied(type_name) {
            warn!(type_name = %type_name, path = %self.path, "denied instance written as null");
            return Ok(Node::Null);
        }

        let tracked = !self.registry.is_value_type(type_name.as_str());
        if tracked && self.defined.contains(&handle) {
            return match self.ids.get(&handle) {
                Some(id) => {
                    trace!(id = %id, path = %self.path, "wrote reference");
                    Ok(Node::Reference(*id))
                }
                None => Err(CodecError::malformed(
                    &self.path,
                    format!("{type_name} written twice but traced once"),
                )),
            };
        }

        if self.depth >= self.opts.max_depth {
            return Err(CodecError::LimitExceeded(format!(
                "object graph deeper than {}",
                self.opts.max_depth
            )));
        }

        let id = if tracked && self.ref_counts.get(&handle).copied().unwrap_or(0) >= 2 {
            let id = self.next_id;
            self.next_id = id.next();
            self.ids.insert(handle, id);
            Some(id)
        } else {
            None
        };
        if tracked {
            self.defined.insert(handle);
        }

        self.depth += 1;
        let written = match self.custom_writer(type_name)? {
            Some(writer) => self.write_custom(handle, writer.as_ref(), type_name, declared, id),
            None => self.write_body(instance, declared, id),
        };
        self.depth -= 1;
        written
    }

    fn write_custom(
        &mut self,
        handle: Handle,
        writer: &dyn CustomWriter,
        type_name: &TypeName,
        declared: &FieldType,
        id: Option<IdentityId>,
    ) -> Result<Node, CodecError> {
        let mut node = writer.write(&Value::Ref(handle), self)?;
        let tag = self.type_tag(type_name, declared);
        match &mut node {
            Node::Object(object) => {
                if object.declared_type.is_none() {
                    object.declared_type = tag;
                }
                object.id = object.id.or(id);
            }
            Node::Array(array) => {
                if array.declared_type.is_none() {
                    array.declared_type = tag;
                }
                array.id = array.id.or(id);
            }
            _ => {
                // A scalar cannot carry an identity; later visits write it again.
                self.defined.remove(&handle);
                self.ids.remove(&handle);
            }
        }
        Ok(node)
    }

    fn excluded(&self, type_name: &TypeName, field: &str) -> bool {
        if self.opts.excluded_fields.is_empty() {
            return false;
        }
        self.registry.ancestry(type_name).iter().any(|(name, _)| {
            self.opts
                .excluded_fields
                .get(name)
                .is_some_and(|fields| fields.contains(field))
        })
    }

    fn child<T>(
        &mut self,
        segment: FieldPath,
        f: impl FnOnce(&mut Self) -> Result<T, CodecError>,
    ) -> Result<T, CodecError> {
        let parent = std::mem::replace(&mut self.path, segment);
        let result = f(self);
        self.path = parent;
        result
    }

    fn write_body(
        &mut self,
        instance: &'a Instance,
        declared: &FieldType,
        id: Option<IdentityId>,
    ) -> Result<Node, CodecError> {
        let type_name = &instance.type_name;
        let tag = self.type_tag(type_name, declared);
        let registry = self.registry;
        // Generic containers take their element types from the slot.
        let shape = registry
            .descriptor(type_name.as_str())
            .filter(|_| !type_name.is_generic())
            .map(|d| &d.shape);

        match &instance.body {
            Body::Fields(fields) => {
                let layout = registry.fields_of(type_name).unwrap_or_default();
                let mut object = ObjectNode {
                    declared_type: tag,
                    id,
                    fields: IndexMap::new(),
                };
                let ordered = layout
                    .keys()
                    .filter_map(|k| fields.get_key_value(k.as_str()))
                    .chain(fields.iter().filter(|(k, _)| !layout.contains_key(k.as_str())));
                for (name, value) in ordered {
                    if self.excluded(type_name, name) {
                        continue;
                    }
                    let field_type = layout.get(name.as_str()).cloned().unwrap_or(FieldType::Any);
                    let path = self.path.field(name.as_str());
                    let node = self.child(path, |ctx| ctx.write(value, &field_type))?;
                    if node.is_null() && self.opts.skip_null_fields {
                        continue;
                    }
                    object.fields.insert(name.clone(), node);
                }
                Ok(Node::Object(object))
            }
            Body::Items(items) => {
                let element = match (shape, declared) {
                    (Some(Shape::Sequence(element)), _) => element.clone(),
                    (_, FieldType::Sequence(element)) => (**element).clone(),
                    _ => FieldType::Any,
                };
                let mut nodes = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let path = self.path.index(i);
                    nodes.push(self.child(path, |ctx| ctx.write(item, &element))?);
                }
                Ok(Node::Array(ArrayNode {
                    declared_type: tag,
                    id,
                    items: nodes,
                }))
            }
            Body::Entries(entries) => {
                let (key_type, value_type) = match (shape, declared) {
                    (Some(Shape::Map { key, value }), _) => (key.clone(), value.clone()),
                    (_, FieldType::Map { key, value }) => ((**key).clone(), (**value).clone()),
                    _ => (FieldType::Any, FieldType::Any),
                };
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (i, (k, v)) in entries.iter().enumerate() {
                    let path = self.path.index(i);
                    keys.push(self.child(path.clone(), |ctx| ctx.write(k, &key_type))?);
                    let path = match k {
                        Value::Str(s) => self.path.field(s.as_str()),
                        _ => path,
                    };
                    values.push(self.child(path, |ctx| ctx.write(v, &value_type))?);
                }
                Ok(Node::Object(map_node(tag, id, keys, values)))
            }
        }
    }
}

fn is_meta_key(key: &str) -> bool {
    matches!(key, TYPE_KEY | ID_KEY | REF_KEY | ITEMS_KEY | KEYS_KEY)
        || matches!(key, "@t" | "@i" | "@r" | "@e" | "@k")
}

/// A map becomes a plain object when every key is a distinct non-meta
/// string; otherwise keys and values go into parallel `@keys`/`@items`.
fn map_node(
    declared_type: Option<TypeName>,
    id: Option<IdentityId>,
    keys: Vec<Node>,
    values: Vec<Node>,
) -> ObjectNode {
    let mut seen = HashSet::new();
    let plain = keys.iter().all(|k| match k {
        Node::String(s) => !is_meta_key(s) && seen.insert(s.as_str()),
        _ => false,
    });

    let mut object = ObjectNode {
        declared_type,
        id,
        fields: IndexMap::new(),
    };
    if plain {
        for (k, v) in keys.into_iter().zip(values) {
            if let Node::String(k) = k {
                object.fields.insert(k, v);
            }
        }
    } else {
        object
            .fields
            .insert(KEYS_KEY.to_string(), Node::Array(ArrayNode::new(keys)));
        object
            .fields
            .insert(ITEMS_KEY.to_string(), Node::Array(ArrayNode::new(values)));
    }
    object
}
