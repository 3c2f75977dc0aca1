use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::describe::Typed;
use crate::document::Node;
use crate::error::{BoxError, CodecError};
use crate::heap::{Instance, NativeData, NativeValue, Value};
use crate::resolver::{ReadContext, Slot};
use crate::schema::{FieldType, PRIMITIVE_NAMES, Shape, TypeDescriptor, TypeKind, TypeName};
use crate::security::SecurityPolicy;
use crate::writer::WriteContext;

/// Error raised by registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("ambiguous codec for `{type_name}`: candidates {candidates:?} are equally specific")]
    Ambiguous {
        type_name: TypeName,
        candidates: Vec<TypeName>,
    },
}

/// Replaces the default field walk when writing instances of a type.
pub trait CustomWriter: Send + Sync {
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<Node, CodecError>;
}

impl<F> CustomWriter for F
where
    F: for<'a, 'b, 'c> Fn(&'a Value, &'b mut WriteContext<'c>) -> Result<Node, CodecError>
        + Send
        + Sync,
{
    fn write(&self, value: &Value, ctx: &mut WriteContext<'_>) -> Result<Node, CodecError> {
        self(value, ctx)
    }
}

/// Intercepts resolution of nodes of a type before default field population.
///
/// A reader may hand nested nodes back to the engine through
/// [`ReadContext::resolve`], which enables recursive custom types.
pub trait CustomReader: Send + Sync {
    fn read<'doc>(
        &self,
        node: &'doc Node,
        ctx: &mut ReadContext<'_, 'doc>,
    ) -> Result<Slot, CodecError>;
}

impl<F> CustomReader for F
where
    F: for<'a, 'b, 'doc> Fn(&'doc Node, &'a mut ReadContext<'b, 'doc>) -> Result<Slot, CodecError>
        + Send
        + Sync,
{
    fn read<'doc>(
        &self,
        node: &'doc Node,
        ctx: &mut ReadContext<'_, 'doc>,
    ) -> Result<Slot, CodecError> {
        self(node, ctx)
    }
}

/// Creates the target instance for a node.
///
/// Unless [`Factory::is_final`] returns true, the engine populates the
/// instance's fields from the node afterwards.
pub trait Factory: Send + Sync {
    fn create<'doc>(
        &self,
        type_name: &TypeName,
        node: &'doc Node,
        ctx: &mut ReadContext<'_, 'doc>,
    ) -> Result<Instance, BoxError>;

    fn is_final(&self) -> bool {
        false
    }
}

impl<F> Factory for F
where
    F: for<'a, 'b, 'doc> Fn(&TypeName, &'doc Node, &'a mut ReadContext<'b, 'doc>) -> Result<Instance, BoxError>
        + Send
        + Sync,
{
    fn create<'doc>(
        &self,
        type_name: &TypeName,
        node: &'doc Node,
        ctx: &mut ReadContext<'_, 'doc>,
    ) -> Result<Instance, BoxError> {
        self(type_name, node, ctx)
    }
}

/// Parses the string form of a value type.
pub type ValueParser = Arc<dyn Fn(&str) -> Result<NativeValue, BoxError> + Send + Sync>;

/// How equally specific candidates are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The most recently registered candidate wins.
    #[default]
    LastRegistered,
    /// Equal candidates are an error.
    Ambiguous,
}

/// Everything the engine knows about one type.
#[derive(Clone)]
pub struct RegistryEntry {
    descriptor: TypeDescriptor,
    factory: Option<Arc<dyn Factory>>,
    reader: Option<Arc<dyn CustomReader>>,
    writer: Option<Arc<dyn CustomWriter>>,
    parser: Option<ValueParser>,
    seq: u64,
}

impl RegistryEntry {
    fn new(descriptor: TypeDescriptor, seq: u64) -> Self {
        RegistryEntry {
            descriptor,
            factory: None,
            reader: None,
            writer: None,
            parser: None,
            seq,
        }
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    pub fn factory(&self) -> Option<&Arc<dyn Factory>> {
        self.factory.as_ref()
    }

    pub fn reader(&self) -> Option<&Arc<dyn CustomReader>> {
        self.reader.as_ref()
    }

    pub fn writer(&self) -> Option<&Arc<dyn CustomWriter>> {
        self.writer.as_ref()
    }

    pub fn parser(&self) -> Option<&ValueParser> {
        self.parser.as_ref()
    }

    /// Value types are never identity-tracked and always copied.
    pub fn is_value_type(&self) -> bool {
        self.descriptor.is_value_type()
    }

    /// True when the factory fully builds the instance.
    pub fn is_final(&self) -> bool {
        self.factory.as_ref().is_some_and(|f| f.is_final())
    }

    /// Registration order; larger is more recent.
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("descriptor", &self.descriptor)
            .field("factory", &self.factory.is_some())
            .field("reader", &self.reader.is_some())
            .field("writer", &self.writer.is_some())
            .field("parser", &self.parser.is_some())
            .field("seq", &self.seq)
            .finish()
    }
}

/// Result of a nearest-type lookup.
#[derive(Debug, Clone, Copy)]
pub struct Nearest<'r> {
    pub type_name: &'r TypeName,
    pub entry: &'r RegistryEntry,
    pub distance: u32,
}

type Ancestry = Arc<Vec<(TypeName, u32)>>;

/// Central store of type descriptors and per-type codecs.
///
/// Registration happens through `&mut self` at configuration time; serialize
/// and deserialize calls only borrow the registry immutably, so a registry
/// shared behind an `Arc` is an immutable snapshot for every call using it.
/// Ancestry and field-layout computations are cached internally.
pub struct TypeRegistry {
    entries: HashMap<TypeName, RegistryEntry>,
    next_seq: u64,
    tie_break: TieBreak,
    ancestry: RwLock<HashMap<TypeName, Ancestry>>,
    layouts: RwLock<HashMap<TypeName, Arc<IndexMap<String, FieldType>>>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TypeRegistry {
    fn clone(&self) -> Self {
        TypeRegistry {
            entries: self.entries.clone(),
            next_seq: self.next_seq,
            tie_break: self.tie_break,
            ancestry: RwLock::new(HashMap::new()),
            layouts: RwLock::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("entries", &self.entries.len())
            .field("tie_break", &self.tie_break)
            .finish()
    }
}

impl TypeRegistry {
    /// A registry without any entries.
    pub fn empty() -> Self {
        TypeRegistry {
            entries: HashMap::new(),
            next_seq: 0,
            tie_break: TieBreak::default(),
            ancestry: RwLock::new(HashMap::new()),
            layouts: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in entries:
    ///
    /// - primitives `bool` `char` `i8`–`i64` `u8`–`u64` `f32` `f64` and `string`
    /// - the generic containers `map` and `array`
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for name in PRIMITIVE_NAMES {
            registry.register(TypeDescriptor::value(*name));
        }
        registry.register(TypeDescriptor::value(TypeName::STRING));
        registry.register(TypeDescriptor::map(
            TypeName::MAP,
            FieldType::Any,
            FieldType::Any,
        ));
        registry.register(TypeDescriptor::sequence(TypeName::ARRAY, FieldType::Any));
        registry
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.invalidate();
        self.next_seq
    }

    fn invalidate(&mut self) {
        self.ancestry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.layouts
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Registers a descriptor. A later registration for the same name
    /// replaces the earlier entry, codecs included.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        let seq = self.bump();
        let mut entry = RegistryEntry::new(descriptor, seq);
        if let Shape::Enumeration(variants) = &entry.descriptor.shape {
            entry.parser = Some(enumeration_parser(
                entry.descriptor.name.clone(),
                variants.clone(),
            ));
        }
        self.entries.insert(entry.descriptor.name.clone(), entry);
        self
    }

    /// Registers a type whose descriptor is generated by `#[derive(Describe)]`.
    pub fn register_type<T: Typed>(&mut self) -> &mut Self {
        self.register(T::descriptor())
    }

    /// Registers a host type as a value type parsed from its string form.
    pub fn register_value_type<T>(&mut self, name: impl Into<TypeName>) -> &mut Self
    where
        T: NativeData + FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let name = name.into();
        self.register(TypeDescriptor::value(name.clone()));
        let tag = name.clone();
        let parser: ValueParser = Arc::new(move |text: &str| {
            let value = text.parse::<T>().map_err(|e| Box::new(e) as BoxError)?;
            Ok(NativeValue::new(tag.clone(), value))
        });
        if let Some(entry) = self.entries.get_mut(&name) {
            entry.parser = Some(parser);
        }
        self
    }

    fn entry_or_opaque(&mut self, type_name: TypeName) -> &mut RegistryEntry {
        let seq = self.bump();
        let entry = self
            .entries
            .entry(type_name.clone())
            .or_insert_with(|| RegistryEntry::new(TypeDescriptor::opaque(type_name), seq));
        entry.seq = seq;
        entry
    }

    /// Sets the factory for a type, registering an opaque entry if needed.
    pub fn set_factory(
        &mut self,
        type_name: impl Into<TypeName>,
        factory: impl Factory + 'static,
    ) -> &mut Self {
        self.entry_or_opaque(type_name.into()).factory = Some(Arc::new(factory));
        self
    }

    /// Sets the custom reader for a type, registering an opaque entry if needed.
    pub fn set_reader(
        &mut self,
        type_name: impl Into<TypeName>,
        reader: impl CustomReader + 'static,
    ) -> &mut Self {
        self.entry_or_opaque(type_name.into()).reader = Some(Arc::new(reader));
        self
    }

    /// Sets the custom writer for a type, registering an opaque entry if needed.
    pub fn set_writer(
        &mut self,
        type_name: impl Into<TypeName>,
        writer: impl CustomWriter + 'static,
    ) -> &mut Self {
        self.entry_or_opaque(type_name.into()).writer = Some(Arc::new(writer));
        self
    }

    /// Sets any combination of codecs for a type in one registration.
    pub fn register_codecs(
        &mut self,
        type_name: impl Into<TypeName>,
        factory: Option<Arc<dyn Factory>>,
        reader: Option<Arc<dyn CustomReader>>,
        writer: Option<Arc<dyn CustomWriter>>,
    ) -> &mut Self {
        let entry = self.entry_or_opaque(type_name.into());
        if factory.is_some() {
            entry.factory = factory;
        }
        if reader.is_some() {
            entry.reader = reader;
        }
        if writer.is_some() {
            entry.writer = writer;
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_some()
    }

    /// Exact lookup. A boxed primitive (`Option<i32>`) resolves to its
    /// unboxed entry and vice versa.
    pub fn resolve(&self, type_name: &str) -> Option<&RegistryEntry> {
        if let Some(entry) = self.entries.get(type_name) {
            return Some(entry);
        }
        let name = TypeName::new(type_name);
        name.unboxed()
            .or_else(|| name.boxed())
            .and_then(|alt| self.entries.get(&alt))
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.resolve(type_name).map(RegistryEntry::descriptor)
    }

    fn kind_of(&self, type_name: &TypeName) -> TypeKind {
        self.resolve(type_name.as_str())
            .map_or(TypeKind::Concrete, |e| e.descriptor.kind)
    }

    /// All types reachable from `type_name` by is-a edges with their minimum
    /// distance, nearest first. Includes the type itself at distance 0.
    ///
    /// Edges run concrete→concrete (parent), concrete→capability and
    /// capability→capability; an edge from a capability into a concrete type
    /// is never followed.
    pub fn ancestry(&self, type_name: &TypeName) -> Arc<Vec<(TypeName, u32)>> {
        if let Some(cached) = self
            .ancestry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
        {
            return Arc::clone(cached);
        }

        let mut seen: HashSet<TypeName> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        let mut start = vec![type_name.clone()];
        start.extend(type_name.unboxed());
        start.extend(type_name.boxed());
        for name in start {
            if seen.insert(name.clone()) {
                queue.push_back((name, 0u32));
            }
        }

        while let Some((name, distance)) = queue.pop_front() {
            let from_kind = self.kind_of(&name);
            if let Some(desc) = self.entries.get(&name).map(RegistryEntry::descriptor) {
                let edges = desc.parent.iter().chain(desc.capabilities.iter());
                for next in edges {
                    let blocked = from_kind == TypeKind::Capability
                        && self.kind_of(next) == TypeKind::Concrete;
                    if !blocked && seen.insert(next.clone()) {
                        queue.push_back((next.clone(), distance + 1));
                    }
                }
            }
            order.push((name, distance));
        }

        let ancestry = Arc::new(order);
        self.ancestry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.clone(), Arc::clone(&ancestry));
        ancestry
    }

    /// Inheritance distance from `from` to `to`; `None` means no relation.
    pub fn distance(&self, from: &TypeName, to: &TypeName) -> Option<u32> {
        self.ancestry(from)
            .iter()
            .find(|(name, _)| name == to)
            .map(|(_, d)| *d)
    }

    /// The most specific registered type that `type_name` is-a and whose
    /// entry satisfies `accept`.
    pub fn nearest_by(
        &self,
        type_name: &TypeName,
        accept: impl Fn(&RegistryEntry) -> bool,
    ) -> Result<Option<Nearest<'_>>, RegistryError> {
        let ancestry = self.ancestry(type_name);
        let mut best: Option<Nearest<'_>> = None;
        let mut tied: Vec<TypeName> = Vec::new();

        for (name, distance) in ancestry.iter() {
            if best.as_ref().is_some_and(|b| *distance > b.distance) {
                break;
            }
            let Some((key, entry)) = self.entries.get_key_value(name) else {
                continue;
            };
            if !accept(entry) {
                continue;
            }
            match &best {
                None => {
                    tied.push(key.clone());
                    best = Some(Nearest {
                        type_name: key,
                        entry,
                        distance: *distance,
                    });
                }
                Some(current) => {
                    tied.push(key.clone());
                    if entry.seq > current.entry.seq {
                        best = Some(Nearest {
                            type_name: key,
                            entry,
                            distance: *distance,
                        });
                    }
                }
            }
        }

        if tied.len() > 1 && self.tie_break == TieBreak::Ambiguous {
            return Err(RegistryError::Ambiguous {
                type_name: type_name.clone(),
                candidates: tied,
            });
        }
        Ok(best)
    }

    /// Nearest registered entry of any kind.
    pub fn resolve_nearest(
        &self,
        type_name: &TypeName,
    ) -> Result<Option<Nearest<'_>>, RegistryError> {
        self.nearest_by(type_name, |_| true)
    }

    pub fn nearest_writer(
        &self,
        type_name: &TypeName,
    ) -> Result<Option<Nearest<'_>>, RegistryError> {
        self.nearest_by(type_name, |e| e.writer.is_some())
    }

    pub fn nearest_reader(
        &self,
        type_name: &TypeName,
    ) -> Result<Option<Nearest<'_>>, RegistryError> {
        self.nearest_by(type_name, |e| e.reader.is_some())
    }

    pub fn nearest_factory(
        &self,
        type_name: &TypeName,
    ) -> Result<Option<Nearest<'_>>, RegistryError> {
        self.nearest_by(type_name, |e| e.factory.is_some())
    }

    /// True when the type or anything it is-a is on the denylist.
    pub fn is_denied(&self, policy: &SecurityPolicy, type_name: &TypeName) -> bool {
        if policy.is_denied(type_name.as_str()) {
            return true;
        }
        self.ancestry(type_name)
            .iter()
            .any(|(name, _)| policy.is_denied(name.as_str()))
    }

    /// Value types: primitives, strings, enumerations and registered value
    /// types (boxed primitives included).
    pub fn is_value_type(&self, type_name: &str) -> bool {
        self.resolve(type_name).is_some_and(RegistryEntry::is_value_type)
    }

    /// Record fields of a type including inherited ones: the root-most
    /// ancestor's fields first, the type's own fields last.
    pub fn fields_of(&self, type_name: &TypeName) -> Option<Arc<IndexMap<String, FieldType>>> {
        if let Some(cached) = self
            .layouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
        {
            return Some(Arc::clone(cached));
        }

        let own = self.resolve(type_name.as_str())?.descriptor.own_fields()?;
        let mut chain = vec![own];
        let mut seen = HashSet::from([type_name.clone()]);
        let mut parent = self.resolve(type_name.as_str())?.descriptor.parent.clone();
        while let Some(name) = parent {
            if !seen.insert(name.clone()) {
                break;
            }
            let Some(desc) = self.descriptor(name.as_str()) else {
                break;
            };
            if let Some(fields) = desc.own_fields() {
                chain.push(fields);
            }
            parent = desc.parent.clone();
        }

        let mut layout = IndexMap::new();
        for fields in chain.into_iter().rev() {
            for (k, v) in fields {
                layout.insert(k.clone(), v.clone());
            }
        }
        let layout = Arc::new(layout);
        self.layouts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.clone(), Arc::clone(&layout));
        Some(layout)
    }
}

fn enumeration_parser(type_name: TypeName, variants: Vec<String>) -> ValueParser {
    Arc::new(move |text: &str| {
        if variants.iter().any(|v| v == text) {
            Ok(NativeValue::new(type_name.clone(), text.to_string()))
        } else {
            Err(format!("`{text}` is not a variant of {type_name}").into())
        }
    })
}
