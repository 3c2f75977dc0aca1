use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::schema::TypeName;

/// Error for heap accesses through a handle.
#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    #[error("dangling handle {0:?}")]
    DanglingHandle(Handle),
    #[error("instance {handle:?} has no {expected} slot")]
    ShapeMismatch {
        handle: Handle,
        expected: &'static str,
    },
}

/// Identity of an instance in a [`Heap`].
///
/// Two values refer to the same object exactly when their handles are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(usize);

impl Handle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Payload of a registered logical primitive.
///
/// Implemented for every `Display + Debug + PartialEq` type, so any host type
/// with a textual form can be carried as a value type.
pub trait NativeData: Any + fmt::Debug + Send + Sync {
    /// Canonical text written to the document.
    fn to_text(&self) -> String;

    fn eq_data(&self, other: &dyn NativeData) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T> NativeData for T
where
    T: fmt::Display + fmt::Debug + PartialEq + Send + Sync + 'static,
{
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn eq_data(&self, other: &dyn NativeData) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An immutable value-type instance tagged with its registered type name.
///
/// Value types are copied, never identity-tracked.
#[derive(Clone)]
pub struct NativeValue {
    type_name: TypeName,
    data: Arc<dyn NativeData>,
}

impl NativeValue {
    pub fn new<T: NativeData>(type_name: impl Into<TypeName>, data: T) -> Self {
        NativeValue {
            type_name: type_name.into(),
            data: Arc::new(data),
        }
    }

    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    pub fn to_text(&self) -> String {
        self.data.to_text()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.type_name, self.data)
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.data.eq_data(&*other.data)
    }
}

/// A value held in a field, sequence slot or map entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(char),
    Str(String),
    /// A registered value type.
    Native(NativeValue),
    /// A shared, identity-tracked instance.
    Ref(Handle),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Value::Ref(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            Value::UInt(u) => i64::try_from(u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            Value::UInt(u) => Some(u as f64),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&NativeValue> {
        match self {
            Value::Native(n) => Some(n),
            _ => None,
        }
    }

    /// Runtime type name of the value; `None` for null.
    pub fn runtime_type(&self, heap: &Heap) -> Option<TypeName> {
        let name = match self {
            Value::Null => return None,
            Value::Bool(_) => "bool",
            Value::Int(_) => "i64",
            Value::UInt(_) => "u64",
            Value::Float(_) => "f64",
            Value::Char(_) => "char",
            Value::Str(_) => TypeName::STRING,
            Value::Native(n) => return Some(n.type_name().clone()),
            Value::Ref(h) => return heap.get(*h).map(|i| i.type_name.clone()),
        };
        Some(TypeName::new(name))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Value::Ref(v)
    }
}

impl From<NativeValue> for Value {
    fn from(v: NativeValue) -> Self {
        Value::Native(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Contents of an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Named fields in insertion order.
    Fields(IndexMap<String, Value>),
    /// Ordered elements.
    Items(Vec<Value>),
    /// Ordered key/value pairs; keys may be any value.
    Entries(Vec<(Value, Value)>),
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Fields(_) => "fields",
            Body::Items(_) => "items",
            Body::Entries(_) => "entries",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Body::Fields(f) => f.len(),
            Body::Items(i) => i.len(),
            Body::Entries(e) => e.len(),
        }
    }
}

/// A composite object living in a heap.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub type_name: TypeName,
    pub body: Body,
}

impl Instance {
    /// An empty record of the given type.
    pub fn record(type_name: impl Into<TypeName>) -> Self {
        Instance {
            type_name: type_name.into(),
            body: Body::Fields(IndexMap::new()),
        }
    }

    /// A sequence instance of the given type.
    pub fn sequence(type_name: impl Into<TypeName>, items: Vec<Value>) -> Self {
        Instance {
            type_name: type_name.into(),
            body: Body::Items(items),
        }
    }

    /// A generic `array`.
    pub fn list(items: Vec<Value>) -> Self {
        Self::sequence(TypeName::array(), items)
    }

    /// A mapping instance of the given type.
    pub fn mapping(type_name: impl Into<TypeName>, entries: Vec<(Value, Value)>) -> Self {
        Instance {
            type_name: type_name.into(),
            body: Body::Entries(entries),
        }
    }

    /// A generic `map`.
    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Self::mapping(TypeName::map(), entries)
    }

    /// Builder-style field insertion for record instances.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Body::Fields(fields) = &mut self.body {
            fields.insert(key.into(), value.into());
        }
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        match &self.body {
            Body::Fields(fields) => fields.get(key),
            Body::Entries(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            Body::Items(_) => None,
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match &self.body {
            Body::Items(items) => Some(items),
            _ => None,
        }
    }

    pub fn entries(&self) -> Option<&[(Value, Value)]> {
        match &self.body {
            Body::Entries(entries) => Some(entries),
            _ => None,
        }
    }
}

/// Position of a value inside an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotKey {
    Field(String),
    Index(usize),
    EntryKey(usize),
    EntryValue(usize),
}

/// Arena owning the instances of one object graph.
///
/// Instances refer to each other through [`Handle`]s, so cycles and shared
/// references need no reference counting.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    instances: Vec<Instance>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves an instance into the heap and returns its handle.
    pub fn alloc(&mut self, instance: Instance) -> Handle {
        self.instances.push(instance);
        Handle(self.instances.len() - 1)
    }

    pub fn get(&self, handle: Handle) -> Option<&Instance> {
        self.instances.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Instance> {
        self.instances.get_mut(handle.0)
    }

    pub fn try_get(&self, handle: Handle) -> Result<&Instance, HeapError> {
        self.get(handle).ok_or(HeapError::DanglingHandle(handle))
    }

    fn try_get_mut(&mut self, handle: Handle) -> Result<&mut Instance, HeapError> {
        self.get_mut(handle).ok_or(HeapError::DanglingHandle(handle))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Reads a field of a record (or a string-keyed entry of a map).
    pub fn field(&self, handle: Handle, key: &str) -> Option<&Value> {
        self.get(handle)?.field(key)
    }

    /// Follows a field that holds a reference.
    pub fn follow(&self, handle: Handle, key: &str) -> Option<Handle> {
        self.field(handle, key)?.as_handle()
    }

    /// Sets a field on a record instance, returning the previous value.
    pub fn set_field(
        &mut self,
        handle: Handle,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, HeapError> {
        match &mut self.try_get_mut(handle)?.body {
            Body::Fields(fields) => Ok(fields.insert(key.into(), value.into())),
            _ => Err(HeapError::ShapeMismatch {
                handle,
                expected: "field",
            }),
        }
    }

    /// Appends to a sequence instance.
    pub fn push(&mut self, handle: Handle, value: impl Into<Value>) -> Result<usize, HeapError> {
        match &mut self.try_get_mut(handle)?.body {
            Body::Items(items) => {
                items.push(value.into());
                Ok(items.len() - 1)
            }
            _ => Err(HeapError::ShapeMismatch {
                handle,
                expected: "item",
            }),
        }
    }

    /// Appends an entry to a mapping instance.
    pub fn insert_entry(
        &mut self,
        handle: Handle,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<usize, HeapError> {
        match &mut self.try_get_mut(handle)?.body {
            Body::Entries(entries) => {
                entries.push((key.into(), value.into()));
                Ok(entries.len() - 1)
            }
            _ => Err(HeapError::ShapeMismatch {
                handle,
                expected: "entry",
            }),
        }
    }

    /// Writes a value into an existing slot (or a new field).
    pub fn assign(&mut self, handle: Handle, slot: &SlotKey, value: Value) -> Result<(), HeapError> {
        let instance = self.try_get_mut(handle)?;
        let target = match (&mut instance.body, slot) {
            (Body::Fields(fields), SlotKey::Field(name)) => {
                fields.insert(name.clone(), value);
                return Ok(());
            }
            (Body::Items(items), SlotKey::Index(i)) => items.get_mut(*i),
            (Body::Entries(entries), SlotKey::EntryKey(i)) => entries.get_mut(*i).map(|e| &mut e.0),
            (Body::Entries(entries), SlotKey::EntryValue(i)) => {
                entries.get_mut(*i).map(|e| &mut e.1)
            }
            _ => None,
        };
        match target {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(HeapError::ShapeMismatch {
                handle,
                expected: slot_kind(slot),
            }),
        }
    }

    /// Structural equality of two graphs that also honours identity: every
    /// pair of handles matched during the walk must stay matched, so sharing
    /// and cycles have to line up, not just contents. A record field missing
    /// on one side matches a null or zero value on the other.
    pub fn graph_eq(&self, a: &Value, other: &Heap, b: &Value) -> bool {
        let mut forward: HashMap<Handle, Handle> = HashMap::new();
        let mut backward: HashMap<Handle, Handle> = HashMap::new();
        let mut stack = vec![(a.clone(), b.clone())];

        while let Some((x, y)) = stack.pop() {
            match (&x, &y) {
                (Value::Ref(hx), Value::Ref(hy)) => {
                    match (forward.get(hx), backward.get(hy)) {
                        (Some(mx), Some(my)) if mx == hy && my == hx => continue,
                        (None, None) => {}
                        _ => return false,
                    }
                    forward.insert(*hx, *hy);
                    backward.insert(*hy, *hx);

                    let (Some(ix), Some(iy)) = (self.get(*hx), other.get(*hy)) else {
                        return false;
                    };
                    if ix.type_name != iy.type_name {
                        return false;
                    }
                    match (&ix.body, &iy.body) {
                        (Body::Fields(fx), Body::Fields(fy)) => {
                            for (k, vx) in fx {
                                match fy.get(k) {
                                    Some(vy) => stack.push((vx.clone(), vy.clone())),
                                    None if is_unset(vx) => {}
                                    None => return false,
                                }
                            }
                            // An absent field matches a default one.
                            if fy.iter().any(|(k, vy)| !fx.contains_key(k) && !is_unset(vy)) {
                                return false;
                            }
                        }
                        (Body::Items(ex), Body::Items(ey)) => {
                            if ex.len() != ey.len() {
                                return false;
                            }
                            stack.extend(ex.iter().cloned().zip(ey.iter().cloned()));
                        }
                        (Body::Entries(ex), Body::Entries(ey)) => {
                            if ex.len() != ey.len() {
                                return false;
                            }
                            for ((kx, vx), (ky, vy)) in ex.iter().zip(ey) {
                                stack.push((kx.clone(), ky.clone()));
                                stack.push((vx.clone(), vy.clone()));
                            }
                        }
                        _ => return false,
                    }
                }
                (Value::Int(_) | Value::UInt(_), Value::Int(_) | Value::UInt(_)) => {
                    if as_i128(&x) != as_i128(&y) {
                        return false;
                    }
                }
                _ => {
                    if x != y {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Values a reader leaves in a field the document never set.
fn is_unset(v: &Value) -> bool {
    match *v {
        Value::Null | Value::Bool(false) | Value::Char('\0') | Value::Int(0) | Value::UInt(0) => true,
        Value::Float(f) => f == 0.0,
        _ => false,
    }
}

fn as_i128(v: &Value) -> Option<i128> {
    match *v {
        Value::Int(i) => Some(i128::from(i)),
        Value::UInt(u) => Some(i128::from(u)),
        _ => None,
    }
}

fn slot_kind(slot: &SlotKey) -> &'static str {
    match slot {
        SlotKey::Field(_) => "field",
        SlotKey::Index(_) => "item",
        SlotKey::EntryKey(_) | SlotKey::EntryValue(_) => "entry",
    }
}
