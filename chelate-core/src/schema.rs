use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::heap::Value;

/// Canonical name of a registered type.
///
/// Cheap to clone; compares and hashes as the underlying string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName(Arc<str>);

impl TypeName {
    /// Name of the generic ordered mapping type.
    pub const MAP: &'static str = "map";
    /// Name of the generic sequence type.
    pub const ARRAY: &'static str = "array";
    /// Name of the string value type.
    pub const STRING: &'static str = "string";

    pub fn new(name: impl AsRef<str>) -> Self {
        TypeName(Arc::from(name.as_ref()))
    }

    pub fn map() -> Self {
        TypeName::new(Self::MAP)
    }

    pub fn array() -> Self {
        TypeName::new(Self::ARRAY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the generic `map` and `array` containers.
    pub fn is_generic(&self) -> bool {
        self.as_str() == Self::MAP || self.as_str() == Self::ARRAY
    }

    /// For a boxed primitive such as `Option<i32>`, the unboxed name `i32`.
    pub fn unboxed(&self) -> Option<TypeName> {
        let inner = self.as_str().strip_prefix("Option<")?.strip_suffix('>')?;
        is_primitive_name(inner).then(|| TypeName::new(inner))
    }

    /// For a primitive such as `i32`, the boxed name `Option<i32>`.
    pub fn boxed(&self) -> Option<TypeName> {
        is_primitive_name(self.as_str()).then(|| TypeName::new(format!("Option<{}>", self.0)))
    }
}

/// Names of the built-in primitive value types.
pub const PRIMITIVE_NAMES: &[&str] = &[
    "bool", "char", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64",
];

fn is_primitive_name(name: &str) -> bool {
    PRIMITIVE_NAMES.contains(&name)
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TypeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeName {
    fn from(v: &str) -> Self {
        TypeName::new(v)
    }
}

impl From<String> for TypeName {
    fn from(v: String) -> Self {
        TypeName(Arc::from(v))
    }
}

impl From<&TypeName> for TypeName {
    fn from(v: &TypeName) -> Self {
        v.clone()
    }
}

impl Serialize for TypeName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TypeName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(TypeName::from)
    }
}

/// Integer type variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl IntType {
    pub fn name(self) -> &'static str {
        match self {
            IntType::U8 => "u8",
            IntType::U16 => "u16",
            IntType::U32 => "u32",
            IntType::U64 => "u64",
            IntType::I8 => "i8",
            IntType::I16 => "i16",
            IntType::I32 => "i32",
            IntType::I64 => "i64",
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntType::I8 | IntType::I16 | IntType::I32 | IntType::I64)
    }

    /// Inclusive range of representable values.
    pub fn bounds(self) -> (i128, i128) {
        match self {
            IntType::U8 => (0, u8::MAX as i128),
            IntType::U16 => (0, u16::MAX as i128),
            IntType::U32 => (0, u32::MAX as i128),
            IntType::U64 => (0, u64::MAX as i128),
            IntType::I8 => (i8::MIN as i128, i8::MAX as i128),
            IntType::I16 => (i16::MIN as i128, i16::MAX as i128),
            IntType::I32 => (i32::MIN as i128, i32::MAX as i128),
            IntType::I64 => (i64::MIN as i128, i64::MAX as i128),
        }
    }

    pub fn contains(self, v: i128) -> bool {
        let (lo, hi) = self.bounds();
        (lo..=hi).contains(&v)
    }
}

/// Floating-point type variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatType {
    F32,
    F64,
}

impl FloatType {
    pub fn name(self) -> &'static str {
        match self {
            FloatType::F32 => "f32",
            FloatType::F64 => "f64",
        }
    }
}

/// Declared type of a field, sequence element or map key/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Char,
    /// UTF-8 text.
    Str,
    Int(IntType),
    Float(FloatType),
    /// A registered type, referenced by name.
    Named(TypeName),
    /// Homogeneous ordered sequence.
    Sequence(Box<FieldType>),
    /// Ordered mapping.
    Map {
        key: Box<FieldType>,
        value: Box<FieldType>,
    },
    /// No static type; the document's `@type` or the JSON shape decides.
    Any,
}

impl FieldType {
    pub fn named(name: impl Into<TypeName>) -> Self {
        FieldType::Named(name.into())
    }

    pub fn sequence(inner: FieldType) -> Self {
        FieldType::Sequence(Box::new(inner))
    }

    pub fn map(key: FieldType, value: FieldType) -> Self {
        FieldType::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// Primitive fields hold scalars and never reference composites.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            FieldType::Bool | FieldType::Char | FieldType::Int(_) | FieldType::Float(_)
        )
    }

    /// Name of the runtime type a field of this type holds by default.
    pub fn runtime_name(&self) -> TypeName {
        match self {
            FieldType::Bool => TypeName::new("bool"),
            FieldType::Char => TypeName::new("char"),
            FieldType::Str => TypeName::new(TypeName::STRING),
            FieldType::Int(t) => TypeName::new(t.name()),
            FieldType::Float(t) => TypeName::new(t.name()),
            FieldType::Named(name) => name.clone(),
            FieldType::Sequence(_) => TypeName::array(),
            FieldType::Map { .. } | FieldType::Any => TypeName::map(),
        }
    }

    /// Value a freshly constructed record holds in a field of this type.
    pub fn default_value(&self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::Char => Value::Char('\0'),
            FieldType::Int(t) if t.is_signed() => Value::Int(0),
            FieldType::Int(_) => Value::UInt(0),
            FieldType::Float(_) => Value::Float(0.0),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Sequence(inner) => write!(f, "[{inner}]"),
            FieldType::Map { key, value } => write!(f, "{{{key}: {value}}}"),
            FieldType::Any => f.write_str("any"),
            other => write!(f, "{}", other.runtime_name()),
        }
    }
}

/// Whether a type is a concrete, instantiable type or a capability other
/// types declare they implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Concrete,
    Capability,
}

/// How instances of a type are laid out.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Named fields in declaration order.
    Record(IndexMap<String, FieldType>),
    /// Homogeneous sequence.
    Sequence(FieldType),
    /// Ordered mapping.
    Map { key: FieldType, value: FieldType },
    /// Unit-only enumeration; written as the variant name.
    Enumeration(Vec<String>),
    /// Logical primitive parsed from its string form.
    Value,
    /// No default construction; needs a factory or custom reader.
    Opaque,
}

/// Explicit description of a type: what it is, what it derives from, and how
/// its instances are laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: TypeName,
    pub kind: TypeKind,
    pub parent: Option<TypeName>,
    pub capabilities: Vec<TypeName>,
    pub shape: Shape,
}

impl TypeDescriptor {
    fn concrete(name: impl Into<TypeName>, shape: Shape) -> Self {
        TypeDescriptor {
            name: name.into(),
            kind: TypeKind::Concrete,
            parent: None,
            capabilities: Vec::new(),
            shape,
        }
    }

    /// Creates a record type from field definitions, keeping their order.
    pub fn record<K: Into<String>>(
        name: impl Into<TypeName>,
        fields: impl IntoIterator<Item = (K, FieldType)>,
    ) -> Self {
        Self::concrete(
            name,
            Shape::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        )
    }

    pub fn sequence(name: impl Into<TypeName>, element: FieldType) -> Self {
        Self::concrete(name, Shape::Sequence(element))
    }

    pub fn map(name: impl Into<TypeName>, key: FieldType, value: FieldType) -> Self {
        Self::concrete(name, Shape::Map { key, value })
    }

    pub fn enumeration<V: Into<String>>(
        name: impl Into<TypeName>,
        variants: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::concrete(
            name,
            Shape::Enumeration(variants.into_iter().map(Into::into).collect()),
        )
    }

    pub fn value(name: impl Into<TypeName>) -> Self {
        Self::concrete(name, Shape::Value)
    }

    pub fn opaque(name: impl Into<TypeName>) -> Self {
        Self::concrete(name, Shape::Opaque)
    }

    /// Declares a capability (an interface-like type).
    pub fn capability(name: impl Into<TypeName>) -> Self {
        TypeDescriptor {
            kind: TypeKind::Capability,
            ..Self::concrete(name, Shape::Opaque)
        }
    }

    /// Sets the parent type. Only meaningful for concrete types.
    pub fn extends(mut self, parent: impl Into<TypeName>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Adds a capability this type implements (or, for a capability, extends).
    pub fn implements(mut self, capability: impl Into<TypeName>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn is_capability(&self) -> bool {
        self.kind == TypeKind::Capability
    }

    /// Enumerations and logical primitives are value types.
    pub fn is_value_type(&self) -> bool {
        matches!(self.shape, Shape::Enumeration(_) | Shape::Value)
    }

    /// The fields this descriptor itself declares (not inherited ones).
    pub fn own_fields(&self) -> Option<&IndexMap<String, FieldType>> {
        match &self.shape {
            Shape::Record(fields) => Some(fields),
            _ => None,
        }
    }
}
