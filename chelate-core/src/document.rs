use indexmap::IndexMap;
use std::fmt;

use crate::schema::TypeName;

/// Meta key naming the type of an object or array node.
pub const TYPE_KEY: &str = "@type";
/// Meta key carrying the identity id of a definition.
pub const ID_KEY: &str = "@id";
/// Meta key of a reference node.
pub const REF_KEY: &str = "@ref";
/// Meta key holding the elements of an array definition (or map values).
pub const ITEMS_KEY: &str = "@items";
/// Meta key holding the keys of a map whose keys are not all strings.
pub const KEYS_KEY: &str = "@keys";

/// Identity of a composite value within one document.
///
/// Ids are positive and assigned in first-visit order by the writer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(u64);

impl IdentityId {
    /// Creates an id, rejecting zero.
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(IdentityId(raw))
    }

    /// The first id handed out by a writer.
    pub fn first() -> Self {
        IdentityId(1)
    }

    /// Returns the id that follows this one.
    pub fn next(self) -> Self {
        IdentityId(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A JSON number as it appeared in (or will appear in) the document.
///
/// Non-negative integers that fit `i64` are always stored as `Int`; `UInt` is
/// reserved for values above `i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Number {
    /// Normalizes an unsigned value into the canonical variant.
    pub fn from_u64(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => Number::Int(i),
            Err(_) => Number::UInt(v),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::UInt(u) => u as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_integral(&self) -> bool {
        !matches!(self, Number::Float(_))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::UInt(u) => write!(f, "{u}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

/// An array node. When it carries neither a type nor an id it is written as a
/// bare JSON array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArrayNode {
    pub declared_type: Option<TypeName>,
    pub id: Option<IdentityId>,
    pub items: Vec<Node>,
}

impl ArrayNode {
    pub fn new(items: Vec<Node>) -> Self {
        ArrayNode {
            declared_type: None,
            id: None,
            items,
        }
    }

    /// True when the node can be written as a bare `[...]`.
    pub fn is_bare(&self) -> bool {
        self.declared_type.is_none() && self.id.is_none()
    }
}

/// An object node with ordered fields. Meta keys (`@type`, `@id`) live in
/// dedicated slots; `@keys`/`@items` of non-string-keyed maps stay in `fields`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectNode {
    pub declared_type: Option<TypeName>,
    pub id: Option<IdentityId>,
    pub fields: IndexMap<String, Node>,
}

impl ObjectNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn typed(type_name: impl Into<TypeName>) -> Self {
        ObjectNode {
            declared_type: Some(type_name.into()),
            ..Self::default()
        }
    }

    /// Appends a field, keeping insertion order.
    pub fn with_field(mut self, key: impl Into<String>, value: Node) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.fields.get(key)
    }

    /// True when the object encodes a map with non-string keys.
    pub fn is_keyed_map(&self) -> bool {
        self.fields.contains_key(KEYS_KEY) && self.fields.contains_key(ITEMS_KEY)
    }

    /// Iterates the data fields, skipping `@keys`/`@items`.
    pub fn data_fields(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.fields
            .iter()
            .filter(|(k, _)| k.as_str() != KEYS_KEY && k.as_str() != ITEMS_KEY)
    }
}

/// A node of the in-memory document.
///
/// A reference is its own variant, so a reference node can never carry a
/// type, an id or fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(ArrayNode),
    Object(ObjectNode),
    Reference(IdentityId),
}

impl Node {
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Node::Reference(_))
    }

    /// True for array and object nodes (definitions).
    pub fn is_composite(&self) -> bool {
        matches!(self, Node::Array(_) | Node::Object(_))
    }

    /// The id this node points at, if it is a reference.
    pub fn reference_target(&self) -> Option<IdentityId> {
        match self {
            Node::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// The id this node defines, if any.
    pub fn id(&self) -> Option<IdentityId> {
        match self {
            Node::Array(a) => a.id,
            Node::Object(o) => o.id,
            _ => None,
        }
    }

    pub fn declared_type(&self) -> Option<&TypeName> {
        match self {
            Node::Array(a) => a.declared_type.as_ref(),
            Node::Object(o) => o.declared_type.as_ref(),
            _ => None,
        }
    }

    /// Child by object key.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Object(o) => o.get(key),
            _ => None,
        }
    }

    /// Child by array index.
    pub fn index(&self, index: usize) -> Option<&Node> {
        match self {
            Node::Array(a) => a.items.get(index),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Number(Number::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectNode> {
        match self {
            Node::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayNode> {
        match self {
            Node::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Iterates direct children in document order.
    pub fn children(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        match self {
            Node::Array(a) => Box::new(a.items.iter()),
            Node::Object(o) => Box::new(o.fields.values()),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Short description of the node kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Number(Number::Float(_)) => "float",
            Node::Number(_) => "integer",
            Node::String(_) => "string",
            Node::Array(_) => "array",
            Node::Object(_) => "object",
            Node::Reference(_) => "reference",
        }
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Node::Bool(v)
    }
}

impl From<i64> for Node {
    fn from(v: i64) -> Self {
        Node::Number(Number::Int(v))
    }
}

impl From<i32> for Node {
    fn from(v: i32) -> Self {
        Node::Number(Number::Int(i64::from(v)))
    }
}

impl From<u64> for Node {
    fn from(v: u64) -> Self {
        Node::Number(Number::from_u64(v))
    }
}

impl From<f64> for Node {
    fn from(v: f64) -> Self {
        Node::Number(Number::Float(v))
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Node::String(v.to_string())
    }
}

impl From<String> for Node {
    fn from(v: String) -> Self {
        Node::String(v)
    }
}

impl From<ObjectNode> for Node {
    fn from(v: ObjectNode) -> Self {
        Node::Object(v)
    }
}

impl From<ArrayNode> for Node {
    fn from(v: ArrayNode) -> Self {
        Node::Array(v)
    }
}
