//! Serde mapping between the document model and JSON-shaped data.
//!
//! Meta keys are recognised in both their long (`@type`) and short (`@t`)
//! spellings when reading; writers pick one spelling through [`MetaKeys`].

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::document::{
    ArrayNode, ID_KEY, ITEMS_KEY, IdentityId, KEYS_KEY, Node, Number, ObjectNode, REF_KEY, TYPE_KEY,
};
use crate::schema::TypeName;

/// Error classifying a JSON object as a document node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("`@ref` must be the only key of a reference object")]
    RefWithSiblings,
    #[error("`{key}` must be a positive integer, got {found}")]
    InvalidId { key: &'static str, found: String },
    #[error("`@type` must be a string, got {0}")]
    InvalidType(String),
    #[error("`@items` must be an array, got {0}")]
    ItemsNotArray(String),
    #[error("array definition has unexpected key `{0}`")]
    ItemsWithFields(String),
    #[error("key `{0}` appears more than once")]
    DuplicateKey(String),
}

/// Spelling of the meta keys used when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaKeys {
    pub type_key: &'static str,
    pub id_key: &'static str,
    pub ref_key: &'static str,
    pub items_key: &'static str,
    pub keys_key: &'static str,
}

impl MetaKeys {
    pub const LONG: MetaKeys = MetaKeys {
        type_key: TYPE_KEY,
        id_key: ID_KEY,
        ref_key: REF_KEY,
        items_key: ITEMS_KEY,
        keys_key: KEYS_KEY,
    };

    pub const SHORT: MetaKeys = MetaKeys {
        type_key: "@t",
        id_key: "@i",
        ref_key: "@r",
        items_key: "@e",
        keys_key: "@k",
    };

    fn rename<'a>(&self, field: &'a str) -> &'a str {
        match field {
            ITEMS_KEY => self.items_key,
            KEYS_KEY => self.keys_key,
            other => other,
        }
    }
}

/// Canonical long form of a meta key, accepting either spelling.
fn canonical_key(key: &str) -> &str {
    match key {
        "@t" => TYPE_KEY,
        "@i" => ID_KEY,
        "@r" => REF_KEY,
        "@e" => ITEMS_KEY,
        "@k" => KEYS_KEY,
        other => other,
    }
}

/// A node paired with the meta-key spelling to serialize it with.
#[derive(Debug, Clone, Copy)]
pub struct Wire<'a> {
    pub node: &'a Node,
    pub keys: &'a MetaKeys,
}

impl<'a> Wire<'a> {
    pub fn new(node: &'a Node, keys: &'a MetaKeys) -> Self {
        Wire { node, keys }
    }

    fn child(&self, node: &'a Node) -> Wire<'a> {
        Wire {
            node,
            keys: self.keys,
        }
    }
}

impl Serialize for Wire<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let keys = self.keys;
        match self.node {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(Number::Int(i)) => serializer.serialize_i64(*i),
            Node::Number(Number::UInt(u)) => serializer.serialize_u64(*u),
            Node::Number(Number::Float(f)) if f.is_finite() => serializer.serialize_f64(*f),
            Node::Number(Number::Float(_)) => serializer.serialize_unit(),
            Node::String(s) => serializer.serialize_str(s),
            Node::Reference(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(keys.ref_key, &id.get())?;
                map.end()
            }
            Node::Array(array) if array.is_bare() => {
                let mut seq = serializer.serialize_seq(Some(array.items.len()))?;
                for item in &array.items {
                    seq.serialize_element(&self.child(item))?;
                }
                seq.end()
            }
            Node::Array(array) => {
                let mut map = serializer.serialize_map(None)?;
                write_meta(&mut map, keys, array.declared_type.as_ref(), array.id)?;
                map.serialize_entry(keys.items_key, &Items(self, &array.items))?;
                map.end()
            }
            Node::Object(object) => {
                let mut map = serializer.serialize_map(None)?;
                write_meta(&mut map, keys, object.declared_type.as_ref(), object.id)?;
                for (k, v) in &object.fields {
                    map.serialize_entry(keys.rename(k), &self.child(v))?;
                }
                map.end()
            }
        }
    }
}

fn write_meta<M: SerializeMap>(
    map: &mut M,
    keys: &MetaKeys,
    declared_type: Option<&TypeName>,
    id: Option<IdentityId>,
) -> Result<(), M::Error> {
    if let Some(t) = declared_type {
        map.serialize_entry(keys.type_key, t.as_str())?;
    }
    if let Some(id) = id {
        map.serialize_entry(keys.id_key, &id.get())?;
    }
    Ok(())
}

/// Items of a typed or identified array, always written as a plain sequence.
struct Items<'w, 'a>(&'w Wire<'a>, &'a [Node]);

impl Serialize for Items<'_, '_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.1.len()))?;
        for item in self.1 {
            seq.serialize_element(&self.0.child(item))?;
        }
        seq.end()
    }
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Wire::new(self, &MetaKeys::LONG).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Node, D::Error>
    where
        D: Deserializer<'de>,
    {
        Node::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Node, E> {
        Ok(Node::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
        Ok(Node::Number(Number::Int(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
        Ok(Node::Number(Number::from_u64(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
        Ok(Node::Number(Number::Float(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
        Ok(Node::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
        Ok(Node::String(v))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Node, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Node>()? {
            items.push(item);
        }
        Ok(Node::Array(ArrayNode::new(items)))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Node, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut fields = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Node>()? {
            let key = canonical_key(&key).to_string();
            if fields.contains_key(&key) {
                return Err(de::Error::custom(WireError::DuplicateKey(key)));
            }
            fields.insert(key, value);
        }
        classify(fields).map_err(de::Error::custom)
    }
}

fn parse_id(key: &'static str, node: &Node) -> Result<IdentityId, WireError> {
    let raw = match node {
        Node::Number(Number::Int(i)) => u64::try_from(*i).ok(),
        Node::Number(Number::UInt(u)) => Some(*u),
        // Some producers quote ids.
        Node::String(s) => s.parse::<u64>().ok(),
        _ => None,
    };
    raw.and_then(IdentityId::new).ok_or_else(|| WireError::InvalidId {
        key,
        found: describe(node),
    })
}

fn describe(node: &Node) -> String {
    match node {
        Node::Number(n) => n.to_string(),
        Node::String(s) => format!("{s:?}"),
        other => other.kind().to_string(),
    }
}

/// Turns the (canonically keyed) fields of a JSON object into a node:
/// a reference, an array definition or an object.
pub fn classify(mut fields: IndexMap<String, Node>) -> Result<Node, WireError> {
    if let Some(target) = fields.get(REF_KEY) {
        if fields.len() != 1 {
            return Err(WireError::RefWithSiblings);
        }
        return parse_id(REF_KEY, target).map(Node::Reference);
    }

    let declared_type = match fields.shift_remove(TYPE_KEY) {
        None | Some(Node::Null) => None,
        Some(Node::String(s)) => Some(TypeName::from(s)),
        Some(other) => return Err(WireError::InvalidType(describe(&other))),
    };
    let id = match fields.shift_remove(ID_KEY) {
        None | Some(Node::Null) => None,
        Some(node) => Some(parse_id(ID_KEY, &node)?),
    };

    if fields.contains_key(ITEMS_KEY) && !fields.contains_key(KEYS_KEY) {
        if let Some(extra) = fields.keys().find(|k| k.as_str() != ITEMS_KEY) {
            return Err(WireError::ItemsWithFields(extra.clone()));
        }
        let items = match fields.shift_remove(ITEMS_KEY) {
            Some(Node::Array(array)) => array.items,
            Some(Node::Null) | None => Vec::new(),
            Some(other) => return Err(WireError::ItemsNotArray(describe(&other))),
        };
        return Ok(Node::Array(ArrayNode {
            declared_type,
            id,
            items,
        }));
    }

    Ok(Node::Object(ObjectNode {
        declared_type,
        id,
        fields,
    }))
}
