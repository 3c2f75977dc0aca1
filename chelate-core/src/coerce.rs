//! Conversion of scalar document nodes into values of a declared field type.

use crate::document::{Node, Number};
use crate::error::{CodecError, FieldPath};
use crate::heap::Value;
use crate::options::{ReadOptions, ResolveMode};
use crate::registry::TypeRegistry;
use crate::schema::{FieldType, FloatType, IntType, TypeName};

/// The primitive field type a built-in value type name stands for.
pub(crate) fn primitive_field_type(name: &str) -> Option<FieldType> {
    let t = match name {
        "bool" => FieldType::Bool,
        "char" => FieldType::Char,
        TypeName::STRING => FieldType::Str,
        "i8" => FieldType::Int(IntType::I8),
        "i16" => FieldType::Int(IntType::I16),
        "i32" => FieldType::Int(IntType::I32),
        "i64" => FieldType::Int(IntType::I64),
        "u8" => FieldType::Int(IntType::U8),
        "u16" => FieldType::Int(IntType::U16),
        "u32" => FieldType::Int(IntType::U32),
        "u64" => FieldType::Int(IntType::U64),
        "f32" => FieldType::Float(FloatType::F32),
        "f64" => FieldType::Float(FloatType::F64),
        _ => return None,
    };
    Some(t)
}

/// Coerces a scalar node (null, bool, number or string).
///
/// Composite and reference nodes are the resolver's business and are
/// rejected here.
pub(crate) fn coerce_scalar(
    node: &Node,
    expected: &FieldType,
    registry: &TypeRegistry,
    opts: &ReadOptions,
    path: &FieldPath,
) -> Result<Value, CodecError> {
    if node.is_composite() || node.is_reference() {
        return Err(CodecError::coercion(path, node.kind(), expected, "not a scalar"));
    }
    if node.is_null() {
        return Ok(expected.default_value());
    }
    match expected {
        FieldType::Any => Ok(untyped(node)),
        FieldType::Bool => to_bool(node, path),
        FieldType::Char => to_char(node, path),
        FieldType::Str => to_string(node, path),
        FieldType::Int(t) => to_int(node, *t, opts.truncate_fractional, path),
        FieldType::Float(t) => to_float(node, *t, path),
        FieldType::Named(name) => to_named(node, name, registry, opts, path),
        FieldType::Sequence(_) | FieldType::Map { .. } => match node {
            Node::String(s) if s.is_empty() => Ok(Value::Null),
            _ => Err(CodecError::coercion(path, node.kind(), expected, "expected a container")),
        },
    }
}

/// A scalar read without a declared type keeps its JSON shape.
pub(crate) fn untyped(node: &Node) -> Value {
    match node {
        Node::Bool(b) => Value::Bool(*b),
        Node::Number(Number::Int(i)) => Value::Int(*i),
        Node::Number(Number::UInt(u)) => Value::UInt(*u),
        Node::Number(Number::Float(f)) => Value::Float(*f),
        Node::String(s) => Value::Str(s.clone()),
        _ => Value::Null,
    }
}

fn to_bool(node: &Node, path: &FieldPath) -> Result<Value, CodecError> {
    match node {
        Node::Bool(b) => Ok(Value::Bool(*b)),
        Node::Number(Number::Int(i)) => Ok(Value::Bool(*i != 0)),
        Node::Number(Number::UInt(_)) => Ok(Value::Bool(true)),
        Node::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "false" => Ok(Value::Bool(false)),
            "true" => Ok(Value::Bool(true)),
            _ => Err(CodecError::coercion(path, "string", "bool", format!("`{s}` is not a boolean"))),
        },
        other => Err(CodecError::coercion(path, other.kind(), "bool", "unsupported")),
    }
}

fn to_char(node: &Node, path: &FieldPath) -> Result<Value, CodecError> {
    match node {
        Node::String(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (None, _) => Ok(Value::Char('\0')),
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err(CodecError::coercion(path, "string", "char", "more than one character")),
            }
        }
        Node::Number(Number::Int(i)) => u32::try_from(*i)
            .ok()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(|| CodecError::coercion(path, "integer", "char", format!("{i} is not a code point"))),
        other => Err(CodecError::coercion(path, other.kind(), "char", "unsupported")),
    }
}

fn to_string(node: &Node, path: &FieldPath) -> Result<Value, CodecError> {
    match node {
        Node::String(s) => Ok(Value::Str(s.clone())),
        Node::Bool(b) => Ok(Value::Str(b.to_string())),
        Node::Number(n) => Ok(Value::Str(n.to_string())),
        other => Err(CodecError::coercion(path, other.kind(), "string", "unsupported")),
    }
}

fn int_value(v: i128, t: IntType, source: &str, path: &FieldPath) -> Result<Value, CodecError> {
    if !t.contains(v) {
        return Err(CodecError::coercion(path, source, t.name(), format!("{v} is out of range")));
    }
    // Range-checked above, so neither conversion can fail.
    if t.is_signed() {
        Ok(Value::Int(v as i64))
    } else {
        Ok(Value::UInt(v as u64))
    }
}

fn float_to_int(
    f: f64,
    t: IntType,
    truncate: bool,
    source: &str,
    path: &FieldPath,
) -> Result<Value, CodecError> {
    if !f.is_finite() {
        return Err(CodecError::coercion(path, source, t.name(), "not a finite number"));
    }
    if f.fract() != 0.0 && !truncate {
        return Err(CodecError::coercion(
            path,
            source,
            t.name(),
            format!("{f} has a fractional part"),
        ));
    }
    let whole = f.trunc();
    let (lo, hi) = t.bounds();
    if whole < lo as f64 || whole > hi as f64 {
        return Err(CodecError::coercion(path, source, t.name(), format!("{f} is out of range")));
    }
    int_value(whole as i128, t, source, path)
}

fn to_int(node: &Node, t: IntType, truncate: bool, path: &FieldPath) -> Result<Value, CodecError> {
    match node {
        Node::Number(Number::Int(i)) => int_value(i128::from(*i), t, "integer", path),
        Node::Number(Number::UInt(u)) => int_value(i128::from(*u), t, "integer", path),
        Node::Number(Number::Float(f)) => float_to_int(*f, t, truncate, "float", path),
        Node::Bool(b) => int_value(i128::from(*b), t, "bool", path),
        Node::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return int_value(0, t, "string", path);
            }
            if let Ok(v) = text.parse::<i128>() {
                return int_value(v, t, "string", path);
            }
            match text.parse::<f64>() {
                Ok(f) => float_to_int(f, t, truncate, "string", path),
                Err(_) => Err(CodecError::coercion(
                    path,
                    "string",
                    t.name(),
                    format!("`{s}` is not a number"),
                )),
            }
        }
        other => Err(CodecError::coercion(path, other.kind(), t.name(), "unsupported")),
    }
}

fn to_float(node: &Node, t: FloatType, path: &FieldPath) -> Result<Value, CodecError> {
    let f = match node {
        Node::Number(n) => n.as_f64(),
        Node::Bool(b) => f64::from(u8::from(*b)),
        Node::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                0.0
            } else {
                text.parse::<f64>().map_err(|_| {
                    CodecError::coercion(path, "string", t.name(), format!("`{s}` is not a number"))
                })?
            }
        }
        other => return Err(CodecError::coercion(path, other.kind(), t.name(), "unsupported")),
    };
    match t {
        FloatType::F32 => {
            let narrow = f as f32;
            if f.is_finite() && narrow.is_infinite() {
                return Err(CodecError::coercion(path, node.kind(), t.name(), "out of range"));
            }
            Ok(Value::Float(f64::from(narrow)))
        }
        FloatType::F64 => Ok(Value::Float(f)),
    }
}

fn to_named(
    node: &Node,
    name: &TypeName,
    registry: &TypeRegistry,
    opts: &ReadOptions,
    path: &FieldPath,
) -> Result<Value, CodecError> {
    let empty = matches!(node, Node::String(s) if s.is_empty());

    // `Option<i32>` and friends: like the primitive, but empty text is null.
    if let Some(unboxed) = name.unboxed() {
        if empty {
            return Ok(Value::Null);
        }
        return to_named(node, &unboxed, registry, opts, path);
    }
    if let Some(primitive) = primitive_field_type(name.as_str()) {
        return coerce_scalar(node, &primitive, registry, opts, path);
    }

    let Some(entry) = registry.resolve(name.as_str()) else {
        return Ok(untyped(node));
    };
    if let Some(parse) = entry.parser() {
        if empty {
            return Ok(Value::Null);
        }
        let text = match node {
            Node::String(s) => s.clone(),
            Node::Number(n) => n.to_string(),
            Node::Bool(b) => b.to_string(),
            other => return Err(CodecError::coercion(path, other.kind(), name, "unsupported")),
        };
        return parse(&text)
            .map(Value::Native)
            .map_err(|e| CodecError::coercion(path, node.kind(), name, e.to_string()));
    }
    if entry.is_value_type() {
        // A value type without a parser keeps its scalar form.
        return Ok(untyped(node));
    }
    if empty && opts.mode == ResolveMode::Maps {
        return Ok(Value::Null);
    }
    Err(CodecError::coercion(path, node.kind(), name, "expected an object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeDescriptor;

    fn coerce(node: Node, expected: FieldType) -> Result<Value, CodecError> {
        coerce_with(node, expected, &ReadOptions::default())
    }

    fn coerce_with(node: Node, expected: FieldType, opts: &ReadOptions) -> Result<Value, CodecError> {
        let mut registry = TypeRegistry::new();
        registry
            .register_value_type::<std::net::Ipv4Addr>("ipv4")
            .register(TypeDescriptor::record("Point", [("x", FieldType::Int(IntType::I32))]));
        coerce_scalar(&node, &expected, &registry, opts, &FieldPath::root().field("f"))
    }

    #[test]
    fn ints_are_range_checked() {
        assert_eq!(coerce(Node::from(200), FieldType::Int(IntType::U8)).unwrap(), Value::UInt(200));
        assert!(matches!(
            coerce(Node::from(300), FieldType::Int(IntType::U8)),
            Err(CodecError::Coercion { .. })
        ));
        assert!(coerce(Node::from(-1), FieldType::Int(IntType::U32)).is_err());
        assert_eq!(coerce(Node::from(-7), FieldType::Int(IntType::I8)).unwrap(), Value::Int(-7));
    }

    #[test]
    fn f32_overflow_is_an_error() {
        let err = coerce(Node::from(1e300), FieldType::Float(FloatType::F32)).unwrap_err();
        assert!(matches!(err, CodecError::Coercion { .. }), "{err}");
        assert!(err.to_string().contains("out of range"), "{err}");

        assert_eq!(
            coerce(Node::from(1.5), FieldType::Float(FloatType::F32)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            coerce(Node::from(1e300), FieldType::Float(FloatType::F64)).unwrap(),
            Value::Float(1e300)
        );
    }

    #[test]
    fn fractional_floats_need_opt_in() {
        let err = coerce(Node::from(16.5), FieldType::Int(IntType::I32)).unwrap_err();
        assert!(err.to_string().contains("fractional"), "{err}");

        let opts = ReadOptions::default().with_truncate_fractional(true);
        assert_eq!(
            coerce_with(Node::from(16.5), FieldType::Int(IntType::I32), &opts).unwrap(),
            Value::Int(16)
        );
        assert_eq!(coerce(Node::from(16.0), FieldType::Int(IntType::I32)).unwrap(), Value::Int(16));
    }

    #[test]
    fn strings_parse_into_numbers() {
        assert_eq!(coerce(Node::from(" 42 "), FieldType::Int(IntType::I64)).unwrap(), Value::Int(42));
        assert_eq!(coerce(Node::from(""), FieldType::Int(IntType::I64)).unwrap(), Value::Int(0));
        assert_eq!(
            coerce(Node::from("2.5"), FieldType::Float(FloatType::F64)).unwrap(),
            Value::Float(2.5)
        );
        assert!(coerce(Node::from("abc"), FieldType::Int(IntType::I64)).is_err());
    }

    #[test]
    fn scalars_stringify() {
        assert_eq!(coerce(Node::from(7), FieldType::Str).unwrap(), Value::from("7"));
        assert_eq!(coerce(Node::from(true), FieldType::Str).unwrap(), Value::from("true"));
    }

    #[test]
    fn chars_and_bools() {
        assert_eq!(coerce(Node::from("x"), FieldType::Char).unwrap(), Value::Char('x'));
        assert!(coerce(Node::from("xy"), FieldType::Char).is_err());
        assert_eq!(coerce(Node::from("TRUE"), FieldType::Bool).unwrap(), Value::Bool(true));
        assert_eq!(coerce(Node::from(0), FieldType::Bool).unwrap(), Value::Bool(false));
    }

    #[test]
    fn null_becomes_field_default() {
        assert_eq!(coerce(Node::Null, FieldType::Int(IntType::I32)).unwrap(), Value::Int(0));
        assert_eq!(coerce(Node::Null, FieldType::Str).unwrap(), Value::Null);
    }

    #[test]
    fn boxed_primitives_accept_empty_as_null() {
        assert_eq!(coerce(Node::from(""), FieldType::named("Option<i32>")).unwrap(), Value::Null);
        assert_eq!(coerce(Node::from("5"), FieldType::named("Option<i32>")).unwrap(), Value::Int(5));
    }

    #[test]
    fn value_types_parse_text() {
        let v = coerce(Node::from("127.0.0.1"), FieldType::named("ipv4")).unwrap();
        assert_eq!(v.as_native().unwrap().to_text(), "127.0.0.1");
        assert_eq!(coerce(Node::from(""), FieldType::named("ipv4")).unwrap(), Value::Null);
        assert!(coerce(Node::from("nope"), FieldType::named("ipv4")).is_err());
    }

    #[test]
    fn empty_string_into_object_field() {
        assert!(coerce(Node::from(""), FieldType::named("Point")).is_err());
        assert_eq!(
            coerce_with(Node::from(""), FieldType::named("Point"), &ReadOptions::maps()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn untyped_keeps_shape() {
        assert_eq!(coerce(Node::from(3), FieldType::Any).unwrap(), Value::Int(3));
        assert_eq!(coerce(Node::from(3.5), FieldType::Any).unwrap(), Value::Float(3.5));
        assert_eq!(coerce(Node::from(u64::MAX), FieldType::Any).unwrap(), Value::UInt(u64::MAX));
    }
}
