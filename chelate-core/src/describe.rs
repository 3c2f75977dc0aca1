use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use crate::heap::{Handle, Value};
use crate::schema::{FieldType, FloatType, IntType, TypeDescriptor, TypeName};

/// A Rust type that can appear as a declared field type.
///
/// Implemented for primitives, strings, the standard containers and every
/// type deriving `Describe`.
pub trait Describe {
    /// The declared type of a field holding this Rust type.
    fn field_type() -> FieldType;
}

/// A Rust type with its own registry entry.
///
/// `#[derive(Describe)]` implements this together with [`Describe`], so
/// descriptors are produced at compile time instead of by runtime
/// introspection.
pub trait Typed: Describe {
    fn type_name() -> TypeName;

    fn descriptor() -> TypeDescriptor;
}

impl Describe for bool {
    fn field_type() -> FieldType {
        FieldType::Bool
    }
}

impl Describe for char {
    fn field_type() -> FieldType {
        FieldType::Char
    }
}

impl Describe for String {
    fn field_type() -> FieldType {
        FieldType::Str
    }
}

impl Describe for &str {
    fn field_type() -> FieldType {
        FieldType::Str
    }
}

macro_rules! impl_describe_int {
    ($t:ty, $variant:ident) => {
        impl Describe for $t {
            fn field_type() -> FieldType {
                FieldType::Int(IntType::$variant)
            }
        }
    };
}

impl_describe_int!(u8, U8);
impl_describe_int!(u16, U16);
impl_describe_int!(u32, U32);
impl_describe_int!(u64, U64);
impl_describe_int!(usize, U64);
impl_describe_int!(i8, I8);
impl_describe_int!(i16, I16);
impl_describe_int!(i32, I32);
impl_describe_int!(i64, I64);
impl_describe_int!(isize, I64);

macro_rules! impl_describe_float {
    ($t:ty, $variant:ident) => {
        impl Describe for $t {
            fn field_type() -> FieldType {
                FieldType::Float(FloatType::$variant)
            }
        }
    };
}

impl_describe_float!(f32, F32);
impl_describe_float!(f64, F64);

// Every field may hold null, so `Option<T>` declares the same type as `T`.
impl<T: Describe> Describe for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }
}

macro_rules! impl_describe_transparent {
    ($($wrapper:ident),*) => {
        $(
            impl<T: Describe + ?Sized> Describe for $wrapper<T> {
                fn field_type() -> FieldType {
                    T::field_type()
                }
            }
        )*
    };
}

impl_describe_transparent!(Box, Rc, Arc);

macro_rules! impl_describe_sequence {
    ($($seq:ident),*) => {
        $(
            impl<T: Describe> Describe for $seq<T> {
                fn field_type() -> FieldType {
                    FieldType::sequence(T::field_type())
                }
            }
        )*
    };
}

impl_describe_sequence!(Vec, VecDeque, HashSet, BTreeSet);

impl<T: Describe, const N: usize> Describe for [T; N] {
    fn field_type() -> FieldType {
        FieldType::sequence(T::field_type())
    }
}

macro_rules! impl_describe_map {
    ($($map:ident),*) => {
        $(
            impl<K: Describe, V: Describe, S> Describe for $map<K, V, S> {
                fn field_type() -> FieldType {
                    FieldType::map(K::field_type(), V::field_type())
                }
            }
        )*
    };
}

impl_describe_map!(HashMap, IndexMap);

impl<K: Describe, V: Describe> Describe for BTreeMap<K, V> {
    fn field_type() -> FieldType {
        FieldType::map(K::field_type(), V::field_type())
    }
}

// Untyped slots.

impl Describe for Value {
    fn field_type() -> FieldType {
        FieldType::Any
    }
}

impl Describe for Handle {
    fn field_type() -> FieldType {
        FieldType::Any
    }
}
