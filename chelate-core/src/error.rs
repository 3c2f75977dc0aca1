use std::fmt;

use crate::heap::HeapError;
use crate::registry::RegistryError;
use crate::schema::TypeName;

/// Boxed error returned by host factories and custom codecs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Location of a value in a document or graph, written as `$.items[2].name`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn field(&self, name: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Field(name.into()));
        path
    }

    pub fn index(&self, index: usize) -> Self {
        let mut path = self.clone();
        path.0.push(PathSegment::Index(index));
        path
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.0 {
            match segment {
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

/// Fatal errors of a serialize or deserialize call.
///
/// No partial graph or document is returned alongside any of these.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed document at {path}: {reason}")]
    MalformedDocument { path: FieldPath, reason: String },

    #[error("unknown type `{type_name}` at {path}")]
    UnknownType { type_name: TypeName, path: FieldPath },

    #[error("type `{type_name}` at {path} is denied by the security policy")]
    SecurityDenied { type_name: TypeName, path: FieldPath },

    #[error("cannot coerce {source_type} to {target_type} at {path}: {reason}")]
    Coercion {
        path: FieldPath,
        source_type: String,
        target_type: String,
        reason: String,
    },

    #[error("failed to instantiate `{type_name}` at {path}: {source}")]
    Instantiation {
        type_name: TypeName,
        path: FieldPath,
        #[source]
        source: BoxError,
    },

    #[error("custom codec for `{type_name}` failed at {path}: {source}")]
    Custom {
        type_name: TypeName,
        path: FieldPath,
        #[source]
        source: BoxError,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("graph error: {0}")]
    Heap(#[from] HeapError),
}

impl CodecError {
    pub(crate) fn malformed(path: &FieldPath, reason: impl Into<String>) -> Self {
        CodecError::MalformedDocument {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn coercion(
        path: &FieldPath,
        source_type: impl Into<String>,
        target_type: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        CodecError::Coercion {
            path: path.clone(),
            source_type: source_type.into(),
            target_type: target_type.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_display() {
        let path = FieldPath::root().field("items").index(2).field("name");
        assert_eq!(path.to_string(), "$.items[2].name");
        assert_eq!(path.depth(), 3);
        assert_eq!(FieldPath::root().to_string(), "$");
    }

    #[test]
    fn coercion_message_names_both_types() {
        let err = CodecError::coercion(&FieldPath::root().field("value"), "float", "i32", "fractional");
        assert_eq!(
            err.to_string(),
            "cannot coerce float to i32 at $.value: fractional"
        );
    }
}
