use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::schema::TypeName;

/// Two-way mapping between full type names and their short aliases.
///
/// Writers emit the alias in `@type`; readers accept either form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeAliases {
    aliases: IndexMap<TypeName, String>,
}

impl TypeAliases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, full: impl Into<TypeName>, alias: impl Into<String>) -> Self {
        self.insert(full, alias);
        self
    }

    pub fn insert(&mut self, full: impl Into<TypeName>, alias: impl Into<String>) {
        self.aliases.insert(full.into(), alias.into());
    }

    /// The name written to the document for `full`.
    pub fn shorten<'a>(&'a self, full: &'a TypeName) -> &'a str {
        self.aliases.get(full).map_or(full.as_str(), String::as_str)
    }

    /// The full type name for a name read from the document.
    pub fn expand(&self, name: &str) -> TypeName {
        self.aliases
            .iter()
            .find(|(_, alias)| alias.as_str() == name)
            .map_or_else(|| TypeName::new(name), |(full, _)| full.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// When the writer emits `@type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowType {
    /// On every composite.
    Always,
    /// Only where the runtime type is not implied by the declared type.
    #[default]
    Minimal,
    /// Never; the document can only be read back as generic maps.
    Never,
}

/// Options of one serialize call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub show_type: ShowType,
    /// Omit record fields holding null.
    pub skip_null_fields: bool,
    pub aliases: TypeAliases,
    /// Fields never written, per type (inherited by subtypes).
    pub excluded_fields: HashMap<TypeName, HashSet<String>>,
    pub max_depth: usize,
    pub max_object_count: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            show_type: ShowType::default(),
            skip_null_fields: false,
            aliases: TypeAliases::default(),
            excluded_fields: HashMap::new(),
            max_depth: 1_000,
            max_object_count: 10_000_000,
        }
    }
}

impl WriteOptions {
    pub fn with_show_type(mut self, show_type: ShowType) -> Self {
        self.show_type = show_type;
        self
    }

    pub fn with_skip_null_fields(mut self, skip: bool) -> Self {
        self.skip_null_fields = skip;
        self
    }

    pub fn with_alias(mut self, full: impl Into<TypeName>, alias: impl Into<String>) -> Self {
        self.aliases.insert(full, alias);
        self
    }

    pub fn with_excluded_field(
        mut self,
        type_name: impl Into<TypeName>,
        field: impl Into<String>,
    ) -> Self {
        self.excluded_fields
            .entry(type_name.into())
            .or_default()
            .insert(field.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_object_count(mut self, max: usize) -> Self {
        self.max_object_count = max;
        self
    }
}

/// What the resolver builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    /// Typed instances as declared by `@type` and the registry.
    #[default]
    Typed,
    /// Generic maps and arrays only; factories and custom readers are skipped.
    Maps,
}

/// Handling of `@type` names the registry does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTypePolicy {
    /// Build a generic map and report it.
    #[default]
    GenericMap,
    Fail,
}

/// Handling of types denied by the security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedTypePolicy {
    /// Substitute null and report it.
    #[default]
    Null,
    Fail,
}

/// Options of one deserialize call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub mode: ResolveMode,
    pub unknown_type: UnknownTypePolicy,
    pub on_denied: DeniedTypePolicy,
    pub aliases: TypeAliases,
    pub max_depth: usize,
    pub max_unresolved_references: usize,
    pub max_object_references: usize,
    pub max_reference_chain_depth: usize,
    /// Drop the fractional part of floats read into integer fields instead
    /// of failing.
    pub truncate_fractional: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            mode: ResolveMode::default(),
            unknown_type: UnknownTypePolicy::default(),
            on_denied: DeniedTypePolicy::default(),
            aliases: TypeAliases::default(),
            max_depth: 1_000,
            max_unresolved_references: 1_000_000,
            max_object_references: 10_000_000,
            max_reference_chain_depth: 10_000,
            truncate_fractional: false,
        }
    }
}

impl ReadOptions {
    /// Options for reading into generic maps and arrays.
    pub fn maps() -> Self {
        ReadOptions {
            mode: ResolveMode::Maps,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_unknown_type(mut self, policy: UnknownTypePolicy) -> Self {
        self.unknown_type = policy;
        self
    }

    pub fn with_on_denied(mut self, policy: DeniedTypePolicy) -> Self {
        self.on_denied = policy;
        self
    }

    pub fn with_alias(mut self, full: impl Into<TypeName>, alias: impl Into<String>) -> Self {
        self.aliases.insert(full, alias);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_unresolved_references(mut self, max: usize) -> Self {
        self.max_unresolved_references = max;
        self
    }

    pub fn with_max_object_references(mut self, max: usize) -> Self {
        self.max_object_references = max;
        self
    }

    pub fn with_max_reference_chain_depth(mut self, max: usize) -> Self {
        self.max_reference_chain_depth = max;
        self
    }

    pub fn with_truncate_fractional(mut self, truncate: bool) -> Self {
        self.truncate_fractional = truncate;
        self
    }
}
