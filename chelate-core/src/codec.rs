use std::sync::Arc;

use crate::document::Node;
use crate::error::CodecError;
use crate::heap::{Heap, Value};
use crate::options::{ReadOptions, WriteOptions};
use crate::registry::TypeRegistry;
use crate::resolver::{self, Resolved};
use crate::security::SecurityPolicy;
use crate::writer;

/// A configured registry and security policy, shareable across threads.
///
/// Each call keeps its own identity maps and worklists, so any number of
/// serialize and deserialize calls may run concurrently on one codec.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    registry: Arc<TypeRegistry>,
    policy: Arc<SecurityPolicy>,
}

impl Codec {
    pub fn new(registry: TypeRegistry, policy: SecurityPolicy) -> Self {
        Codec {
            registry: Arc::new(registry),
            policy: Arc::new(policy),
        }
    }

    pub fn from_shared(registry: Arc<TypeRegistry>, policy: Arc<SecurityPolicy>) -> Self {
        Codec { registry, policy }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Writes the graph reachable from `root` as a document.
    pub fn serialize(&self, heap: &Heap, root: &Value, opts: &WriteOptions) -> Result<Node, CodecError> {
        writer::serialize(heap, root, &self.registry, &self.policy, opts)
    }

    /// Builds a fresh graph from a document.
    pub fn deserialize(&self, node: &Node, opts: &ReadOptions) -> Result<Resolved, CodecError> {
        resolver::deserialize(node, &self.registry, &self.policy, opts)
    }
}
