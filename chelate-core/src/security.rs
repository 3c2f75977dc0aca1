use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::schema::TypeName;

/// Types that are never written or instantiated unless explicitly allowed.
///
/// Process and command handles, dynamic-loading handles, raw descriptors and
/// reflective pointers.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "std::process::Command",
    "std::process::Child",
    "std::process::ChildStdin",
    "std::process::ChildStdout",
    "std::process::ChildStderr",
    "std::os::fd::OwnedFd",
    "std::os::fd::RawFd",
    "std::os::windows::io::OwnedHandle",
    "libloading::Library",
    "libloading::Symbol",
    "core::ptr::NonNull",
    "core::any::TypeId",
];

/// Denylist consulted before any instance is written or constructed.
///
/// The policy is plain data: it can be extended from configuration, and the
/// engine checks it before any custom reader, writer or factory runs, so a
/// custom codec can never bypass it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    denied: BTreeSet<TypeName>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicy {
            denied: DEFAULT_DENYLIST.iter().copied().map(TypeName::new).collect(),
        }
    }
}

impl SecurityPolicy {
    /// A policy that denies nothing.
    pub fn permissive() -> Self {
        SecurityPolicy {
            denied: BTreeSet::new(),
        }
    }

    /// Adds a type to the denylist.
    pub fn deny(mut self, type_name: impl Into<TypeName>) -> Self {
        self.denied.insert(type_name.into());
        self
    }

    /// Removes a type from the denylist.
    pub fn allow(mut self, type_name: &str) -> Self {
        self.denied.remove(type_name);
        self
    }

    /// Exact-name check. The engine also checks ancestors through the
    /// registry, so subtypes of a denied type are denied too.
    pub fn is_denied(&self, type_name: &str) -> bool {
        self.denied.contains(type_name)
    }

    pub fn denied(&self) -> impl Iterator<Item = &TypeName> {
        self.denied.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_denies_process_handles() {
        let policy = SecurityPolicy::default();
        assert!(policy.is_denied("std::process::Command"));
        assert!(policy.is_denied("libloading::Library"));
        assert!(!policy.is_denied("std::string::String"));
    }

    #[test]
    fn policy_is_extendable() {
        let policy = SecurityPolicy::default()
            .deny("acme::Launcher")
            .allow("core::any::TypeId");
        assert!(policy.is_denied("acme::Launcher"));
        assert!(!policy.is_denied("core::any::TypeId"));
    }

    #[test]
    fn permissive_denies_nothing() {
        let policy = SecurityPolicy::permissive();
        assert_eq!(policy.denied().count(), 0);
    }

    #[test]
    fn loads_from_config() {
        let policy: SecurityPolicy =
            serde_json::from_str(r#"{"denied": ["acme::Shell"]}"#).unwrap();
        assert!(policy.is_denied("acme::Shell"));
        assert!(!policy.is_denied("std::process::Command"));
    }
}
