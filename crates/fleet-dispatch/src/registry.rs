//! C2 — the process-wide facade registry (spec §4.2): an append-only
//! `(name, version) -> FacadeDescriptor` table built once at startup, then
//! shared read-only across every connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_core::error::{CoreError, ErrorCategory, codes};
use fleet_core::facade::FacadeDescriptor;

/// Built once via [`FacadeRegistryBuilder::build`], then handed to every
/// connection as an `Arc` — reads never take a lock afterward.
pub struct FacadeRegistry {
    descriptors: BTreeMap<(String, u32), FacadeDescriptor>,
}

impl FacadeRegistry {
    pub fn builder() -> FacadeRegistryBuilder {
        FacadeRegistryBuilder::default()
    }

    /// Resolve `(name, requestedVersion)` to the highest registered version
    /// not exceeding the request (spec §4.2's version-negotiation rule). A
    /// known name with no version at or below the request, or an unknown
    /// name entirely, is `NotImplemented`.
    pub fn resolve(&self, name: &str, requested_version: u32) -> Result<&FacadeDescriptor, CoreError> {
        self.descriptors
            .range((name.to_string(), 0)..=(name.to_string(), requested_version))
            .next_back()
            .map(|(_, descriptor)| descriptor)
            .ok_or_else(|| {
                CoreError::new(
                    codes::NOT_IMPLEMENTED,
                    ErrorCategory::NotFound,
                    format!("no facade {name} at version <= {requested_version}"),
                )
            })
    }

    /// The full `(name, [versions])` listing `Admin.Login` reports back to
    /// the client (spec §3's "Login Result" collaborator, §4.2).
    pub fn describe(&self) -> Vec<(&'static str, Vec<u32>)> {
        let mut grouped: BTreeMap<&'static str, Vec<u32>> = BTreeMap::new();
        for descriptor in self.descriptors.values() {
            grouped.entry(descriptor.name).or_default().push(descriptor.version);
        }
        grouped.into_iter().collect()
    }
}

#[derive(Default)]
pub struct FacadeRegistryBuilder {
    descriptors: BTreeMap<(String, u32), FacadeDescriptor>,
}

impl FacadeRegistryBuilder {
    /// Register one facade version. Panics on a conflicting re-registration
    /// of the same `(name, version)`: descriptors carry trait objects with
    /// no meaningful equality, so unlike spec §4.2's idempotent-if-identical
    /// ideal, this build step can only hard-fail a genuine conflict rather
    /// than silently accept a second, possibly-different, registration.
    pub fn register(mut self, descriptor: FacadeDescriptor) -> Self {
        let key = (descriptor.name.to_string(), descriptor.version);
        if self.descriptors.contains_key(&key) {
            panic!(
                "facade {} v{} registered twice",
                descriptor.name, descriptor.version
            );
        }
        self.descriptors.insert(key, descriptor);
        self
    }

    pub fn build(self) -> Arc<FacadeRegistry> {
        Arc::new(FacadeRegistry {
            descriptors: self.descriptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::facade::{FacadeContext, MethodTable};

    fn stub_descriptor(name: &'static str, version: u32) -> FacadeDescriptor {
        FacadeDescriptor::new(name, version, MethodTable::builder().build(), |_ctx: FacadeContext| {
            Ok(Arc::new(()) as Arc<dyn std::any::Any + Send + Sync>)
        })
    }

    #[test]
    fn resolves_highest_version_at_or_below_request() {
        let registry = FacadeRegistry::builder()
            .register(stub_descriptor("Client", 1))
            .register(stub_descriptor("Client", 2))
            .build();

        assert_eq!(registry.resolve("Client", 2).unwrap().version, 2);
        assert_eq!(registry.resolve("Client", 5).unwrap().version, 2);
        assert_eq!(registry.resolve("Client", 1).unwrap().version, 1);
    }

    #[test]
    fn unknown_name_or_version_below_all_registered_is_not_implemented() {
        let registry = FacadeRegistry::builder()
            .register(stub_descriptor("Client", 2))
            .build();

        assert_eq!(
            registry.resolve("Client", 0).unwrap_err().code(),
            codes::NOT_IMPLEMENTED
        );
        assert_eq!(
            registry.resolve("Nope", 1).unwrap_err().code(),
            codes::NOT_IMPLEMENTED
        );
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn conflicting_registration_panics_at_build_time() {
        let _ = FacadeRegistry::builder()
            .register(stub_descriptor("Client", 1))
            .register(stub_descriptor("Client", 1));
    }

    #[test]
    fn describe_groups_versions_per_name() {
        let registry = FacadeRegistry::builder()
            .register(stub_descriptor("Client", 1))
            .register(stub_descriptor("Client", 2))
            .register(stub_descriptor("Agent", 1))
            .build();
        let described = registry.describe();
        assert_eq!(
            described,
            vec![("Agent", vec![1]), ("Client", vec![1, 2])]
        );
    }
}
