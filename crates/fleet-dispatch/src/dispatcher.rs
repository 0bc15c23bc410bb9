//! C2 — the per-connection dispatcher (spec §4.2, §4.3, §9): resolves an
//! RPC request's `(RootName, Version, Id, Request)` into a constructed
//! facade instance and invokes the named method on it.
//!
//! Facade instances are constructed at most once per `(root, version, id)`
//! for the lifetime of the connection (spec's concurrency invariant: two
//! requests racing to create the same facade must observe the same
//! instance), which is why the cache slot is a `tokio::sync::OnceCell`
//! rather than a plain `HashMap` entry — the lock only ever guards *which*
//! cell a key maps to, never the (possibly slow) construction itself.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::error::{CoreError, ErrorCategory, codes};
use fleet_core::facade::{Authorizer, FacadeContext, FacadeInstance, ResourceHandle};
use fleet_core::state::StateStore;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::registry::FacadeRegistry;

type CacheKey = (String, u32, String);

/// Resolves and invokes facade methods for one connection. Cheap to
/// construct per-connection; the heavy `FacadeRegistry` is shared via `Arc`.
pub struct Dispatcher {
    registry: Arc<FacadeRegistry>,
    state: Arc<dyn StateStore>,
    resources: Arc<dyn ResourceHandle>,
    authorizer: Arc<dyn Authorizer>,
    instances: Mutex<HashMap<CacheKey, Arc<OnceCell<FacadeInstance>>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<FacadeRegistry>,
        state: Arc<dyn StateStore>,
        resources: Arc<dyn ResourceHandle>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            registry,
            state,
            resources,
            authorizer,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The root-level facade listing handed back by `Admin.Login` (spec §3).
    pub fn describe_facades(&self) -> Vec<(&'static str, Vec<u32>)> {
        self.registry.describe()
    }

    /// Resolve and invoke one RPC call. `id` is the wire `Id` field — empty
    /// for root-level facades, non-empty when addressing a specific
    /// sub-entity (e.g. a watcher) (spec §3).
    pub async fn dispatch(
        &self,
        root_name: &str,
        version: u32,
        id: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, CoreError> {
        let descriptor = self.registry.resolve(root_name, version)?;

        let cell = {
            let mut instances = self.instances.lock();
            instances
                .entry((root_name.to_string(), version, id.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let ctx = FacadeContext {
            state: self.state.clone(),
            resources: self.resources.clone(),
            authorizer: self.authorizer.clone(),
            instance_id: id.to_string(),
        };
        let instance = cell
            .get_or_try_init(|| async { descriptor.construct(ctx) })
            .await?
            .clone();

        let entry = descriptor.methods().get(method).ok_or_else(|| {
            CoreError::new(
                codes::NOT_IMPLEMENTED,
                ErrorCategory::NotFound,
                format!("{root_name}.{method} is not implemented"),
            )
        })?;

        entry.call(instance, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::facade::{FacadeDescriptor, MethodTable};
    use fleet_core::model::Tag;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysAllow(Tag);

    impl Authorizer for AlwaysAllow {
        fn auth_client(&self) -> bool {
            true
        }
        fn auth_machine_agent(&self) -> bool {
            false
        }
        fn auth_unit_agent(&self) -> bool {
            false
        }
        fn auth_environ_manager(&self) -> bool {
            false
        }
        fn auth_owner(&self, _tag: &Tag) -> bool {
            true
        }
        fn auth_tag(&self) -> &Tag {
            &self.0
        }
    }

    fn harness(
        constructions: Arc<AtomicUsize>,
    ) -> (Dispatcher, Arc<fleet_state_mem::InMemoryStateStore>) {
        let state = Arc::new(fleet_state_mem::InMemoryStateStore::new());
        let methods = MethodTable::builder().method0("Echo", |instance: Arc<AtomicUsize>| async move {
            Ok::<_, CoreError>(instance.load(Ordering::SeqCst))
        });
        let descriptor = FacadeDescriptor::new("Counter", 1, methods.build(), move |_ctx| {
            constructions.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(AtomicUsize::new(42)) as Arc<dyn Any + Send + Sync>)
        });
        let registry = FacadeRegistry::builder().register(descriptor).build();
        let resources = Arc::new(crate::resource_registry::ResourceRegistry::new());
        let authorizer = Arc::new(AlwaysAllow(Tag::User("admin".into())));
        let dispatcher = Dispatcher::new(registry, state.clone(), resources, authorizer);
        (dispatcher, state)
    }

    #[tokio::test]
    async fn facade_instance_is_constructed_at_most_once_per_key() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let (dispatcher, _state) = harness(constructions.clone());

        for _ in 0..5 {
            let result = dispatcher
                .dispatch("Counter", 1, "", "Echo", Value::Null)
                .await
                .unwrap();
            assert_eq!(result, Value::from(42));
        }
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_calls_race_to_one_construction() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let (dispatcher, _state) = harness(constructions.clone());
        let dispatcher = Arc::new(dispatcher);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher
                    .dispatch("Counter", 1, "", "Echo", Value::Null)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unresolvable_root_is_not_implemented() {
        let (dispatcher, _state) = harness(Arc::new(AtomicUsize::new(0)));
        let err = dispatcher
            .dispatch("Nope", 1, "", "Echo", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn unknown_method_is_not_implemented() {
        let (dispatcher, _state) = harness(Arc::new(AtomicUsize::new(0)));
        let err = dispatcher
            .dispatch("Counter", 1, "", "NoSuchMethod", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::NOT_IMPLEMENTED);
    }
}
