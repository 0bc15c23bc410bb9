//! C1 — the per-connection resource registry (spec §4.1): a map of
//! stoppable resources keyed by a monotonically increasing decimal string,
//! with a `stopAll()` that drains the registry exactly once at teardown.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::error::CoreError;
use fleet_core::facade::ResourceHandle;
use fleet_core::future::BoxFuture;
use fleet_core::resource::Resource;
use parking_lot::Mutex;

struct Inner {
    next_id: u64,
    resources: HashMap<String, Arc<dyn Resource>>,
}

/// One mutex guards both the id counter and the id -> resource map (spec
/// §4.1's concurrency note), so `register` and `stop` never interleave in a
/// way that could hand out a duplicate id.
pub struct ResourceRegistry {
    inner: Mutex<Inner>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                resources: HashMap::new(),
            }),
        }
    }

    /// Register a resource, returning its opaque decimal id. Ids start at
    /// `"1"` and are never reused within this connection (spec §3, §4.1).
    pub fn register(&self, resource: Arc<dyn Resource>) -> String {
        let mut inner = self.inner.lock();
        let id = inner.next_id.to_string();
        inner.next_id += 1;
        inner.resources.insert(id.clone(), resource);
        id
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Resource>> {
        self.inner.lock().resources.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop and drop one resource. Stopping an already-removed id surfaces
    /// `UnknownWatcher`; stopping a resource that is merely *idle* is the
    /// resource's own responsibility to make idempotent (spec §4.1).
    pub async fn stop(&self, id: &str) -> Result<(), CoreError> {
        let resource = {
            let mut inner = self.inner.lock();
            inner.resources.remove(id)
        };
        match resource {
            Some(resource) => resource.stop().await,
            None => Err(CoreError::new(
                fleet_core::error::codes::UNKNOWN_WATCHER,
                fleet_core::error::ErrorCategory::NotFound,
                format!("no such resource: {id}"),
            )),
        }
    }

    /// Stop every remaining resource. Individual failures are logged and do
    /// not prevent the rest from being released (spec §4.1); called exactly
    /// once per connection at teardown.
    pub async fn stop_all(&self) {
        let resources: Vec<(String, Arc<dyn Resource>)> = {
            let mut inner = self.inner.lock();
            inner.resources.drain().collect()
        };
        for (id, resource) in resources {
            if let Err(err) = resource.stop().await {
                tracing::warn!(resource_id = %id, error = %err, "resource failed to stop cleanly");
            }
        }
    }
}

impl ResourceHandle for ResourceRegistry {
    fn register(&self, resource: Arc<dyn Resource>) -> String {
        ResourceRegistry::register(self, resource)
    }

    fn stop(&self, id: &str) -> BoxFuture<'_, Result<(), CoreError>> {
        let id = id.to_string();
        Box::pin(async move { ResourceRegistry::stop(self, &id).await })
    }

    fn get(&self, id: &str) -> Option<Arc<dyn Resource>> {
        ResourceRegistry::get(self, id)
    }
}
