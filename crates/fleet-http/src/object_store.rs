//! The object-storage capability the upload/backup handlers write blobs
//! through. Spec §1 places "object storage providers used for uploaded
//! artifacts" out of scope, alongside the `StateStore` itself — this trait
//! is the same kind of capability seam, just local to `fleet-http` since
//! nothing outside the HTTP side channel needs it.

use fleet_core::error::CoreError;
use fleet_core::future::BoxFuture;

/// Puts a named blob and returns the URL it was stored under.
pub trait ObjectStore: Send + Sync + 'static {
    fn put(&self, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, Result<String, CoreError>>;
}

/// An in-memory store, useful for tests and for running the server without
/// a real object-storage backend wired up.
#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(name).cloned()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&self, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, Result<String, CoreError>> {
        let name = name.to_string();
        Box::pin(async move {
            let url = format!("objectstore://{name}");
            self.blobs.lock().insert(name, bytes);
            Ok(url)
        })
    }
}
