//! Stoppable server-side objects (spec §3 "Resource"): watchers, pingers,
//! anything with a `stop()`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;
use crate::future::BoxFuture;

/// Any object with a `stop()` operation. Stopping an already-stopped
/// resource must return success (spec §4.1's failure semantics) — it is the
/// implementor's job to make `stop` idempotent.
///
/// `as_any_arc` exists so a facade can re-enter a previously registered
/// resource by id and recover its concrete type (spec §4.2's "later calls
/// to `Next`/`Stop` re-enter via C2 targeting that resource id" — the
/// `NotifyWatcher` facade in `fleet-facades` is the concrete example).
/// Implement it as `{ self }`; the blanket coercion from `Arc<Self>` to
/// `Arc<dyn Any + Send + Sync>` is the whole body.
pub trait Resource: Send + Sync + fmt::Debug + 'static {
    fn stop(&self) -> BoxFuture<'_, Result<(), CoreError>>;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[cfg(test)]
pub(crate) mod test_stub {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    pub struct CountingResource {
        pub stops: Arc<AtomicUsize>,
    }

    impl Resource for CountingResource {
        fn stop(&self) -> BoxFuture<'_, Result<(), CoreError>> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }
}
