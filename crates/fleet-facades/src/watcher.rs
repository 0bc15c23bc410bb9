//! The `NotifyWatcher` facade (spec §3 "Watcher Handle", §4.2, §9
//! "cooperative watchers"): the re-entry point a client calls `Next`/`Stop`
//! on after a `Uniter.Watch` handed back a `{notifyWatcherId, initial}`.
//!
//! The watcher itself lives in the connection's `ResourceRegistry` under
//! that id, registered at `Watch` time (see `crate::uniter`). This module
//! owns two things: the `NotifyWatcher` resource (the live change stream)
//! and the facade wrapper that re-enters it by instance id on every call.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use fleet_core::error::{codes, CoreError, ErrorCategory};
use fleet_core::facade::{FacadeContext, FacadeDescriptor, FacadeInstance, MethodTable, ResourceHandle};
use fleet_core::future::BoxStream;
use fleet_core::resource::Resource;
use fleet_core::state::Life;
use futures::StreamExt;
use tokio::sync::Mutex as AsyncMutex;

/// The live resource registered under a watcher's id. Consuming the first
/// change is the caller's job (spec §3: "the initial snapshot consumes the
/// first event … before returning"); this type only ever yields
/// *subsequent* changes.
pub struct NotifyWatcher {
    changes: AsyncMutex<BoxStream<'static, Life>>,
}

impl fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyWatcher").finish_non_exhaustive()
    }
}

impl NotifyWatcher {
    pub fn new(changes: BoxStream<'static, Life>) -> Arc<Self> {
        Arc::new(Self {
            changes: AsyncMutex::new(changes),
        })
    }

    /// Block until the next change or the underlying stream ends, the
    /// latter meaning the resource was stopped (spec §9: "close the channel
    /// on stop so late readers observe an EOF-equivalent").
    async fn next(&self) -> Result<Life, CoreError> {
        let mut guard = self.changes.lock().await;
        guard.next().await.ok_or_else(|| {
            CoreError::new(codes::STOPPED, ErrorCategory::NotFound, "watcher has been stopped")
        })
    }
}

impl Resource for NotifyWatcher {
    fn stop(&self) -> fleet_core::future::BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            // Swap in a closed stream so any `Next` racing with or following
            // this `Stop` sees an EOF-equivalent instead of blocking on the
            // now-abandoned underlying watcher (spec §9).
            let mut guard = self.changes.lock().await;
            *guard = Box::pin(futures::stream::empty());
            Ok(())
        })
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The facade wrapper constructed fresh per `(NotifyWatcher, version, id)`
/// dispatch cache entry: recovers the underlying resource by id and keeps
/// just enough of the connection's resource handle to implement `Stop` as
/// "remove myself from the registry" rather than a second, parallel notion
/// of stopped-ness.
struct NotifyWatcherFacade {
    watcher: Arc<NotifyWatcher>,
    resources: Arc<dyn ResourceHandle>,
    id: String,
}

#[derive(serde::Serialize)]
struct NextResponse {
    life: Life,
}

pub fn notify_watcher_descriptor() -> FacadeDescriptor {
    let methods = MethodTable::builder()
        .method0::<NotifyWatcherFacade, NextResponse, _, _>("Next", |instance| async move {
            let life = instance.watcher.next().await?;
            Ok(NextResponse { life })
        })
        .method0::<NotifyWatcherFacade, (), _, _>("Stop", |instance| async move {
            instance.resources.stop(&instance.id).await
        })
        .build();

    FacadeDescriptor::new("NotifyWatcher", 0, methods, |ctx: FacadeContext| {
        let resource = ctx.resources.get(&ctx.instance_id).ok_or_else(|| {
            CoreError::new(codes::UNKNOWN_WATCHER, ErrorCategory::NotFound, "no such watcher")
        })?;
        let watcher = resource.as_any_arc().downcast::<NotifyWatcher>().map_err(|_| {
            CoreError::internal("resource registered under this id is not a NotifyWatcher")
        })?;
        Ok(Arc::new(NotifyWatcherFacade {
            watcher,
            resources: ctx.resources.clone(),
            id: ctx.instance_id.clone(),
        }) as FacadeInstance)
    })
}
