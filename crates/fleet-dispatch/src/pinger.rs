//! The connection liveness pinger (spec §4.4): a resettable deadline that,
//! left untouched for the configured interval, runs a one-shot action —
//! the transport layer wires this to closing the connection. Every
//! `Pinger.Ping` call resets the deadline instead of doing anything else.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::error::CoreError;
use fleet_core::future::BoxFuture;
use fleet_core::model::Tag;
use fleet_core::resource::Resource;
use fleet_core::state::StateStore;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Three minutes, matching the source system's default agent ping timeout
/// (spec §4.4).
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(180);

#[derive(Debug)]
pub struct Pinger {
    reset: Arc<Notify>,
    stop: watch::Sender<bool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Pinger {
    /// Spawn a pinger with the given interval; `on_expire` fires at most
    /// once, the first time the deadline elapses without an intervening
    /// `reset()`.
    pub fn spawn(interval: Duration, on_expire: impl Fn() + Send + Sync + 'static) -> Arc<Self> {
        let reset = Arc::new(Notify::new());
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task_reset = reset.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        on_expire();
                        break;
                    }
                    _ = task_reset.notified() => {
                        continue;
                    }
                    _ = stop_rx.changed() => {
                        break;
                    }
                }
            }
        });

        Arc::new(Self {
            reset,
            stop: stop_tx,
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Called on every `Pinger.Ping` RPC: pushes the deadline back out by a
    /// full interval.
    pub fn reset(&self) {
        self.reset.notify_one();
    }
}

impl Resource for Pinger {
    fn stop(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            let _ = self.stop.send(true);
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            Ok(())
        })
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

/// The per-entity liveness pinger started on a successful agent login (spec
/// §4.4 step 6): periodically reports presence to `StateStore` for as long
/// as the connection is open, and is released on connection teardown
/// alongside the idle-detection [`Pinger`]. Unlike `Pinger`, nothing resets
/// this — it reports unconditionally on every tick.
pub struct PresencePinger {
    stop: watch::Sender<bool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PresencePinger {
    pub fn spawn(interval: Duration, state: Arc<dyn StateStore>, tag: Tag) -> Arc<Self> {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = state.record_agent_presence(&tag).await {
                            tracing::debug!(%tag, error = %err, "failed to record agent presence");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        Arc::new(Self {
            stop: stop_tx,
            handle: parking_lot::Mutex::new(Some(handle)),
        })
    }
}

impl Resource for PresencePinger {
    fn stop(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            let _ = self.stop.send(true);
            let handle = self.handle.lock().take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            Ok(())
        })
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn expires_and_fires_once_if_never_reset() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let pinger = Pinger::spawn(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
        pinger.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_pushes_the_deadline_back_out() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let pinger = Pinger::spawn(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(30)).await;
        pinger.reset();
        tokio::time::advance(Duration::from_millis(30)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
        pinger.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_with_itself() {
        let pinger = Pinger::spawn(Duration::from_secs(60), || {});
        pinger.stop().await.unwrap();
        pinger.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn presence_pinger_reports_on_every_tick_until_stopped() {
        let state = Arc::new(fleet_state_mem::InMemoryStateStore::new());
        let tag = Tag::Unit { service: "wordpress".into(), number: 0 };
        state.add_unit(tag.clone(), "pw");

        let pinger = PresencePinger::spawn(Duration::from_millis(50), state.clone(), tag);

        tokio::time::advance(Duration::from_millis(120)).await;
        tokio::task::yield_now().await;
        pinger.stop().await.unwrap();

        // `record_agent_presence` is a no-op in the in-memory store, so this
        // test only proves the task runs and shuts down cleanly rather than
        // hanging or panicking on repeated ticks.
    }
}
