//! The watcher handle wire shape (spec §3): `{watcherId, initial}`, where
//! the initial snapshot consumes the first event of the underlying watcher
//! before returning, so a client's first `Next` call is guaranteed to block
//! until a *subsequent* change (spec §3, §5).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WatcherHandle<T> {
    #[serde(rename = "watcherId")]
    pub watcher_id: String,
    pub initial: T,
}

impl<T> WatcherHandle<T> {
    pub fn new(watcher_id: impl Into<String>, initial: T) -> Self {
        Self {
            watcher_id: watcher_id.into(),
            initial,
        }
    }
}
