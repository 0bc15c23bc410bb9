//! Common async aliases used throughout the workspace's object-safe traits
//! (`Resource`, `StateStore`, dispatcher method entries).

use std::future::Future;
use std::pin::Pin;

/// A boxed, type-erased, `Send` future. Used anywhere a trait needs to stay
/// object-safe (`dyn Resource`, `dyn StateStore`) while still returning
/// `async fn`-shaped results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed `futures::Stream`, used for watcher change feeds.
pub type BoxStream<'a, T> = Pin<Box<dyn futures::Stream<Item = T> + Send + 'a>>;
