#![deny(unsafe_code)]
//! fleet-facades: a small set of concrete `(name, version)` facades —
//! `Client`, `Uniter`, and the `NotifyWatcher` re-entry point — that
//! exercise `fleet-dispatch`'s registry/cache/resource contract end to end.
//!
//! `Admin.Login` is not a registered facade here: spec §4.4 intercepts it
//! before a connection has a `ConnectionRoot` at all (see
//! `fleet_transport::connection::handle_pre_login_frame`), so there is
//! nothing left for a post-login `Admin` facade to do in this demonstration
//! set. Real deployments would still register one for e.g. `Admin.Logout`.

pub mod client;
pub mod uniter;
pub mod watcher;

pub use client::client_descriptor;
pub use uniter::uniter_descriptor;
pub use watcher::{notify_watcher_descriptor, NotifyWatcher};
