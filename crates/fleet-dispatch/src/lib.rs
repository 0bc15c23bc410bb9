#![deny(unsafe_code)]
//! fleet-dispatch: the resource registry (C1), the process-wide facade
//! registry and per-connection dispatcher (C2), and the connection root
//! with its upgrade gate and error-root variants (C3).
//!
//! `fleet-transport` owns sockets and framing; this crate owns everything
//! downstream of "a frame decoded into `(RootName, Version, Id, Request,
//! Params)`" up to "a `Value` ready to re-encode as a reply".

pub mod dispatcher;
pub mod error_root;
pub mod pinger;
pub mod registry;
pub mod resource_registry;
pub mod root;
pub mod upgrade;

pub use dispatcher::Dispatcher;
pub use error_root::ErrorRoot;
pub use pinger::{Pinger, DEFAULT_PING_INTERVAL};
pub use registry::{FacadeRegistry, FacadeRegistryBuilder};
pub use resource_registry::ResourceRegistry;
pub use root::{ConnectionRoot, DispatchRoot};
pub use upgrade::UpgradeGate;
