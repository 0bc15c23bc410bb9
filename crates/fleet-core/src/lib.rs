#![deny(unsafe_code)]
#![doc = "fleet-core: the wire data model, error taxonomy, and capability traits"]
#![doc = "shared by every layer of the fleet API server core (connection lifecycle,"]
#![doc = "facade dispatch, resource registry, and the HTTP side channel)."]
//!
//! This crate deliberately holds no I/O: no sockets, no file handles, no
//! concrete `StateStore`. It is the vocabulary the rest of the workspace
//! (`fleet-dispatch`, `fleet-transport`, `fleet-http`, `fleet-facades`)
//! agrees on, the same role `spark-core` plays for its own framework.

pub mod auth;
pub mod error;
pub mod facade;
pub mod future;
pub mod model;
pub mod observability;
pub mod resource;
pub mod state;
pub mod watch;

pub use auth::Authenticator;
pub use error::{CoreError, ErrorCategory, Result};
pub use facade::{Authorizer, FacadeContext, FacadeDescriptor, MethodTable, ResourceHandle};
pub use model::{Credential, HostPort, LoginResult, SecretString, Tag};
pub use resource::Resource;
pub use state::StateStore;
pub use watch::WatcherHandle;
