//! C3 — the connection root (spec §4.3, §4.4, §9): the object that holds a
//! connection's authenticated identity and exposes it as an [`Authorizer`]
//! to facades, without ever handing facades the root itself.

use std::sync::Arc;

use fleet_core::auth::Authenticator;
use fleet_core::error::CoreError;
use fleet_core::facade::{Authorizer, ResourceHandle};
use fleet_core::model::Tag;
use fleet_core::state::StateStore;
use serde_json::Value;

use crate::dispatcher::Dispatcher;
use crate::resource_registry::ResourceRegistry;

/// What the transport layer actually holds per connection: something it can
/// dispatch an RPC call against. `ConnectionRoot`, an `UpgradeGate`-wrapped
/// root, and `ErrorRoot` all implement this so the transport loop never has
/// to know which one is active after a state transition (spec §4.3: login
/// swaps the pre-auth root for the authenticated one; an upgrade or fatal
/// server error swaps it again).
pub trait DispatchRoot: Send + Sync + 'static {
    fn dispatch<'a>(
        &'a self,
        root_name: &'a str,
        version: u32,
        id: &'a str,
        method: &'a str,
        args: Value,
    ) -> fleet_core::future::BoxFuture<'a, Result<Value, CoreError>>;
}

/// Wraps the connection's `Authenticator` as the narrow `Authorizer`
/// capability facades receive through `FacadeContext` (spec §9: pass a
/// capability by value instead of a back-reference to the root). An
/// authenticator's tag is immutable post-login, so this wrapper needs no
/// further synchronization.
struct AuthenticatorAuthorizer(Arc<dyn Authenticator>);

impl Authorizer for AuthenticatorAuthorizer {
    fn auth_client(&self) -> bool {
        self.0.is_client()
    }
    fn auth_machine_agent(&self) -> bool {
        self.0.is_machine_agent()
    }
    fn auth_unit_agent(&self) -> bool {
        self.0.is_unit_agent()
    }
    fn auth_environ_manager(&self) -> bool {
        self.0.is_environ_manager()
    }
    fn auth_owner(&self, tag: &Tag) -> bool {
        self.0.auth_owner(tag)
    }
    fn auth_tag(&self) -> &Tag {
        self.0.tag()
    }
}

/// The authenticated root handed to the dispatcher after a successful
/// `Admin.Login` (spec §4.4). Composes the per-connection dispatcher, the
/// resource registry, and the logged-in identity.
pub struct ConnectionRoot {
    authenticator: Arc<dyn Authenticator>,
    dispatcher: Dispatcher,
    resources: Arc<ResourceRegistry>,
}

impl ConnectionRoot {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        registry: Arc<crate::registry::FacadeRegistry>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        let resources = Arc::new(ResourceRegistry::new());
        let authorizer: Arc<dyn Authorizer> = Arc::new(AuthenticatorAuthorizer(authenticator.clone()));
        let dispatcher = Dispatcher::new(
            registry,
            state,
            resources.clone() as Arc<dyn ResourceHandle>,
            authorizer,
        );
        Self {
            authenticator,
            dispatcher,
            resources,
        }
    }

    pub fn tag(&self) -> &Tag {
        self.authenticator.tag()
    }

    pub fn resources(&self) -> &Arc<ResourceRegistry> {
        &self.resources
    }

    pub fn describe_facades(&self) -> Vec<(&'static str, Vec<u32>)> {
        self.dispatcher.describe_facades()
    }

    /// Release every resource this connection opened (spec §4.1: called
    /// exactly once at connection teardown).
    pub async fn close(&self) {
        self.resources.stop_all().await;
    }
}

impl DispatchRoot for ConnectionRoot {
    fn dispatch<'a>(
        &'a self,
        root_name: &'a str,
        version: u32,
        id: &'a str,
        method: &'a str,
        args: Value,
    ) -> fleet_core::future::BoxFuture<'a, Result<Value, CoreError>> {
        Box::pin(self.dispatcher.dispatch(root_name, version, id, method, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::auth::UserAuthenticator;
    use crate::registry::FacadeRegistry;

    #[tokio::test]
    async fn close_drains_resources_opened_during_the_connection() {
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(UserAuthenticator::new(Tag::User("admin".into())));
        let registry = FacadeRegistry::builder().build();
        let state = Arc::new(fleet_state_mem::InMemoryStateStore::new());
        let root = ConnectionRoot::new(authenticator, registry, state);

        root.resources()
            .register(Arc::new(NoopResource) as Arc<dyn fleet_core::resource::Resource>);
        assert_eq!(root.resources().len(), 1);
        root.close().await;
        assert_eq!(root.resources().len(), 0);
    }

    #[derive(Debug)]
    struct NoopResource;

    impl fleet_core::resource::Resource for NoopResource {
        fn stop(&self) -> fleet_core::future::BoxFuture<'_, Result<(), CoreError>> {
            Box::pin(async { Ok(()) })
        }

        fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
            self
        }
    }
}
