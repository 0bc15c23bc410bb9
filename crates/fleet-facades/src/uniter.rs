//! The `Uniter` facade (spec §4.3's bulk-authorization pattern and §8
//! scenarios 2/3): `Life` demonstrates the "compute `canAccess` once, apply
//! per element, never fail the whole call" rule; `Watch` demonstrates a
//! facade registering a resource and handing back a watcher handle whose
//! initial event has already been consumed.

use std::sync::Arc;

use fleet_core::error::{CoreError, ErrorCategory};
use fleet_core::facade::{authorize_bulk, Authorizer, FacadeContext, FacadeDescriptor, MethodTable, ResourceHandle};
use fleet_core::model::Tag;
use fleet_core::resource::Resource;
use fleet_core::state::{Life, StateStore};
use serde::{Deserialize, Serialize};

use crate::watcher::NotifyWatcher;

struct UniterFacade {
    state: Arc<dyn StateStore>,
    resources: Arc<dyn ResourceHandle>,
    authorizer: Arc<dyn Authorizer>,
}

#[derive(Deserialize)]
struct EntitiesArgs {
    entities: Vec<String>,
}

#[derive(Serialize)]
struct BulkError {
    message: String,
    code: String,
}

impl From<&CoreError> for BulkError {
    fn from(err: &CoreError) -> Self {
        Self {
            message: err.message().to_string(),
            code: fleet_core::error::wire_code(err.code()).to_string(),
        }
    }
}

#[derive(Serialize)]
struct LifeResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    life: Option<Life>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<BulkError>,
}

impl From<Result<Life, CoreError>> for LifeResult {
    fn from(result: Result<Life, CoreError>) -> Self {
        match result {
            Ok(life) => LifeResult { life: Some(life), error: None },
            Err(err) => LifeResult { life: None, error: Some((&err).into()) },
        }
    }
}

#[derive(Serialize)]
struct BulkLifeResults {
    results: Vec<LifeResult>,
}

/// Only the requester's own tag is authorized by default, plus anything an
/// environment manager or client is allowed to see; this is intentionally
/// narrow — a real deployment's `canAccess` would additionally consult
/// relation scope via `StateStore`, which is exactly the "(possibly by
/// consulting StateStore)" spec §4.3 leaves open.
fn can_access(authorizer: &dyn Authorizer, tag: &Tag) -> bool {
    authorizer.auth_owner(tag) || authorizer.auth_environ_manager() || authorizer.auth_client()
}

async fn life(instance: Arc<UniterFacade>, args: EntitiesArgs) -> Result<BulkLifeResults, CoreError> {
    let tags: Vec<Tag> = args
        .entities
        .iter()
        .map(|s| s.parse())
        .collect::<Result<_, CoreError>>()?;

    let authorizer = instance.authorizer.clone();
    let state = instance.state.clone();
    let results = authorize_bulk(
        &tags,
        |tag| can_access(authorizer.as_ref(), tag),
        move |tag| {
            let state = state.clone();
            async move { state.entity_life(&tag).await }
        },
    )
    .await;

    Ok(BulkLifeResults {
        results: results.into_iter().map(LifeResult::from).collect(),
    })
}

#[derive(Deserialize)]
struct WatchArgs {
    tag: String,
}

/// Spec §3/§8 scenario 3's exact wire shape for this facade's watcher
/// handle: `{"notifyWatcherId": "...", "initial": ...}`.
#[derive(Serialize)]
struct NotifyWatcherHandle {
    #[serde(rename = "notifyWatcherId")]
    notify_watcher_id: String,
    initial: Life,
}

async fn watch(instance: Arc<UniterFacade>, args: WatchArgs) -> Result<NotifyWatcherHandle, CoreError> {
    let tag: Tag = args.tag.parse()?;
    if !can_access(instance.authorizer.as_ref(), &tag) {
        return Err(CoreError::unauthorized(format!("not authorized to watch {tag}")));
    }

    let (initial, stream) = instance.state.watch_life(&tag).await?;
    let watcher = NotifyWatcher::new(stream);
    let id = instance.resources.register(watcher as Arc<dyn Resource>);
    Ok(NotifyWatcherHandle {
        notify_watcher_id: id,
        initial,
    })
}

pub fn uniter_descriptor() -> FacadeDescriptor {
    let methods = MethodTable::builder()
        .method::<UniterFacade, EntitiesArgs, BulkLifeResults, _, _>("Life", life)
        .method::<UniterFacade, WatchArgs, NotifyWatcherHandle, _, _>("Watch", watch)
        .build();

    FacadeDescriptor::new("Uniter", 0, methods, |ctx: FacadeContext| {
        Ok(Arc::new(UniterFacade {
            state: ctx.state,
            resources: ctx.resources,
            authorizer: ctx.authorizer,
        }) as fleet_core::facade::FacadeInstance)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::auth::AgentAuthenticator;
    use fleet_core::state::Life;
    use fleet_dispatch::registry::FacadeRegistry;
    use fleet_dispatch::root::ConnectionRoot;

    fn wordpress() -> Tag {
        Tag::Unit { service: "wordpress".into(), number: 0 }
    }
    fn mysql() -> Tag {
        Tag::Unit { service: "mysql".into(), number: 0 }
    }
    fn foo() -> Tag {
        Tag::Unit { service: "foo".into(), number: 42 }
    }

    fn seeded_store() -> Arc<fleet_state_mem::InMemoryStateStore> {
        let store = Arc::new(fleet_state_mem::InMemoryStateStore::new());
        store.set_life(wordpress(), Life::Alive);
        store.set_life(mysql(), Life::Dead);
        store
    }

    #[tokio::test]
    async fn bulk_life_denies_elements_independently() {
        let state = seeded_store();
        let registry = FacadeRegistry::builder().register(uniter_descriptor()).build();
        let authenticator = Arc::new(AgentAuthenticator::unit(wordpress()));
        let root = ConnectionRoot::new(authenticator, registry, state.clone());

        let args = serde_json::json!({ "entities": ["unit-mysql-0", "unit-wordpress-0", "unit-foo-42"] });
        let value = root
            .dispatch_for_test("Uniter", 0, "", "Life", args)
            .await
            .unwrap();
        let results = value["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["error"]["code"], "unauthorized access");
        assert_eq!(results[1]["life"], "alive");
        assert_eq!(results[2]["error"]["code"], "unauthorized access");
    }

    #[tokio::test]
    async fn watch_registers_one_resource_and_stop_releases_it() {
        let state = seeded_store();
        let registry = FacadeRegistry::builder()
            .register(uniter_descriptor())
            .register(crate::watcher::notify_watcher_descriptor())
            .build();
        let authenticator = Arc::new(AgentAuthenticator::unit(wordpress()));
        let root = ConnectionRoot::new(authenticator, registry, state);

        let args = serde_json::json!({ "tag": "unit-wordpress-0" });
        let value = root.dispatch_for_test("Uniter", 0, "", "Watch", args).await.unwrap();
        assert_eq!(value["initial"], "alive");
        let id = value["notifyWatcherId"].as_str().unwrap().to_string();
        assert_eq!(root.resources().len(), 1);

        root.dispatch_for_test("NotifyWatcher", 0, &id, "Stop", serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(root.resources().len(), 0);
    }

    // `ConnectionRoot::dispatch` is only exposed through the object-safe
    // `DispatchRoot` trait; this tiny extension lets the tests above call it
    // without importing the trait at every call site.
    trait DispatchForTest {
        fn dispatch_for_test<'a>(
            &'a self,
            root_name: &'a str,
            version: u32,
            id: &'a str,
            method: &'a str,
            args: serde_json::Value,
        ) -> fleet_core::future::BoxFuture<'a, Result<serde_json::Value, CoreError>>;
    }

    impl DispatchForTest for ConnectionRoot {
        fn dispatch_for_test<'a>(
            &'a self,
            root_name: &'a str,
            version: u32,
            id: &'a str,
            method: &'a str,
            args: serde_json::Value,
        ) -> fleet_core::future::BoxFuture<'a, Result<serde_json::Value, CoreError>> {
            use fleet_dispatch::root::DispatchRoot;
            self.dispatch(root_name, version, id, method, args)
        }
    }
}
