//! Facade descriptors and the type-erased method table (spec §3 "Facade
//! Descriptor" / "Method Signature", §4.2, §9).
//!
//! Method resolution in the source system is reflective; Rust has nothing
//! worth using for that here; spec §9 anticipates this with "a small
//! build-time step" that generates or registers the dispatch table. This
//! workspace does it by hand: each facade builds a [`MethodTable`] at
//! construction time, and the table's entry type *is* the arity rule from
//! spec §3 ("zero or one argument … returning either `result` or `(result,
//! error)`") — it is not possible to register a method of any other shape,
//! which is a stronger guarantee than validating shapes discovered at
//! runtime.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CoreError, ErrorCategory, codes};
use crate::future::BoxFuture;
use crate::resource::Resource;
use crate::state::StateStore;

/// A fully constructed facade instance, type-erased so the dispatcher's
/// cache can hold facades of any concrete type under one map.
pub type FacadeInstance = Arc<dyn Any + Send + Sync>;

/// The capabilities every facade factory receives (spec §4.3's "small
/// capability struct … passed by value at construction" in place of a
/// back-reference to the connection root).
#[derive(Clone)]
pub struct FacadeContext {
    pub state: Arc<dyn StateStore>,
    pub resources: Arc<dyn ResourceHandle>,
    pub authorizer: Arc<dyn Authorizer>,
    /// Empty for root-level facades; non-empty when the facade represents a
    /// specific sub-entity (e.g. a watcher id) (spec §3).
    pub instance_id: String,
}

/// The narrow capability surface a facade gets for registering stoppable
/// resources, satisfying spec §9's guidance to avoid a back-pointer to the
/// connection root: the concrete `ResourceRegistry` (in `fleet-dispatch`)
/// implements this trait; facades never see the registry's own type.
pub trait ResourceHandle: Send + Sync + 'static {
    fn register(&self, resource: Arc<dyn Resource>) -> String;
    fn stop(&self, id: &str) -> BoxFuture<'_, Result<(), CoreError>>;

    /// Recover a previously registered resource by id, so a facade whose
    /// `instanceId` *is* a resource id (e.g. `NotifyWatcher`) can re-enter it
    /// on `Next`/`Stop` (spec §4.2, §9 "cooperative watchers").
    fn get(&self, id: &str) -> Option<Arc<dyn Resource>>;
}

/// The connection-root capabilities facades use to authorize calls (spec
/// §4.3's "Authorizer contract").
pub trait Authorizer: Send + Sync + 'static {
    fn auth_client(&self) -> bool;
    fn auth_machine_agent(&self) -> bool;
    fn auth_unit_agent(&self) -> bool;
    fn auth_environ_manager(&self) -> bool;
    fn auth_owner(&self, tag: &crate::model::Tag) -> bool;
    fn auth_tag(&self) -> &crate::model::Tag;
}

/// Compute a bulk result vector the way spec §4.3 mandates: one `canAccess`
/// predicate computed once, applied independently per element, and a
/// result vector whose length always equals the input's — a single denied
/// element never fails the whole call.
pub async fn authorize_bulk<T, F, Fut>(
    tags: &[crate::model::Tag],
    can_access: impl Fn(&crate::model::Tag) -> bool,
    op: F,
) -> Vec<Result<T, CoreError>>
where
    F: Fn(crate::model::Tag) -> Fut,
    Fut: std::future::Future<Output = Result<T, CoreError>>,
{
    let mut results = Vec::with_capacity(tags.len());
    for tag in tags {
        if !can_access(tag) {
            results.push(Err(CoreError::unauthorized(format!(
                "not authorized for {tag}"
            ))));
            continue;
        }
        results.push(op(tag.clone()).await);
    }
    results
}

/// One entry in a facade's method table: a type-erased closure bound to the
/// facade's constructed instance.
pub struct MethodEntry {
    call: Arc<
        dyn Fn(FacadeInstance, Value) -> BoxFuture<'static, Result<Value, CoreError>>
            + Send
            + Sync,
    >,
}

impl MethodEntry {
    pub fn call(
        &self,
        instance: FacadeInstance,
        args: Value,
    ) -> BoxFuture<'static, Result<Value, CoreError>> {
        (self.call)(instance, args)
    }
}

/// `(methodName) -> MethodEntry`, built once per facade and shared across
/// every instance of that `(name, version)` (the table describes the
/// *type*, not a particular instance).
#[derive(Default)]
pub struct MethodTable {
    methods: BTreeMap<&'static str, MethodEntry>,
}

impl MethodTable {
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.keys().copied()
    }
}

#[derive(Default)]
pub struct MethodTableBuilder {
    methods: BTreeMap<&'static str, MethodEntry>,
}

fn downcast<T: Any + Send + Sync + 'static>(instance: FacadeInstance) -> Result<Arc<T>, CoreError> {
    instance
        .downcast::<T>()
        .map_err(|_| CoreError::internal("factory produced an instance of the wrong type"))
}

impl MethodTableBuilder {
    /// Register a method that takes one argument and returns
    /// `Result<Response, CoreError>` (spec §3's `(result, error)` shape).
    pub fn method<T, Args, Resp, F, Fut>(mut self, name: &'static str, handler: F) -> Self
    where
        T: Any + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Resp, CoreError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let call = Arc::new(move |instance: FacadeInstance, raw: Value| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let instance = downcast::<T>(instance)?;
                let args: Args = serde_json::from_value(raw).map_err(|err| {
                    CoreError::new(
                        codes::INTERNAL,
                        ErrorCategory::Internal,
                        format!("bad request body: {err}"),
                    )
                })?;
                let resp = handler(instance, args).await?;
                serde_json::to_value(resp).map_err(|err| {
                    CoreError::new(
                        codes::INTERNAL,
                        ErrorCategory::Internal,
                        format!("could not encode response: {err}"),
                    )
                })
            }) as BoxFuture<'static, Result<Value, CoreError>>
        });
        self.methods.insert(name, MethodEntry { call });
        self
    }

    /// Register a method that takes no argument.
    pub fn method0<T, Resp, F, Fut>(self, name: &'static str, handler: F) -> Self
    where
        T: Any + Send + Sync + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Resp, CoreError>> + Send + 'static,
    {
        self.method(name, move |instance, _args: IgnoredAny| handler(instance))
    }

    pub fn build(self) -> MethodTable {
        MethodTable {
            methods: self.methods,
        }
    }
}

/// A unit struct that deserializes from any JSON value, used for zero-arg
/// methods (spec §3: "zero or one argument").
#[derive(serde::Deserialize)]
#[serde(from = "Value")]
struct IgnoredAny;

impl From<Value> for IgnoredAny {
    fn from(_: Value) -> Self {
        IgnoredAny
    }
}

type FacadeFactory =
    dyn Fn(FacadeContext) -> Result<FacadeInstance, CoreError> + Send + Sync + 'static;

/// `{name, version, factory, resultType}` (spec §3). Registered once,
/// process-wide, at startup (spec §4.2).
#[derive(Clone)]
pub struct FacadeDescriptor {
    pub name: &'static str,
    pub version: u32,
    factory: Arc<FacadeFactory>,
    methods: Arc<MethodTable>,
}

impl FacadeDescriptor {
    pub fn new(
        name: &'static str,
        version: u32,
        methods: MethodTable,
        factory: impl Fn(FacadeContext) -> Result<FacadeInstance, CoreError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            version,
            factory: Arc::new(factory),
            methods: Arc::new(methods),
        }
    }

    pub fn construct(&self, ctx: FacadeContext) -> Result<FacadeInstance, CoreError> {
        (self.factory)(ctx)
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }
}

impl std::fmt::Debug for FacadeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadeDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
