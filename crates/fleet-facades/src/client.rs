//! The `Client` facade: the handful of root-level, human-operator-facing
//! methods this demonstration set implements, including every method named
//! in the upgrade gate's allow-list (spec §4.3/§4.4, §8 scenario 4), so the
//! gate's "allow-listed calls are passed through unchanged" invariant has
//! something real to exercise.

use std::sync::Arc;

use fleet_core::error::CoreError;
use fleet_core::facade::{Authorizer, FacadeContext, FacadeDescriptor, FacadeInstance, MethodTable};
use fleet_core::state::{StateStore, StatusSnapshot};
use serde::Serialize;

struct ClientFacade {
    state: Arc<dyn StateStore>,
    authorizer: Arc<dyn Authorizer>,
}

async fn full_status(instance: Arc<ClientFacade>) -> Result<StatusSnapshot, CoreError> {
    instance.state.full_status().await
}

#[derive(Serialize)]
struct PublicAddressResult {
    #[serde(rename = "publicAddress")]
    public_address: String,
}

/// A placeholder address derived from the caller's own tag, standing in
/// for the real DNS/floating-IP lookup spec §4.4's allow-list entry exists
/// to support during an upgrade (watching the upgrade's own progress must
/// not itself require the normal facade surface).
async fn public_address(instance: Arc<ClientFacade>) -> Result<PublicAddressResult, CoreError> {
    Ok(PublicAddressResult {
        public_address: format!("{}.internal", instance.authorizer.auth_tag()),
    })
}

#[derive(Serialize)]
struct DebugLogResult {
    #[serde(rename = "logHint")]
    log_hint: String,
}

/// The RPC half of log streaming — spec §4.4's allow-list names it, but
/// spec §4.5.1 specifies the actual protocol as an HTTP side channel
/// (`fleet-http`). This method only tells a caller that channel exists; it
/// is not itself a streaming endpoint.
async fn watch_debug_log(_instance: Arc<ClientFacade>) -> Result<DebugLogResult, CoreError> {
    Ok(DebugLogResult {
        log_hint: "use the /log HTTP endpoint for the actual stream".to_string(),
    })
}

pub fn client_descriptor() -> FacadeDescriptor {
    let methods = MethodTable::builder()
        .method0::<ClientFacade, StatusSnapshot, _, _>("FullStatus", full_status)
        .method0::<ClientFacade, PublicAddressResult, _, _>("PublicAddress", public_address)
        .method0::<ClientFacade, DebugLogResult, _, _>("WatchDebugLog", watch_debug_log)
        .build();

    FacadeDescriptor::new("Client", 1, methods, |ctx: FacadeContext| {
        Ok(Arc::new(ClientFacade {
            state: ctx.state,
            authorizer: ctx.authorizer,
        }) as FacadeInstance)
    })
}
