//! `StateStore` — the persistent state store capability (spec §1's "Out of
//! scope" collaborator, and spec §3/§4.2/§4.4's dependency). This module
//! defines the capability surface the core needs; a concrete implementation
//! (in-memory, for demos and tests) lives in the `fleet-state-mem` crate.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::Authenticator;
use crate::error::CoreError;
use crate::future::{BoxFuture, BoxStream};
use crate::model::{Credential, HostPort, Tag};

/// The lifecycle state of an entity (spec §8, scenario 2: `"life":"dead"|"alive"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

/// `local:series/name-revision`, the wire form of a charm URL (spec §4.5.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmUrl {
    pub series: String,
    pub name: String,
    pub revision: u32,
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local:{}/{}-{}", self.series, self.name, self.revision)
    }
}

/// The minimal status snapshot `Client.FullStatus` returns; enough to
/// exercise the upgrade-gate allow-list (spec §8, scenario 4) without
/// modeling the whole topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub environment: String,
    pub machine_count: usize,
    pub service_count: usize,
}

/// The external state store capability. Every `StateStore` call may block
/// on a real database (spec §5), hence `BoxFuture` throughout.
pub trait StateStore: Send + Sync + 'static {
    /// Validate a credential and produce the corresponding authenticator.
    /// Errors map per spec §4.4: bad password / unknown tag -> unauthorized;
    /// machine tag with wrong nonce -> not-provisioned.
    fn check_credentials(
        &self,
        credential: &Credential,
    ) -> BoxFuture<'_, Result<Arc<dyn Authenticator>, CoreError>>;

    /// The set of peer endpoints persisted for reconnect purposes (spec §3
    /// "Login Result"). The caller appends the endpoint the current
    /// connection arrived on.
    fn api_host_ports(&self) -> BoxFuture<'_, Result<Vec<HostPort>, CoreError>>;

    /// Idempotently mark a machine agent's credential as promoted to state
    /// access (spec §4.4 step 4), when its jobs require it.
    fn promote_machine_credential(&self, tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>>;

    /// Read an entity's current life value.
    fn entity_life(&self, tag: &Tag) -> BoxFuture<'_, Result<Life, CoreError>>;

    /// The bulk-authorization predicate facades compute once per call
    /// (spec §4.3): whether `requester` may operate on `target`.
    fn can_access(
        &self,
        requester: &Tag,
        target: &Tag,
    ) -> BoxFuture<'_, Result<bool, CoreError>>;

    /// Open a watcher on an entity's life: an initial snapshot plus a
    /// stream of subsequent changes (spec §3 "Watcher Handle", §5's "single
    /// read per watcher … to consume the initial event").
    fn watch_life(
        &self,
        tag: &Tag,
    ) -> BoxFuture<'_, Result<(Life, BoxStream<'static, Life>), CoreError>>;

    /// A coarse environment status snapshot.
    fn full_status(&self) -> BoxFuture<'_, Result<StatusSnapshot, CoreError>>;

    /// Transactionally reserve a charm URL; returns the URL actually
    /// committed, which may have a bumped revision if the requested one was
    /// already taken (spec §4.5.2 step 5).
    fn prepare_local_charm_upload(
        &self,
        url: CharmUrl,
    ) -> BoxFuture<'_, Result<CharmUrl, CoreError>>;

    /// Record the storage location and digest of an uploaded charm archive.
    fn update_uploaded_charm(
        &self,
        url: &CharmUrl,
        storage_url: String,
        sha256: String,
    ) -> BoxFuture<'_, Result<(), CoreError>>;

    /// Report presence for a per-entity liveness pinger (spec §4.4 step 6).
    fn record_agent_presence(&self, tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>>;

    /// Liveness probe the server pings at a configured interval (spec
    /// §4.4's dedicated liveness task); failure tears the server down.
    fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>>;
}
