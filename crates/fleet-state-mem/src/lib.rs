#![deny(unsafe_code)]
//! An in-memory `StateStore`: the reference implementation used by
//! `fleetd`'s demo mode and by every other crate's test suite. Real
//! deployments would back `StateStore` with the actual cluster database;
//! this crate exists so the rest of the workspace has something concrete to
//! run against without depending on one (spec §1: the state store itself is
//! out of scope for this repo).

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use fleet_core::auth::{AgentAuthenticator, AgentJob, AnonymousAuthenticator, UserAuthenticator};
use fleet_core::error::{CoreError, ErrorCategory, codes};
use fleet_core::future::{BoxFuture, BoxStream};
use fleet_core::model::{Credential, HostPort, Tag};
use fleet_core::state::{CharmUrl, Life, StatusSnapshot};
use fleet_core::{Authenticator, StateStore};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

#[derive(Clone)]
struct AccountRecord {
    password: String,
    nonce: Option<String>,
    jobs: Vec<AgentJob>,
}

/// An in-memory, `Arc`-shared `StateStore`. Cheap to clone; intended to be
/// constructed once per process and shared across every connection.
pub struct InMemoryStateStore {
    accounts: DashMap<Tag, AccountRecord>,
    life: DashMap<Tag, watch::Sender<Life>>,
    charm_revisions: DashMap<(String, String), u32>,
    charm_blobs: DashMap<String, (String, String)>,
    servers: RwLock<Vec<HostPort>>,
    status: RwLock<StatusSnapshot>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            life: DashMap::new(),
            charm_revisions: DashMap::new(),
            charm_blobs: DashMap::new(),
            servers: RwLock::new(Vec::new()),
            status: RwLock::new(StatusSnapshot {
                environment: "default".to_string(),
                machine_count: 0,
                service_count: 0,
            }),
        }
    }

    /// Seed a human user account.
    pub fn add_user(&self, tag: Tag, password: impl Into<String>) {
        self.accounts.insert(
            tag,
            AccountRecord {
                password: password.into(),
                nonce: None,
                jobs: Vec::new(),
            },
        );
    }

    /// Seed a machine agent account with a provisioning nonce and jobs.
    pub fn add_machine(
        &self,
        tag: Tag,
        password: impl Into<String>,
        nonce: impl Into<String>,
        jobs: Vec<AgentJob>,
    ) {
        self.accounts.insert(
            tag,
            AccountRecord {
                password: password.into(),
                nonce: Some(nonce.into()),
                jobs,
            },
        );
    }

    /// Seed a unit agent account.
    pub fn add_unit(&self, tag: Tag, password: impl Into<String>) {
        self.accounts.insert(
            tag,
            AccountRecord {
                password: password.into(),
                nonce: None,
                jobs: Vec::new(),
            },
        );
    }

    /// Seed an entity's initial life value.
    pub fn set_life(&self, tag: Tag, life: Life) {
        match self.life.entry(tag) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                let _ = existing.get().send(life);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let (tx, _rx) = watch::channel(life);
                slot.insert(tx);
            }
        }
    }

    pub fn set_servers(&self, servers: Vec<HostPort>) {
        *self.servers.write() = servers;
    }

    pub fn set_status(&self, status: StatusSnapshot) {
        *self.status.write() = status;
    }
}

impl StateStore for InMemoryStateStore {
    fn check_credentials(
        &self,
        credential: &Credential,
    ) -> BoxFuture<'_, Result<Arc<dyn Authenticator>, CoreError>> {
        let credential = credential.clone();
        Box::pin(async move {
            if credential.tag == Tag::Environment {
                // spec §8: an empty tag with an empty password establishes
                // the connection anonymously; it owns no account record.
                return if credential.password.expose().is_empty() {
                    Ok(Arc::new(AnonymousAuthenticator::default()) as Arc<dyn Authenticator>)
                } else {
                    Err(bad_credentials())
                };
            }
            let record = self
                .accounts
                .get(&credential.tag)
                .ok_or_else(|| bad_credentials())?;
            if record.password != credential.password.expose() {
                return Err(bad_credentials());
            }
            match &credential.tag {
                Tag::Machine(_) => {
                    let expected = record.nonce.as_deref().unwrap_or("");
                    let given = credential.nonce.as_deref().unwrap_or("");
                    if expected.is_empty() || given != expected {
                        return Err(CoreError::new(
                            codes::NOT_PROVISIONED,
                            ErrorCategory::Authorization,
                            "machine agent nonce does not match provisioning record",
                        ));
                    }
                    Ok(Arc::new(AgentAuthenticator::machine(
                        credential.tag.clone(),
                        record.jobs.clone(),
                    )) as Arc<dyn Authenticator>)
                }
                Tag::Unit { .. } => {
                    Ok(Arc::new(AgentAuthenticator::unit(credential.tag.clone()))
                        as Arc<dyn Authenticator>)
                }
                Tag::User(_) => {
                    Ok(Arc::new(UserAuthenticator::new(credential.tag.clone()))
                        as Arc<dyn Authenticator>)
                }
                _ => Err(bad_credentials()),
            }
        })
    }

    fn api_host_ports(&self) -> BoxFuture<'_, Result<Vec<HostPort>, CoreError>> {
        Box::pin(async move { Ok(self.servers.read().clone()) })
    }

    fn promote_machine_credential(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
        // Idempotent no-op here: a real store would grant direct state
        // access to the machine's credential if its jobs require it.
        Box::pin(async move { Ok(()) })
    }

    fn entity_life(&self, tag: &Tag) -> BoxFuture<'_, Result<Life, CoreError>> {
        let tag = tag.clone();
        Box::pin(async move {
            self.life
                .get(&tag)
                .map(|entry| *entry.value().borrow())
                .ok_or_else(|| CoreError::not_found(format!("no such entity: {tag}")))
        })
    }

    fn can_access(
        &self,
        _requester: &Tag,
        target: &Tag,
    ) -> BoxFuture<'_, Result<bool, CoreError>> {
        let target = target.clone();
        Box::pin(async move { Ok(self.life.contains_key(&target)) })
    }

    fn watch_life(
        &self,
        tag: &Tag,
    ) -> BoxFuture<'_, Result<(Life, BoxStream<'static, Life>), CoreError>> {
        let tag = tag.clone();
        Box::pin(async move {
            let sender = self
                .life
                .get(&tag)
                .ok_or_else(|| CoreError::not_found(format!("no such entity: {tag}")))?;
            let rx = sender.value().subscribe();
            let initial = *rx.borrow();
            // WatchStream yields the current value immediately; skip one so
            // the returned stream only carries *subsequent* changes (spec
            // §3/§5: the initial snapshot already consumed the first event).
            let stream = WatchStream::new(rx).skip(1);
            Ok((initial, Box::pin(stream) as BoxStream<'static, Life>))
        })
    }

    fn full_status(&self) -> BoxFuture<'_, Result<StatusSnapshot, CoreError>> {
        Box::pin(async move { Ok(self.status.read().clone()) })
    }

    fn prepare_local_charm_upload(
        &self,
        url: CharmUrl,
    ) -> BoxFuture<'_, Result<CharmUrl, CoreError>> {
        Box::pin(async move {
            let key = (url.series.clone(), url.name.clone());
            let mut committed = self.charm_revisions.entry(key).or_insert(0);
            let next = (*committed).max(url.revision.saturating_sub(1)) + 1;
            *committed = next;
            Ok(CharmUrl {
                series: url.series,
                name: url.name,
                revision: next,
            })
        })
    }

    fn update_uploaded_charm(
        &self,
        url: &CharmUrl,
        storage_url: String,
        sha256: String,
    ) -> BoxFuture<'_, Result<(), CoreError>> {
        let key = url.to_string();
        Box::pin(async move {
            self.charm_blobs.insert(key, (storage_url, sha256));
            Ok(())
        })
    }

    fn record_agent_presence(&self, _tag: &Tag) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move { Ok(()) })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move { Ok(()) })
    }
}

impl InMemoryStateStore {
    /// Test/demo helper: fetch the recorded storage URL and digest for an
    /// uploaded charm, if any.
    pub fn stored_charm(&self, url: &CharmUrl) -> Option<(String, String)> {
        self.charm_blobs.get(&url.to_string()).map(|e| e.clone())
    }
}

fn bad_credentials() -> CoreError {
    // Spec §7: wrong password and unknown tag are indistinguishable on the
    // wire, to avoid an enumeration oracle.
    CoreError::new(
        codes::UNAUTHORIZED,
        ErrorCategory::Authorization,
        "invalid entity name or password",
    )
}
