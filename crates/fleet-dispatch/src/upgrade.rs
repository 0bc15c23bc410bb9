//! The upgrade gate (spec §4.4 "Upgrade Gate root"): wraps an authenticated
//! root so that, while the server reports itself as mid-upgrade, only a
//! fixed allow-list of calls pass through; everything else fails fast with
//! `UpgradeInProgress` instead of reaching facade construction at all.

use std::sync::Arc;

use fleet_core::error::{CoreError, ErrorCategory, codes};
use fleet_core::future::BoxFuture;
use serde_json::Value;

use crate::root::DispatchRoot;

/// `(rootName, methodName)` pairs permitted to proceed during an upgrade.
/// Status and ssh-address lookups let operators watch progress; log
/// streaming lets them watch the upgrade itself (spec §4.4).
const ALLOWED_DURING_UPGRADE: &[(&str, &str)] = &[
    ("Client", "FullStatus"),
    ("Client", "PublicAddress"),
    ("Client", "WatchDebugLog"),
];

pub struct UpgradeGate<R> {
    inner: R,
}

impl<R: DispatchRoot> UpgradeGate<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: DispatchRoot> DispatchRoot for UpgradeGate<R> {
    fn dispatch<'a>(
        &'a self,
        root_name: &'a str,
        version: u32,
        id: &'a str,
        method: &'a str,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, CoreError>> {
        if ALLOWED_DURING_UPGRADE.contains(&(root_name, method)) {
            self.inner.dispatch(root_name, version, id, method, args)
        } else {
            Box::pin(async move {
                Err(CoreError::new(
                    codes::UPGRADE_IN_PROGRESS,
                    ErrorCategory::Upgrade,
                    format!("upgrade in progress: {root_name}.{method} is unavailable"),
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRoot(AtomicUsize);

    impl DispatchRoot for CountingRoot {
        fn dispatch<'a>(
            &'a self,
            _root_name: &'a str,
            _version: u32,
            _id: &'a str,
            _method: &'a str,
            _args: Value,
        ) -> BoxFuture<'a, Result<Value, CoreError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Value::Null) })
        }
    }

    #[tokio::test]
    async fn allow_listed_calls_pass_through() {
        let gate = UpgradeGate::new(CountingRoot(AtomicUsize::new(0)));
        gate.dispatch("Client", 1, "", "FullStatus", Value::Null)
            .await
            .unwrap();
        assert_eq!(gate.into_inner().0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn everything_else_is_rejected_without_reaching_the_root() {
        let gate = UpgradeGate::new(CountingRoot(AtomicUsize::new(0)));
        let err = gate
            .dispatch("Client", 1, "", "DestroyService", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::UPGRADE_IN_PROGRESS);
        assert_eq!(gate.into_inner().0.load(Ordering::SeqCst), 0);
    }
}
