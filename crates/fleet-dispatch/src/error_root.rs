//! The error root (spec §4.3, §4.4): a `DispatchRoot` that answers every
//! call with the same fixed error. Swapped in when the server has entered a
//! terminal or misconfigured state after an otherwise-successful login, so
//! the connection stays open long enough to deliver one clear error instead
//! of simply dropping.

use fleet_core::error::CoreError;
use fleet_core::future::BoxFuture;
use serde_json::Value;

use crate::root::DispatchRoot;

pub struct ErrorRoot {
    error: CoreError,
}

impl ErrorRoot {
    pub fn new(error: CoreError) -> Self {
        Self { error }
    }
}

impl DispatchRoot for ErrorRoot {
    fn dispatch<'a>(
        &'a self,
        _root_name: &'a str,
        _version: u32,
        _id: &'a str,
        _method: &'a str,
        _args: Value,
    ) -> BoxFuture<'a, Result<Value, CoreError>> {
        let error = self.error.clone();
        Box::pin(async move { Err(error) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_returns_the_fixed_error() {
        let root = ErrorRoot::new(CoreError::internal("server is shutting down"));
        let err = root
            .dispatch("Client", 1, "", "FullStatus", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "server is shutting down");
        let err2 = root
            .dispatch("Agent", 2, "", "Life", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err2.message(), "server is shutting down");
    }
}
