//! The login rate limiter (spec §4.4 step 2): a bounded, non-blocking
//! admission gate in front of `StateStore::check_credentials`, since login
//! consults the store synchronously and an unbounded flood of attempts
//! would otherwise serialize behind it.

use std::sync::Arc;

use fleet_core::error::{CoreError, ErrorCategory, codes};
use tokio::sync::Semaphore;

pub const DEFAULT_LOGIN_CAPACITY: usize = 10;

#[derive(Clone)]
pub struct LoginGate {
    semaphore: Arc<Semaphore>,
}

impl LoginGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Attempt to admit one login. Returns a retriable `login` error
    /// immediately (never queues) if the bound is already saturated (spec
    /// §4.4, §5: "a non-blocking acquire with a retryable error rather than
    /// queuing").
    pub fn try_admit(&self) -> Result<LoginPermit, CoreError> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .map(LoginPermit)
            .map_err(|_| {
                CoreError::new(
                    codes::LOGIN_RATE_LIMITED,
                    ErrorCategory::RateLimited,
                    "too many concurrent login attempts, retry shortly",
                )
            })
    }
}

impl Default for LoginGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_CAPACITY)
    }
}

/// Held for the duration of one `checkCredentials` call; dropping it frees
/// the slot regardless of the login's outcome.
pub struct LoginPermit(tokio::sync::OwnedSemaphorePermit);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_capacity_then_rate_limits() {
        let gate = LoginGate::new(2);
        let a = gate.try_admit().unwrap();
        let b = gate.try_admit().unwrap();
        let err = gate.try_admit().unwrap_err();
        assert_eq!(err.code(), codes::LOGIN_RATE_LIMITED);
        assert!(err.category().is_retriable());

        drop(a);
        gate.try_admit().unwrap();
        drop(b);
    }
}
