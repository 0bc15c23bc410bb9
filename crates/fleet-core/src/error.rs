//! The error taxonomy shared by every layer of the API server core.
//!
//! # Why
//! Authorization failures, not-found results, contention, and the
//! upgrade/login-rate-limit signals all need to reach the wire with a
//! stable, machine-readable code (spec §6, §7) while still carrying a human
//! message and an optional root cause for logs. [`CoreError`] is that single
//! currency: every fallible operation in this workspace returns
//! `Result<T, CoreError>`, and the wire layer (`fleet-transport`) is the only
//! place that turns one into the `{Message, Code}` envelope.
//!
//! # How
//! A `CoreError` pairs a `&'static` code (see [`codes`]) with a message and
//! an [`ErrorCategory`] that downstream callers use to decide whether to
//! retry, back off, or give up. Category is looked up from the code unless
//! the caller has overridden it explicitly with [`CoreError::with_category`].
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// How a caller should react to an error.
///
/// This is the Rust realization of spec §7's error taxonomy: authorization
/// errors are never retried, not-found errors are surfaced per-element,
/// contention errors are advisory, and upgrade/login-rate-limit errors are
/// intentionally retriable with distinct codes so a client can pick a
/// specific backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// `Unauthorized`, `NoCreds`, `NotProvisioned` — never retried.
    Authorization,
    /// `NotFound`, `UnknownWatcher` — surfaced per bulk-result element.
    NotFound,
    /// `ExcessiveContention`, `CannotEnterScopeYet` — the client decides.
    Contention,
    /// `UpgradeInProgress` — retriable, gate will lift on reconnect.
    Upgrade,
    /// `Login` rate limiting — retriable, client is expected to back off.
    RateLimited,
    /// Transport-level failure: shutdown, EOF, codec desync.
    Transport,
    /// Internal programmer-surfaced failure (factory/type mismatch, etc).
    Internal,
}

impl ErrorCategory {
    /// Whether this category is safe for a client to retry without operator
    /// intervention.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Contention | ErrorCategory::Upgrade | ErrorCategory::RateLimited
        )
    }
}

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// The stable error type returned by every fallible operation in this
/// workspace.
///
/// Carries a stable wire `code`, a human `message`, an optional root
/// `cause`, and a structured [`ErrorCategory`]. Cloneable so the same error
/// can be recorded in an audit log and also returned to the caller.
#[derive(Clone)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<Cause>,
    category: ErrorCategory,
}

impl CoreError {
    /// Construct a new error from a stable code and a category.
    pub fn new(
        code: &'static str,
        category: ErrorCategory,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category,
        }
    }

    /// Attach a root cause, preserved for logging but not serialized to the
    /// wire (spec §6's envelope only carries `Message`/`Code`).
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Override the category computed at construction time.
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Shorthand for the `app.unauthorized` family used throughout the
    /// bulk-authorization pattern (spec §4.3).
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::UNAUTHORIZED, ErrorCategory::Authorization, message)
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::NOT_FOUND, ErrorCategory::NotFound, message)
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::INTERNAL, ErrorCategory::Internal, message)
    }
}

impl fmt::Debug for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("category", &self.category)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn StdError + 'static))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Stable wire error codes, one constant per code enumerated in spec §6.
///
/// Named `<domain>.<reason>`, mirroring the grounding workspace's
/// `error::codes` module; the associated [`wire_code`] function maps each
/// constant to the human `Code` string the RPC envelope actually transmits
/// (spec §6's list, e.g. `"not found"`, `"unauthorized access"`).
pub mod codes {
    pub const NOT_FOUND: &str = "fleet.not_found";
    pub const UNAUTHORIZED: &str = "fleet.unauthorized";
    pub const NO_CREDS: &str = "fleet.no_creds";
    pub const NOT_PROVISIONED: &str = "fleet.not_provisioned";
    pub const CANNOT_ENTER_SCOPE: &str = "fleet.cannot_enter_scope";
    pub const CANNOT_ENTER_SCOPE_YET: &str = "fleet.cannot_enter_scope_yet";
    pub const EXCESSIVE_CONTENTION: &str = "fleet.excessive_contention";
    pub const HAS_ASSIGNED_UNITS: &str = "fleet.has_assigned_units";
    pub const UNIT_HAS_SUBORDINATES: &str = "fleet.unit_has_subordinates";
    pub const NOT_ASSIGNED: &str = "fleet.not_assigned";
    pub const STOPPED: &str = "fleet.stopped";
    pub const NO_ADDRESS_SET: &str = "fleet.no_address_set";
    pub const UPGRADE_IN_PROGRESS: &str = "fleet.upgrade_in_progress";
    pub const LOGIN_RATE_LIMITED: &str = "fleet.login_rate_limited";
    pub const NOT_LOGGED_IN: &str = "fleet.not_logged_in";
    pub const NOT_IMPLEMENTED: &str = "fleet.not_implemented";
    pub const UNKNOWN_WATCHER: &str = "fleet.unknown_watcher";
    pub const TAG_MALFORMED: &str = "fleet.tag_malformed";
    pub const INTERNAL: &str = "fleet.internal";
    pub const SHUTDOWN: &str = "fleet.shutdown";
}

/// Maps a [`codes`] constant to the `Code` string carried on the wire
/// envelope (spec §6). Codes with no entry here are internal-only and never
/// reach a client — they surface as [`codes::INTERNAL`] instead.
pub fn wire_code(code: &'static str) -> &'static str {
    match code {
        codes::NOT_FOUND | codes::UNKNOWN_WATCHER => "not found",
        codes::UNAUTHORIZED => "unauthorized access",
        codes::NO_CREDS => "no creds",
        codes::NOT_PROVISIONED => "not provisioned",
        codes::CANNOT_ENTER_SCOPE => "cannot enter scope",
        codes::CANNOT_ENTER_SCOPE_YET => "cannot enter scope yet",
        codes::EXCESSIVE_CONTENTION => "excessive contention",
        codes::HAS_ASSIGNED_UNITS => "has-assigned-units",
        codes::UNIT_HAS_SUBORDINATES => "unit-has-subordinates",
        codes::NOT_ASSIGNED => "not-assigned",
        codes::STOPPED => "stopped",
        codes::NO_ADDRESS_SET => "no-address-set",
        codes::UPGRADE_IN_PROGRESS => "upgrade in progress",
        codes::LOGIN_RATE_LIMITED => "login",
        _ => "internal",
    }
}
