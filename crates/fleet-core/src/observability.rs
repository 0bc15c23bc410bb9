//! A thin observability facade so the dispatcher, connection root, and HTTP
//! handlers share one injection point for logging instead of threading
//! several ad-hoc handles through every constructor.
//!
//! `tracing` is the implementation underneath; this trait exists only to
//! keep call sites decoupled from that choice the way the grounding
//! workspace's `ObservabilityFacade` decouples callers from a specific
//! logger/metrics provider.

use std::sync::Arc;

/// Per-connection identity attached to every span this facade opens.
#[derive(Debug, Clone)]
pub struct ConnectionLabel {
    pub connection_id: u64,
    pub remote: String,
}

/// The observability capability handed to the dispatcher and HTTP handlers.
pub trait ObservabilityFacade: Send + Sync + 'static {
    /// Open a `tracing::Span` scoped to one connection's lifetime; request
    /// and reply logging for that connection happen inside it.
    fn connection_span(&self, label: &ConnectionLabel) -> tracing::Span;

    /// Record a request/reply pair at DEBUG verbosity. Implementations must
    /// suppress `Pinger.Ping` traffic (spec §4.4).
    fn record_frame(&self, direction: FrameDirection, facade: &str, method: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Inbound,
    Outbound,
}

/// The default, `tracing`-backed facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObservability;

impl ObservabilityFacade for TracingObservability {
    fn connection_span(&self, label: &ConnectionLabel) -> tracing::Span {
        tracing::info_span!("connection", id = label.connection_id, remote = %label.remote)
    }

    fn record_frame(&self, direction: FrameDirection, facade: &str, method: &str) {
        if facade.eq_ignore_ascii_case("pinger") && method.eq_ignore_ascii_case("ping") {
            return;
        }
        match direction {
            FrameDirection::Inbound => {
                tracing::debug!(facade, method, "-> request")
            }
            FrameDirection::Outbound => {
                tracing::debug!(facade, method, "<- reply")
            }
        }
    }
}

pub fn default_observability() -> Arc<dyn ObservabilityFacade> {
    Arc::new(TracingObservability)
}
