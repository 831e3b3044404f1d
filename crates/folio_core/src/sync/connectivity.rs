//! Connectivity signals injected by the host environment.
//!
//! The sync engine never probes the network itself. The embedding
//! environment (desktop app, mobile shell, test harness) reports
//! reachability through [`Connectivity`], and may additionally feed online
//! transitions into the flusher through a watch channel (see
//! [`OutboxFlusher::attach_online_events`](super::OutboxFlusher::attach_online_events)).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Host-provided view of network reachability.
pub trait Connectivity: Send + Sync {
    /// Whether the device currently believes it can reach the server.
    fn is_online(&self) -> bool;
}

/// Always-online connectivity, for hosts without a reachability signal.
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// A toggleable online flag, for hosts that receive reachability callbacks.
#[derive(Debug, Default)]
pub struct OnlineFlag(AtomicBool);

impl OnlineFlag {
    /// Create a flag with an initial state.
    pub fn new(online: bool) -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(online)))
    }

    /// Record a reachability change reported by the host.
    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for OnlineFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
