//! Connectivity pre-flight check.

use crate::cancel::CancelToken;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tillsync_store::EntityStore;

/// Default bound on a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cheap reachability check against the server store.
///
/// Implementations must not mutate anything.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the server can be reached right now.
    async fn check(&self, cancel: &CancelToken) -> bool;
}

/// Probe that pings an [`EntityStore`] under a short timeout.
pub struct StoreProbe {
    store: Arc<dyn EntityStore>,
    timeout: Duration,
}

impl StoreProbe {
    /// Creates a probe for `store` with the default timeout.
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Sets the probe timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ConnectivityProbe for StoreProbe {
    async fn check(&self, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        match tokio::time::timeout(self.timeout, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(store = self.store.name(), error = %e, "connectivity probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(store = self.store.name(), timeout = ?self.timeout, "connectivity probe timed out");
                false
            }
        }
    }
}
