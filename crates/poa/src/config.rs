//! Adapter runtime configuration

use std::time::Duration;

/// Default bounded re-check interval for every blocking wait
pub const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Name of the root adapter
pub const DEFAULT_ROOT_POA_NAME: &str = "RootPOA";

/// Configuration for a [`PoaFactory`](crate::PoaFactory)
#[derive(Clone, Debug)]
pub struct PoaConfig {
    /// Server identity embedded in object references and registry keys
    pub server_id: String,
    /// Name of the root adapter
    pub root_poa_name: String,
    /// Upper bound between re-checks of a blocked condition
    pub wait_poll_interval: Duration,
    /// Run etherealization triggered by deactivation on a background worker
    pub background_etherealization: bool,
    /// Thread name prefix for background work
    pub worker_name_prefix: String,
}

impl Default for PoaConfig {
    fn default() -> Self {
        Self {
            server_id: uuid::Uuid::new_v4().to_string(),
            root_poa_name: DEFAULT_ROOT_POA_NAME.to_string(),
            wait_poll_interval: DEFAULT_WAIT_POLL_INTERVAL,
            background_etherealization: false,
            worker_name_prefix: "poa-worker".to_string(),
        }
    }
}

impl PoaConfig {
    /// Create a configuration with a fixed server id
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            ..Self::default()
        }
    }

    pub fn with_root_poa_name(mut self, name: impl Into<String>) -> Self {
        self.root_poa_name = name.into();
        self
    }

    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        // A zero interval would turn every wait into a spin
        self.wait_poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_background_etherealization(mut self, enabled: bool) -> Self {
        self.background_etherealization = enabled;
        self
    }

    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }
}
