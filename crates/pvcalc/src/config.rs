//! Worker configuration.

use std::time::Duration;

/// Configuration for a [`PvDataWorker`](crate::PvDataWorker).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name for the worker. If None, a `pv-worker-N` name is generated.
    pub name: Option<String>,
    /// How often the event loop logs that it is alive. Default: 10 seconds.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
