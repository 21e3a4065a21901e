use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the manager and its HTTP engine.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of the local store; completed files land directly under it.
    pub store_root: PathBuf,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Global bandwidth limit in bytes per second, shared by all transfers.
    pub rate_limit: Option<u32>,
    /// How many transfers may move bytes at once. Extra ones wait for a slot.
    pub max_concurrent: usize,
    /// Smallest progress advance worth an event.
    pub progress_step: f32,
    /// Buffer size of the record-change broadcast.
    pub event_capacity: usize,
}

impl ManagerConfig {
    pub fn with_store_root(store_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            ..Self::default()
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            user_agent: concat!("tunedl/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
            rate_limit: None,
            max_concurrent: num_cpus::get(),
            progress_step: 0.01,
            event_capacity: 256,
        }
    }
}

/// `<local data dir>/tunedl`, or `./downloads` where the platform has no such dir.
pub fn default_store_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("tunedl"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}
