use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/ddm/config.toml`.
///
/// Every field not present in an on-disk file falls back to its default, so
/// a config written by an older version of this crate keeps loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdmConfig {
    /// Maximum total concurrent HTTP connections across all tasks.
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,
    /// Maximum concurrent HTTP connections per host.
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,
    /// Minimum number of segments per task.
    #[serde(default = "default_min_segments")]
    pub min_segments: usize,
    /// Maximum number of segments per task (the per-task ceiling, Cmax).
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// Worker pool size: how many tasks run their fetch concurrently.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Global token-bucket rate limit, bytes/sec. `None` disables throttling.
    #[serde(default)]
    pub global_rate_bytes_per_sec: Option<u64>,
    /// Token-bucket burst capacity, bytes. Defaults to one second of
    /// `global_rate_bytes_per_sec` when unset and a rate is configured.
    #[serde(default)]
    pub rate_burst_bytes: Option<u64>,
    /// How long a link pre-check result stays valid before being re-probed.
    #[serde(default = "default_precheck_ttl_secs")]
    pub precheck_ttl_secs: u64,
    /// Upper bound on cached link pre-check entries.
    #[serde(default = "default_precheck_lru_cap")]
    pub precheck_lru_cap: usize,
    /// Multiplier applied to `retry_count` for the WAITING backoff delay.
    #[serde(default = "default_backoff_multiplier_secs")]
    pub backoff_multiplier_secs: u64,
    /// Ceiling on the WAITING backoff delay, regardless of retry count.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Below this size, a task always uses the single-stream path.
    #[serde(default = "default_small_file_threshold_bytes")]
    pub small_file_threshold_bytes: u64,
    /// How often the event bus flushes batched deltas to subscribers.
    #[serde(default = "default_event_flush_interval_ms")]
    pub event_flush_interval_ms: u64,
    /// How often the event bus sends a heartbeat frame to idle subscribers.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Maximum concurrent downloads per account, for hosts with accounts.
    #[serde(default = "default_account_concurrency")]
    pub account_concurrency: u32,
    /// Verify a SHA-256 checksum after completion, when the caller supplied
    /// one on `SubmitRequest::expected_sha256`.
    #[serde(default)]
    pub verify_checksum: bool,
}

fn default_max_total_connections() -> usize {
    64
}
fn default_max_connections_per_host() -> usize {
    16
}
fn default_min_segments() -> usize {
    4
}
fn default_max_segments() -> usize {
    16
}
fn default_worker_count() -> usize {
    2
}
fn default_precheck_ttl_secs() -> u64 {
    60
}
fn default_precheck_lru_cap() -> usize {
    512
}
fn default_backoff_multiplier_secs() -> u64 {
    2
}
fn default_backoff_max_secs() -> u64 {
    300
}
fn default_small_file_threshold_bytes() -> u64 {
    crate::task::SMALL_FILE_THRESHOLD
}
fn default_event_flush_interval_ms() -> u64 {
    100
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_account_concurrency() -> u32 {
    2
}

impl Default for DdmConfig {
    fn default() -> Self {
        Self {
            max_total_connections: default_max_total_connections(),
            max_connections_per_host: default_max_connections_per_host(),
            min_segments: default_min_segments(),
            max_segments: default_max_segments(),
            worker_count: default_worker_count(),
            global_rate_bytes_per_sec: None,
            rate_burst_bytes: None,
            precheck_ttl_secs: default_precheck_ttl_secs(),
            precheck_lru_cap: default_precheck_lru_cap(),
            backoff_multiplier_secs: default_backoff_multiplier_secs(),
            backoff_max_secs: default_backoff_max_secs(),
            small_file_threshold_bytes: default_small_file_threshold_bytes(),
            event_flush_interval_ms: default_event_flush_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            account_concurrency: default_account_concurrency(),
            verify_checksum: false,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Path to the control socket a live `ddm run` process listens on, so
/// one-shot CLI invocations (`ddm pause 3`) can reach it directly without
/// waiting for the next tick to observe a database write.
pub fn control_socket_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
    let runtime_dir = xdg_dirs.get_runtime_directory().unwrap_or_else(|_| std::env::temp_dir());
    Ok(runtime_dir.join("ddm.sock"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
