use std::path::PathBuf;

use crate::criteria::RelevanceSettings;

#[derive(Clone)]
pub struct ScannerConfig {
    pub api_id: Option<String>,
    pub api_hash: Option<String>,
    pub log_level: String,
    pub cache_path: PathBuf,
    pub scan_interval_secs: u64,
    pub max_history_days: i64,
    pub selected_groups: Vec<String>,
    pub relevance: RelevanceSettings,
    pub requests_per_minute: u32,
    pub flood_wait_multiplier: f64,
    pub default_delay_secs: f64,
    pub max_wait_time_secs: f64,
    pub max_retries: u32,
    pub discovery_timeout_secs: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub history_page_size: usize,
}

impl ScannerConfig {
    /// Whether historical backfill is enabled for a run.
    #[must_use]
    pub fn backfill_enabled(&self) -> bool {
        self.max_history_days > 0
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            api_id: None,
            api_hash: None,
            log_level: "info".to_owned(),
            cache_path: PathBuf::from("./groups_cache.json"),
            scan_interval_secs: 30,
            max_history_days: 7,
            selected_groups: Vec::new(),
            relevance: RelevanceSettings::default(),
            requests_per_minute: 20,
            flood_wait_multiplier: 1.5,
            default_delay_secs: 1.0,
            max_wait_time_secs: 60.0,
            max_retries: 3,
            discovery_timeout_secs: 30 * 60,
            worker_count: 3,
            queue_capacity: 1000,
            history_page_size: 100,
        }
    }
}

impl std::fmt::Debug for ScannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerConfig")
            .field("api_id", &self.api_id.as_ref().map(|_| "[redacted]"))
            .field("api_hash", &self.api_hash.as_ref().map(|_| "[redacted]"))
            .field("log_level", &self.log_level)
            .field("cache_path", &self.cache_path)
            .field("scan_interval_secs", &self.scan_interval_secs)
            .field("max_history_days", &self.max_history_days)
            .field("selected_groups", &self.selected_groups)
            .field("relevance", &self.relevance)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("flood_wait_multiplier", &self.flood_wait_multiplier)
            .field("default_delay_secs", &self.default_delay_secs)
            .field("max_wait_time_secs", &self.max_wait_time_secs)
            .field("max_retries", &self.max_retries)
            .field("discovery_timeout_secs", &self.discovery_timeout_secs)
            .field("worker_count", &self.worker_count)
            .field("queue_capacity", &self.queue_capacity)
            .field("history_page_size", &self.history_page_size)
            .finish()
    }
}
