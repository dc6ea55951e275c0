//! Configuration types for bulk-harvest

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Where and under which key the state document is persisted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path used by [`crate::db::Database`] (default: "./bulk-harvest.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Store key holding the state document (default: "state")
    #[serde(default = "default_state_key")]
    pub state_key: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            state_key: default_state_key(),
        }
    }
}

/// Main configuration for [`crate::Harvester`]
///
/// User-facing choices (export format, what to download) are not here; they
/// live in [`crate::types::Settings`] inside the persisted state so they
/// survive restarts together with the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Results requested per catalog page (default: 150)
    #[serde(default = "default_api_items_per_page")]
    pub api_items_per_page: u32,

    /// Completed items kept in the queue before pruning (default: 50)
    #[serde(default = "default_max_archived_queue_items")]
    pub max_archived_queue_items: usize,

    /// Attempt ceiling for page fetches and asset downloads (default: 3)
    #[serde(default = "default_max_download_attempts")]
    pub max_download_attempts: u32,

    /// Maximum number of log entries kept (default: 500)
    #[serde(default = "default_max_log_count")]
    pub max_log_count: usize,

    /// Fixed delay between catalog page fetches (default: 1000 ms)
    ///
    /// This is the rate limit applied to the external API; it is not a backoff.
    #[serde(default = "default_time_between_requests", with = "duration_ms_serde")]
    pub time_between_requests: Duration,

    /// Fixed delay between asset download continuations and retries (default: 2000 ms)
    #[serde(
        default = "default_time_between_asset_download_attempts",
        with = "duration_ms_serde"
    )]
    pub time_between_asset_download_attempts: Duration,

    /// Reject sources reporting more results than this (default: no limit)
    #[serde(default)]
    pub max_result_count: Option<u64>,

    /// Timeout for a single catalog page fetch (default: 30000 ms)
    #[serde(default = "default_request_timeout", with = "duration_ms_serde")]
    pub request_timeout: Duration,

    /// Persistence settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_items_per_page: default_api_items_per_page(),
            max_archived_queue_items: default_max_archived_queue_items(),
            max_download_attempts: default_max_download_attempts(),
            max_log_count: default_max_log_count(),
            time_between_requests: default_time_between_requests(),
            time_between_asset_download_attempts: default_time_between_asset_download_attempts(),
            max_result_count: None,
            request_timeout: default_request_timeout(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl Config {
    /// Check invariants the engine relies on
    pub fn validate(&self) -> crate::Result<()> {
        if self.api_items_per_page == 0 {
            return Err(crate::Error::Config {
                message: "page size must be at least 1".to_string(),
                key: Some("api_items_per_page".to_string()),
            });
        }
        if self.max_download_attempts == 0 {
            return Err(crate::Error::Config {
                message: "at least one attempt is required".to_string(),
                key: Some("max_download_attempts".to_string()),
            });
        }
        if self.max_log_count == 0 {
            return Err(crate::Error::Config {
                message: "the log must keep at least one entry".to_string(),
                key: Some("max_log_count".to_string()),
            });
        }
        Ok(())
    }
}

fn default_api_items_per_page() -> u32 {
    150
}

fn default_max_archived_queue_items() -> usize {
    50
}

fn default_max_download_attempts() -> u32 {
    3
}

fn default_max_log_count() -> usize {
    500
}

fn default_time_between_requests() -> Duration {
    Duration::from_millis(1000)
}

fn default_time_between_asset_download_attempts() -> Duration {
    Duration::from_millis(2000)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./bulk-harvest.db")
}

fn default_state_key() -> String {
    "state".to_string()
}

// Durations are written as whole milliseconds
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
