//! Ingestion configuration
//!
//! Everything is read from `INGEST_*` environment variables. Unset or
//! unparsable values fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::schedule::MAX_VISIBILITY_TIMEOUT_SECS;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_INDEX_BATCH_SIZE: usize = 50;
pub const DEFAULT_PER_BATCH_DELAY_SECS: u64 = 30;
pub const DEFAULT_CHECK_COUNT: usize = 500;
pub const DEFAULT_PRUNE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_WEBHOOK_LANES: u32 = 50;
pub const DEFAULT_BACKFILL_LANES: u32 = 4;
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_RECEIVE_BATCH: usize = 10;
pub const DEFAULT_INCREMENTAL_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Ingestion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// FIFO queue carrying backfill, incremental and admin jobs; unset runs
    /// an in-process queue
    pub job_queue_url: Option<String>,
    /// Queue receiving index requests; defaults to the job queue
    pub index_queue_url: Option<String>,
    /// Jobs processed at once by one worker
    pub concurrency: usize,
    /// Messages requested per receive call
    pub receive_batch: usize,
    pub visibility_timeout_secs: u64,
    /// Items per child job unless the connector overrides it
    pub batch_size: usize,
    /// Entities per index request
    pub index_batch_size: usize,
    pub per_batch_delay_secs: u64,
    /// Items scanned per incremental poll at most
    pub check_count: usize,
    /// Stale share at or above which pruning refuses to act
    pub prune_threshold: f64,
    pub webhook_lanes: u32,
    pub backfill_lanes: u32,
    pub scheduler_enabled: bool,
    pub incremental_interval_secs: u64,
    pub prune_interval_secs: u64,
    pub search_index_url: Option<String>,
    pub http_feed: HttpFeedConfig,
    pub local_dir: LocalDirConfig,
}

/// Settings for the bundled HTTP feed connector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HttpFeedConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Overrides [`DEFAULT_BATCH_SIZE`] for this connector
    pub batch_size: Option<usize>,
}

/// Settings for the bundled local directory connector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LocalDirConfig {
    pub path: Option<PathBuf>,
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self::from_lookup(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| text(key).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();

        Self {
            job_queue_url: text("INGEST_JOB_QUEUE_URL"),
            index_queue_url: text("INGEST_INDEX_QUEUE_URL"),
            concurrency: parsed("INGEST_CONCURRENCY").map_or(defaults.concurrency, |v| v as usize),
            receive_batch: parsed("INGEST_RECEIVE_BATCH").map_or(defaults.receive_batch, |v| v as usize),
            visibility_timeout_secs: parsed("INGEST_VISIBILITY_TIMEOUT_SECS")
                .unwrap_or(defaults.visibility_timeout_secs),
            batch_size: parsed("INGEST_BATCH_SIZE").map_or(defaults.batch_size, |v| v as usize),
            index_batch_size: parsed("INGEST_INDEX_BATCH_SIZE")
                .map_or(defaults.index_batch_size, |v| v as usize),
            per_batch_delay_secs: parsed("INGEST_PER_BATCH_DELAY_SECS")
                .unwrap_or(defaults.per_batch_delay_secs),
            check_count: parsed("INGEST_CHECK_COUNT").map_or(defaults.check_count, |v| v as usize),
            prune_threshold: text("INGEST_PRUNE_THRESHOLD")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.prune_threshold),
            webhook_lanes: parsed("INGEST_WEBHOOK_LANES").map_or(defaults.webhook_lanes, |v| v as u32),
            backfill_lanes: parsed("INGEST_BACKFILL_LANES")
                .map_or(defaults.backfill_lanes, |v| v as u32),
            scheduler_enabled: text("INGEST_SCHEDULER_ENABLED")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.scheduler_enabled),
            incremental_interval_secs: parsed("INGEST_INCREMENTAL_INTERVAL_SECS")
                .unwrap_or(defaults.incremental_interval_secs),
            prune_interval_secs: parsed("INGEST_PRUNE_INTERVAL_SECS")
                .unwrap_or(defaults.prune_interval_secs),
            search_index_url: text("INGEST_SEARCH_INDEX_URL"),
            http_feed: HttpFeedConfig {
                base_url: text("INGEST_HTTP_FEED_BASE_URL"),
                token: text("INGEST_HTTP_FEED_TOKEN"),
                timeout_secs: parsed("INGEST_HTTP_FEED_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
                batch_size: parsed("INGEST_HTTP_FEED_BATCH_SIZE").map(|v| v as usize),
            },
            local_dir: LocalDirConfig {
                path: text("INGEST_LOCAL_DIR_PATH").map(PathBuf::from),
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("INGEST_CONCURRENCY must be greater than 0");
        }
        if self.receive_batch == 0 {
            anyhow::bail!("INGEST_RECEIVE_BATCH must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        if self.index_batch_size == 0 {
            anyhow::bail!("INGEST_INDEX_BATCH_SIZE must be greater than 0");
        }
        if self.http_feed.batch_size == Some(0) {
            anyhow::bail!("INGEST_HTTP_FEED_BATCH_SIZE must be greater than 0");
        }
        if self.webhook_lanes == 0 || self.backfill_lanes == 0 {
            anyhow::bail!("INGEST_WEBHOOK_LANES and INGEST_BACKFILL_LANES must be greater than 0");
        }
        if !(self.prune_threshold > 0.0 && self.prune_threshold <= 1.0) {
            anyhow::bail!(
                "INGEST_PRUNE_THRESHOLD must be in (0, 1], got {}",
                self.prune_threshold
            );
        }
        if self.visibility_timeout_secs == 0
            || self.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS
        {
            anyhow::bail!(
                "INGEST_VISIBILITY_TIMEOUT_SECS must be between 1 and {}",
                MAX_VISIBILITY_TIMEOUT_SECS
            );
        }
        if self.scheduler_enabled
            && (self.incremental_interval_secs == 0 || self.prune_interval_secs == 0)
        {
            anyhow::bail!("Scheduler intervals must be greater than 0");
        }
        Ok(())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn per_batch_delay(&self) -> Duration {
        Duration::from_secs(self.per_batch_delay_secs)
    }

    pub fn incremental_interval(&self) -> Duration {
        Duration::from_secs(self.incremental_interval_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl HttpFeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            job_queue_url: None,
            index_queue_url: None,
            concurrency: DEFAULT_CONCURRENCY,
            receive_batch: DEFAULT_RECEIVE_BATCH,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            index_batch_size: DEFAULT_INDEX_BATCH_SIZE,
            per_batch_delay_secs: DEFAULT_PER_BATCH_DELAY_SECS,
            check_count: DEFAULT_CHECK_COUNT,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            webhook_lanes: DEFAULT_WEBHOOK_LANES,
            backfill_lanes: DEFAULT_BACKFILL_LANES,
            scheduler_enabled: true,
            incremental_interval_secs: DEFAULT_INCREMENTAL_INTERVAL_SECS,
            prune_interval_secs: DEFAULT_PRUNE_INTERVAL_SECS,
            search_index_url: None,
            http_feed: HttpFeedConfig {
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                ..Default::default()
            },
            local_dir: LocalDirConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> IngestConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_ingest_config_default() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.check_count, 500);
        assert_eq!(config.backfill_lanes, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = from_pairs(&[
            ("INGEST_BATCH_SIZE", "10"),
            ("INGEST_PRUNE_THRESHOLD", "0.5"),
            ("INGEST_SCHEDULER_ENABLED", "false"),
            ("INGEST_HTTP_FEED_BASE_URL", "https://feed.example.com"),
            ("INGEST_LOCAL_DIR_PATH", "/srv/items"),
        ]);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.prune_threshold, 0.5);
        assert!(!config.scheduler_enabled);
        assert_eq!(config.http_feed.base_url.as_deref(), Some("https://feed.example.com"));
        assert_eq!(config.local_dir.path, Some(PathBuf::from("/srv/items")));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = from_pairs(&[("INGEST_CONCURRENCY", "many"), ("INGEST_JOB_QUEUE_URL", "  ")]);
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.job_queue_url, None);
    }

    #[test]
    fn test_validation_rejects_zero_batch_size() {
        let config = IngestConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_threshold_out_of_range() {
        for threshold in [0.0, 1.5, -0.1] {
            let config = IngestConfig {
                prune_threshold: threshold,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{}", threshold);
        }
        let config = IngestConfig {
            prune_threshold: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_visibility_above_queue_max() {
        let config = IngestConfig {
            visibility_timeout_secs: MAX_VISIBILITY_TIMEOUT_SECS + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
