use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::enrichment::{RateTable, TokenRate, WeightedEngagement};
use crate::domain::metrics::RetentionDays;
use crate::processor::{ProcessorConfig, RetryConfig};
use crate::publisher::PublisherConfig;
use crate::query::QueryCacheConfig;
use crate::store::StoreConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub ingestion: IngestionSettings,
    pub processor: ProcessorSettings,
    pub store: StoreSettings,
    pub query: QuerySettings,
    pub publisher: PublisherSettings,
    pub pricing: PricingSettings,
    pub engagement: EngagementSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionSettings {
    pub capacity: usize,
    /// How long `submit` waits for queue space before failing
    pub enqueue_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub batch_wait_ms: u64,
    pub dedup_window_secs: u64,
    pub dedup_capacity: usize,
    pub max_clock_skew_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub fatal_dead_letter_threshold: u32,
    /// JSON-lines dead-letter file; dead letters stay in memory when unset
    pub dead_letter_path: Option<PathBuf>,
    pub retry: RetrySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub max_raw_range_secs: u64,
    pub max_raw_points: usize,
    pub retention_days: u32,
    pub bucket_retention_multiplier: u32,
    /// Zero disables the built-in retention task
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuerySettings {
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublisherSettings {
    pub flush_interval_ms: u64,
    pub flush_threshold: usize,
    pub max_buffer: usize,
    pub subscriber_queue: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingSettings {
    pub default_prompt_per_1k: Option<f64>,
    pub default_completion_per_1k: Option<f64>,
    #[serde(default)]
    pub models: HashMap<String, TokenRate>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngagementSettings {
    pub per_session_minute: f64,
    pub per_message: f64,
    pub max_score: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Self::defaults(Config::builder(), &environment)?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("CHAT_ANALYTICS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Built-in defaults only, ignoring files and the environment
    pub fn defaults_only() -> Result<Self, ConfigError> {
        Self::defaults(Config::builder(), "test")?
            .build()?
            .try_deserialize()
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("environment", environment)?
            .set_default("ingestion.capacity", 10_000)?
            .set_default("ingestion.enqueue_timeout_ms", 50)?
            .set_default("processor.workers", 4)?
            .set_default("processor.batch_size", 100)?
            .set_default("processor.batch_wait_ms", 100)?
            .set_default("processor.dedup_window_secs", 3600)?
            .set_default("processor.dedup_capacity", 100_000)?
            .set_default("processor.max_clock_skew_ms", 60_000)?
            .set_default("processor.shutdown_timeout_ms", 30_000)?
            .set_default("processor.fatal_dead_letter_threshold", 10)?
            .set_default("processor.retry.max_retries", 5)?
            .set_default("processor.retry.initial_delay_ms", 100)?
            .set_default("processor.retry.max_delay_ms", 30_000)?
            .set_default("processor.retry.backoff_factor", 2.0)?
            .set_default("store.max_raw_range_secs", 86_400)?
            .set_default("store.max_raw_points", 100_000)?
            .set_default("store.retention_days", 30)?
            .set_default("store.bucket_retention_multiplier", 7)?
            .set_default("store.cleanup_interval_secs", 3600)?
            .set_default("query.cache_ttl_secs", 300)?
            .set_default("query.cache_capacity", 10_000)?
            .set_default("publisher.flush_interval_ms", 1000)?
            .set_default("publisher.flush_threshold", 50)?
            .set_default("publisher.max_buffer", 1000)?
            .set_default("publisher.subscriber_queue", 16)?
            .set_default("pricing.default_prompt_per_1k", 0.0015)?
            .set_default("pricing.default_completion_per_1k", 0.002)?
            .set_default("engagement.per_session_minute", 1.0)?
            .set_default("engagement.per_message", 2.0)?
            .set_default("engagement.max_score", 100.0)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.ingestion.enqueue_timeout_ms)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        let processor = &self.processor;
        ProcessorConfig {
            workers: processor.workers,
            batch_size: processor.batch_size,
            batch_wait: Duration::from_millis(processor.batch_wait_ms),
            dedup_window: Duration::from_secs(processor.dedup_window_secs),
            dedup_capacity: processor.dedup_capacity,
            max_clock_skew: Duration::from_millis(processor.max_clock_skew_ms),
            shutdown_timeout: Duration::from_millis(processor.shutdown_timeout_ms),
            fatal_dead_letter_threshold: processor.fatal_dead_letter_threshold,
            retry: RetryConfig {
                max_retries: processor.retry.max_retries,
                initial_delay: Duration::from_millis(processor.retry.initial_delay_ms),
                max_delay: Duration::from_millis(processor.retry.max_delay_ms),
                backoff_factor: processor.retry.backoff_factor,
            },
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_raw_range: Duration::from_secs(self.store.max_raw_range_secs),
            max_raw_points: self.store.max_raw_points,
            bucket_retention_multiplier: self.store.bucket_retention_multiplier,
        }
    }

    pub fn retention(&self) -> Result<RetentionDays, ConfigError> {
        RetentionDays::try_new(self.store.retention_days)
            .map_err(|e| ConfigError::Message(format!("store.retention_days: {e}")))
    }

    /// `None` when periodic cleanup is disabled
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.store.cleanup_interval_secs > 0)
            .then(|| Duration::from_secs(self.store.cleanup_interval_secs))
    }

    pub fn query_cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig {
            ttl: Duration::from_secs(self.query.cache_ttl_secs),
            max_capacity: self.query.cache_capacity,
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            flush_interval: Duration::from_millis(self.publisher.flush_interval_ms),
            flush_threshold: self.publisher.flush_threshold,
            max_buffer: self.publisher.max_buffer,
            subscriber_queue: self.publisher.subscriber_queue,
        }
    }

    /// The fallback rate applies only when both halves are configured
    pub fn rate_table(&self) -> RateTable {
        let pricing = &self.pricing;
        let default_rate = pricing
            .default_prompt_per_1k
            .zip(pricing.default_completion_per_1k)
            .map(|(prompt_per_1k, completion_per_1k)| TokenRate {
                prompt_per_1k,
                completion_per_1k,
            });
        RateTable {
            default_rate,
            models: pricing.models.clone(),
        }
    }

    pub fn engagement_model(&self) -> WeightedEngagement {
        WeightedEngagement {
            per_session_minute: self.engagement.per_session_minute,
            per_message: self.engagement.per_message,
            max_score: self.engagement.max_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn settings_from_toml(toml: &str) -> Settings {
        Settings::defaults(Config::builder(), "test")
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_settings_can_be_loaded() {
        let settings = Settings::defaults_only();
        assert!(settings.is_ok());
    }

    #[test]
    fn test_defaults_match_component_defaults() {
        let settings = Settings::defaults_only().unwrap();
        assert_eq!(settings.processor_config(), ProcessorConfig::default());
        assert_eq!(settings.store_config(), StoreConfig::default());
        assert_eq!(settings.publisher_config(), PublisherConfig::default());
        assert_eq!(settings.query_cache_config(), QueryCacheConfig::default());
        assert_eq!(settings.rate_table(), RateTable::default());
        assert_eq!(settings.engagement_model(), WeightedEngagement::default());
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let settings = settings_from_toml(
            r#"
            [processor]
            workers = 8
            dead_letter_path = "/var/lib/chat_analytics/dead_letters.jsonl"

            [store]
            cleanup_interval_secs = 0

            [pricing.models.gpt-4o]
            prompt_per_1k = 0.005
            completion_per_1k = 0.015

            [logging]
            format = "pretty"
            "#,
        );

        assert_eq!(settings.processor_config().workers, 8);
        assert!(settings.processor.dead_letter_path.is_some());
        assert_eq!(settings.cleanup_interval(), None);
        assert_eq!(
            settings.rate_table().models.get("gpt-4o").map(|r| r.prompt_per_1k),
            Some(0.005)
        );
        assert_eq!(settings.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        let settings = settings_from_toml("[store]\nretention_days = 0\n");
        assert!(settings.retention().is_err());
    }
}
