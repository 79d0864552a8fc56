use std::time::Duration;

use anyhow::{Context, Result};
use hm_reconcile::{
    AnalyzerConfig, CrashBackoff, DEFAULT_CRASHES_BEFORE_BACKOFF, DEFAULT_GRACE_PERIOD_SECS,
    DEFAULT_MAXIMUM_BACKOFF_DELAY_SECS, DEFAULT_STARTING_BACKOFF_DELAY_SECS,
};

use crate::sender::SenderConfig;
use crate::store::MemoryStoreConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub analyzer: AnalyzerConfig,
    pub sender: SenderConfig,
    pub analyzer_interval: Duration,
    pub sender_interval: Duration,
    pub store: MemoryStoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: String| lookup(name).unwrap_or(default);

        fn parsed<T>(name: &str, raw: String) -> Result<T>
        where
            T: std::str::FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            raw.parse()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))
        }

        let log_level = var("HM_LOG_LEVEL", "info".to_string());

        let grace_period_secs = parsed(
            "HM_GRACE_PERIOD_SECS",
            var("HM_GRACE_PERIOD_SECS", DEFAULT_GRACE_PERIOD_SECS.to_string()),
        )?;

        let backoff = CrashBackoff {
            crashes_before_backoff: parsed(
                "HM_CRASHES_BEFORE_BACKOFF",
                var("HM_CRASHES_BEFORE_BACKOFF", DEFAULT_CRASHES_BEFORE_BACKOFF.to_string()),
            )?,
            starting_delay_secs: parsed(
                "HM_STARTING_BACKOFF_DELAY_SECS",
                var(
                    "HM_STARTING_BACKOFF_DELAY_SECS",
                    DEFAULT_STARTING_BACKOFF_DELAY_SECS.to_string(),
                ),
            )?,
            maximum_delay_secs: parsed(
                "HM_MAXIMUM_BACKOFF_DELAY_SECS",
                var(
                    "HM_MAXIMUM_BACKOFF_DELAY_SECS",
                    DEFAULT_MAXIMUM_BACKOFF_DELAY_SECS.to_string(),
                ),
            )?,
        };

        let sender = SenderConfig {
            message_limit: parsed(
                "HM_SENDER_MESSAGE_LIMIT",
                var("HM_SENDER_MESSAGE_LIMIT", "30".to_string()),
            )?,
            start_subject: var("HM_SENDER_START_SUBJECT", "health.start".to_string()),
            stop_subject: var("HM_SENDER_STOP_SUBJECT", "health.stop".to_string()),
        };

        let analyzer_interval_secs: u64 = parsed(
            "HM_ANALYZER_INTERVAL_SECS",
            var("HM_ANALYZER_INTERVAL_SECS", "10".to_string()),
        )?;
        let sender_interval_secs: u64 = parsed(
            "HM_SENDER_INTERVAL_SECS",
            var("HM_SENDER_INTERVAL_SECS", "10".to_string()),
        )?;
        if analyzer_interval_secs == 0 || sender_interval_secs == 0 {
            anyhow::bail!("HM_ANALYZER_INTERVAL_SECS and HM_SENDER_INTERVAL_SECS must be positive");
        }

        let store = MemoryStoreConfig {
            actual_ttl_secs: parsed(
                "HM_ACTUAL_FRESHNESS_TTL_SECS",
                var("HM_ACTUAL_FRESHNESS_TTL_SECS", "30".to_string()),
            )?,
            desired_ttl_secs: parsed(
                "HM_DESIRED_FRESHNESS_TTL_SECS",
                var("HM_DESIRED_FRESHNESS_TTL_SECS", "120".to_string()),
            )?,
            // Long enough to outlive the longest backoff delay.
            crash_count_ttl_secs: parsed(
                "HM_CRASH_COUNT_TTL_SECS",
                var(
                    "HM_CRASH_COUNT_TTL_SECS",
                    backoff.maximum_delay_secs.saturating_mul(2).to_string(),
                ),
            )?,
        };

        Ok(Self {
            log_level,
            analyzer: AnalyzerConfig {
                grace_period_secs,
                backoff,
            },
            sender,
            analyzer_interval: Duration::from_secs(analyzer_interval_secs),
            sender_interval: Duration::from_secs(sender_interval_secs),
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.analyzer, AnalyzerConfig::default());
        assert_eq!(config.sender, SenderConfig::default());
        assert_eq!(config.analyzer_interval, Duration::from_secs(10));
        assert_eq!(config.sender_interval, Duration::from_secs(10));
        assert_eq!(config.store, MemoryStoreConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HM_GRACE_PERIOD_SECS", "5"),
            ("HM_CRASHES_BEFORE_BACKOFF", "1"),
            ("HM_MAXIMUM_BACKOFF_DELAY_SECS", "950"),
            ("HM_SENDER_MESSAGE_LIMIT", "2"),
            ("HM_SENDER_STOP_SUBJECT", "dea.stop"),
        ])
        .unwrap();

        assert_eq!(config.analyzer.grace_period_secs, 5);
        assert_eq!(config.analyzer.backoff.crashes_before_backoff, 1);
        assert_eq!(config.analyzer.backoff.maximum_delay_secs, 950);
        assert_eq!(config.sender.message_limit, 2);
        assert_eq!(config.sender.stop_subject, "dea.stop");
        assert_eq!(config.sender.start_subject, "health.start");
        assert_eq!(config.store.crash_count_ttl_secs, 1900);
    }

    #[test]
    fn test_crash_count_ttl_override() {
        let config = from_pairs(&[("HM_CRASH_COUNT_TTL_SECS", "60")]).unwrap();
        assert_eq!(config.store.crash_count_ttl_secs, 60);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = from_pairs(&[("HM_GRACE_PERIOD_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("HM_GRACE_PERIOD_SECS"));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(from_pairs(&[("HM_SENDER_INTERVAL_SECS", "0")]).is_err());
    }
}
