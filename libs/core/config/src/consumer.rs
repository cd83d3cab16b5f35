use crate::{env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;

/// Settings of a node running the queue consumer core
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConsumerConfig {
    /// Service type this node runs as, in kebab-case (`tb-core`, `tb-rule-engine`, ...)
    pub service_type: String,
    /// Bounded wait of one notification poll
    pub notifications_poll_interval: Duration,
    /// Maximum time a notification pack may take before stragglers are reported
    pub notifications_pack_timeout: Duration,
    pub main_consumer_thread_name: String,
    pub notifications_consumer_thread_name: String,
}

impl QueueConsumerConfig {
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    pub fn with_pack_timeout(mut self, timeout: Duration) -> Self {
        self.notifications_pack_timeout = timeout;
        self
    }
}

fn millis(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let value: u64 = env_parse(key, default)?;
    if value == 0 {
        return Err(ConfigError::ParseError {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(value))
}

impl FromEnv for QueueConsumerConfig {
    /// Reads from environment variables with defaults:
    /// - QUEUE_SERVICE_TYPE: tb-core
    /// - QUEUE_NOTIFICATIONS_POLL_INTERVAL_MS: 25
    /// - QUEUE_NOTIFICATIONS_PACK_TIMEOUT_MS: 60000
    /// - QUEUE_MAIN_CONSUMER_THREAD_NAME: main-consumer
    /// - QUEUE_NOTIFICATIONS_CONSUMER_THREAD_NAME: notifications-consumer
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            service_type: env_or_default("QUEUE_SERVICE_TYPE", "tb-core"),
            notifications_poll_interval: millis("QUEUE_NOTIFICATIONS_POLL_INTERVAL_MS", 25)?,
            notifications_pack_timeout: millis("QUEUE_NOTIFICATIONS_PACK_TIMEOUT_MS", 60_000)?,
            main_consumer_thread_name: env_or_default(
                "QUEUE_MAIN_CONSUMER_THREAD_NAME",
                "main-consumer",
            ),
            notifications_consumer_thread_name: env_or_default(
                "QUEUE_NOTIFICATIONS_CONSUMER_THREAD_NAME",
                "notifications-consumer",
            ),
        })
    }
}

impl Default for QueueConsumerConfig {
    fn default() -> Self {
        Self {
            service_type: "tb-core".to_string(),
            notifications_poll_interval: Duration::from_millis(25),
            notifications_pack_timeout: Duration::from_secs(60),
            main_consumer_thread_name: "main-consumer".to_string(),
            notifications_consumer_thread_name: "notifications-consumer".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 5] = [
        "QUEUE_SERVICE_TYPE",
        "QUEUE_NOTIFICATIONS_POLL_INTERVAL_MS",
        "QUEUE_NOTIFICATIONS_PACK_TIMEOUT_MS",
        "QUEUE_MAIN_CONSUMER_THREAD_NAME",
        "QUEUE_NOTIFICATIONS_CONSUMER_THREAD_NAME",
    ];

    #[test]
    fn test_consumer_config_defaults() {
        temp_env::with_vars_unset(VARS, || {
            let config = QueueConsumerConfig::from_env().unwrap();
            assert_eq!(config, QueueConsumerConfig::default());
            assert_eq!(config.notifications_poll_interval, Duration::from_millis(25));
            assert_eq!(config.notifications_pack_timeout, Duration::from_secs(60));
        });
    }

    #[test]
    fn test_consumer_config_custom_values() {
        temp_env::with_vars(
            [
                ("QUEUE_SERVICE_TYPE", Some("tb-rule-engine")),
                ("QUEUE_NOTIFICATIONS_POLL_INTERVAL_MS", Some("100")),
                ("QUEUE_NOTIFICATIONS_PACK_TIMEOUT_MS", Some("1500")),
                ("QUEUE_MAIN_CONSUMER_THREAD_NAME", Some("re-consumer")),
                ("QUEUE_NOTIFICATIONS_CONSUMER_THREAD_NAME", Some("re-nf-consumer")),
            ],
            || {
                let config = QueueConsumerConfig::from_env().unwrap();
                assert_eq!(config.service_type, "tb-rule-engine");
                assert_eq!(config.notifications_poll_interval, Duration::from_millis(100));
                assert_eq!(config.notifications_pack_timeout, Duration::from_millis(1500));
                assert_eq!(config.main_consumer_thread_name, "re-consumer");
                assert_eq!(config.notifications_consumer_thread_name, "re-nf-consumer");
            },
        );
    }

    #[test]
    fn test_consumer_config_rejects_zero_timeout() {
        temp_env::with_var("QUEUE_NOTIFICATIONS_PACK_TIMEOUT_MS", Some("0"), || {
            let err = QueueConsumerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("QUEUE_NOTIFICATIONS_PACK_TIMEOUT_MS"));
            assert!(err.to_string().contains("greater than zero"));
        });
    }

    #[test]
    fn test_consumer_config_rejects_garbage_interval() {
        temp_env::with_var("QUEUE_NOTIFICATIONS_POLL_INTERVAL_MS", Some("soon"), || {
            let err = QueueConsumerConfig::from_env().unwrap_err();
            let ConfigError::ParseError { key, .. } = &err else {
                panic!("expected a parse error, got {err:?}");
            };
            assert_eq!(key, "QUEUE_NOTIFICATIONS_POLL_INTERVAL_MS");
        });
    }

    #[test]
    fn test_consumer_config_builders() {
        let config = QueueConsumerConfig::default()
            .with_service_type("js-executor")
            .with_pack_timeout(Duration::from_secs(5));
        assert_eq!(config.service_type, "js-executor");
        assert_eq!(config.notifications_pack_timeout, Duration::from_secs(5));
    }
}
