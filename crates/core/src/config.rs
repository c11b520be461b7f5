use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `PORTAL__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Tenant code used when a command does not name one.
    #[serde(default)]
    pub default_tenant: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Upper bound on a running request; 0 disables the timeout.
    #[serde(default = "default_queue_timeout_ms")]
    pub request_timeout_ms: u64,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_http_timeout_ms() -> u64 {
    15_000
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_maintenance_interval_secs() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    6
}
fn default_queue_timeout_ms() -> u64 {
    30_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_http_timeout_ms(),
            auth_token: None,
            default_tenant: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            request_timeout_ms: default_queue_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.default_ttl_secs)
    }
}

impl QueueConfig {
    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        (self.request_timeout_ms > 0)
            .then(|| std::time::Duration::from_millis(self.request_timeout_ms))
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("PORTAL")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject settings the request layer cannot run with.
    pub fn validate(&self) -> crate::PortalResult<()> {
        if self.queue.max_concurrent == 0 {
            return Err(crate::PortalError::Config(
                "queue.max_concurrent must be at least 1".into(),
            ));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(crate::PortalError::Config("api.base_url is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.cache.default_ttl(), std::time::Duration::from_secs(300));
        assert_eq!(config.queue.max_concurrent, 6);
        assert_eq!(
            config.queue.request_timeout(),
            Some(std::time::Duration::from_secs(30))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let queue = QueueConfig {
            max_concurrent: 2,
            request_timeout_ms: 0,
        };
        assert_eq!(queue.request_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.queue.max_concurrent = 0;
        assert!(matches!(
            config.validate(),
            Err(crate::PortalError::Config(_))
        ));
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"queue": {"max_concurrent": 3}}"#).expect("valid config");
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.queue.request_timeout_ms, 30_000);
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
    }
}
