use std::time::Duration;

use crate::client::ExponentialBackoff;

/// Per-connection settings: naming (which scopes cache keys and tags),
/// the default namespace seeded into every query, retry tuning and the
/// default cache lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    name: String,
    namespace: Option<String>,
    retry_attempts: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    cache_ttl: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            retry_attempts: ExponentialBackoff::DEFAULT_RETRIES,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
            cache_ttl: None,
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Default lifetime for cached single-entity lookups. `None` keeps
    /// entries until invalidated or evicted.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn default_cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.retry_attempts)
            .base_delay(self.retry_base_delay)
            .max_delay(self.retry_max_delay)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("default")
    }
}
