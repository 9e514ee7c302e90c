//! Pool and client configuration, built with the consuming-builder style
//! (`with_*` methods returning `Self`).

use std::time::Duration;

/// Whether idle agents are evicted after a timeout, or retained indefinitely
/// subject to `pool_max_idle_per_host`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTimeout {
    Enabled(Duration),
    Disabled,
}

impl Default for IdleTimeout {
    fn default() -> Self {
        IdleTimeout::Enabled(Duration::from_secs(30))
    }
}

/// Per-origin pool bounds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pool_max_per_host: Option<usize>,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: IdleTimeout,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            pool_max_per_host: None,
            pool_max_idle_per_host: 0,
            pool_idle_timeout: IdleTimeout::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum concurrent agents per origin. `None` is unbounded; any value
    /// below 1 is clamped up to 1, the effective minimum.
    pub fn with_max_per_host(mut self, max: usize) -> Self {
        self.pool_max_per_host = Some(max.max(1));
        self
    }

    pub fn with_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.pool_max_idle_per_host = max_idle;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: IdleTimeout) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn max_per_host(&self) -> Option<usize> {
        self.pool_max_per_host
    }

    pub fn max_idle_per_host(&self) -> usize {
        self.pool_max_idle_per_host
    }

    pub fn idle_timeout(&self) -> IdleTimeout {
        self.pool_idle_timeout
    }

    /// The evictor's wake period: the lesser of the idle timeout and an
    /// internal 10s cap. `None` when eviction is disabled.
    pub fn eviction_interval(&self) -> Option<Duration> {
        match self.pool_idle_timeout {
            IdleTimeout::Disabled => None,
            IdleTimeout::Enabled(d) => Some(d.min(Duration::from_secs(10))),
        }
    }
}

/// Top-level client configuration, plumbed through to every pool the client
/// creates on demand.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub pool: PoolConfig,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}
