//! Configuration for the sync engine.

use std::time::Duration;

/// Remote store host used when none is configured.
pub const DEFAULT_REMOTE_HOST: &str = "127.0.0.1";
/// Remote store port used when none (or an invalid one) is configured.
pub const DEFAULT_REMOTE_PORT: u16 = 9980;
/// Shortest sleep slice the sync loop will use.
pub const MIN_POLL_SLICE: Duration = Duration::from_millis(1);

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Owner private key, passed to the remote store with every write.
    pub owner_private: String,
    /// Owner public key, used to filter queries to our own records.
    pub owner_public: String,
    /// Remote store host.
    pub remote_host: String,
    /// Remote store port.
    pub remote_port: u16,
    /// Whether member online pulses are pushed.
    pub store_online_state: bool,
    /// Delay between sync cycles.
    pub poll_interval: Duration,
    /// Granularity at which the inter-cycle sleep checks for shutdown.
    pub poll_slice: Duration,
    /// How far before "now" the next pull window starts.
    pub requery_overlap: Duration,
    /// Overall timeout for a single HTTP request.
    pub request_timeout: Duration,
}

impl SyncConfig {
    /// Creates a new sync configuration for the given remote owner keys.
    pub fn new(owner_private: impl Into<String>, owner_public: impl Into<String>) -> Self {
        Self {
            owner_private: owner_private.into(),
            owner_public: owner_public.into(),
            remote_host: DEFAULT_REMOTE_HOST.into(),
            remote_port: DEFAULT_REMOTE_PORT,
            store_online_state: false,
            poll_interval: Duration::from_secs(2),
            poll_slice: Duration::from_millis(100),
            requery_overlap: Duration::from_secs(120),
            request_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the remote store address.
    ///
    /// An empty host keeps the default host; a port outside `1..=65535`
    /// keeps the default port.
    pub fn with_remote(mut self, host: impl Into<String>, port: u32) -> Self {
        let host = host.into();
        self.remote_host = if host.is_empty() {
            DEFAULT_REMOTE_HOST.into()
        } else {
            host
        };
        self.remote_port = match u16::try_from(port) {
            Ok(p) if p > 0 => p,
            _ => DEFAULT_REMOTE_PORT,
        };
        self
    }

    /// Enables or disables pushing member online pulses.
    pub fn with_online_state(mut self, enabled: bool) -> Self {
        self.store_online_state = enabled;
        self
    }

    /// Sets the delay between sync cycles.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the shutdown check granularity of the inter-cycle sleep.
    ///
    /// Slices shorter than [`MIN_POLL_SLICE`] are raised to it.
    pub fn with_poll_slice(mut self, slice: Duration) -> Self {
        self.poll_slice = slice.max(MIN_POLL_SLICE);
        self
    }

    /// Sets the pull window overlap.
    pub fn with_requery_overlap(mut self, overlap: Duration) -> Self {
        self.requery_overlap = overlap;
        self
    }

    /// Sets the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the remote store base URL.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.remote_host, self.remote_port)
    }

    /// Sleep slice actually used, never below [`MIN_POLL_SLICE`] even if the
    /// field was set directly.
    pub(crate) fn effective_poll_slice(&self) -> Duration {
        self.poll_slice.max(MIN_POLL_SLICE)
    }

    /// Number of sleep slices making up one poll interval (at least one).
    pub(crate) fn sleep_slices(&self) -> u32 {
        let slice = self.effective_poll_slice().as_millis();
        let slices = self.poll_interval.as_millis() / slice;
        u32::try_from(slices).unwrap_or(u32::MAX).max(1)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.remote_host, "127.0.0.1");
        assert_eq!(config.remote_port, 9980);
        assert!(!config.store_online_state);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.requery_overlap, Duration::from_secs(120));
        assert_eq!(config.sleep_slices(), 20);
        assert_eq!(config.base_url(), "http://127.0.0.1:9980");
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("priv", "pub")
            .with_remote("lf.example.com", 9999)
            .with_online_state(true)
            .with_poll_interval(Duration::from_millis(50))
            .with_poll_slice(Duration::from_millis(10))
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.owner_private, "priv");
        assert_eq!(config.owner_public, "pub");
        assert_eq!(config.base_url(), "http://lf.example.com:9999");
        assert!(config.store_online_state);
        assert_eq!(config.sleep_slices(), 5);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_remote_falls_back_to_defaults() {
        let config = SyncConfig::default().with_remote("", 0);
        assert_eq!(config.remote_host, DEFAULT_REMOTE_HOST);
        assert_eq!(config.remote_port, DEFAULT_REMOTE_PORT);

        let config = SyncConfig::default().with_remote("host", 70000);
        assert_eq!(config.remote_port, DEFAULT_REMOTE_PORT);
    }

    #[test]
    fn sleep_slices_never_zero() {
        let config = SyncConfig::default()
            .with_poll_interval(Duration::ZERO)
            .with_poll_slice(Duration::ZERO);
        assert_eq!(config.sleep_slices(), 1);
    }

    #[test]
    fn zero_poll_slice_is_clamped() {
        let config = SyncConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_poll_slice(Duration::ZERO);
        assert_eq!(config.poll_slice, MIN_POLL_SLICE);
        assert_eq!(config.effective_poll_slice(), MIN_POLL_SLICE);
        assert_eq!(config.sleep_slices(), 50);

        let mut direct = SyncConfig::default().with_poll_interval(Duration::from_millis(50));
        direct.poll_slice = Duration::ZERO;
        assert_eq!(direct.effective_poll_slice(), MIN_POLL_SLICE);
        assert_eq!(direct.sleep_slices(), 50);
    }
}
