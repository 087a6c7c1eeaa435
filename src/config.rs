use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.tardis.dev";
const DEFAULT_CONCURRENCY_CEILING: usize = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Configuration for a [`TardisClient`](crate::TardisClient).
///
/// Built with the same `bon`-powered builder pattern the teacher crate uses
/// for its request params (e.g. `openalex::ListParams::builder()`), since
/// every field here is optional and has a sensible default.
///
/// ```
/// use tardis_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .api_key("my-key")
///     .build();
/// assert_eq!(config.endpoint(), "https://api.tardis.dev");
/// ```
#[derive(Debug, Clone, bon::Builder)]
#[builder(on(String, into))]
pub struct ClientConfig {
    /// Base URL of the data-feeds endpoint. Defaults to the public service.
    #[builder(default = DEFAULT_ENDPOINT.to_string())]
    endpoint: String,

    /// Local cache root. Defaults to `<OS temp dir>/.tardis-cache`.
    #[builder(default = default_cache_dir())]
    cache_dir: PathBuf,

    /// Optional bearer API key, sent as `Authorization: Bearer <key>` when set.
    api_key: Option<String>,

    /// Per-request HTTP timeout. Defaults to 60 seconds.
    #[builder(default = Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))]
    http_timeout: Duration,

    /// Optional HTTP/HTTPS proxy URL, applied to the session's `reqwest::Client`.
    http_proxy: Option<String>,

    /// Ceiling for the orchestrator's adaptive concurrency limit. Defaults to 60.
    #[builder(default = DEFAULT_CONCURRENCY_CEILING)]
    concurrency_ceiling: usize,
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(".tardis-cache")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ClientConfig {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_dir
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn http_proxy(&self) -> Option<&str> {
        self.http_proxy.as_deref()
    }

    pub fn concurrency_ceiling(&self) -> usize {
        self.concurrency_ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.cache_dir(), default_cache_dir());
        assert_eq!(config.concurrency_ceiling(), DEFAULT_CONCURRENCY_CEILING);
        assert_eq!(
            config.http_timeout(),
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
        assert!(config.api_key().is_none());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = ClientConfig::builder()
            .endpoint("https://example.test")
            .api_key("abc")
            .concurrency_ceiling(5)
            .build();
        assert_eq!(config.endpoint(), "https://example.test");
        assert_eq!(config.api_key(), Some("abc"));
        assert_eq!(config.concurrency_ceiling(), 5);
    }
}
