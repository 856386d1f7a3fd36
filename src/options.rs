//! Generic options structures for transport, session and timeline configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Default address of the local RAG backend.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5001";

/// Whole-operation ceiling applied to agent runs by default.
pub const DEFAULT_AGENT_DEADLINE: Duration = Duration::from_secs(300);

const BASE_URL_ENV: &str = "RAGSTREAM_BASE_URL";
const API_KEY_ENV: &str = "RAGSTREAM_API_KEY";
const PROXY_ENV: &str = "RAGSTREAM_PROXY";

/// API key wrapper whose `Debug` output is redacted.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Transport settings shared by every endpoint, plus the settings of the
/// concrete transport `T`.
///
/// # Example
/// ```rust
/// use ragstream::options::{TransportOptions, HttpTransport};
/// use std::time::Duration;
///
/// let options = TransportOptions::new(
///     HttpTransport::default().with_base_url("http://localhost:5001".to_string()),
/// )
/// .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions<T> {
    /// Connect and idle-read timeout. Not applied to the whole response.
    pub timeout: Option<Duration>,

    /// Settings of the concrete transport
    pub provider: T,
}

/// Where and how to reach the RAG backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Bearer token, if the backend sits behind authentication
    pub api_key: Option<SecretString>,

    /// Backend address, `http://localhost:5001` when unset
    pub base_url: Option<String>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,

    /// Read the body incrementally. When false, the full body is fetched
    /// first and parsed as one chunk.
    pub incremental: bool,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            proxy: None,
            extra_headers: None,
            incremental: true,
        }
    }
}

impl HttpTransport {
    /// Create new HTTP transport options with an API key.
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Build transport options from `RAGSTREAM_*` environment variables.
    ///
    /// Blank values count as unset.
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            api_key: var(API_KEY_ENV).map(SecretString::new),
            base_url: var(BASE_URL_ENV),
            proxy: var(PROXY_ENV),
            ..Self::default()
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set extra headers.
    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Choose between incremental reading and the full-body fallback.
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

impl<T> TransportOptions<T> {
    /// Create new transport options with provider-specific configuration.
    pub fn new(provider: T) -> Self {
        Self {
            timeout: None,
            provider,
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for TransportOptions<HttpTransport> {
    fn default() -> Self {
        Self::new(HttpTransport::default())
    }
}

/// Per-session options.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Ceiling for the whole request/response cycle
    pub deadline: Option<Duration>,
}

impl StreamOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Tuning knobs of the step timeline heuristics.
#[derive(Debug, Clone)]
pub struct TimelineOptions {
    /// Identical progress messages within this window are collapsed
    pub dedup_window: Duration,

    /// De-duplication window for steps recovered from answer chunks
    pub chunk_dedup_window: Duration,

    /// Window over which generic fallback steps are rate limited
    pub fallback_window: Duration,

    /// Maximum generic fallback steps per window
    pub fallback_limit: usize,

    /// Number of detailed actions kept
    pub detailed_action_limit: usize,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(2),
            chunk_dedup_window: Duration::from_secs(3),
            fallback_window: Duration::from_secs(5),
            fallback_limit: 2,
            detailed_action_limit: 10,
        }
    }
}

/// Options of the agent-execution consumer.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub timeline: TimelineOptions,

    /// Treat answer chunks carrying step emojis as progress
    pub reroute_emoji_chunks: bool,

    pub stream: StreamOptions,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            timeline: TimelineOptions::default(),
            reroute_emoji_chunks: true,
            stream: StreamOptions::default().with_deadline(DEFAULT_AGENT_DEADLINE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_defaults() {
        let transport = HttpTransport::default();
        assert!(transport.incremental);
        assert_eq!(transport.base_url(), DEFAULT_BASE_URL);

        let transport = transport.with_base_url("http://rag.local:8000/".to_string());
        assert_eq!(transport.base_url(), "http://rag.local:8000");
    }

    #[test]
    fn test_secret_is_redacted() {
        let transport = HttpTransport::new("sk-123");
        let debug = format!("{transport:?}");
        assert!(!debug.contains("sk-123"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_with_header_accumulates() {
        let transport = HttpTransport::default()
            .with_header("x-a".to_string(), "1".to_string())
            .with_header("x-b".to_string(), "2".to_string());
        assert_eq!(transport.extra_headers.map(|h| h.len()), Some(2));
    }

    #[test]
    fn test_agent_defaults_carry_deadline() {
        let options = AgentOptions::default();
        assert_eq!(options.stream.deadline, Some(DEFAULT_AGENT_DEADLINE));
        assert!(options.reroute_emoji_chunks);
        assert_eq!(options.timeline.detailed_action_limit, 10);
    }
}
