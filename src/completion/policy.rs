//! Streaming capability probing
//!
//! Whether to ask the endpoint for a streamed response is decided once per
//! configuration change, without any network round trip.

use serde::{Deserialize, Serialize};

/// How to treat endpoints that are not known to stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamingPolicy {
    /// Assume any well-formed endpoint streams
    #[default]
    Optimistic,
    /// Stream only for hosts in the known list
    KnownHostsOnly,
    /// Never stream
    Disabled,
}

/// Decide whether streamed requests should be used
///
/// Requires a URL and key, and an explicit `http`/`https` scheme. Streamed
/// bodies are always available to the transport, so the remaining decision
/// is the host check followed by `policy`.
#[must_use]
pub fn probe_streaming(
    api_url: &str,
    api_key: &str,
    known_hosts: &[String],
    policy: StreamingPolicy,
) -> bool {
    if api_url.is_empty() || api_key.is_empty() {
        tracing::debug!("API URL or key missing, streaming disabled");
        return false;
    }

    let Ok(url) = url::Url::parse(api_url) else {
        tracing::debug!(api_url, "API URL does not parse, streaming disabled");
        return false;
    };

    if !matches!(url.scheme(), "http" | "https") {
        tracing::debug!(scheme = url.scheme(), "API URL lacks http/https scheme, streaming disabled");
        return false;
    }

    if policy == StreamingPolicy::Disabled {
        return false;
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();
    let known = known_hosts.iter().any(|known| {
        let known = known.to_lowercase();
        host == known || host.ends_with(&format!(".{known}"))
    });

    if known {
        tracing::debug!(host, "known streaming host");
        return true;
    }

    let supported = policy == StreamingPolicy::Optimistic;
    tracing::debug!(host, supported, "unknown host, applying streaming policy");
    supported
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        vec!["api.openai.com".to_string()]
    }

    #[test]
    fn test_requires_url_and_key() {
        assert!(!probe_streaming("", "key", &known(), StreamingPolicy::Optimistic));
        assert!(!probe_streaming(
            "https://api.openai.com/v1/chat/completions",
            "",
            &known(),
            StreamingPolicy::Optimistic
        ));
    }

    #[test]
    fn test_requires_http_scheme() {
        assert!(!probe_streaming("api.openai.com/v1", "key", &known(), StreamingPolicy::Optimistic));
        assert!(!probe_streaming("ftp://example.com/x", "key", &known(), StreamingPolicy::Optimistic));
    }

    #[test]
    fn test_known_host_streams_under_any_enabled_policy() {
        let url = "https://api.openai.com/v1/chat/completions";
        assert!(probe_streaming(url, "key", &known(), StreamingPolicy::Optimistic));
        assert!(probe_streaming(url, "key", &known(), StreamingPolicy::KnownHostsOnly));
        assert!(!probe_streaming(url, "key", &known(), StreamingPolicy::Disabled));
    }

    #[test]
    fn test_unknown_host_follows_policy() {
        let url = "http://localhost:8080/v1/chat/completions";
        assert!(probe_streaming(url, "key", &known(), StreamingPolicy::Optimistic));
        assert!(!probe_streaming(url, "key", &known(), StreamingPolicy::KnownHostsOnly));
    }
}
