//! Configuration surface the core reads. The core never loads or parses
//! configuration files itself — that's the CLI/config-loader's job, kept
//! an external collaborator — but it does consume a plain, serializable
//! struct of the options enumerated in the engine design, the way
//! `mockforge_core::proxy::ProxyConfig` is consumed by the proxy handler.

use crate::filter::FilterRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Compression codings the HTTP engine knows how to decode. Unknown
/// codings leave the body untouched and record the coding verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentCoding {
    /// `gzip`.
    Gzip,
    /// `deflate`.
    Deflate,
    /// Brotli (`br`).
    Brotli,
    /// `zstd`.
    Zstd,
    /// No encoding.
    Identity,
}

impl ContentCoding {
    /// Parse a `Content-Encoding` token, case-insensitively.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            "zstd" => Some(Self::Zstd),
            "identity" => Some(Self::Identity),
            _ => None,
        }
    }
}

/// Engine-wide configuration, mirroring the options table in the engine
/// design verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Informational only — the core does not bind sockets.
    pub proxy_port: u16,
    /// Informational only — the core does not bind sockets.
    pub dns_port: u16,
    /// Fallback credential lookup for SASL payloads, keyed by user.
    #[serde(default)]
    pub mongo_passwords: HashMap<String, String>,
    /// Fallback credential lookup used when no per-user entry matches.
    #[serde(default)]
    pub mongo_password: Option<String>,
    /// When true, mock delivery goes through the synchronous coordinator;
    /// otherwise mocks are pushed directly on the output channel.
    #[serde(default)]
    pub synchronous: bool,
    /// Replay mode: on a mock miss, pass through to the real destination
    /// instead of surfacing a miss event.
    #[serde(default)]
    pub fallback_on_miss: bool,
    /// Record-mode wall-clock duration. `None` means unbounded.
    #[serde(default)]
    pub record_timer: Option<Duration>,
    /// Replay mode: delay before the first response (a testing aid).
    #[serde(default)]
    pub delay: Option<Duration>,
    /// Traffic bypass policy.
    #[serde(default)]
    pub filters: Vec<FilterRule>,
    /// Cap for MySQL prepared-statement history.
    #[serde(default = "default_prepared_stmt_history_max")]
    pub prepared_stmt_history_max: usize,
    /// Coordinator TTL, in seconds.
    #[serde(default = "default_stale_mock_ttl_seconds")]
    pub stale_mock_ttl_seconds: u64,
    /// Bounded initial-read window, in bytes.
    #[serde(default = "default_initial_read_window")]
    pub initial_read_window_bytes: usize,
    /// Initial-read timeout.
    #[serde(default = "default_initial_read_timeout")]
    pub initial_read_timeout: Duration,
    /// Client-read timeout during replay's pull loop (RESP-style).
    #[serde(default = "default_client_read_timeout")]
    pub client_read_timeout: Duration,
    /// Timeout for outbound HTTP calls made on behalf of the application.
    #[serde(default = "default_external_http_timeout")]
    pub external_http_timeout: Duration,
    /// Content-Encodings the HTTP engine will attempt to decode.
    #[serde(default = "default_supported_codings")]
    pub supported_content_codings: Vec<ContentCoding>,
}

fn default_prepared_stmt_history_max() -> usize {
    1000
}

fn default_stale_mock_ttl_seconds() -> u64 {
    7
}

fn default_initial_read_window() -> usize {
    4096
}

fn default_initial_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_client_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_external_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_supported_codings() -> Vec<ContentCoding> {
    vec![
        ContentCoding::Gzip,
        ContentCoding::Deflate,
        ContentCoding::Brotli,
        ContentCoding::Zstd,
        ContentCoding::Identity,
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_port: 0,
            dns_port: 0,
            mongo_passwords: HashMap::new(),
            mongo_password: None,
            synchronous: false,
            fallback_on_miss: false,
            record_timer: None,
            delay: None,
            filters: Vec::new(),
            prepared_stmt_history_max: default_prepared_stmt_history_max(),
            stale_mock_ttl_seconds: default_stale_mock_ttl_seconds(),
            initial_read_window_bytes: default_initial_read_window(),
            initial_read_timeout: default_initial_read_timeout(),
            client_read_timeout: default_client_read_timeout(),
            external_http_timeout: default_external_http_timeout(),
            supported_content_codings: default_supported_codings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_design() {
        let cfg = Config::default();
        assert_eq!(cfg.prepared_stmt_history_max, 1000);
        assert_eq!(cfg.stale_mock_ttl_seconds, 7);
        assert_eq!(cfg.initial_read_window_bytes, 4096);
        assert_eq!(cfg.initial_read_timeout, Duration::from_secs(5));
        assert_eq!(cfg.client_read_timeout, Duration::from_secs(10));
        assert_eq!(cfg.external_http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn unknown_coding_is_not_parsed() {
        assert_eq!(ContentCoding::parse("br"), Some(ContentCoding::Brotli));
        assert_eq!(ContentCoding::parse("compress"), None);
    }
}
