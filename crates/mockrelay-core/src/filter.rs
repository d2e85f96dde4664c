//! Traffic filter: the bypass policy consulted before capturing an HTTP
//! request as a `TestCase` (§ Traffic Filter).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The request attributes the filter rules are evaluated against.
#[derive(Debug, Clone)]
pub struct FilterableRequest<'a> {
    /// Destination host.
    pub host: &'a str,
    /// Destination port.
    pub port: u16,
    /// Request path.
    pub path: &'a str,
    /// HTTP method, upper-cased.
    pub method: &'a str,
    /// Request headers (case-sensitive keys as received).
    pub headers: &'a HashMap<String, String>,
}

/// `{host, path, port}` bypass rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BypassRule {
    /// Host to match, if set.
    pub host: Option<String>,
    /// Path prefix to match, if set.
    pub path: Option<String>,
    /// Port to match, if set.
    pub port: Option<u16>,
}

impl BypassRule {
    fn matches(&self, req: &FilterableRequest<'_>) -> bool {
        if let Some(host) = &self.host {
            if host != req.host {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if !req.path.starts_with(path.as_str()) {
                return false;
            }
        }
        if let Some(port) = self.port {
            if port != req.port {
                return false;
            }
        }
        self.host.is_some() || self.path.is_some() || self.port.is_some()
    }
}

/// URL + method rule: the URL is a regex matched against the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlMethodRule {
    /// Regex pattern matched against the path.
    pub url_pattern: String,
    /// Methods this rule applies to (upper-cased); empty means all methods.
    #[serde(default)]
    pub methods: Vec<String>,
}

impl UrlMethodRule {
    fn matches(&self, req: &FilterableRequest<'_>) -> bool {
        let method_ok = self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(req.method));
        if !method_ok {
            return false;
        }
        Regex::new(&self.url_pattern)
            .map(|re| re.is_match(req.path))
            .unwrap_or(false)
    }
}

/// Header regex rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Header name to inspect (case-insensitive).
    pub header: String,
    /// Regex the header value must match.
    pub pattern: String,
}

impl HeaderRule {
    fn matches(&self, req: &FilterableRequest<'_>) -> bool {
        let value = req
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.header))
            .map(|(_, v)| v.as_str());
        match value {
            Some(v) => Regex::new(&self.pattern).map(|re| re.is_match(v)).unwrap_or(false),
            None => false,
        }
    }
}

/// Whether a filter rule's member checks combine with AND or OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    /// All eligible family checks must match.
    And,
    /// Any eligible family check may match.
    Or,
}

impl Default for MatchType {
    fn default() -> Self {
        Self::Or
    }
}

/// One filter: up to three independent rule families combined by
/// `match_type`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRule {
    /// `{host, path, port}` bypass rule.
    pub bypass_rule: Option<BypassRule>,
    /// URL + method rule.
    pub url_methods: Option<UrlMethodRule>,
    /// Header regex rules.
    #[serde(default)]
    pub headers: Vec<HeaderRule>,
    /// Combination operator across the families present in this rule.
    #[serde(default)]
    pub match_type: MatchType,
}

impl FilterRule {
    /// Returns `(eligible, matched)`: `eligible` is true iff this rule has
    /// at least one family configured; `matched` is the combined result
    /// across configured families per `match_type`.
    fn eligible_and_matches(&self, req: &FilterableRequest<'_>) -> (bool, bool) {
        let mut checks = Vec::new();
        if let Some(bypass) = &self.bypass_rule {
            checks.push(bypass.matches(req));
        }
        if let Some(url_methods) = &self.url_methods {
            checks.push(url_methods.matches(req));
        }
        for header in &self.headers {
            checks.push(header.matches(req));
        }

        if checks.is_empty() {
            return (false, false);
        }

        let matched = match self.match_type {
            MatchType::And => checks.iter().all(|&c| c),
            MatchType::Or => checks.iter().any(|&c| c),
        };
        (true, matched)
    }
}

/// The full bypass policy: a request is bypassed if *any* filter's
/// eligible conjunction/disjunction matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficFilter {
    /// The configured filters.
    pub rules: Vec<FilterRule>,
}

impl TrafficFilter {
    /// Whether the request should bypass capture/matching entirely.
    pub fn should_bypass(&self, req: &FilterableRequest<'_>) -> bool {
        self.rules.iter().any(|rule| {
            let (eligible, matched) = rule.eligible_and_matches(req);
            eligible && matched
        })
    }
}
