//! `TestCase`: the application-facing captured interaction, distinct from
//! a `Mock` (which captures outbound dependency calls).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mock::{new_mock_id, Kind};

/// A captured HTTP/gRPC request, decoded and ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// HTTP method or RPC name.
    pub method: String,
    /// Path (including query string) or fully-qualified RPC method.
    pub path: String,
    /// Headers/metadata.
    pub headers: HashMap<String, String>,
    /// Decoded body. Non-ASCII payloads are base64-encoded with
    /// `body_is_binary` set.
    pub body: String,
    /// Whether `body` is base64 rather than raw text.
    pub body_is_binary: bool,
    /// Multipart form fields, if the request was `multipart/form-data`.
    /// When populated, `body` is cleared per the capture contract.
    #[serde(default)]
    pub form: HashMap<String, Vec<String>>,
}

/// A captured HTTP/gRPC response, decoded and ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    /// Status code (HTTP) or gRPC status.
    pub status_code: u16,
    /// Headers/metadata.
    pub headers: HashMap<String, String>,
    /// Decoded body, same encoding convention as [`CapturedRequest::body`].
    pub body: String,
    /// Whether `body` is base64 rather than raw text.
    pub body_is_binary: bool,
}

/// The application-facing captured interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable identifier.
    pub id: String,
    /// Protocol this test case was captured over.
    pub kind: Kind,
    /// The request the application received.
    pub request: CapturedRequest,
    /// The response the application sent.
    pub response: CapturedResponse,
    /// When this interaction was captured.
    pub created_at: DateTime<Utc>,
    /// Fields the replay comparator should ignore, keyed by JSON-pointer
    /// path to the set of segments considered noisy.
    #[serde(default)]
    pub noise: HashMap<String, Vec<String>>,
    /// The name supplied via the `Keploy-Test-Name` request header, if any.
    #[serde(default)]
    pub name: Option<String>,
}

impl TestCase {
    /// Build a new test case with a fresh identifier.
    pub fn new(
        kind: Kind,
        request: CapturedRequest,
        response: CapturedResponse,
        created_at: DateTime<Utc>,
        name: Option<String>,
    ) -> Self {
        Self {
            id: new_mock_id().replacen("mock-", "test-", 1),
            kind,
            request,
            response,
            created_at,
            noise: HashMap::new(),
            name,
        }
    }
}

/// Decode a body per the capture contract: raw text for ASCII payloads,
/// base64 with a binary tag otherwise.
pub fn encode_body(bytes: &[u8]) -> (String, bool) {
    if bytes.is_ascii() {
        (String::from_utf8_lossy(bytes).into_owned(), false)
    } else {
        (
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
            true,
        )
    }
}
