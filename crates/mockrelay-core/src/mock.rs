//! The `Mock` entity: a recorded outbound dependency interaction.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Protocol kind a [`Mock`] (or registered parser) is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// HTTP/1.1 request-response.
    Http,
    /// gRPC call captured over an HTTP/2 frame.
    Grpc,
    /// MySQL binary protocol command.
    MySql,
    /// PostgreSQL v3 frontend/backend message.
    Postgres,
    /// Redis RESP command.
    Redis,
    /// MongoDB wire message.
    Mongo,
    /// Kafka request/response pair.
    Kafka,
    /// Unrecognized protocol, recorded as opaque chunk pairs.
    Generic,
}

impl Kind {
    /// The registry/parser name associated with this kind.
    pub fn parser_name(self) -> &'static str {
        match self {
            Kind::Http => "http",
            Kind::Grpc => "grpc",
            Kind::MySql => "mysql",
            Kind::Postgres => "postgres",
            Kind::Redis => "redis",
            Kind::Mongo => "mongo",
            Kind::Kafka => "kafka",
            Kind::Generic => "generic",
        }
    }
}

/// A single request or response chunk, stored in the canonical on-disk
/// representation: raw UTF-8 for ASCII payloads, base64 for everything
/// else. Keeping the stored representation (rather than always decoding)
/// lets exact-match compare strings directly, per the matching algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Raw UTF-8 text if `binary` is false, base64 otherwise.
    pub data: String,
    /// Whether `data` is a base64 encoding of non-ASCII bytes.
    pub binary: bool,
}

impl Chunk {
    /// Build a chunk from raw bytes, choosing the representation per the
    /// ASCII/binary rule used throughout the capture layer.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_ascii() {
            Self {
                data: String::from_utf8_lossy(bytes).into_owned(),
                binary: false,
            }
        } else {
            Self {
                data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes),
                binary: true,
            }
        }
    }

    /// Recover the original bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.binary {
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &self.data)
                .unwrap_or_default()
        } else {
            self.data.clone().into_bytes()
        }
    }
}

/// The request/response payload and timing a [`Mock`] carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    /// Request chunks, in arrival order. Empty only for config mocks.
    pub requests: Vec<Chunk>,
    /// Response chunks, in arrival order.
    pub responses: Vec<Chunk>,
    /// Timestamp of the first request byte.
    pub req_ts: DateTime<Utc>,
    /// Timestamp of the first response byte. Must be `>= req_ts`.
    pub res_ts: DateTime<Utc>,
    /// Free-form metadata (e.g. `{"type": "config"}`).
    pub metadata: HashMap<String, String>,
}

/// A recorded outbound dependency interaction.
///
/// Invariants: `kind` is always set (enforced by the type), `req_ts <=
/// res_ts`, and the request side is non-empty unless `config_mock` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mock {
    /// Stable identifier, assigned at creation and reassigned (fresh) when
    /// the coordinator hands a buffered mock off to a test.
    pub id: String,
    /// The protocol this mock was captured from.
    pub kind: Kind,
    /// Request/response payload.
    pub spec: Spec,
    /// Connection that produced this mock.
    pub connection_id: String,
    /// Test session this connection belongs to.
    pub session_id: String,
    /// One-sided mocks (server greeting, unsolicited push) set this so the
    /// empty-request invariant doesn't reject them.
    pub config_mock: bool,
    /// Whether this mock has been served to a live request at least once.
    pub used: bool,
    /// Monotonic insertion counter, used by the matcher's stable tie-break
    /// and reset to `u64::MAX` on a filtered -> unfiltered CAS move.
    pub sort_order: u64,
}

impl Mock {
    /// Construct a new mock, validating the invariants from the data
    /// model (non-empty kind is structural; the rest are checked here).
    pub fn new(
        kind: Kind,
        spec: Spec,
        connection_id: impl Into<String>,
        session_id: impl Into<String>,
        config_mock: bool,
    ) -> Result<Self> {
        if spec.req_ts > spec.res_ts {
            return Err(Error::generic(
                "mock request timestamp must not be after response timestamp",
            ));
        }
        if spec.requests.is_empty() && !config_mock {
            return Err(Error::generic(
                "mock has an empty request side and is not marked as a config mock",
            ));
        }
        Ok(Self {
            id: new_mock_id(),
            kind,
            spec,
            connection_id: connection_id.into(),
            session_id: session_id.into(),
            config_mock,
            used: false,
            sort_order: 0,
        })
    }
}

/// Generate a fresh mock identifier: `mock-` followed by 8 random
/// alphanumeric characters, matching the coordinator's `resolve_range` ID
/// format.
pub fn new_mock_id() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect();
    format!("mock-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(requests: Vec<Chunk>) -> Spec {
        let now = Utc::now();
        Spec {
            requests,
            responses: vec![Chunk::from_bytes(b"ok")],
            req_ts: now,
            res_ts: now,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rejects_empty_request_without_config_flag() {
        let err = Mock::new(Kind::Http, spec(vec![]), "conn", "sess", false).unwrap_err();
        assert!(matches!(err, Error::Generic(_)));
    }

    #[test]
    fn allows_empty_request_as_config_mock() {
        let mock = Mock::new(Kind::MySql, spec(vec![]), "conn", "sess", true).unwrap();
        assert!(mock.config_mock);
        assert!(mock.id.starts_with("mock-"));
    }

    #[test]
    fn chunk_roundtrips_ascii_and_binary() {
        let ascii = Chunk::from_bytes(b"hello");
        assert!(!ascii.binary);
        assert_eq!(ascii.to_bytes(), b"hello");

        let binary = Chunk::from_bytes(&[0xff, 0x00, 0x80]);
        assert!(binary.binary);
        assert_eq!(binary.to_bytes(), vec![0xff, 0x00, 0x80]);
    }

    #[test]
    fn rejects_out_of_order_timestamps() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(1);
        let spec = Spec {
            requests: vec![Chunk::from_bytes(b"x")],
            responses: vec![],
            req_ts: now,
            res_ts: earlier,
            metadata: HashMap::new(),
        };
        assert!(Mock::new(Kind::Redis, spec, "c", "s", false).is_err());
    }
}
