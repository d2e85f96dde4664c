//! Kafka wire protocol framing and correlation-ID pairing.
//!
//! This crate is deliberately `Engine`-agnostic: it only knows how to frame
//! length-prefixed Kafka messages, parse just enough of a request header to
//! pair it with its response, and track in-flight correlation IDs. The
//! `mockrelay-core` crate wraps this in its `Engine` trait.

use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while framing or parsing Kafka messages.
#[derive(Debug, Error)]
pub enum KafkaError {
    /// The buffer was shorter than a length-prefixed frame requires.
    #[error("kafka message too short: {0}")]
    TooShort(&'static str),
    /// A client ID byte span was not valid UTF-8.
    #[error("invalid client id encoding")]
    InvalidClientId,
    /// A response's correlation ID had no matching pending request.
    #[error("unmatched correlation id {0}")]
    UnmatchedCorrelationId(i32),
}

type Result<T> = std::result::Result<T, KafkaError>;

/// Lower/upper bounds of the sniffing predicate's `api_key`/`api_version`
/// ranges, taken from the wire spec's documented sniff rule.
const MAX_SNIFF_API_KEY: i16 = 67;
const MAX_SNIFF_API_VERSION: i16 = 20;

/// Whether `initial_bytes` looks like a Kafka request: at least 12 bytes,
/// and (after the 4-byte length prefix) `api_key` and `api_version` fall
/// within their documented sniff ranges.
pub fn sniff(initial_bytes: &[u8]) -> bool {
    if initial_bytes.len() < 12 {
        return false;
    }
    let api_key = be_i16(initial_bytes, 4);
    let api_version = be_i16(initial_bytes, 6);
    (0..=MAX_SNIFF_API_KEY).contains(&api_key) && (0..=MAX_SNIFF_API_VERSION).contains(&api_version)
}

fn be_i16(data: &[u8], offset: usize) -> i16 {
    ((data[offset] as i16) << 8) | (data[offset + 1] as i16)
}

fn be_i32(data: &[u8], offset: usize) -> i32 {
    ((data[offset] as i32) << 24)
        | ((data[offset + 1] as i32) << 16)
        | ((data[offset + 2] as i32) << 8)
        | (data[offset + 3] as i32)
}

/// A parsed Kafka request header (the v0, non-flexible layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaHeader {
    /// The request API key.
    pub api_key: i16,
    /// The request's API version.
    pub api_version: i16,
    /// Correlation ID used to pair this request with its response.
    pub correlation_id: i32,
    /// The client ID string, if present.
    pub client_id: String,
}

/// A framed Kafka message: the 4-byte length prefix plus its payload,
/// already split apart.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The payload bytes, excluding the length prefix.
    pub payload: Vec<u8>,
}

/// Split one length-prefixed frame off the front of `buf`, returning the
/// frame and the number of bytes consumed. `None` if `buf` doesn't yet
/// contain a complete frame.
pub fn split_frame(buf: &[u8]) -> Option<(Frame, usize)> {
    if buf.len() < 4 {
        return None;
    }
    let len = be_i32(buf, 0);
    if len < 0 {
        return None;
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return None;
    }
    Some((
        Frame {
            payload: buf[4..total].to_vec(),
        },
        total,
    ))
}

/// Parse a request header out of a frame's payload (the bytes after the
/// 4-byte length prefix already stripped by [`split_frame`]).
pub fn parse_request_header(payload: &[u8]) -> Result<KafkaHeader> {
    if payload.len() < 8 {
        return Err(KafkaError::TooShort("request header"));
    }
    let api_key = be_i16(payload, 0);
    let api_version = be_i16(payload, 2);
    let correlation_id = be_i32(payload, 4);

    if payload.len() < 10 {
        // No room for a client ID length; treat as absent.
        return Ok(KafkaHeader {
            api_key,
            api_version,
            correlation_id,
            client_id: String::new(),
        });
    }
    let client_id_len = be_i16(payload, 8);
    let client_id = if client_id_len > 0 {
        let start = 10;
        let end = start + client_id_len as usize;
        if payload.len() < end {
            return Err(KafkaError::TooShort("client id"));
        }
        String::from_utf8(payload[start..end].to_vec()).map_err(|_| KafkaError::InvalidClientId)?
    } else {
        String::new()
    };

    Ok(KafkaHeader {
        api_key,
        api_version,
        correlation_id,
        client_id,
    })
}

/// A response's correlation ID, read from the first 4 bytes of its payload
/// (every Kafka response begins with the correlation ID it echoes).
pub fn response_correlation_id(payload: &[u8]) -> Result<i32> {
    if payload.len() < 4 {
        return Err(KafkaError::TooShort("response correlation id"));
    }
    Ok(be_i32(payload, 0))
}

/// A request still awaiting its paired response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// The parsed header.
    pub header: KafkaHeader,
    /// The raw request frame bytes (length prefix included), kept verbatim
    /// since flexible/compact header bodies beyond v0 are stored as-is
    /// rather than decoded field-by-field.
    pub raw: Vec<u8>,
}

/// Tracks in-flight requests awaiting a response, keyed by correlation ID,
/// per the wire spec's `DecodeContext`. Not shared across connections.
#[derive(Debug, Default)]
pub struct DecodeContext {
    pending_requests: HashMap<i32, PendingRequest>,
}

impl DecodeContext {
    /// A fresh, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request frame, keyed by its correlation ID. Returns the
    /// parsed header.
    pub fn on_request(&mut self, raw_frame: &[u8]) -> Result<KafkaHeader> {
        let (frame, _) = split_frame(raw_frame).ok_or(KafkaError::TooShort("request frame"))?;
        let header = parse_request_header(&frame.payload)?;
        self.pending_requests.insert(
            header.correlation_id,
            PendingRequest {
                header: header.clone(),
                raw: raw_frame.to_vec(),
            },
        );
        Ok(header)
    }

    /// Pair a response frame with its request, removing the pending entry
    /// on a match. Returns the matched request's header and raw bytes.
    /// An unmatched correlation ID is not an error at the protocol level —
    /// callers should log and pass the response through untouched.
    pub fn on_response(&mut self, raw_frame: &[u8]) -> Result<Option<PendingRequest>> {
        let (frame, _) = split_frame(raw_frame).ok_or(KafkaError::TooShort("response frame"))?;
        let correlation_id = response_correlation_id(&frame.payload)?;
        Ok(self.pending_requests.remove(&correlation_id))
    }

    /// Number of requests still awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending_requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s1_request() -> Vec<u8> {
        // length=15, api_key=18 (ApiVersions), api_version=0, correlation=1234,
        // client_id="test-client" (len 11).
        let mut buf = Vec::new();
        buf.extend_from_slice(&15i32.to_be_bytes());
        buf.extend_from_slice(&18i16.to_be_bytes());
        buf.extend_from_slice(&0i16.to_be_bytes());
        buf.extend_from_slice(&1234i32.to_be_bytes());
        buf.extend_from_slice(&11i16.to_be_bytes());
        buf.extend_from_slice(b"test-client");
        buf
    }

    fn s1_response() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4i32.to_be_bytes());
        buf.extend_from_slice(&1234i32.to_be_bytes());
        buf
    }

    #[test]
    fn sniffs_s1_apiversions_request() {
        assert!(sniff(&s1_request()));
    }

    #[test]
    fn rejects_out_of_range_api_key() {
        let mut buf = s1_request();
        buf[4..6].copy_from_slice(&200i16.to_be_bytes());
        assert!(!sniff(&buf));
    }

    #[test]
    fn s1_header_parses_and_pairs_with_response() {
        let request = s1_request();
        let (frame, consumed) = split_frame(&request).unwrap();
        assert_eq!(consumed, request.len());

        let header = parse_request_header(&frame.payload).unwrap();
        assert_eq!(header.api_key, 18);
        assert_eq!(header.api_version, 0);
        assert_eq!(header.correlation_id, 1234);
        assert_eq!(header.client_id, "test-client");

        let mut ctx = DecodeContext::new();
        ctx.on_request(&request).unwrap();
        assert_eq!(ctx.pending_len(), 1);

        let matched = ctx.on_response(&s1_response()).unwrap();
        assert!(matched.is_some());
        assert_eq!(matched.unwrap().header.correlation_id, 1234);
        assert_eq!(ctx.pending_len(), 0);
    }

    #[test]
    fn unmatched_response_is_not_an_error() {
        let mut ctx = DecodeContext::new();
        let result = ctx.on_response(&s1_response());
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn split_frame_waits_for_full_payload() {
        let full = s1_request();
        assert!(split_frame(&full[..full.len() - 1]).is_none());
        assert!(split_frame(&full).is_some());
    }
}
