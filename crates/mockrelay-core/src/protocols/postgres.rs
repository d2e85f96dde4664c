//! PostgreSQL v3 engine: opaque, length-prefixed message recording.
//!
//! Per the engine's Non-goals, deep field decoding of the extended-query
//! protocol is out of scope; messages are framed and stored verbatim, the
//! same "store body as-is" treatment the wire spec already prescribes for
//! Kafka's flexible headers.

use super::{Engine, RecordContext, ReplayContext};
use crate::error::{Error, Result};
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const STARTUP_PROTOCOL_MAJOR: u16 = 3;
const SSL_REQUEST_CODE: i32 = 80_877_103;
/// Front-end message type bytes this engine recognizes as "probably
/// Postgres" once past the untyped startup phase.
const TYPED_MESSAGE_BYTES: &[u8] = b"QPBEDCSXHFpdcf";

fn be_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Whether `initial_bytes` looks like a Postgres v3 startup message, an
/// SSL negotiation request, or a typed frontend message.
pub fn sniff(initial_bytes: &[u8]) -> bool {
    if initial_bytes.len() < 8 {
        return false;
    }
    let len = be_i32(initial_bytes, 0);
    if len < 8 {
        return false;
    }
    let code_or_version = be_i32(initial_bytes, 4);
    if code_or_version == SSL_REQUEST_CODE {
        return true;
    }
    let major = (code_or_version >> 16) as u16;
    if major == STARTUP_PROTOCOL_MAJOR {
        return true;
    }
    TYPED_MESSAGE_BYTES.contains(&initial_bytes[0])
}

/// Read one Postgres message: untyped (`length` only, startup-phase) if
/// `untyped` is set, else `type_byte + length(includes itself)`.
async fn read_one_message<R: AsyncRead + Unpin>(
    stream: &mut R,
    seed: &mut Vec<u8>,
    untyped: bool,
) -> Result<Vec<u8>> {
    let header_len = if untyped { 4 } else { 5 };
    while seed.len() < header_len {
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::malformed("postgres", "eof before message header"));
        }
        seed.extend_from_slice(&buf[..n]);
    }
    let len_offset = if untyped { 0 } else { 1 };
    let len = be_i32(seed, len_offset);
    if len < 4 {
        return Err(Error::malformed("postgres", "length field below minimum"));
    }
    let total = if untyped { len as usize } else { 1 + len as usize };

    while seed.len() < total {
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::malformed("postgres", "eof before message body"));
        }
        seed.extend_from_slice(&buf[..n]);
    }
    Ok(seed.drain(..total).collect())
}

fn build_mock(request: Vec<u8>, response: Vec<u8>, connection_id: &str, session_id: &str) -> Result<Mock> {
    let now = Utc::now();
    Mock::new(
        Kind::Postgres,
        Spec {
            requests: vec![Chunk::from_bytes(&request)],
            responses: vec![Chunk::from_bytes(&response)],
            req_ts: now,
            res_ts: now,
            metadata: HashMap::new(),
        },
        connection_id,
        session_id,
        false,
    )
}

/// The PostgreSQL frontend/backend protocol engine.
#[derive(Default)]
pub struct PostgresEngine;

#[async_trait]
impl Engine for PostgresEngine {
    fn kind(&self) -> Kind {
        Kind::Postgres
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let mut client_seed = ctx.initial_bytes;
        let mut first = true;
        loop {
            let untyped = first;
            first = false;
            let request = match read_one_message(&mut ctx.client, &mut client_seed, untyped).await {
                Ok(r) => r,
                Err(_) => break,
            };
            ctx.destination.write_all(&request).await?;

            let mut dest_seed = Vec::new();
            // Backend messages are always typed, even during startup.
            let response = match read_one_message(&mut ctx.destination, &mut dest_seed, false).await {
                Ok(r) => r,
                Err(_) => break,
            };
            ctx.client.write_all(&response).await?;

            if let Ok(mock) = build_mock(request, response, &ctx.context.client_conn_id, &ctx.context.session_id) {
                ctx.mock_sink.emit(mock).await;
            }
        }
        Ok(())
    }

    async fn replay(&self, mut ctx: ReplayContext) -> Result<()> {
        let mut client_seed = ctx.initial_bytes;
        let mut first = true;
        loop {
            let untyped = first;
            first = false;
            let request = match read_one_message(&mut ctx.client, &mut client_seed, untyped).await {
                Ok(r) => r,
                Err(_) => break,
            };

            match matcher::match_request(&ctx.mock_store, &[request.clone()]) {
                Some(responses) => {
                    for chunk in responses {
                        ctx.client.write_all(&chunk.to_bytes()).await?;
                    }
                }
                None if ctx.config.fallback_on_miss => {
                    if let Some(dest) = ctx.destination.as_mut() {
                        dest.write_all(&request).await?;
                        let mut dest_seed = Vec::new();
                        if let Ok(response) = read_one_message(dest, &mut dest_seed, false).await {
                            ctx.client.write_all(&response).await?;
                        }
                    }
                }
                None => {
                    tracing::warn!("postgres mock miss with no fallback configured");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn startup_message() -> Vec<u8> {
        let mut buf = Vec::new();
        let params = b"user\0postgres\0\0";
        let total = 4 + 4 + params.len();
        buf.extend_from_slice(&(total as i32).to_be_bytes());
        buf.extend_from_slice(&((3u32 << 16) | 0).to_be_bytes());
        buf.extend_from_slice(params);
        buf
    }

    #[test]
    fn sniffs_a_v3_startup_message() {
        assert!(sniff(&startup_message()));
    }

    #[test]
    fn sniffs_ssl_request() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8i32.to_be_bytes());
        buf.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
        assert!(sniff(&buf));
    }

    #[test]
    fn rejects_unrelated_bytes() {
        assert!(!sniff(b"not postgres"));
    }

    #[tokio::test]
    async fn reads_the_full_startup_message() {
        let (mut a, mut b) = duplex(256);
        let payload = startup_message();
        let expected = payload.clone();
        tokio::spawn(async move {
            b.write_all(&payload).await.unwrap();
        });
        let mut seed = Vec::new();
        let msg = read_one_message(&mut a, &mut seed, true).await.unwrap();
        assert_eq!(msg, expected);
    }
}
