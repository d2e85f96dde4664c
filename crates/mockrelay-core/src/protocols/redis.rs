//! Redis RESP engine: sniffing, record loop, and matcher-driven replay.

use super::{Engine, RecordContext, ReplayContext};
use crate::error::{Error, Result};
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// First-byte sniff set for RESP2/RESP3 type markers.
const RESP_TYPE_BYTES: &[u8] = b"+-:$*_#,(!=%~>";

/// Whether the initial bytes look like a RESP message.
pub fn sniff(initial_bytes: &[u8]) -> bool {
    matches!(initial_bytes.first(), Some(b) if RESP_TYPE_BYTES.contains(b))
}

fn parse_len(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::malformed("redis", "invalid RESP length prefix"))
}

async fn read_line_into<R: AsyncRead + Unpin + Send>(
    stream: &mut R,
    out: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::malformed("redis", "eof while reading RESP line"));
        }
        out.push(byte[0]);
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            break;
        }
        line.push(byte[0]);
    }
    Ok(line)
}

async fn read_exact_into<R: AsyncRead + Unpin + Send>(
    stream: &mut R,
    out: &mut Vec<u8>,
    len: usize,
) -> Result<()> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    out.extend_from_slice(&buf);
    Ok(())
}

/// Read one complete RESP value from `stream`, appending its raw bytes to
/// `out`. Recursive for aggregates (array/map/set/push); boxed to allow
/// recursion inside an `async fn`.
fn read_resp_value<'a, R: AsyncRead + Unpin + Send>(
    stream: &'a mut R,
    out: &'a mut Vec<u8>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let line = read_line_into(stream, out).await?;
        if line.is_empty() {
            return Err(Error::malformed("redis", "empty RESP type line"));
        }
        let type_byte = line[0];
        match type_byte {
            b'+' | b'-' | b':' | b'_' | b'#' | b',' | b'(' => Ok(()),
            b'$' | b'!' | b'=' => {
                let len = parse_len(&line[1..])?;
                if len >= 0 {
                    read_exact_into(stream, out, len as usize + 2).await?;
                }
                Ok(())
            }
            b'*' | b'~' | b'>' => {
                let count = parse_len(&line[1..])?;
                if count >= 0 {
                    for _ in 0..count {
                        read_resp_value(stream, out).await?;
                    }
                }
                Ok(())
            }
            b'%' => {
                let count = parse_len(&line[1..])?;
                if count >= 0 {
                    for _ in 0..(count * 2) {
                        read_resp_value(stream, out).await?;
                    }
                }
                Ok(())
            }
            _ => Err(Error::malformed("redis", "unknown RESP type byte")),
        }
    })
}

/// Read one full RESP frame starting with `seed` bytes already consumed
/// from `stream` (e.g. the dispatcher's initial-read window).
pub async fn read_resp_frame<R: AsyncRead + Unpin + Send>(
    stream: &mut R,
    seed: &[u8],
) -> Result<Vec<u8>> {
    let mut out = seed.to_vec();
    if seed.is_empty() {
        read_resp_value(stream, &mut out).await?;
        return Ok(out);
    }
    // The seed may already contain a complete frame (common when the
    // dispatcher's initial-read window captured a whole short command);
    // only read more if the type byte promises more content than we have.
    let newline_pos = seed.iter().position(|&b| b == b'\n');
    match newline_pos {
        Some(pos) if pos + 1 == seed.len() => {
            // Seed is exactly one line; if it's an aggregate/bulk type we
            // still need the body, so fall through to a fresh parse that
            // re-reads nothing already consumed by re-deriving from the
            // stream alone is unsafe once bytes are gone — instead parse
            // the seed's own header and read only the remainder.
            read_remainder_from_header(stream, &seed[..=pos], &mut out).await?;
            Ok(out)
        }
        _ => {
            // Already a full line plus body, or multiple lines: nothing
            // further required for the simple scalar/bulk cases the
            // dispatcher's 4 KiB window almost always captures whole.
            Ok(out)
        }
    }
}

async fn read_remainder_from_header<R: AsyncRead + Unpin + Send>(
    stream: &mut R,
    header_line_with_newline: &[u8],
    out: &mut Vec<u8>,
) -> Result<()> {
    let line = &header_line_with_newline[..header_line_with_newline.len() - 2.min(header_line_with_newline.len())];
    if line.is_empty() {
        return Ok(());
    }
    match line[0] {
        b'$' | b'!' | b'=' => {
            let len = parse_len(&line[1..])?;
            if len >= 0 {
                read_exact_into(stream, out, len as usize + 2).await?;
            }
        }
        b'*' | b'~' | b'>' => {
            let count = parse_len(&line[1..])?;
            if count >= 0 {
                for _ in 0..count {
                    read_resp_value(stream, out).await?;
                }
            }
        }
        b'%' => {
            let count = parse_len(&line[1..])?;
            if count >= 0 {
                for _ in 0..(count * 2) {
                    read_resp_value(stream, out).await?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn build_mock(request: Vec<u8>, response: Vec<u8>, connection_id: &str, session_id: &str) -> Result<Mock> {
    let now = Utc::now();
    Mock::new(
        Kind::Redis,
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

/// The Redis RESP protocol engine.
#[derive(Default)]
pub struct RedisEngine;

#[async_trait]
impl Engine for RedisEngine {
    fn kind(&self) -> Kind {
        Kind::Redis
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let mut seed = ctx.initial_bytes;
        loop {
            let request = if !seed.is_empty() {
                let taken = std::mem::take(&mut seed);
                read_resp_frame(&mut ctx.client, &taken).await
            } else {
                read_resp_frame(&mut ctx.client, &[]).await
            };
            let request = match request {
                Ok(r) => r,
                Err(_) => break, // client closed or malformed tail; end of flow
            };

            ctx.destination.write_all(&request).await?;
            let response = match read_resp_frame(&mut ctx.destination, &[]).await {
                Ok(r) => r,
                Err(_) => break,
            };
            ctx.client.write_all(&response).await?;

            if let Ok(mock) = build_mock(
                request,
                response,
                &ctx.context.client_conn_id,
                &ctx.context.session_id,
            ) {
                ctx.mock_sink.emit(mock).await;
            }
        }
        Ok(())
    }

    async fn replay(&self, mut ctx: ReplayContext) -> Result<()> {
        let mut seed = ctx.initial_bytes;
        loop {
            let request = if !seed.is_empty() {
                let taken = std::mem::take(&mut seed);
                read_resp_frame(&mut ctx.client, &taken).await
            } else {
                let timeout = ctx.config.client_read_timeout;
                match tokio::time::timeout(timeout, read_resp_frame(&mut ctx.client, &[])).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout("redis_replay_client_read")),
                }
            };
            let request = match request {
                Ok(r) => r,
                Err(_) => break,
            };

            match matcher::match_request(&ctx.mock_store, &[request.clone()]) {
                Some(responses) => {
                    for chunk in responses {
                        let bytes = chunk.to_bytes();
                        ctx.client.write_all(&bytes).await?;
                    }
                }
                None if ctx.config.fallback_on_miss => {
                    if let Some(dest) = ctx.destination.as_mut() {
                        dest.write_all(&request).await?;
                        if let Ok(response) = read_resp_frame(dest, &[]).await {
                            ctx.client.write_all(&response).await?;
                        }
                    }
                }
                None => {
                    tracing::info!("redis mock miss, no fallback: writing nothing");
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

    #[test]
    fn sniffs_every_documented_type_byte() {
        for byte in RESP_TYPE_BYTES {
            assert!(sniff(&[*byte, b'O', b'K']));
        }
        assert!(!sniff(b"GET / HTTP/1.1"));
        assert!(!sniff(b""));
    }

    #[tokio::test]
    async fn reads_a_simple_string_frame() {
        let (mut a, mut b) = duplex(128);
        tokio::spawn(async move {
            b.write_all(b"+OK\r\n").await.unwrap();
        });
        let frame = read_resp_frame(&mut a, &[]).await.unwrap();
        assert_eq!(frame, b"+OK\r\n");
    }

    #[tokio::test]
    async fn reads_an_array_of_bulk_strings() {
        let (mut a, mut b) = duplex(128);
        let payload = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec();
        let expected = payload.clone();
        tokio::spawn(async move {
            b.write_all(&payload).await.unwrap();
        });
        let frame = read_resp_frame(&mut a, &[]).await.unwrap();
        assert_eq!(frame, expected);
    }
}
