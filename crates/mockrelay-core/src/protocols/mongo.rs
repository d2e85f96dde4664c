//! MongoDB wire protocol engine: opaque, length-prefixed message
//! recording over `OpMsg`/`OpReply`/`OpQuery` opcodes.
//!
//! Field-level BSON decoding is out of scope (Non-goal: full fidelity of
//! every exotic protocol variant); bodies are stored base64-encoded
//! verbatim, matching Kafka's treatment of flexible headers.

use super::{Engine, RecordContext, ReplayContext};
use crate::error::{Error, Result};
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Known MongoDB wire protocol opcodes.
const KNOWN_OPCODES: &[i32] = &[1, 2001, 2002, 2003, 2004, 2005, 2006, 2007, 2010, 2011, 2012, 2013];

fn le_i32(data: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Whether `initial_bytes` looks like a MongoDB wire message: a plausible
/// little-endian message length followed by a recognized opcode at
/// offset 12.
pub fn sniff(initial_bytes: &[u8]) -> bool {
    if initial_bytes.len() < 16 {
        return false;
    }
    let message_length = le_i32(initial_bytes, 0);
    if message_length < 16 || message_length as usize > 48 * 1024 * 1024 {
        return false;
    }
    let op_code = le_i32(initial_bytes, 12);
    KNOWN_OPCODES.contains(&op_code)
}

async fn read_one_message<R: AsyncRead + Unpin>(stream: &mut R, seed: &mut Vec<u8>) -> Result<Vec<u8>> {
    while seed.len() < 4 {
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::malformed("mongo", "eof before message length"));
        }
        seed.extend_from_slice(&buf[..n]);
    }
    let len = le_i32(seed, 0);
    if len < 4 {
        return Err(Error::malformed("mongo", "message length below minimum"));
    }
    let total = len as usize;

    while seed.len() < total {
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::malformed("mongo", "eof before message body"));
        }
        seed.extend_from_slice(&buf[..n]);
    }
    Ok(seed.drain(..total).collect())
}

fn build_mock(request: Vec<u8>, response: Vec<u8>, connection_id: &str, session_id: &str) -> Result<Mock> {
    let now = Utc::now();
    Mock::new(
        Kind::Mongo,
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

/// The MongoDB wire protocol engine.
#[derive(Default)]
pub struct MongoEngine;

#[async_trait]
impl Engine for MongoEngine {
    fn kind(&self) -> Kind {
        Kind::Mongo
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let mut client_seed = ctx.initial_bytes;
        loop {
            let request = match read_one_message(&mut ctx.client, &mut client_seed).await {
                Ok(r) => r,
                Err(_) => break,
            };
            ctx.destination.write_all(&request).await?;

            let mut dest_seed = Vec::new();
            let response = match read_one_message(&mut ctx.destination, &mut dest_seed).await {
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
        loop {
            let request = match read_one_message(&mut ctx.client, &mut client_seed).await {
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
                        if let Ok(response) = read_one_message(dest, &mut dest_seed).await {
                            ctx.client.write_all(&response).await?;
                        }
                    }
                }
                None => {
                    tracing::warn!("mongo mock miss with no fallback configured");
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

    fn op_msg(flag_bits: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        let body = b"\x00\x00\x00\x00fake section";
        let total = 16 + 4 + body.len();
        buf.extend_from_slice(&(total as i32).to_le_bytes()); // messageLength
        buf.extend_from_slice(&1i32.to_le_bytes()); // requestID
        buf.extend_from_slice(&0i32.to_le_bytes()); // responseTo
        buf.extend_from_slice(&2013i32.to_le_bytes()); // opCode: OP_MSG
        buf.extend_from_slice(&flag_bits.to_le_bytes());
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn sniffs_an_op_msg_frame() {
        assert!(sniff(&op_msg(0)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut buf = op_msg(0);
        buf[12..16].copy_from_slice(&9999i32.to_le_bytes());
        assert!(!sniff(&buf));
    }

    #[tokio::test]
    async fn reads_the_full_op_msg_frame() {
        let (mut a, mut b) = duplex(256);
        let payload = op_msg(0);
        let expected = payload.clone();
        tokio::spawn(async move {
            b.write_all(&payload).await.unwrap();
        });
        let mut seed = Vec::new();
        let msg = read_one_message(&mut a, &mut seed).await.unwrap();
        assert_eq!(msg, expected);
    }
}
