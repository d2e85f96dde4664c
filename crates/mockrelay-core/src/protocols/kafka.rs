//! Kafka engine: wraps `mockrelay-kafka`'s framing and correlation-pairing
//! logic in the `Engine` contract.

use super::{ConnectionContext, Engine, RecordContext, ReplayContext};
use crate::error::{Error, Result};
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use async_trait::async_trait;
use chrono::Utc;
use mockrelay_kafka::DecodeContext;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Whether the initial bytes satisfy Kafka's sniffing predicate.
pub fn sniff(initial_bytes: &[u8]) -> bool {
    mockrelay_kafka::sniff(initial_bytes)
}

async fn read_one_frame<R: tokio::io::AsyncRead + Unpin>(
    stream: &mut R,
    seed: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    loop {
        if let Some((_, consumed)) = mockrelay_kafka::split_frame(seed) {
            return Ok(seed.drain(..consumed).collect());
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::malformed("kafka", "eof before a complete frame"));
        }
        seed.extend_from_slice(&buf[..n]);
    }
}

fn build_mock(request: Vec<u8>, response: Vec<u8>, ctx: &ConnectionContext) -> Result<Mock> {
    let now = Utc::now();
    Mock::new(
        Kind::Kafka,
        Spec {
            requests: vec![Chunk::from_bytes(&request)],
            responses: vec![Chunk::from_bytes(&response)],
            req_ts: now,
            res_ts: now,
            metadata: HashMap::new(),
        },
        ctx.client_conn_id.clone(),
        ctx.session_id.clone(),
        false,
    )
}

/// The Kafka protocol engine: length-prefixed framing, correlation-ID
/// request/response pairing, v0 header decode, verbatim body for anything
/// beyond that.
#[derive(Default)]
pub struct KafkaEngine;

#[async_trait]
impl Engine for KafkaEngine {
    fn kind(&self) -> Kind {
        Kind::Kafka
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let mut decode_ctx = DecodeContext::new();
        let mut client_seed = ctx.initial_bytes.clone();

        loop {
            let request = match read_one_frame(&mut ctx.client, &mut client_seed).await {
                Ok(r) => r,
                Err(_) => break,
            };
            if let Err(err) = decode_ctx.on_request(&request) {
                tracing::debug!(%err, "kafka request header unparseable, storing verbatim");
            }
            ctx.destination.write_all(&request).await?;

            let mut dest_seed = Vec::new();
            let response = match read_one_frame(&mut ctx.destination, &mut dest_seed).await {
                Ok(r) => r,
                Err(_) => break,
            };
            ctx.client.write_all(&response).await?;

            match decode_ctx.on_response(&response) {
                Ok(Some(matched)) => {
                    if let Ok(mock) = build_mock(matched.raw, response, &ctx.context) {
                        ctx.mock_sink.emit(mock).await;
                    }
                }
                Ok(None) => {
                    tracing::warn!("kafka response with no matching correlation id, passing through");
                }
                Err(err) => {
                    tracing::debug!(%err, "kafka response correlation id unparseable");
                }
            }
        }
        Ok(())
    }

    async fn replay(&self, mut ctx: ReplayContext) -> Result<()> {
        let mut client_seed = ctx.initial_bytes.clone();
        loop {
            let request = match read_one_frame(&mut ctx.client, &mut client_seed).await {
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
                        if let Ok(response) = read_one_frame(dest, &mut dest_seed).await {
                            ctx.client.write_all(&response).await?;
                        }
                    }
                }
                None => {
                    tracing::warn!("kafka mock miss with no fallback configured");
                }
            }
        }
        Ok(())
    }
}
