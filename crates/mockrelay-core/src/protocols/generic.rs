//! Generic fallback engine: a chunk-level request/response pair recorder
//! used whenever no specific protocol parser claims the connection.

use super::{ConnectionContext, Engine, RecordContext, ReplayContext};
use crate::error::Result;
use crate::matcher;
use crate::mock::{Chunk, Kind, Mock, Spec};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Which side a chunk of bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client -> destination.
    Request,
    /// Destination -> client.
    Response,
}

/// Pure, synchronous ping-pong accumulator: feed it directional chunks,
/// drain flushed request/response pairs. Kept separate from the socket
/// loop so the turn-detection logic is unit-testable without I/O.
#[derive(Default)]
pub struct GenericRecorder {
    pending_requests: Vec<Chunk>,
    pending_responses: Vec<Chunk>,
    last_direction: Option<Direction>,
    ready: Vec<(Vec<Chunk>, Vec<Chunk>)>,
}

impl GenericRecorder {
    /// A new, empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes observed on `dir`. A request->response->request
    /// transition (detected as a change back to `Request` after having
    /// seen `Response`) flushes the accumulated pair.
    pub fn feed(&mut self, dir: Direction, bytes: &[u8]) {
        if let Some(name) = extract_sasl_name(bytes) {
            tracing::debug!(name = %name, "sasl credential lookup token observed (not recorded)");
        }

        if self.last_direction == Some(Direction::Response) && dir == Direction::Request {
            self.flush();
        }

        match dir {
            Direction::Request => self.pending_requests.push(Chunk::from_bytes(bytes)),
            Direction::Response => self.pending_responses.push(Chunk::from_bytes(bytes)),
        }
        self.last_direction = Some(dir);
    }

    fn flush(&mut self) {
        if !self.pending_requests.is_empty() || !self.pending_responses.is_empty() {
            self.ready.push((
                std::mem::take(&mut self.pending_requests),
                std::mem::take(&mut self.pending_responses),
            ));
        }
    }

    /// Force-flush whatever has accumulated (used at connection close).
    pub fn finish(&mut self) {
        self.flush();
    }

    /// Take any pairs flushed so far.
    pub fn drain_ready(&mut self) -> Vec<(Vec<Chunk>, Vec<Chunk>)> {
        std::mem::take(&mut self.ready)
    }
}

/// Extract the SASL `n=...` username token, if `bytes` looks like a
/// `saslStart` payload. Used only for a debug log; never encoded into a
/// mock.
fn extract_sasl_name(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    if !text.contains("saslStart") {
        return None;
    }
    let start = text.find("n=")? + 2;
    let rest = &text[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

fn build_mock(
    requests: Vec<Chunk>,
    responses: Vec<Chunk>,
    ctx: &ConnectionContext,
) -> Result<Mock> {
    let now = Utc::now();
    let config_mock = requests.is_empty();
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), "config".to_string());

    Mock::new(
        Kind::Generic,
        Spec {
            requests,
            responses,
            req_ts: now,
            res_ts: now,
            metadata,
        },
        ctx.client_conn_id.clone(),
        ctx.session_id.clone(),
        config_mock,
    )
}

/// Chunk-level request/response pair recorder and fallback replay engine.
#[derive(Default)]
pub struct GenericEngine;

#[async_trait]
impl Engine for GenericEngine {
    fn kind(&self) -> Kind {
        Kind::Generic
    }

    async fn record(&self, mut ctx: RecordContext) -> Result<()> {
        let mut recorder = GenericRecorder::new();

        if !ctx.initial_bytes.is_empty() {
            recorder.feed(Direction::Request, &ctx.initial_bytes);
            ctx.destination.write_all(&ctx.initial_bytes).await?;
        }

        let mut client_buf = vec![0u8; 16 * 1024];
        let mut dest_buf = vec![0u8; 16 * 1024];

        loop {
            tokio::select! {
                result = ctx.client.read(&mut client_buf) => {
                    let n = result?;
                    if n == 0 { break; }
                    recorder.feed(Direction::Request, &client_buf[..n]);
                    ctx.destination.write_all(&client_buf[..n]).await?;
                }
                result = ctx.destination.read(&mut dest_buf) => {
                    let n = result?;
                    if n == 0 { break; }
                    recorder.feed(Direction::Response, &dest_buf[..n]);
                    ctx.client.write_all(&dest_buf[..n]).await?;
                }
            }
            flush_ready(&mut recorder, &ctx.mock_sink, &ctx.context).await;
        }

        recorder.finish();
        flush_ready(&mut recorder, &ctx.mock_sink, &ctx.context).await;
        Ok(())
    }

    async fn replay(&self, mut ctx: ReplayContext) -> Result<()> {
        let mut client_buf = vec![0u8; 16 * 1024];
        loop {
            let n = ctx.client.read(&mut client_buf).await?;
            if n == 0 {
                break;
            }
            let request_chunks = vec![client_buf[..n].to_vec()];
            match matcher::match_request(&ctx.mock_store, &request_chunks) {
                Some(responses) => {
                    for chunk in responses {
                        ctx.client.write_all(&chunk.to_bytes()).await?;
                    }
                }
                None if ctx.config.fallback_on_miss => {
                    if let Some(dest) = ctx.destination.as_mut() {
                        dest.write_all(&client_buf[..n]).await?;
                        let mut resp_buf = vec![0u8; 16 * 1024];
                        let rn = dest.read(&mut resp_buf).await?;
                        ctx.client.write_all(&resp_buf[..rn]).await?;
                    }
                }
                None => {
                    tracing::warn!("generic replay miss with no fallback configured");
                }
            }
        }
        Ok(())
    }
}

async fn flush_ready(
    recorder: &mut GenericRecorder,
    sink: &super::MockEmitter,
    ctx: &ConnectionContext,
) {
    for (requests, responses) in recorder.drain_ready() {
        match build_mock(requests, responses, ctx) {
            Ok(mock) => sink.emit(mock).await,
            Err(err) => tracing::debug!(%err, "dropping malformed generic mock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_on_response_then_request_transition() {
        let mut recorder = GenericRecorder::new();
        recorder.feed(Direction::Request, b"hello");
        recorder.feed(Direction::Response, b"world");
        assert!(recorder.drain_ready().is_empty());

        recorder.feed(Direction::Request, b"next");
        let ready = recorder.drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0.len(), 1);
        assert_eq!(ready[0].1.len(), 1);
    }

    #[test]
    fn sasl_name_extracted_but_not_stored() {
        let payload = b"saslStart n=alice,r=abc123";
        assert_eq!(extract_sasl_name(payload).as_deref(), Some("alice"));
        assert_eq!(extract_sasl_name(b"no sasl here"), None);
    }

    #[test]
    fn binary_chunks_are_tagged() {
        let mut recorder = GenericRecorder::new();
        recorder.feed(Direction::Request, &[0xff, 0x00, 0x80]);
        recorder.feed(Direction::Response, b"ascii ok");
        recorder.finish();
        let ready = recorder.drain_ready();
        assert!(ready[0].0[0].binary);
        assert!(!ready[0].1[0].binary);
    }
}
