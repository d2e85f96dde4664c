//! Synchronous mock coordinator: the process-wide singleton that straddles
//! record-side mock emission and test-bounded mock persistence.

use crate::clock::Clock;
use crate::mock::{new_mock_id, Mock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Inner {
    buffer: Vec<Mock>,
    output_channel: Option<mpsc::Sender<Mock>>,
    mapping_channel: Option<mpsc::Sender<(String, Vec<String>)>>,
    first_request_seen: bool,
}

/// Buffers mocks emitted before the application's first request, and on
/// each `resolve_range` call associates buffered mocks with the test that
/// caused them, pruning stale entries by TTL.
pub struct SyncMockCoordinator {
    inner: Mutex<Inner>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SyncMockCoordinator {
    /// Create a coordinator with the given TTL and clock source.
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: Vec::new(),
                output_channel: None,
                mapping_channel: None,
                first_request_seen: false,
            }),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(7)),
            clock,
        }
    }

    /// Attach (or replace) the channel mocks are forwarded on.
    pub fn attach_output_channel(&self, tx: mpsc::Sender<Mock>) {
        self.inner.lock().output_channel = Some(tx);
    }

    /// Attach (or replace) the channel test->mock-id mappings are sent on.
    pub fn attach_mapping_channel(&self, tx: mpsc::Sender<(String, Vec<String>)>) {
        self.inner.lock().mapping_channel = Some(tx);
    }

    /// Record that the application has issued its first request; mocks
    /// added from now on are buffered rather than forwarded immediately.
    pub fn set_first_request_signaled(&self) {
        self.inner.lock().first_request_seen = true;
    }

    /// Add a mock. Before the first request (and only if an output
    /// channel is attached), it is forwarded immediately as a "startup
    /// mock"; afterward it is buffered until a `resolve_range` call claims
    /// or TTL-expires it.
    pub async fn add_mock(&self, mock: Mock) {
        let to_forward = {
            let mut inner = self.inner.lock();
            if !inner.first_request_seen && inner.output_channel.is_some() {
                Some(mock)
            } else {
                inner.buffer.push(mock);
                None
            }
        };

        if let Some(mock) = to_forward {
            let tx = self.inner.lock().output_channel.clone();
            if let Some(tx) = tx {
                let _ = tx.send(mock).await;
            }
        }
    }

    /// Resolve the mocks produced during `[start, end]` for `test_name`.
    /// Every buffered mock older than the TTL is GC'd first, regardless of
    /// range. Mocks inside the range get a fresh random ID when `keep` is
    /// true and are forwarded on the output channel; a single
    /// `(test_name, mock_ids)` mapping is emitted if anything was kept.
    pub async fn resolve_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        test_name: &str,
        keep: bool,
    ) {
        let cutoff = self.clock.now() - self.ttl;

        let (kept, mapping_ids) = {
            let mut inner = self.inner.lock();
            let mut retained = Vec::with_capacity(inner.buffer.len());
            let mut kept = Vec::new();

            for mock in inner.buffer.drain(..) {
                if mock.spec.req_ts < cutoff {
                    continue; // stale, GC'd
                }
                if mock.spec.req_ts >= start && mock.spec.req_ts <= end {
                    if keep {
                        let mut mock = mock;
                        mock.id = new_mock_id();
                        kept.push(mock);
                    }
                    // else: in range but not kept, still dropped from buffer
                } else {
                    retained.push(mock);
                }
            }

            inner.buffer = retained;
            let ids: Vec<String> = kept.iter().map(|m| m.id.clone()).collect();
            (kept, ids)
        };

        if kept.is_empty() {
            return;
        }

        let (output_tx, mapping_tx) = {
            let inner = self.inner.lock();
            (inner.output_channel.clone(), inner.mapping_channel.clone())
        };

        if let Some(tx) = output_tx {
            for mock in kept {
                let _ = tx.send(mock).await;
            }
        }
        if let Some(tx) = mapping_tx {
            let _ = tx.send((test_name.to_string(), mapping_ids)).await;
        }
    }

    /// Number of mocks currently buffered (steady-state bound: arrival
    /// rate * TTL, plus anything in flight since the last resolve).
    pub fn buffered_len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Flush or discard outstanding buffered mocks at shutdown: flushed to
    /// the output channel if the first request was ever seen, discarded
    /// otherwise.
    pub async fn shutdown(&self) {
        let (buffer, tx, seen) = {
            let mut inner = self.inner.lock();
            let buffer = std::mem::take(&mut inner.buffer);
            (buffer, inner.output_channel.clone(), inner.first_request_seen)
        };
        if seen {
            if let Some(tx) = tx {
                for mock in buffer {
                    let _ = tx.send(mock).await;
                }
            }
        } else {
            tracing::debug!(count = buffer.len(), "discarding buffered mocks at shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::mock::{Chunk, Kind, Spec};
    use std::collections::HashMap;

    fn mock_at(ts: DateTime<Utc>) -> Mock {
        Mock::new(
            Kind::Generic,
            Spec {
                requests: vec![Chunk::from_bytes(b"hi")],
                responses: vec![Chunk::from_bytes(b"bye")],
                req_ts: ts,
                res_ts: ts,
                metadata: HashMap::new(),
            },
            "conn",
            "sess",
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn startup_mock_forwards_immediately_when_channel_attached() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let coord = SyncMockCoordinator::new(std::time::Duration::from_secs(7), clock.clone());
        let (tx, mut rx) = mpsc::channel(8);
        coord.attach_output_channel(tx);

        coord.add_mock(mock_at(clock.now())).await;
        let received = rx.try_recv().expect("startup mock forwarded");
        assert_eq!(coord.buffered_len(), 0);
        drop(received);
    }

    #[tokio::test]
    async fn mock_without_channel_is_buffered_not_forwarded() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let coord = SyncMockCoordinator::new(std::time::Duration::from_secs(7), clock.clone());
        coord.add_mock(mock_at(clock.now())).await;
        assert_eq!(coord.buffered_len(), 1);
    }

    #[tokio::test]
    async fn post_first_request_mocks_are_buffered() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let coord = SyncMockCoordinator::new(std::time::Duration::from_secs(7), clock.clone());
        let (tx, _rx) = mpsc::channel(8);
        coord.attach_output_channel(tx);
        coord.set_first_request_signaled();

        coord.add_mock(mock_at(clock.now())).await;
        assert_eq!(coord.buffered_len(), 1);
    }

    #[tokio::test]
    async fn s6_ttl_expires_stale_buffered_mock() {
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let coord = SyncMockCoordinator::new(std::time::Duration::from_secs(7), clock.clone());
        // No output channel attached and no first-request signal: mock is
        // buffered immediately.
        coord.add_mock(mock_at(start)).await;

        clock.advance(chrono::Duration::seconds(8));
        let (mapping_tx, mut mapping_rx) = mpsc::channel(8);
        coord.attach_mapping_channel(mapping_tx);
        let (out_tx, _out_rx) = mpsc::channel(8);
        coord.attach_output_channel(out_tx);

        let now = clock.now();
        coord
            .resolve_range(now - chrono::Duration::seconds(1), now, "t1", true)
            .await;

        assert_eq!(coord.buffered_len(), 0);
        assert!(mapping_rx.try_recv().is_err(), "no mapping for a GC'd mock");
    }

    #[tokio::test]
    async fn resolve_range_assigns_fresh_id_and_emits_mapping() {
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let coord = SyncMockCoordinator::new(std::time::Duration::from_secs(7), clock.clone());
        let mock = mock_at(start);
        let original_id = mock.id.clone();
        coord.add_mock(mock).await;

        let (out_tx, mut out_rx) = mpsc::channel(8);
        coord.attach_output_channel(out_tx);
        let (map_tx, mut map_rx) = mpsc::channel(8);
        coord.attach_mapping_channel(map_tx);

        coord
            .resolve_range(start - chrono::Duration::seconds(1), start, "t1", true)
            .await;

        let forwarded = out_rx.try_recv().unwrap();
        assert_ne!(forwarded.id, original_id);
        let (test_name, ids) = map_rx.try_recv().unwrap();
        assert_eq!(test_name, "t1");
        assert_eq!(ids, vec![forwarded.id]);
    }
}
