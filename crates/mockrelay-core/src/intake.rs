//! Connection intake: the bounded initial-read window, protocol dispatch,
//! and hand-off into the winning engine's `record`/`replay` entry point.
//!
//! This is the glue a caller drives per [`HijackedConnection`] — the core
//! never accepts a socket itself, so there is no listener loop here, only
//! the per-connection pipeline stages 1–3 from the engine design.

use crate::config::Config;
use crate::coordinator::SyncMockCoordinator;
use crate::error::{Error, Result};
use crate::filter::TrafficFilter;
use crate::hooks::{HijackedConnection, InterceptMode};
use crate::persistence::Persister;
use crate::protocols::{AsyncDuplex, ConnectionContext, MockEmitter, RecordContext, ReplayContext};
use crate::registry::ProtocolRegistry;
use crate::store::MockStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// Read up to `window` bytes from `stream`, bounded by `timeout`. Returns
/// whatever the first readable chunk contained, which may be shorter than
/// `window` — the window is a ceiling, not a target to fill.
async fn read_initial_window<R: tokio::io::AsyncRead + Unpin>(
    stream: &mut R,
    window: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; window];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| Error::timeout("initial_read"))??;
    if n == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    buf.truncate(n);
    Ok(buf)
}

/// Race the client and destination streams for the first readable bytes.
///
/// Every protocol this engine knows about except MySQL is client-initiated,
/// so in practice the destination branch never wins unless the server
/// speaks first (MySQL's `HandshakeV10` greeting). Racing rather than
/// always reading the client side is what lets a single intake path sniff
/// both shapes without special-casing MySQL at dispatch time.
async fn race_initial_window(
    client: &mut Box<dyn AsyncDuplex>,
    destination: Option<&mut Box<dyn AsyncDuplex>>,
    window: usize,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let Some(destination) = destination else {
        return read_initial_window(client, window, timeout).await;
    };

    let mut client_buf = vec![0u8; window];
    let mut dest_buf = vec![0u8; window];

    let eof = || std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
    let result = tokio::time::timeout(timeout, async {
        tokio::select! {
            n = client.read(&mut client_buf) => n.and_then(|n| {
                if n == 0 { return Err(eof()); }
                client_buf.truncate(n);
                Ok(std::mem::take(&mut client_buf))
            }),
            n = destination.read(&mut dest_buf) => n.and_then(|n| {
                if n == 0 { return Err(eof()); }
                dest_buf.truncate(n);
                Ok(std::mem::take(&mut dest_buf))
            }),
        }
    })
    .await
    .map_err(|_| Error::timeout("initial_read"))?;

    result.map_err(Error::from)
}

/// Everything the intake pipeline needs that outlives any single
/// connection: the published registry, engine config, bypass policy, and
/// the coordinator (consulted only when `config.synchronous` is set).
pub struct Intake {
    registry: Arc<ProtocolRegistry>,
    config: Arc<Config>,
    traffic_filter: Arc<TrafficFilter>,
    coordinator: Arc<SyncMockCoordinator>,
    shutdown: CancellationToken,
}

impl Intake {
    /// Build an intake pipeline from its long-lived collaborators, bound
    /// to `shutdown` for cooperative cancellation: a dropped or
    /// explicitly cancelled token aborts any connection currently being
    /// handled, per the task-group lifetime model.
    pub fn new(
        registry: Arc<ProtocolRegistry>,
        config: Arc<Config>,
        traffic_filter: Arc<TrafficFilter>,
        coordinator: Arc<SyncMockCoordinator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { registry, config, traffic_filter, coordinator, shutdown }
    }

    /// Run one hijacked connection through its bounded initial-read
    /// window, dispatch, and the winning engine.
    ///
    /// An initial-read failure (EOF, reset, timeout) before any byte is
    /// observed is logged at debug and swallowed here, per the intake
    /// failure semantics — callers see `Ok(())`, not an error, since
    /// there is nothing actionable about a flow that never spoke.
    pub async fn handle(&self, conn: HijackedConnection, persister: Persister, mock_store: Arc<MockStore>) -> Result<()> {
        tokio::select! {
            result = self.run(conn, persister, mock_store) => result,
            () = self.shutdown.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn run(&self, conn: HijackedConnection, persister: Persister, mock_store: Arc<MockStore>) -> Result<()> {
        let HijackedConnection {
            mut client,
            mut destination,
            mode,
            destination_host,
            destination_port,
            client_conn_id,
            dest_conn_id,
            session_id,
        } = conn;

        let initial_bytes = {
            match race_initial_window(
                &mut client,
                destination.as_mut(),
                self.config.initial_read_window_bytes,
                self.config.initial_read_timeout,
            )
            .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::debug!(%err, %client_conn_id, "initial read failed before any byte, aborting flow silently");
                    return Ok(());
                }
            }
        };

        let descriptor = self.registry.dispatch(&initial_bytes);
        let engine = (descriptor.new_engine)();
        let context = ConnectionContext { client_conn_id, dest_conn_id, session_id };

        tracing::info!(
            parser = descriptor.name,
            host = %destination_host,
            port = destination_port,
            "dispatched hijacked connection"
        );

        match mode {
            InterceptMode::Record => {
                let destination = destination
                    .ok_or_else(|| Error::generic("record mode requires a dialed destination stream"))?;
                let mock_sink = MockEmitter::new(&self.config, persister.mocks.clone(), self.coordinator.clone());
                let ctx = RecordContext {
                    client,
                    destination,
                    initial_bytes,
                    mock_sink,
                    testcase_sink: Some(persister.testcases.clone()),
                    traffic_filter: self.traffic_filter.clone(),
                    config: self.config.clone(),
                    context,
                };
                engine.record(ctx).await
            }
            InterceptMode::Replay => {
                let ctx = ReplayContext {
                    client,
                    destination,
                    initial_bytes,
                    mock_store,
                    config: self.config.clone(),
                    context,
                };
                engine.replay(ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::protocols::generic::GenericEngine;
    use crate::registry::ParserDescriptor;
    use std::time::Duration as StdDuration;

    fn test_intake() -> Intake {
        let registry = Arc::new(ProtocolRegistry::new(vec![ParserDescriptor {
            name: "generic",
            priority: 0,
            matches: |_| true,
            new_engine: || Arc::new(GenericEngine::default()),
        }]));
        let coordinator = Arc::new(SyncMockCoordinator::new(StdDuration::from_secs(7), Arc::new(SystemClock)));
        Intake::new(
            registry,
            Arc::new(Config::default()),
            Arc::new(TrafficFilter::default()),
            coordinator,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn cancellation_aborts_an_in_flight_connection() {
        let intake = test_intake();
        intake.shutdown.cancel();

        let (client, _client_peer) = tokio::io::duplex(64);
        let (persister, _tc, _mocks, _maps) = Persister::test_pair(4);
        let conn = HijackedConnection {
            client: Box::new(client),
            destination: None,
            mode: InterceptMode::Replay,
            destination_host: "example.test".to_string(),
            destination_port: 80,
            client_conn_id: "c1".to_string(),
            dest_conn_id: "d1".to_string(),
            session_id: "s1".to_string(),
        };

        let result = intake.handle(conn, persister, Arc::new(MockStore::new())).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn replay_with_no_bytes_aborts_silently_on_client_eof() {
        let intake = test_intake();
        let (client, client_peer) = tokio::io::duplex(64);
        drop(client_peer); // immediate EOF, zero bytes ever observed

        let (persister, _tc, _mocks, _maps) = Persister::test_pair(4);
        let conn = HijackedConnection {
            client: Box::new(client),
            destination: None,
            mode: InterceptMode::Replay,
            destination_host: "example.test".to_string(),
            destination_port: 80,
            client_conn_id: "c1".to_string(),
            dest_conn_id: "d1".to_string(),
            session_id: "s1".to_string(),
        };

        let result = intake.handle(conn, persister, Arc::new(MockStore::new())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dispatches_to_generic_and_round_trips_a_pair() {
        let intake = test_intake();
        let (mut client, client_peer) = tokio::io::duplex(256);
        let (destination, mut dest_peer) = tokio::io::duplex(256);

        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            client.write_all(b"ping").await.unwrap();
            let mut buf = [0u8; 16];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"pong");
            drop(client);
        });
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let mut buf = [0u8; 16];
            let n = dest_peer.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ping");
            dest_peer.write_all(b"pong").await.unwrap();
        });

        let (persister, _tc, mut mocks, _maps) = Persister::test_pair(4);
        let conn = HijackedConnection {
            client: Box::new(client_peer),
            destination: Some(Box::new(destination)),
            mode: InterceptMode::Record,
            destination_host: "example.test".to_string(),
            destination_port: 80,
            client_conn_id: "c1".to_string(),
            dest_conn_id: "d1".to_string(),
            session_id: "s1".to_string(),
        };

        intake.handle(conn, persister, Arc::new(MockStore::new())).await.unwrap();
        let mock = mocks.recv().await.expect("a mock was emitted");
        assert_eq!(mock.kind, crate::mock::Kind::Generic);
    }
}
