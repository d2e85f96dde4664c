//! The hook contract: how a hijacked connection enters the engine.
//!
//! The core never binds a socket or talks to iptables/eBPF itself — that
//! lives in an external process that redirects traffic and hands finished
//! TCP streams in. Depending only on `IntakeSource` rather than a concrete
//! redirector breaks what would otherwise be a cyclic dependency between
//! the proxy loop and the platform-specific hook, mirroring how
//! `mockforge_core::proxy` depends on a client trait rather than a
//! concrete transport.

use crate::error::Result;
use crate::protocols::AsyncDuplex;
use async_trait::async_trait;

/// Which side originated a hijacked connection — used only for logging
/// and metrics, never to change dispatch behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptMode {
    /// The connection is being recorded against a live destination.
    Record,
    /// The connection is being served from recorded mocks.
    Replay,
}

/// A TCP connection the hook layer has already accepted and (in record
/// mode) already dialed the real destination for.
pub struct HijackedConnection {
    /// The application-facing stream.
    pub client: Box<dyn AsyncDuplex>,
    /// The real-destination stream, dialed by the hook in record mode.
    /// `None` in replay mode, where there may be nothing to dial.
    pub destination: Option<Box<dyn AsyncDuplex>>,
    /// Record or replay.
    pub mode: InterceptMode,
    /// Destination host, as resolved by the hook (e.g. from the original
    /// destination address before redirection). Used for traffic-filter
    /// evaluation and logging.
    pub destination_host: String,
    /// Destination port.
    pub destination_port: u16,
    /// Stable identifier for the client-side connection, assigned by the
    /// hook so logs correlate across the redirector and the engine.
    pub client_conn_id: String,
    /// Stable identifier for the destination-side connection.
    pub dest_conn_id: String,
    /// The test session this connection belongs to.
    pub session_id: String,
}

/// The hook contract: a source of already-hijacked connections. The core
/// depends only on this trait, never on a concrete redirection mechanism.
#[async_trait]
pub trait IntakeSource: Send + Sync {
    /// Block until the next hijacked connection is available, or `Ok(None)`
    /// once the source is exhausted (e.g. shutting down).
    async fn next_connection(&self) -> Result<Option<HijackedConnection>>;
}

/// An [`IntakeSource`] backed by an in-process channel, for tests and for
/// embedding the engine behind a hand-rolled listener.
pub struct ChannelIntake {
    receiver: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<HijackedConnection>>,
}

impl ChannelIntake {
    /// Build an intake source fed by `receiver`.
    pub fn new(receiver: tokio::sync::mpsc::Receiver<HijackedConnection>) -> Self {
        Self {
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl IntakeSource for ChannelIntake {
    async fn next_connection(&self) -> Result<Option<HijackedConnection>> {
        Ok(self.receiver.lock().await.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_intake_yields_connections_in_order() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let intake = ChannelIntake::new(rx);

        let (client, _client_peer) = tokio::io::duplex(64);
        tx.send(HijackedConnection {
            client: Box::new(client),
            destination: None,
            mode: InterceptMode::Replay,
            destination_host: "db.internal".to_string(),
            destination_port: 5432,
            client_conn_id: "c1".to_string(),
            dest_conn_id: "d1".to_string(),
            session_id: "s1".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let conn = intake.next_connection().await.unwrap().expect("one connection");
        assert_eq!(conn.destination_host, "db.internal");
        assert!(intake.next_connection().await.unwrap().is_none());
    }
}
