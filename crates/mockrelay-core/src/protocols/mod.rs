//! Per-protocol engines: each owns a small state machine and codec, and
//! exposes `record`/`replay` entry points per the registry contract.

pub mod generic;
pub mod http;
pub mod kafka;
pub mod mongo;
pub mod mysql;
pub mod postgres;
pub mod redis;

use crate::config::Config;
use crate::coordinator::SyncMockCoordinator;
use crate::error::Result;
use crate::filter::TrafficFilter;
use crate::mock::{Kind, Mock};
use crate::store::MockStore;
use crate::testcase::TestCase;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// A boxed bidirectional stream: the hijacked client connection or the
/// real-destination connection, type-erased so engines don't need to be
/// generic over transport.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncDuplex for T {}

/// Where a mock should go once an engine has built it: straight onto a
/// channel, or through the synchronous coordinator. Keeping engines
/// agnostic to this choice is the "coordinator vs. direct channel"
/// design note: engines just call `emit`.
#[derive(Clone)]
pub enum MockEmitter {
    /// Push straight onto the session's mock channel.
    Direct(mpsc::Sender<Mock>),
    /// Route through the process-wide synchronous coordinator.
    Coordinator(Arc<SyncMockCoordinator>),
}

impl MockEmitter {
    /// Build the emitter appropriate for `config.synchronous`.
    pub fn new(config: &Config, direct: mpsc::Sender<Mock>, coordinator: Arc<SyncMockCoordinator>) -> Self {
        if config.synchronous {
            Self::Coordinator(coordinator)
        } else {
            Self::Direct(direct)
        }
    }

    /// Emit a mock through whichever path this emitter was built for.
    pub async fn emit(&self, mock: Mock) {
        match self {
            Self::Direct(tx) => {
                if tx.send(mock).await.is_err() {
                    tracing::debug!("mock channel closed, dropping emitted mock");
                }
            }
            Self::Coordinator(coordinator) => coordinator.add_mock(mock).await,
        }
    }
}

/// Context carried by every connection: identifies it for logging and for
/// attributing mocks/test cases.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Identifier of the client-side connection.
    pub client_conn_id: String,
    /// Identifier of the destination-side connection (record mode).
    pub dest_conn_id: String,
    /// The test session this connection belongs to.
    pub session_id: String,
}

/// Inputs to an engine's `record` entry point.
pub struct RecordContext {
    /// The hijacked application-facing stream.
    pub client: Box<dyn AsyncDuplex>,
    /// The real-dependency stream to proxy to.
    pub destination: Box<dyn AsyncDuplex>,
    /// Bytes already consumed during protocol sniffing; must be treated
    /// as the first request bytes, not discarded.
    pub initial_bytes: Vec<u8>,
    /// Where to send emitted mocks.
    pub mock_sink: MockEmitter,
    /// Where to send captured `TestCase`s (HTTP/gRPC engines only). `None`
    /// for protocols that never produce application-facing test cases.
    pub testcase_sink: Option<mpsc::Sender<TestCase>>,
    /// Traffic bypass policy, pre-built once per session.
    pub traffic_filter: Arc<TrafficFilter>,
    /// Engine-wide configuration.
    pub config: Arc<Config>,
    /// Connection/session identifiers.
    pub context: ConnectionContext,
}

/// Inputs to an engine's `replay` entry point.
pub struct ReplayContext {
    /// The hijacked application-facing stream.
    pub client: Box<dyn AsyncDuplex>,
    /// Optional real-destination stream, used only if `fallback_on_miss`.
    pub destination: Option<Box<dyn AsyncDuplex>>,
    /// Bytes already consumed during protocol sniffing.
    pub initial_bytes: Vec<u8>,
    /// The mock store to match live requests against.
    pub mock_store: Arc<MockStore>,
    /// Engine-wide configuration.
    pub config: Arc<Config>,
    /// Connection/session identifiers.
    pub context: ConnectionContext,
}

/// A protocol engine: a small state machine/codec pair driving either the
/// record or replay side of one connection.
#[async_trait]
pub trait Engine: Send + Sync {
    /// The protocol kind this engine implements.
    fn kind(&self) -> Kind;

    /// Observe live traffic, proxy it to the real destination, and emit
    /// normalized mocks.
    async fn record(&self, ctx: RecordContext) -> Result<()>;

    /// Serve recorded responses back to the application without
    /// contacting the real dependency (unless falling back on a miss).
    async fn replay(&self, ctx: ReplayContext) -> Result<()>;
}
