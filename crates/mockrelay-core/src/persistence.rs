//! The persistence contract: channels the core pushes finished records
//! onto. The core never writes a file format itself — whatever drains
//! these channels (a YAML writer, a database, a test harness) is an
//! external collaborator, the same separation `RecordHandler` keeps from
//! its storage backend in the teacher.

use crate::mock::Mock;
use crate::testcase::TestCase;
use tokio::sync::mpsc;

/// The set of output channels a session needs: one for `TestCase`s
/// produced by application-facing engines (HTTP/gRPC), one for `Mock`s
/// produced by every engine, and one for the coordinator's
/// test-name -> mock-id mapping emitted by `resolve_range`.
#[derive(Clone)]
pub struct Persister {
    /// Captured application-facing test cases.
    pub testcases: mpsc::Sender<TestCase>,
    /// Captured outbound-dependency mocks.
    pub mocks: mpsc::Sender<Mock>,
    /// `(test_name, mock_ids)` mappings emitted when the coordinator
    /// resolves a buffered range.
    pub mappings: mpsc::Sender<(String, Vec<String>)>,
}

impl Persister {
    /// Build a persister from its three channels.
    pub fn new(
        testcases: mpsc::Sender<TestCase>,
        mocks: mpsc::Sender<Mock>,
        mappings: mpsc::Sender<(String, Vec<String>)>,
    ) -> Self {
        Self { testcases, mocks, mappings }
    }

    /// Build a persister paired with freshly created receivers, for tests
    /// that want to observe what the session emits.
    pub fn test_pair(
        buffer: usize,
    ) -> (
        Self,
        mpsc::Receiver<TestCase>,
        mpsc::Receiver<Mock>,
        mpsc::Receiver<(String, Vec<String>)>,
    ) {
        let (tc_tx, tc_rx) = mpsc::channel(buffer);
        let (mock_tx, mock_rx) = mpsc::channel(buffer);
        let (map_tx, map_rx) = mpsc::channel(buffer);
        (Self::new(tc_tx, mock_tx, map_tx), tc_rx, mock_rx, map_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Chunk, Kind, Spec};
    use std::collections::HashMap;

    #[tokio::test]
    async fn mocks_sent_through_the_persister_arrive_on_its_receiver() {
        let (persister, _tc_rx, mut mock_rx, _map_rx) = Persister::test_pair(4);
        let now = chrono::Utc::now();
        let mock = Mock::new(
            Kind::Redis,
            Spec {
                requests: vec![Chunk::from_bytes(b"PING")],
                responses: vec![Chunk::from_bytes(b"+PONG\r\n")],
                req_ts: now,
                res_ts: now,
                metadata: HashMap::new(),
            },
            "conn",
            "sess",
            false,
        )
        .unwrap();

        persister.mocks.send(mock).await.unwrap();
        let received = mock_rx.recv().await.expect("mock delivered");
        assert_eq!(received.kind, Kind::Redis);
    }
}
