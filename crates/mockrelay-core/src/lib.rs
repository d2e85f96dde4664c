//! # mockrelay-core
//!
//! Protocol-aware traffic interception: the per-connection dispatch,
//! record/replay engines, and mock matcher that sit between an
//! application under test and its external dependencies.
//!
//! This crate owns stages 2–5 of the pipeline (registry dispatch,
//! per-protocol engines, the mock matcher, and the synchronous
//! coordinator) plus stage 1's bounded initial-read window in
//! [`intake`]. Stage 6 — the kernel-level redirection hook and whatever
//! writes recorded mocks/test cases to disk — is deliberately out of
//! scope; this crate only defines the [`hooks::IntakeSource`] and
//! [`persistence::Persister`] contracts those collaborators satisfy.
//!
//! ## Minimal embedding
//!
//! ```rust,no_run
//! use mockrelay_core::clock::SystemClock;
//! use mockrelay_core::config::Config;
//! use mockrelay_core::coordinator::SyncMockCoordinator;
//! use mockrelay_core::filter::TrafficFilter;
//! use mockrelay_core::intake::Intake;
//! use mockrelay_core::persistence::Persister;
//! use mockrelay_core::protocols::generic::GenericEngine;
//! use mockrelay_core::registry::{ParserDescriptor, ProtocolRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let registry = Arc::new(ProtocolRegistry::new(vec![ParserDescriptor {
//!     name: "generic",
//!     priority: 0,
//!     matches: |_| true,
//!     new_engine: || Arc::new(GenericEngine::default()),
//! }]));
//! let config = Arc::new(Config::default());
//! let coordinator = Arc::new(SyncMockCoordinator::new(Duration::from_secs(7), Arc::new(SystemClock)));
//! let intake = Intake::new(
//!     registry,
//!     config,
//!     Arc::new(TrafficFilter::default()),
//!     coordinator,
//!     CancellationToken::new(),
//! );
//! let (_persister, _testcases, _mocks, _mappings) = Persister::test_pair(16);
//! // `intake.handle(connection, persister, mock_store).await` per hijacked flow.
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod intake;
pub mod matcher;
pub mod mock;
pub mod persistence;
pub mod protocols;
pub mod registry;
pub mod store;
pub mod testcase;

pub use error::{Error, Result};
