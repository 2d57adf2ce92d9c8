//! Real-time reporting from a test process to a local Probe Dock RT agent.
//!
//! ```text
//! Listener / FilterSource     facade called by framework integrations
//!         │
//!  Notifier   FilterFetcher   best-effort emission, blocking filter pull
//!         │
//!  ConnectionBridge           one connection attempt per process
//!         │
//!  rt_channel::DuplexChannel  Socket.IO websocket (or an in-memory double)
//! ```
//!
//! The agent is optional. When it is absent every operation degrades to a
//! logged no-op and the test process carries on unaffected.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod filters;
pub mod listener;
pub mod model;
pub mod notifier;
pub mod rendezvous;
pub mod telemetry;

pub use bridge::{BridgeState, ConnectionBridge};
pub use config::{ConfigError, Endpoint, Settings};
pub use filters::{FilterFetcher, FilterResult};
pub use listener::{FilterSource, Listener, ProjectKey};
pub use model::{JsonRunSerializer, RunSerializer, SerializeError, TestResult, TestRun};
pub use notifier::Notifier;
pub use rt_proto::FilterDefinition;
