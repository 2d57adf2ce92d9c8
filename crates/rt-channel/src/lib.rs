//! Event-based duplex channel to the Probe Dock RT agent.
//!
//! The contract is deliberately small: named-event emission, named-event
//! subscription, connection lifecycle notifications, and an acknowledgement
//! mechanism where an emitted event carries a callback the remote side
//! invokes at most once.
//!
//! ```text
//! DuplexChannel (trait)
//!     │
//!     ├── SocketIoChannel   Socket.IO over an Engine.IO v3 websocket
//!     │
//!     └── LocalChannel      scripted in-memory double for tests
//! ```

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod local;
pub mod packet;
pub mod socketio;

pub use local::{AckScript, ConnectScript, EmitScript, EmittedEvent, LocalChannel};
pub use socketio::{SocketIoChannel, SocketIoOptions};

/// Terminal connection lifecycle events. Any of them ends an initial connect wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connect,
    ConnectError(String),
    ConnectTimeout,
    Disconnect(String),
    Error(String),
}

impl ChannelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Connect => "connect",
            ChannelEvent::ConnectError(_) => "connect_error",
            ChannelEvent::ConnectTimeout => "connect_timeout",
            ChannelEvent::Disconnect(_) => "disconnect",
            ChannelEvent::Error(_) => "error",
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, ChannelEvent::Connect)
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelEvent::ConnectError(reason)
            | ChannelEvent::Disconnect(reason)
            | ChannelEvent::Error(reason) => write!(f, "{} ({reason})", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid agent endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to start channel runtime: {0}")]
    Runtime(String),
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel closed")]
    Closed,
    #[error("failed to encode event {event:?}: {reason}")]
    Encode { event: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Invoked with the acknowledgement arguments. Dropping it unused means no ack will ever come.
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;
/// Identifies a pending acknowledgement on the channel that issued it.
pub type AckId = u64;
pub type LifecycleListener = Arc<dyn Fn(&ChannelEvent) + Send + Sync + 'static>;
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync + 'static>;

pub trait DuplexChannel: Send + Sync {
    /// Registers a listener for every lifecycle event. Register before `connect`
    /// or an early event can be missed.
    fn on_lifecycle(&self, listener: LifecycleListener);

    /// Subscribes to an inbound named event.
    fn on(&self, event: &str, handler: EventHandler);

    /// Starts the connect attempt. The outcome is reported through the
    /// lifecycle listeners; implementations may block while the attempt runs.
    fn connect(&self);

    fn connected(&self) -> bool;

    /// Fire-and-forget emission.
    fn emit(&self, event: &str, payload: Value) -> ChannelResult<()>;

    /// Emits an event whose acknowledgement is delivered to `ack`. On error the
    /// callback has been dropped without being called.
    fn emit_with_ack(
        &self,
        event: &str,
        payload: Option<Value>,
        ack: AckCallback,
    ) -> ChannelResult<AckId>;

    /// Drops the callback of a still pending acknowledgement. Returns false
    /// when it was already answered, dropped or cancelled.
    fn cancel_ack(&self, id: AckId) -> bool;
}

/// Listener bookkeeping shared by the channel implementations. Callbacks run
/// outside the locks so they may register further listeners.
#[derive(Default)]
pub(crate) struct Dispatch {
    lifecycle: RwLock<Vec<LifecycleListener>>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl Dispatch {
    pub(crate) fn add_lifecycle(&self, listener: LifecycleListener) {
        self.lifecycle.write().push(listener);
    }

    pub(crate) fn add_handler(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    pub(crate) fn fire_lifecycle(&self, event: &ChannelEvent) {
        tracing::debug!(target: "probedock_rt::channel", event = %event, "lifecycle event");
        let listeners: Vec<LifecycleListener> = self.lifecycle.read().clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub(crate) fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(args);
        }
        handlers.len()
    }
}
