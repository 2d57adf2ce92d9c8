//! Socket.IO client over an Engine.IO v3 websocket.
//!
//! The channel owns a small tokio runtime; the session task reads frames,
//! answers pings, resolves acknowledgements and runs every callback on that
//! runtime. Only the websocket transport is spoken, there is no long-polling
//! fallback and no reconnection.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

use crate::packet::{self, EnginePacket, SocketPacket, DEFAULT_NAMESPACE};
use crate::{
    AckCallback, AckId, ChannelError, ChannelEvent, ChannelResult, Dispatch, DuplexChannel,
    EventHandler, LifecycleListener,
};

#[derive(Debug, Clone)]
pub struct SocketIoOptions {
    /// Bound on the websocket handshake plus the Socket.IO connect packet.
    pub connect_timeout: Duration,
    pub namespace: String,
}

impl Default for SocketIoOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Default)]
struct Shared {
    dispatch: Dispatch,
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    acks: Mutex<HashMap<AckId, AckCallback>>,
    next_ack: AtomicU64,
}

pub struct SocketIoChannel {
    url: Url,
    options: SocketIoOptions,
    runtime: Option<Runtime>,
    handle: Handle,
    started: AtomicBool,
    shared: Arc<Shared>,
}

impl SocketIoChannel {
    /// Resolves `endpoint` (`http://host:port`) and prepares the runtime.
    /// Nothing touches the network until `connect`.
    pub fn new(endpoint: &str, options: SocketIoOptions) -> ChannelResult<Self> {
        let url = websocket_url(endpoint)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("probedock-rt-io")
            .enable_all()
            .build()
            .map_err(|err| ChannelError::Runtime(err.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            url,
            options,
            runtime: Some(runtime),
            handle,
            started: AtomicBool::new(false),
            shared: Arc::new(Shared::default()),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Acknowledgements emitted on the current session and not yet settled.
    pub fn pending_acks(&self) -> usize {
        self.shared.acks.lock().len()
    }

    fn send_frame(&self, frame: String) -> ChannelResult<()> {
        if !self.connected() {
            return Err(ChannelError::NotConnected);
        }
        let outbound = self.shared.outbound.lock();
        let sender = outbound.as_ref().ok_or(ChannelError::Closed)?;
        sender.send(frame).map_err(|_| ChannelError::Closed)
    }

    fn event_frame(
        &self,
        event: &str,
        id: Option<u64>,
        payload: Option<Value>,
    ) -> ChannelResult<String> {
        let packet = EnginePacket::Message(SocketPacket::Event {
            namespace: self.options.namespace.clone(),
            id,
            event: event.to_string(),
            args: payload.into_iter().collect(),
        });
        packet::encode(&packet).map_err(|err| ChannelError::Encode {
            event: event.to_string(),
            reason: err.to_string(),
        })
    }
}

impl DuplexChannel for SocketIoChannel {
    fn on_lifecycle(&self, listener: LifecycleListener) {
        self.shared.dispatch.add_lifecycle(listener);
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.shared.dispatch.add_handler(event, handler);
    }

    fn connect(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(target: "probedock_rt::channel", "connect already attempted; ignoring");
            return;
        }
        let session = Session {
            url: self.url.clone(),
            options: self.options.clone(),
            shared: self.shared.clone(),
        };
        self.handle.spawn(session.run());
    }

    fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn emit(&self, event: &str, payload: Value) -> ChannelResult<()> {
        let frame = self.event_frame(event, None, Some(payload))?;
        trace!(target: "probedock_rt::channel", %event, "emit");
        self.send_frame(frame)
    }

    fn emit_with_ack(
        &self,
        event: &str,
        payload: Option<Value>,
        ack: AckCallback,
    ) -> ChannelResult<AckId> {
        let id = self.shared.next_ack.fetch_add(1, Ordering::SeqCst);
        let frame = self.event_frame(event, Some(id), payload)?;
        self.shared.acks.lock().insert(id, ack);
        trace!(target: "probedock_rt::channel", %event, ack_id = id, "emit with ack");
        if let Err(err) = self.send_frame(frame) {
            self.shared.acks.lock().remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    fn cancel_ack(&self, id: AckId) -> bool {
        let cancelled = self.shared.acks.lock().remove(&id);
        if cancelled.is_some() {
            trace!(target: "probedock_rt::channel", ack_id = id, "ack cancelled");
        }
        cancelled.is_some()
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Maps `http://host:port` to the Engine.IO websocket URL.
pub fn websocket_url(endpoint: &str) -> ChannelResult<Url> {
    let invalid = |reason: String| ChannelError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let mut url = Url::parse(endpoint).map_err(|err| invalid(err.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    };
    if url.host_str().is_none() {
        return Err(invalid("missing host".into()));
    }
    url.set_scheme(scheme)
        .map_err(|_| invalid("cannot switch to websocket scheme".into()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=3&transport=websocket"));
    Ok(url)
}

enum SessionEnd {
    TimedOut,
    Failed(String),
    Closed(String),
}

struct Session {
    url: Url,
    options: SocketIoOptions,
    shared: Arc<Shared>,
}

impl Session {
    async fn run(self) {
        let end = self.drive().await;

        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.outbound.lock().take();
        let orphaned: Vec<AckCallback> = self.shared.acks.lock().drain().map(|(_, ack)| ack).collect();
        if !orphaned.is_empty() {
            debug!(
                target: "probedock_rt::channel",
                count = orphaned.len(),
                "dropping unanswered acknowledgements"
            );
        }
        drop(orphaned);

        let event = match end {
            SessionEnd::TimedOut => ChannelEvent::ConnectTimeout,
            SessionEnd::Failed(reason) => ChannelEvent::ConnectError(reason),
            SessionEnd::Closed(reason) => ChannelEvent::Disconnect(reason),
        };
        self.shared.dispatch.fire_lifecycle(&event);
    }

    async fn drive(&self) -> SessionEnd {
        let deadline = Instant::now() + self.options.connect_timeout;
        let stream = match tokio::time::timeout_at(deadline, connect_async(self.url.as_str())).await {
            Err(_) => return SessionEnd::TimedOut,
            Ok(Err(err)) => return SessionEnd::Failed(err.to_string()),
            Ok(Ok((stream, _response))) => stream,
        };
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.shared.outbound.lock() = Some(tx.clone());

        let mut handshake_pending = true;
        let mut ping = tokio::time::interval(Duration::from_secs(25));
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_timeout = Duration::from_secs(60);
        let mut opened = false;
        let mut awaiting_pong: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline), if handshake_pending => {
                    return SessionEnd::TimedOut;
                }
                frame = source.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            return self.ended(handshake_pending, "transport close");
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            return self.ended(handshake_pending, &format!("transport error: {err}"));
                        }
                    };
                    let packet = match packet::decode(&text) {
                        Ok(packet) => packet,
                        Err(err) => {
                            warn!(target: "probedock_rt::channel", error = %err, "ignoring undecodable frame");
                            continue;
                        }
                    };
                    match packet {
                        EnginePacket::Open(open) => {
                            debug!(target: "probedock_rt::channel", sid = %open.sid, "engine open");
                            let period = Duration::from_millis(open.ping_interval.max(1));
                            ping = tokio::time::interval_at(Instant::now() + period, period);
                            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            ping_timeout = Duration::from_millis(open.ping_timeout);
                            opened = true;
                            if self.options.namespace != DEFAULT_NAMESPACE {
                                let connect = EnginePacket::Message(SocketPacket::Connect {
                                    namespace: self.options.namespace.clone(),
                                });
                                if let Ok(frame) = packet::encode(&connect) {
                                    let _ = tx.send(frame);
                                }
                            }
                        }
                        EnginePacket::Ping(data) => {
                            let _ = tx.send(format!("3{data}"));
                        }
                        EnginePacket::Pong(_) => awaiting_pong = None,
                        EnginePacket::Close => {
                            return self.ended(handshake_pending, "transport close");
                        }
                        EnginePacket::Message(message) => {
                            if let Some(end) = self.on_message(message, &mut handshake_pending, &tx) {
                                return end;
                            }
                        }
                        EnginePacket::Upgrade | EnginePacket::Noop => {}
                    }
                }
                Some(frame) = rx.recv() => {
                    if let Err(err) = sink.send(Message::Text(frame)).await {
                        return self.ended(handshake_pending, &format!("transport error: {err}"));
                    }
                }
                _ = ping.tick(), if opened => {
                    if let Some(sent) = awaiting_pong {
                        if sent.elapsed() > ping_timeout {
                            return self.ended(handshake_pending, "ping timeout");
                        }
                    } else {
                        awaiting_pong = Some(Instant::now());
                        if let Err(err) = sink.send(Message::Text("2".to_string())).await {
                            return self.ended(handshake_pending, &format!("transport error: {err}"));
                        }
                    }
                }
            }
        }
    }

    fn ended(&self, handshake_pending: bool, reason: &str) -> SessionEnd {
        if handshake_pending {
            SessionEnd::Failed(reason.to_string())
        } else {
            SessionEnd::Closed(reason.to_string())
        }
    }

    fn on_message(
        &self,
        message: SocketPacket,
        handshake_pending: &mut bool,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Option<SessionEnd> {
        match message {
            SocketPacket::Connect { namespace } if namespace == self.options.namespace => {
                if *handshake_pending {
                    *handshake_pending = false;
                    self.shared.connected.store(true, Ordering::SeqCst);
                    self.shared.dispatch.fire_lifecycle(&ChannelEvent::Connect);
                }
            }
            SocketPacket::Disconnect { namespace } if namespace == self.options.namespace => {
                return Some(self.ended(*handshake_pending, "io server disconnect"));
            }
            SocketPacket::Error { namespace, data } if namespace == self.options.namespace => {
                let reason = match data {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                if *handshake_pending {
                    return Some(SessionEnd::Failed(reason));
                }
                self.shared.dispatch.fire_lifecycle(&ChannelEvent::Error(reason));
            }
            SocketPacket::Event {
                namespace,
                id,
                event,
                args,
            } if namespace == self.options.namespace => {
                let handled = self.shared.dispatch.dispatch(&event, &args);
                trace!(target: "probedock_rt::channel", %event, handled, "inbound event");
                if let Some(id) = id {
                    let reply = EnginePacket::Message(SocketPacket::Ack {
                        namespace,
                        id,
                        args: Vec::new(),
                    });
                    if let Ok(frame) = packet::encode(&reply) {
                        let _ = tx.send(frame);
                    }
                }
            }
            SocketPacket::Ack { namespace, id, args } if namespace == self.options.namespace => {
                let callback = self.shared.acks.lock().remove(&id);
                match callback {
                    Some(callback) => callback(args),
                    None => debug!(target: "probedock_rt::channel", ack_id = id, "ack for unknown id"),
                }
            }
            other => {
                trace!(target: "probedock_rt::channel", packet = ?other, "packet for another namespace");
            }
        }
        None
    }
}
