//! A stand-in Probe Dock RT agent speaking Engine.IO v3 over an axum websocket.
//!
//! The agent runs on its own runtime so the synchronous client API can be
//! driven directly from plain `#[test]` functions.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use rt_channel::packet::{self, EnginePacket, SocketPacket};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

const OPEN_FRAME: &str =
    r#"0{"sid":"fake-agent","upgrades":[],"pingInterval":25000,"pingTimeout":60000}"#;

#[derive(Debug, Clone)]
pub enum FiltersReply {
    Ack(Value),
    Never,
}

#[derive(Debug, Clone)]
pub struct AgentScript {
    pub filters: FiltersReply,
    /// Answer the namespace connect with an error packet instead.
    pub refuse: Option<String>,
}

impl Default for AgentScript {
    fn default() -> Self {
        Self {
            filters: FiltersReply::Ack(serde_json::json!({"filters": []})),
            refuse: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub event: String,
    pub args: Vec<Value>,
}

#[derive(Clone)]
struct AgentState {
    script: AgentScript,
    events: Arc<Mutex<Sender<Received>>>,
    connections: Arc<AtomicUsize>,
}

pub struct FakeAgent {
    pub addr: SocketAddr,
    events: Receiver<Received>,
    connections: Arc<AtomicUsize>,
    _runtime: Runtime,
}

impl FakeAgent {
    pub fn start(script: AgentScript) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("agent runtime");
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .expect("listener bind");
        let addr = listener.local_addr().expect("local addr");

        let (sender, events) = mpsc::channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let state = AgentState {
            script,
            events: Arc::new(Mutex::new(sender)),
            connections: connections.clone(),
        };
        let router = Router::new()
            .route("/socket.io/", get(upgrade))
            .with_state(state);
        runtime.spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        Self {
            addr,
            events,
            connections,
            _runtime: runtime,
        }
    }

    /// Websocket sessions opened against this agent so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn next_event(&self, timeout: Duration) -> Option<Received> {
        self.events.recv_timeout(timeout).ok()
    }
}

async fn upgrade(State(state): State<AgentState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: AgentState) {
    if socket.send(WsMessage::Text(OPEN_FRAME.into())).await.is_err() {
        return;
    }
    let connect = match &state.script.refuse {
        Some(reason) => format!("44{}", Value::String(reason.clone())),
        None => "40".to_string(),
    };
    if socket.send(WsMessage::Text(connect)).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = socket.recv().await {
        let WsMessage::Text(text) = message else {
            continue;
        };
        let reply = match packet::decode(&text) {
            Ok(EnginePacket::Ping(data)) => Some(format!("3{data}")),
            Ok(EnginePacket::Message(SocketPacket::Event {
                namespace,
                id,
                event,
                args,
            })) => {
                let reply = match (id, &state.script.filters) {
                    (Some(id), FiltersReply::Ack(body)) if event == rt_proto::EVENT_FILTERS_GET => {
                        packet::encode(&EnginePacket::Message(SocketPacket::Ack {
                            namespace,
                            id,
                            args: vec![body.clone()],
                        }))
                        .ok()
                    }
                    _ => None,
                };
                if let Ok(events) = state.events.lock() {
                    let _ = events.send(Received { event, args });
                }
                reply
            }
            _ => None,
        };
        if let Some(frame) = reply {
            if socket.send(WsMessage::Text(frame)).await.is_err() {
                return;
            }
        }
    }
}

/// A port that refuses connections: bound once to learn a free number, then released.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}
