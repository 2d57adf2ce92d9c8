//! Scriptable in-memory channel for tests and agent-less contexts.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::{
    AckCallback, AckId, ChannelError, ChannelEvent, ChannelResult, Dispatch, DuplexChannel,
    EventHandler, LifecycleListener,
};

/// What happens when `connect` is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectScript {
    Accept,
    Refuse(String),
    TimeOut,
    /// No lifecycle event is ever fired.
    Silent,
}

/// How the fake agent answers an acknowledged event.
#[derive(Debug, Clone, PartialEq)]
pub enum AckScript {
    Reply(Vec<Value>),
    /// Keep the callback alive and never call it.
    Never,
    /// Drop the callback, as a transport does when the connection goes away.
    Drop,
}

/// How emission behaves once the channel is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitScript {
    Deliver,
    Fail(String),
    Panic(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub event: String,
    pub payload: Option<Value>,
    pub acknowledged: bool,
}

#[derive(Default)]
struct LocalState {
    connected: bool,
    connect_calls: usize,
    next_ack: AckId,
}

pub struct LocalChannel {
    connect_script: ConnectScript,
    connect_delay: Option<Duration>,
    emit_script: Mutex<EmitScript>,
    ack_scripts: Mutex<HashMap<String, AckScript>>,
    state: Mutex<LocalState>,
    emitted: Mutex<Vec<EmittedEvent>>,
    parked_acks: Mutex<HashMap<AckId, AckCallback>>,
    dispatch: Dispatch,
}

impl LocalChannel {
    pub fn new(connect_script: ConnectScript) -> Self {
        Self {
            connect_script,
            connect_delay: None,
            emit_script: Mutex::new(EmitScript::Deliver),
            ack_scripts: Mutex::new(HashMap::new()),
            state: Mutex::new(LocalState::default()),
            emitted: Mutex::new(Vec::new()),
            parked_acks: Mutex::new(HashMap::new()),
            dispatch: Dispatch::default(),
        }
    }

    pub fn accepting() -> Self {
        Self::new(ConnectScript::Accept)
    }

    pub fn refusing(reason: impl Into<String>) -> Self {
        Self::new(ConnectScript::Refuse(reason.into()))
    }

    pub fn timing_out() -> Self {
        Self::new(ConnectScript::TimeOut)
    }

    pub fn silent() -> Self {
        Self::new(ConnectScript::Silent)
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_ack(self, event: &str, script: AckScript) -> Self {
        self.ack_scripts.lock().insert(event.to_string(), script);
        self
    }

    pub fn with_emit_script(self, script: EmitScript) -> Self {
        *self.emit_script.lock() = script;
        self
    }

    pub fn set_emit_script(&self, script: EmitScript) {
        *self.emit_script.lock() = script;
    }

    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.emitted.lock().clone()
    }

    pub fn emitted_named(&self, event: &str) -> Vec<EmittedEvent> {
        self.emitted
            .lock()
            .iter()
            .filter(|emitted| emitted.event == event)
            .cloned()
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    /// Callbacks parked by [`AckScript::Never`] and not cancelled since.
    pub fn pending_acks(&self) -> usize {
        self.parked_acks.lock().len()
    }

    /// Simulates the agent pushing an event to the client.
    pub fn push(&self, event: &str, args: &[Value]) -> usize {
        self.dispatch.dispatch(event, args)
    }

    /// Simulates the agent going away. Parked acknowledgements are dropped.
    pub fn disconnect(&self, reason: &str) {
        self.state.lock().connected = false;
        self.parked_acks.lock().clear();
        self.dispatch
            .fire_lifecycle(&ChannelEvent::Disconnect(reason.to_string()));
    }

    fn record(&self, event: &str, payload: Option<Value>, acknowledged: bool) -> ChannelResult<()> {
        if !self.connected() {
            return Err(ChannelError::NotConnected);
        }
        let script = self.emit_script.lock().clone();
        match script {
            EmitScript::Deliver => {
                self.emitted.lock().push(EmittedEvent {
                    event: event.to_string(),
                    payload,
                    acknowledged,
                });
                Ok(())
            }
            EmitScript::Fail(reason) => Err(ChannelError::Transport(reason)),
            EmitScript::Panic(message) => panic!("{message}"),
        }
    }
}

impl DuplexChannel for LocalChannel {
    fn on_lifecycle(&self, listener: LifecycleListener) {
        self.dispatch.add_lifecycle(listener);
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.dispatch.add_handler(event, handler);
    }

    fn connect(&self) {
        self.state.lock().connect_calls += 1;
        if let Some(delay) = self.connect_delay {
            std::thread::sleep(delay);
        }
        let event = match &self.connect_script {
            ConnectScript::Accept => {
                self.state.lock().connected = true;
                ChannelEvent::Connect
            }
            ConnectScript::Refuse(reason) => ChannelEvent::ConnectError(reason.clone()),
            ConnectScript::TimeOut => ChannelEvent::ConnectTimeout,
            ConnectScript::Silent => return,
        };
        self.dispatch.fire_lifecycle(&event);
    }

    fn connected(&self) -> bool {
        self.state.lock().connected
    }

    fn emit(&self, event: &str, payload: Value) -> ChannelResult<()> {
        self.record(event, Some(payload), false)
    }

    fn emit_with_ack(
        &self,
        event: &str,
        payload: Option<Value>,
        ack: AckCallback,
    ) -> ChannelResult<AckId> {
        self.record(event, payload, true)?;
        let id = {
            let mut state = self.state.lock();
            state.next_ack += 1;
            state.next_ack
        };
        let script = self
            .ack_scripts
            .lock()
            .get(event)
            .cloned()
            .unwrap_or(AckScript::Never);
        match script {
            AckScript::Reply(args) => ack(args),
            AckScript::Never => {
                self.parked_acks.lock().insert(id, ack);
            }
            AckScript::Drop => drop(ack),
        }
        Ok(id)
    }

    fn cancel_ack(&self, id: AckId) -> bool {
        self.parked_acks.lock().remove(&id).is_some()
    }
}
