//! Best-effort lifecycle notifications.
//!
//! Every call either hands one event to the channel or logs why it did not.
//! Nothing raised by serialization or by the transport, panics included,
//! reaches the caller.

use rt_channel::ChannelError;
use rt_proto::{ProjectInfo, RunEnd, RunStart, EVENT_PAYLOAD, EVENT_RUN_END, EVENT_RUN_START, EVENT_TEST_RESULT};
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::bridge::ConnectionBridge;
use crate::model::{JsonRunSerializer, RunSerializer, SerializeError, TestResult, TestRun};

#[derive(Debug, Error)]
enum NotifyError {
    #[error(transparent)]
    Serialize(#[from] SerializeError),
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Clone)]
pub struct Notifier {
    bridge: Arc<ConnectionBridge>,
    serializer: Arc<dyn RunSerializer>,
}

impl Notifier {
    pub fn new(bridge: Arc<ConnectionBridge>) -> Self {
        Self {
            bridge,
            serializer: Arc::new(JsonRunSerializer),
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn RunSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn bridge(&self) -> &Arc<ConnectionBridge> {
        &self.bridge
    }

    pub fn notify_start(&self, project: &str, version: &str, category: Option<&str>) {
        self.deliver("start notification", EVENT_RUN_START, || {
            Ok(serde_json::to_value(RunStart {
                project: ProjectInfo::new(project, version),
                category: category.map(str::to_string),
            })?)
        });
    }

    /// `duration` is the whole run in milliseconds.
    pub fn notify_end(&self, project: &str, version: &str, category: Option<&str>, duration: u64) {
        self.deliver("end notification", EVENT_RUN_END, || {
            Ok(serde_json::to_value(RunEnd {
                project: ProjectInfo::new(project, version),
                category: category.map(str::to_string),
                duration,
            })?)
        });
    }

    /// The project and version are always the defaults given here; the
    /// category only when the result has none of its own.
    pub fn notify_test_result(
        &self,
        result: &TestResult,
        project: &str,
        version: &str,
        default_category: Option<&str>,
    ) {
        self.deliver("test result notification", EVENT_TEST_RESULT, || {
            Ok(serde_json::to_value(result.to_notification(
                project,
                version,
                default_category,
            ))?)
        });
    }

    /// Serializes the complete run and emits it as one string.
    pub fn send(&self, run: &TestRun) {
        self.deliver("test results", EVENT_PAYLOAD, || {
            let payload = self.serializer.serialize_run(run)?;
            Ok(Value::String(payload))
        });
    }

    fn deliver<F>(&self, what: &'static str, event: &'static str, build: F)
    where
        F: FnOnce() -> Result<Value, NotifyError>,
    {
        let Some(channel) = self.bridge.connected_channel() else {
            warn!(target: "probedock_rt::notifier", "Probe Dock RT is not available to send the {what}");
            return;
        };

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), NotifyError> {
            let payload = build()?;
            channel.emit(event, payload)?;
            Ok(())
        }));
        match attempt {
            Ok(Ok(())) => trace!(target: "probedock_rt::notifier", %event, "notification emitted"),
            Ok(Err(err)) => info!(
                target: "probedock_rt::notifier",
                %event,
                error = %err,
                "unable to send the {what} to the agent"
            ),
            Err(payload) => info!(
                target: "probedock_rt::notifier",
                %event,
                panic = %panic_message(payload.as_ref()),
                "unable to send the {what} to the agent"
            ),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use rt_channel::{EmitScript, LocalChannel};
    use serde_json::json;

    fn connected(channel: Arc<LocalChannel>) -> Notifier {
        let bridge = ConnectionBridge::attach(channel, &Settings::default());
        Notifier::new(Arc::new(bridge))
    }

    struct Refusing;

    impl RunSerializer for Refusing {
        fn serialize_run(&self, _run: &TestRun) -> Result<String, SerializeError> {
            Err(SerializeError::Rejected("no results".into()))
        }
    }

    #[test]
    fn start_and_end_emit_one_event_each() {
        let channel = Arc::new(LocalChannel::accepting());
        let notifier = connected(channel.clone());

        notifier.notify_start("api", "1.0", Some("smoke"));
        notifier.notify_end("api", "1.0", None, 900);

        let emitted = channel.emitted();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].event, EVENT_RUN_START);
        assert_eq!(
            emitted[0].payload,
            Some(json!({"project": {"name": "api", "version": "1.0"}, "category": "smoke"}))
        );
        assert_eq!(emitted[1].event, EVENT_RUN_END);
        assert_eq!(
            emitted[1].payload,
            Some(json!({"project": {"name": "api", "version": "1.0"}, "duration": 900}))
        );
    }

    #[test]
    fn send_emits_serialized_run_as_string() {
        let channel = Arc::new(LocalChannel::accepting());
        let notifier = connected(channel.clone());
        let run = TestRun {
            version: "1.0".into(),
            ..TestRun::default()
        };

        notifier.send(&run);

        let sent = channel.emitted_named(EVENT_PAYLOAD);
        assert_eq!(sent.len(), 1);
        match &sent[0].payload {
            Some(Value::String(raw)) => assert!(raw.contains("\"version\":\"1.0\"")),
            other => panic!("expected a string payload, got {other:?}"),
        }
    }

    #[test]
    fn serializer_failure_is_absorbed() {
        let channel = Arc::new(LocalChannel::accepting());
        let notifier = connected(channel.clone()).with_serializer(Arc::new(Refusing));
        notifier.send(&TestRun::default());
        assert!(channel.emitted().is_empty());
    }

    #[test]
    fn transport_errors_and_panics_are_absorbed() {
        let channel = Arc::new(LocalChannel::accepting());
        let notifier = connected(channel.clone());

        channel.set_emit_script(EmitScript::Fail("broken pipe".into()));
        notifier.notify_start("api", "1.0", None);
        notifier.send(&TestRun::default());
        channel.set_emit_script(EmitScript::Panic("socket exploded".into()));
        notifier.notify_test_result(&TestResult::new("t", true, 1), "api", "1.0", None);
        notifier.send(&TestRun::default());

        channel.set_emit_script(EmitScript::Deliver);
        notifier.notify_end("api", "1.0", None, 1);
        assert_eq!(channel.emitted().len(), 1);
        assert_eq!(channel.emitted()[0].event, EVENT_RUN_END);
    }

    #[test]
    fn nothing_is_emitted_when_not_connected() {
        let channel = Arc::new(LocalChannel::refusing("down"));
        let notifier = connected(channel.clone());
        notifier.notify_start("api", "1.0", None);
        notifier.send(&TestRun::default());
        assert!(channel.emitted().is_empty());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
