//! Owns the single channel to the agent.
//!
//! A bridge makes exactly one connection attempt when it is built and keeps
//! the channel only if that attempt succeeded. Everything else in the crate
//! reads the bridge; nothing writes to it after construction.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rt_channel::{ChannelEvent, DuplexChannel, SocketIoChannel, SocketIoOptions};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::rendezvous::{self, Outcome};

const CONNECT_THREAD: &str = "probedock-rt-connect";

static GLOBAL: OnceCell<Arc<ConnectionBridge>> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Connected,
    Failed,
}

pub struct ConnectionBridge {
    channel: Option<Arc<dyn DuplexChannel>>,
    filters_timeout: Duration,
}

impl ConnectionBridge {
    /// Connects to the agent described by `settings`. Never fails: an
    /// unreachable agent yields a bridge in [`BridgeState::Failed`]. Only
    /// [`ConnectionBridge::init`] calls this outside of tests.
    pub(crate) fn connect(settings: &Settings) -> Self {
        let options = SocketIoOptions {
            connect_timeout: settings.connect_timeout,
            ..SocketIoOptions::default()
        };
        match SocketIoChannel::new(&settings.url(), options) {
            Ok(channel) => Self::attach(Arc::new(channel), settings),
            Err(err) => {
                warn!(
                    target: "probedock_rt::bridge",
                    url = %settings.url(),
                    error = %err,
                    "Probe Dock RT is not available"
                );
                Self::failed(settings)
            }
        }
    }

    /// Runs the connection attempt on an already built channel. Test seam:
    /// production code goes through [`ConnectionBridge::init`].
    #[doc(hidden)]
    pub fn attach(channel: Arc<dyn DuplexChannel>, settings: &Settings) -> Self {
        let (signal, waiter) = rendezvous::pair::<ChannelEvent>();
        let slot = Arc::new(Mutex::new(Some(signal)));

        let first = slot.clone();
        channel.on_lifecycle(Arc::new(move |event: &ChannelEvent| {
            if let Some(signal) = first.lock().take() {
                signal.signal(event.clone());
            }
        }));

        let connector = channel.clone();
        let spawned = thread::Builder::new()
            .name(CONNECT_THREAD.into())
            .spawn(move || {
                debug!(target: "probedock_rt::bridge", "connecting to Probe Dock RT");
                let attempt = panic::catch_unwind(AssertUnwindSafe(|| connector.connect()));
                if attempt.is_err() {
                    // Release the caller now instead of at the deadline.
                    slot.lock().take();
                }
            });
        if let Err(err) = spawned {
            warn!(target: "probedock_rt::bridge", error = %err, "unable to start the connection attempt");
            return Self::failed(settings);
        }

        match waiter.wait(settings.connect_timeout) {
            Outcome::Signaled(event) => {
                debug!(target: "probedock_rt::bridge", event = %event, "connection attempt settled")
            }
            Outcome::Abandoned => {
                debug!(target: "probedock_rt::bridge", "connection attempt aborted")
            }
            Outcome::TimedOut => warn!(
                target: "probedock_rt::bridge",
                timeout_ms = settings.connect_timeout.as_millis() as u64,
                "connection attempt timed out"
            ),
        }

        if !channel.connected() {
            warn!(target: "probedock_rt::bridge", "Probe Dock RT is not available");
            return Self::failed(settings);
        }

        Self {
            channel: Some(channel),
            filters_timeout: settings.filters_timeout,
        }
    }

    pub(crate) fn failed(settings: &Settings) -> Self {
        Self {
            channel: None,
            filters_timeout: settings.filters_timeout,
        }
    }

    pub fn state(&self) -> BridgeState {
        if self.channel.is_some() {
            BridgeState::Connected
        } else {
            BridgeState::Failed
        }
    }

    /// True while the channel kept from the initial attempt is still up.
    pub fn connected(&self) -> bool {
        self.connected_channel().is_some()
    }

    pub fn connected_channel(&self) -> Option<&Arc<dyn DuplexChannel>> {
        self.channel.as_ref().filter(|channel| channel.connected())
    }

    pub fn filters_timeout(&self) -> Duration {
        self.filters_timeout
    }

    /// Returns the process-wide bridge, connecting on first use. Later calls
    /// ignore `settings` and hand back the same instance.
    pub fn init(settings: &Settings) -> Arc<ConnectionBridge> {
        GLOBAL
            .get_or_init(|| Arc::new(ConnectionBridge::connect(settings)))
            .clone()
    }

    pub fn global() -> Option<Arc<ConnectionBridge>> {
        GLOBAL.get().cloned()
    }
}

impl fmt::Debug for ConnectionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBridge")
            .field("state", &self.state())
            .field("connected", &self.connected())
            .field("filters_timeout", &self.filters_timeout)
            .finish()
    }
}
