//! Pulls the filter rules from the agent before the tests run.
//!
//! The request goes out on a helper thread while the caller parks on a
//! rendezvous that the acknowledgement callback completes. The callback
//! is the only owner of the signalling side, so a transport that drops it
//! (failed emit, disconnect) releases the caller right away. A request the
//! agent never answers is cancelled on the channel once the caller gives up.

use parking_lot::Mutex;
use rt_channel::{AckCallback, AckId, DuplexChannel};
use rt_proto::{FilterDefinition, FiltersAck, PartialFilters, EVENT_FILTERS_GET};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::ConnectionBridge;
use crate::notifier::panic_message;
use crate::rendezvous::{self, Outcome, Signal};

const FILTERS_THREAD: &str = "probedock-rt-filters";

/// `Unavailable` means the agent could not be asked or did not answer in
/// time; an agent that answered with no filters gives an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterResult {
    Unavailable,
    Filters(Vec<FilterDefinition>),
}

impl FilterResult {
    pub fn is_available(&self) -> bool {
        matches!(self, FilterResult::Filters(_))
    }

    pub fn filters(&self) -> Option<&[FilterDefinition]> {
        match self {
            FilterResult::Filters(filters) => Some(filters),
            FilterResult::Unavailable => None,
        }
    }

    pub fn into_filters(self) -> Option<Vec<FilterDefinition>> {
        match self {
            FilterResult::Filters(filters) => Some(filters),
            FilterResult::Unavailable => None,
        }
    }
}

type SharedSignal = Arc<Mutex<Option<Signal<PartialFilters>>>>;

/// Where the helper thread and the caller meet to cancel an unanswered request.
#[derive(Default)]
struct Pending {
    ack_id: Option<AckId>,
    expired: bool,
}

type SharedPending = Arc<Mutex<Pending>>;

#[derive(Debug, Clone)]
pub struct FilterFetcher {
    bridge: Arc<ConnectionBridge>,
    timeout: Duration,
}

impl FilterFetcher {
    pub fn new(bridge: Arc<ConnectionBridge>) -> Self {
        let timeout = bridge.filters_timeout();
        Self { bridge, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_filters(&self) -> FilterResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.fetch())) {
            Ok(result) => result,
            Err(payload) => {
                warn!(
                    target: "probedock_rt::filters",
                    panic = %panic_message(payload.as_ref()),
                    "unable to retrieve the filters from the agent"
                );
                FilterResult::Unavailable
            }
        }
    }

    fn fetch(&self) -> FilterResult {
        let Some(channel) = self.bridge.connected_channel() else {
            debug!(target: "probedock_rt::filters", "Probe Dock RT is not available to send the filters");
            return FilterResult::Unavailable;
        };
        let channel = channel.clone();

        let (signal, waiter) = rendezvous::pair::<PartialFilters>();
        let shared: SharedSignal = Arc::new(Mutex::new(Some(signal)));
        let pending = SharedPending::default();

        let for_ack = shared.clone();
        let ack: AckCallback = Box::new(move |args: Vec<Value>| {
            let parsed = FiltersAck::parse_partial(&args);
            if let Some(signal) = for_ack.lock().take() {
                signal.signal(parsed);
            }
        });

        let requester = channel.clone();
        let tracked = pending.clone();
        let spawned = thread::Builder::new()
            .name(FILTERS_THREAD.into())
            .spawn(move || request(requester, ack, shared, tracked));
        if let Err(err) = spawned {
            warn!(target: "probedock_rt::filters", error = %err, "unable to start the filters request");
            return FilterResult::Unavailable;
        }

        match waiter.wait(self.timeout) {
            Outcome::Signaled(parsed) => {
                if let Some(err) = &parsed.error {
                    info!(
                        target: "probedock_rt::filters",
                        error = %err,
                        kept = parsed.filters.len(),
                        "unable to parse the filters"
                    );
                }
                for filter in &parsed.filters {
                    info!(target: "probedock_rt::filters", %filter, "filter element");
                }
                FilterResult::Filters(parsed.filters)
            }
            Outcome::Abandoned => {
                debug!(target: "probedock_rt::filters", "filters request dropped without acknowledgement");
                FilterResult::Filters(Vec::new())
            }
            Outcome::TimedOut => {
                warn!(
                    target: "probedock_rt::filters",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "no filters received from the agent in time"
                );
                let ack_id = {
                    let mut pending = pending.lock();
                    pending.expired = true;
                    pending.ack_id.take()
                };
                if let Some(id) = ack_id {
                    channel.cancel_ack(id);
                }
                FilterResult::Unavailable
            }
        }
    }
}

/// Runs on the helper thread. Holds a handle on the signal only until the
/// emit returns, leaving the callback as its sole owner afterwards. An emit
/// that fails or panics releases the caller with an empty list.
fn request(
    channel: Arc<dyn DuplexChannel>,
    ack: AckCallback,
    shared: SharedSignal,
    pending: SharedPending,
) {
    debug!(target: "probedock_rt::filters", "retrieve filters");
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        channel.emit_with_ack(EVENT_FILTERS_GET, None, ack)
    }));
    match attempt {
        Ok(Ok(id)) => {
            let mut pending = pending.lock();
            if pending.expired {
                drop(pending);
                channel.cancel_ack(id);
            } else {
                pending.ack_id = Some(id);
            }
        }
        Ok(Err(err)) => {
            debug!(target: "probedock_rt::filters", error = %err, "unable to get the filters");
            drop(shared.lock().take());
        }
        Err(payload) => {
            info!(
                target: "probedock_rt::filters",
                panic = %panic_message(payload.as_ref()),
                "unable to get the filters"
            );
            drop(shared.lock().take());
        }
    }
}
