//! Entry points for test framework integrations.
//!
//! Both types resolve to a no-op when the subsystem is disabled, in which
//! case the process-wide bridge is never built.

use std::fmt;
use std::sync::Arc;

use crate::bridge::ConnectionBridge;
use crate::config::Settings;
use crate::filters::{FilterFetcher, FilterResult};
use crate::model::{RunSerializer, TestResult, TestRun};
use crate::notifier::Notifier;

/// How the integration names its project to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectKey {
    Name(String),
    ApiId(String),
}

impl ProjectKey {
    pub fn name(name: impl Into<String>) -> Self {
        ProjectKey::Name(name.into())
    }

    pub fn api_id(id: impl Into<String>) -> Self {
        ProjectKey::ApiId(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProjectKey::Name(value) | ProjectKey::ApiId(value) => value,
        }
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct Listener {
    notifier: Option<Notifier>,
}

impl Listener {
    /// Uses the shared bridge, connecting it on first use when enabled.
    pub fn new(settings: &Settings) -> Self {
        if !settings.enabled {
            tracing::debug!(target: "probedock_rt::listener", "Probe Dock RT disabled");
            return Self::disabled();
        }
        Self::with_bridge(ConnectionBridge::init(settings))
    }

    /// Settings from the user's config file and environment.
    pub fn load() -> Self {
        Self::new(&Settings::load())
    }

    pub fn with_bridge(bridge: Arc<ConnectionBridge>) -> Self {
        Self {
            notifier: Some(Notifier::new(bridge)),
        }
    }

    pub fn disabled() -> Self {
        Self { notifier: None }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn RunSerializer>) -> Self {
        self.notifier = self
            .notifier
            .map(|notifier| notifier.with_serializer(serializer));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    pub fn test_run_start(&self, project: &ProjectKey, version: &str, category: Option<&str>) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_start(project.as_str(), version, category);
        }
    }

    pub fn test_run_end(
        &self,
        project: &ProjectKey,
        version: &str,
        category: Option<&str>,
        duration: u64,
    ) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_end(project.as_str(), version, category, duration);
        }
    }

    pub fn test_result(
        &self,
        result: &TestResult,
        project: &ProjectKey,
        version: &str,
        category: Option<&str>,
    ) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_test_result(result, project.as_str(), version, category);
        }
    }

    pub fn test_run(&self, run: &TestRun) {
        if let Some(notifier) = &self.notifier {
            notifier.send(run);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterSource {
    fetcher: Option<FilterFetcher>,
}

impl FilterSource {
    pub fn new(settings: &Settings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        Self::with_bridge(ConnectionBridge::init(settings))
    }

    pub fn load() -> Self {
        Self::new(&Settings::load())
    }

    pub fn with_bridge(bridge: Arc<ConnectionBridge>) -> Self {
        Self {
            fetcher: Some(FilterFetcher::new(bridge)),
        }
    }

    pub fn disabled() -> Self {
        Self { fetcher: None }
    }

    pub fn get_filters(&self) -> FilterResult {
        match &self.fetcher {
            Some(fetcher) => fetcher.get_filters(),
            None => FilterResult::Unavailable,
        }
    }
}
