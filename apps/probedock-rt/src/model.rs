//! Test records handed in by the framework integration.
//!
//! `TestResult` is the per-test record the notifier projects onto the
//! `run:test:result` wire shape. `TestRun` is the full run, serialized as one
//! opaque string by a [`RunSerializer`] before it goes out on `payload`.

use rt_proto::TestResultNotification;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub passed: bool,
    /// Milliseconds.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tickets: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

fn default_active() -> bool {
    true
}

impl TestResult {
    pub fn new(name: impl Into<String>, passed: bool, duration: u64) -> Self {
        Self {
            name: name.into(),
            active: true,
            passed,
            duration,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.tickets.insert(ticket.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// The result's own category unless it is missing or empty.
    pub fn effective_category(&self, default: Option<&str>) -> Option<String> {
        match self.category.as_deref() {
            Some(category) if !category.is_empty() => Some(category.to_string()),
            _ => default.map(str::to_string),
        }
    }

    pub fn to_notification(
        &self,
        project: &str,
        version: &str,
        default_category: Option<&str>,
    ) -> TestResultNotification {
        TestResultNotification {
            key: self.key.clone(),
            fingerprint: self.fingerprint.clone(),
            name: self.name.clone(),
            project: project.to_string(),
            version: version.to_string(),
            active: self.active,
            passed: self.passed,
            duration: self.duration,
            message: self.message.clone(),
            category: self.effective_category(default_category),
            tags: self.tags.clone(),
            tickets: self.tickets.clone(),
            data: self.data.clone(),
        }
    }
}

/// A complete run as reported at the end of a test session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_api_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Milliseconds.
    pub duration: u64,
    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl TestRun {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|result| result.passed).count()
    }
}

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to serialize test run: {0}")]
    Json(#[from] serde_json::Error),
    #[error("test run rejected: {0}")]
    Rejected(String),
}

/// Turns a run into the string carried by the `payload` event.
pub trait RunSerializer: Send + Sync {
    fn serialize_run(&self, run: &TestRun) -> Result<String, SerializeError>;
}

/// Compact JSON, the format the agent expects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRunSerializer;

impl RunSerializer for JsonRunSerializer {
    fn serialize_run(&self, run: &TestRun) -> Result<String, SerializeError> {
        Ok(serde_json::to_string(run)?)
    }
}
