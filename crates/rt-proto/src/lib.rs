//! Event names and payload shapes exchanged with the Probe Dock RT agent.
//! Kept in a dedicated crate so the agent-facing protocol can be checked
//! without pulling in the transport or the runtime glue.
//!
//! Absent optional values are omitted from the JSON objects rather than
//! sent as `null`; the agent treats a missing key and a `null` key alike.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod filters;

pub use filters::{FilterDefinition, FilterParseError, FiltersAck, PartialFilters};

pub const EVENT_RUN_START: &str = "run:start";
pub const EVENT_RUN_END: &str = "run:end";
pub const EVENT_TEST_RESULT: &str = "run:test:result";
pub const EVENT_PAYLOAD: &str = "payload";
pub const EVENT_FILTERS_GET: &str = "filters:get";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub version: String,
}

impl ProjectInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Body of `run:start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStart {
    pub project: ProjectInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Body of `run:end`. `duration` is the whole run in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEnd {
    pub project: ProjectInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub duration: u64,
}

/// Body of `run:test:result`, using the single-letter keys of the agent protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultNotification {
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "j")]
    pub project: String,
    #[serde(rename = "v")]
    pub version: String,
    #[serde(rename = "e")]
    pub active: bool,
    #[serde(rename = "p")]
    pub passed: bool,
    #[serde(rename = "d")]
    pub duration: u64,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "g", default)]
    pub tags: BTreeSet<String>,
    #[serde(rename = "t", default)]
    pub tickets: BTreeSet<String>,
    #[serde(rename = "a", default)]
    pub data: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_start_nests_project_and_omits_missing_category() {
        let start = RunStart {
            project: ProjectInfo::new("api", "1.2.0"),
            category: None,
        };
        let value = serde_json::to_value(&start).expect("serialize");
        assert_eq!(value, json!({"project": {"name": "api", "version": "1.2.0"}}));
    }

    #[test]
    fn run_end_carries_duration() {
        let end = RunEnd {
            project: ProjectInfo::new("api", "1.2.0"),
            category: Some("integration".into()),
            duration: 4_250,
        };
        let value = serde_json::to_value(&end).expect("serialize");
        assert_eq!(
            value,
            json!({
                "project": {"name": "api", "version": "1.2.0"},
                "category": "integration",
                "duration": 4250
            })
        );
    }

    #[test]
    fn test_result_uses_protocol_keys() {
        let result = TestResultNotification {
            key: Some("k-1".into()),
            fingerprint: Some("fp".into()),
            name: "logs in".into(),
            project: "api".into(),
            version: "1.2.0".into(),
            active: true,
            passed: false,
            duration: 12,
            message: Some("expected 200".into()),
            category: Some("smoke".into()),
            tags: ["auth".to_string()].into_iter().collect(),
            tickets: BTreeSet::new(),
            data: [("browser".to_string(), "firefox".to_string())]
                .into_iter()
                .collect(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            value,
            json!({
                "k": "k-1",
                "f": "fp",
                "n": "logs in",
                "j": "api",
                "v": "1.2.0",
                "e": true,
                "p": false,
                "d": 12,
                "m": "expected 200",
                "c": "smoke",
                "g": ["auth"],
                "t": [],
                "a": {"browser": "firefox"}
            })
        );
    }

    #[test]
    fn test_result_drops_absent_message() {
        let result = TestResultNotification {
            key: None,
            fingerprint: None,
            name: "n".into(),
            project: "p".into(),
            version: "v".into(),
            active: true,
            passed: true,
            duration: 0,
            message: None,
            category: None,
            tags: BTreeSet::new(),
            tickets: BTreeSet::new(),
            data: BTreeMap::new(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("m"));
        assert!(!object.contains_key("k"));
        assert_eq!(object["a"], json!({}));
    }
}
