use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One filter rule handed out by the agent, e.g. `{type: "tag", text: "slow"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl FilterDefinition {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }
}

impl std::fmt::Display for FilterDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.text)
    }
}

/// Acknowledgement body the agent returns for `filters:get`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiltersAck {
    pub filters: Vec<FilterDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterParseError {
    #[error("acknowledgement carried no arguments")]
    MissingArgument,
    #[error("acknowledgement is not a JSON object")]
    NotAnObject,
    #[error("acknowledgement has no `filters` array")]
    MissingFilters,
    #[error("filter #{index} is malformed: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Outcome of a lenient parse: everything read before the first problem is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialFilters {
    pub filters: Vec<FilterDefinition>,
    pub error: Option<FilterParseError>,
}

impl FiltersAck {
    /// Parses the arguments of a `filters:get` acknowledgement.
    ///
    /// The first argument must be an object with a `filters` array of
    /// `{type, text}` tuples. Parsing stops at the first malformed tuple;
    /// tuples before it are returned in payload order, duplicates included.
    pub fn parse_partial(args: &[Value]) -> PartialFilters {
        let mut parsed = PartialFilters::default();

        let Some(first) = args.first() else {
            parsed.error = Some(FilterParseError::MissingArgument);
            return parsed;
        };
        let Some(object) = first.as_object() else {
            parsed.error = Some(FilterParseError::NotAnObject);
            return parsed;
        };
        let Some(entries) = object.get("filters").and_then(Value::as_array) else {
            parsed.error = Some(FilterParseError::MissingFilters);
            return parsed;
        };

        for (index, entry) in entries.iter().enumerate() {
            match tuple_from(entry) {
                Ok(filter) => parsed.filters.push(filter),
                Err(reason) => {
                    parsed.error = Some(FilterParseError::InvalidEntry { index, reason });
                    break;
                }
            }
        }
        parsed
    }
}

fn tuple_from(entry: &Value) -> Result<FilterDefinition, String> {
    let object = entry
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;
    let field = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| format!("missing string field `{name}`"))
    };
    Ok(FilterDefinition {
        kind: field("type")?,
        text: field("text")?,
    })
}
