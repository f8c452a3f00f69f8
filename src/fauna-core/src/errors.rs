//! Server error bodies
//!
//! Non-2xx responses carry a JSON body describing the fault. The body is kept
//! verbatim and decoded lazily into [`ErrorData`] entries.

use serde_json::Value;
use std::fmt;

/// Body of a failed response: raw text plus its JSON form when it parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub raw: String,
    pub json: Option<Value>,
}

/// One step in the path to the offending part of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(i64),
}

/// One error reported by the server
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorData {
    pub code: String,
    pub description: String,
    pub position: Option<Vec<PathSegment>>,
    /// Present for `validation failed` errors
    pub failures: Vec<Failure>,
}

/// A single field failure within a `validation failed` error
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub code: String,
    pub description: String,
    pub field: Option<Vec<PathSegment>>,
}

pub const VALIDATION_FAILED: &str = "validation failed";

impl ErrorBody {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let json = serde_json::from_str(&raw).ok();
        Self { raw, json }
    }

    /// Decode the error entries.
    ///
    /// Accepts `{"errors": [...]}`, a single `{"error": ...}` object, or a
    /// bare string body.
    pub fn errors(&self) -> Vec<ErrorData> {
        match &self.json {
            Some(Value::Object(obj)) => match (obj.get("errors"), obj.get("error")) {
                (Some(Value::Array(list)), _) => list.iter().map(ErrorData::from_value).collect(),
                (_, Some(Value::String(message))) => vec![ErrorData::simple(message, obj)],
                (_, Some(error @ Value::Object(_))) => vec![ErrorData::from_value(error)],
                _ => Vec::new(),
            },
            Some(Value::String(message)) => vec![ErrorData::simple(message, &Default::default())],
            _ => Vec::new(),
        }
    }

    /// Description of the first error, falling back to the raw body.
    pub fn message(&self) -> String {
        match self.errors().into_iter().next() {
            Some(first) if !first.description.is_empty() => first.description,
            Some(first) => first.code,
            None if self.raw.is_empty() => "(empty body)".to_string(),
            None => self.raw.clone(),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl ErrorData {
    fn from_value(value: &Value) -> Self {
        let code = str_field(value, "code");
        let failures = if code == VALIDATION_FAILED {
            value
                .get("failures")
                .and_then(Value::as_array)
                .map(|list| list.iter().map(Failure::from_value).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Self {
            description: str_field(value, "description"),
            position: value.get("position").and_then(map_position),
            code,
            failures,
        }
    }

    fn simple(message: &str, obj: &serde_json::Map<String, Value>) -> Self {
        Self {
            code: obj
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(message)
                .to_string(),
            description: obj
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or(message)
                .to_string(),
            position: None,
            failures: Vec::new(),
        }
    }

    pub fn is_validation_failure(&self) -> bool {
        self.code == VALIDATION_FAILED
    }
}

impl Failure {
    fn from_value(value: &Value) -> Self {
        Self {
            code: str_field(value, "code"),
            description: str_field(value, "description"),
            field: value.get("field").and_then(map_position),
        }
    }
}

fn str_field(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn map_position(value: &Value) -> Option<Vec<PathSegment>> {
    let parts = value.as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(PathSegment::Field(s.clone())),
                Value::Number(n) => n.as_i64().map(PathSegment::Index),
                _ => None,
            })
            .collect(),
    )
}
