use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key-ordered field map of a resource as exchanged with the server
pub type Payload = serde_json::Map<String, serde_json::Value>;

pub const REF_FIELD: &str = "ref";
pub const TS_FIELD: &str = "ts";
pub const CLASS_FIELD: &str = "class";
pub const DELETED_FIELD: &str = "deleted";
pub const DATA_FIELD: &str = "data";
pub const CONSTRAINTS_FIELD: &str = "constraints";
pub const REFERENCES_FIELD: &str = "references";

/// Envelope wrapping every successful resource response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub resource: Payload,
    /// Related resources returned inline, keyed by reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<BTreeMap<String, Payload>>,
}

impl Envelope {
    /// Reference of the primary resource, if the server sent one.
    pub fn reference(&self) -> Option<&str> {
        self.resource.get(REF_FIELD).and_then(|v| v.as_str())
    }
}

/// Server timestamps are microseconds since the Unix epoch.
pub fn time_from_usecs(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

pub fn usecs_from_time(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_with_references() {
        let envelope: Envelope = serde_json::from_value(json!({
            "resource": {"ref": "classes/x/1", "data": {"a": 1}},
            "references": {"classes/y/1": {"data": {"b": 2}}}
        }))
        .unwrap();

        assert_eq!(envelope.reference(), Some("classes/x/1"));
        let references = envelope.references.unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references["classes/y/1"]["data"]["b"], 2);
    }

    #[test]
    fn test_envelope_without_references() {
        let envelope: Envelope =
            serde_json::from_value(json!({"resource": {"ref": "users/1"}})).unwrap();
        assert!(envelope.references.is_none());

        let envelope: Envelope =
            serde_json::from_value(json!({"resource": {"ref": "users/1"}, "references": null}))
                .unwrap();
        assert!(envelope.references.is_none());
    }

    #[test]
    fn test_envelope_requires_resource_object() {
        assert!(serde_json::from_value::<Envelope>(json!({"references": {}})).is_err());
        assert!(serde_json::from_value::<Envelope>(json!({"resource": "users/1"})).is_err());
    }

    #[test]
    fn test_timestamp_conversion() {
        let micros = 1_362_000_000_123_456;
        let time = time_from_usecs(micros).unwrap();
        assert_eq!(time.timestamp(), 1_362_000_000);
        assert_eq!(time.timestamp_subsec_micros(), 123_456);
        assert_eq!(usecs_from_time(time), micros);
    }
}
