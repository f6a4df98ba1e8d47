//! Accumulating job state threaded through a pipeline.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{JobError, JobResult};

/// The job state passed from one action to the next.
///
/// Starts as the job payload. After each action the action's output is
/// merged in additively: keys the output produces override the accumulator,
/// keys it does not produce pass through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobState(Map<String, Value>);

impl JobState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value is not a JSON object.
    pub fn from_value(value: Value) -> JobResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(JobError::validation(format!(
                "Job state must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Creates a state from a typed payload.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the payload does not serialize to an object.
    pub fn from_payload<T: Serialize>(payload: &T) -> JobResult<Self> {
        let value = serde_json::to_value(payload)
            .map_err(|e| JobError::validation(format!("Unserializable payload: {e}")))?;
        Self::from_value(value)
    }

    /// Deserializes the whole state into a typed view.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the mismatch.
    pub fn to_typed<T: DeserializeOwned>(&self) -> JobResult<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| JobError::validation(format!("Job state has unexpected shape: {e}")))
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns a string field.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Deserializes a single field.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the field is missing or has the wrong type.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> JobResult<T> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| JobError::validation(format!("Missing field: {key}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| JobError::validation(format!("Field '{key}' has unexpected type: {e}")))
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Merges another state into this one. Keys in `other` win.
    pub fn merge(&mut self, other: JobState) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    /// Returns a new state with `other` merged over `self`.
    #[must_use]
    pub fn merged(mut self, other: JobState) -> Self {
        self.merge(other);
        self
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the sorted list of keys.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the state as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Consumes the state, returning the inner map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for JobState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_merge_is_additive() {
        let mut state = JobState::from_value(json!({"noteId": "n1", "content": "<h1>Soup</h1>"})).unwrap();
        let output = JobState::new().with("content", "Soup").with("title", "Soup");

        state.merge(output);

        assert_eq!(
            state.to_value(),
            json!({"noteId": "n1", "content": "Soup", "title": "Soup"})
        );
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        let err = JobState::from_value(json!("text")).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("string"));
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Payload {
            note_id: String,
            line_count: u32,
        }

        let state = JobState::from_payload(&Payload {
            note_id: "n1".into(),
            line_count: 3,
        })
        .unwrap();

        assert_eq!(state.get_str("noteId"), Some("n1"));
        assert_eq!(state.get_as::<u32>("lineCount").unwrap(), 3);
        assert_eq!(
            state.to_typed::<Payload>().unwrap(),
            Payload {
                note_id: "n1".into(),
                line_count: 3
            }
        );
    }

    #[test]
    fn test_get_as_missing_field() {
        let err = JobState::new().get_as::<String>("noteId").unwrap_err();
        assert_eq!(err.message, "Missing field: noteId");
    }

    #[test]
    fn test_keys_sorted() {
        let state = JobState::new().with("b", 1).with("a", 2);
        assert_eq!(state.keys(), vec!["a", "b"]);
        assert_eq!(state.len(), 2);
    }
}
