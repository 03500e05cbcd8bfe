//! Validated resource payloads.
//!
//! Caller-supplied JSON is checked once at the boundary and never mutated
//! afterwards: the client sends exactly what the caller passed in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SmartResult;
use crate::error::SmartError;

/// A JSON object with a non-empty string `resourceType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ResourceEnvelope(Map<String, Value>);

impl ResourceEnvelope {
    /// Validates `value` as a resource envelope.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if `value` is not an object or has no usable
    /// `resourceType`.
    pub fn new(value: Value) -> SmartResult<Self> {
        let Value::Object(map) = value else {
            return Err(SmartError::invalid_request("Resource must be a JSON object"));
        };
        match map.get("resourceType") {
            Some(Value::String(rt)) if !rt.is_empty() => Ok(Self(map)),
            Some(_) => Err(SmartError::invalid_request(
                "resourceType must be a non-empty string",
            )),
            None => Err(SmartError::invalid_request("resourceType is required")),
        }
    }

    /// Validates a payload for `POST {expected_type}`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the payload is malformed or of another type.
    pub fn for_create(value: Value, expected_type: &str) -> SmartResult<Self> {
        let envelope = Self::new(value)?;
        envelope.expect_type(expected_type)?;
        Ok(envelope)
    }

    /// Validates a payload for `PUT {expected_type}/{id}`.
    ///
    /// An `id` in the body must equal the path id. A body without `id` is
    /// accepted as-is.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` on type or id mismatch.
    pub fn for_update(value: Value, expected_type: &str, id: &str) -> SmartResult<Self> {
        let envelope = Self::new(value)?;
        envelope.expect_type(expected_type)?;
        match envelope.0.get("id") {
            None => Ok(envelope),
            Some(Value::String(body_id)) if body_id == id => Ok(envelope),
            Some(other) => Err(SmartError::invalid_request(format!(
                "Resource id {other} does not match path id {id}"
            ))),
        }
    }

    fn expect_type(&self, expected_type: &str) -> SmartResult<()> {
        let actual = self.resource_type();
        if actual != expected_type {
            return Err(SmartError::invalid_request(format!(
                "resourceType {actual} does not match {expected_type}"
            )));
        }
        Ok(())
    }

    /// The `resourceType`.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        self.0
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The `id`, if the payload carries one.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Borrows the underlying object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl TryFrom<Value> for ResourceEnvelope {
    type Error = SmartError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceEnvelope> for Value {
    fn from(envelope: ResourceEnvelope) -> Self {
        Value::Object(envelope.0)
    }
}
