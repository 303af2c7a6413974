//! Decoding inbound request envelopes.
//!
//! An envelope is a JSON object `{"handler": "<name>", "data": <any>}`. Extra
//! fields are kept so a body-embedded credential object can be checked.

use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// Reasons a raw payload is not a usable envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("payload is not valid JSON: {source}")]
    Malformed {
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload is JSON but not an object.
    #[error("payload must be a JSON object, found {kind}")]
    NotAnObject {
        /// JSON type that was found.
        kind: &'static str,
    },
}

/// A decoded request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Name of the requested handler. A non-string `handler` counts as absent.
    #[must_use]
    pub fn handler(&self) -> Option<&str> {
        self.fields.get("handler").and_then(Value::as_str)
    }

    /// Handler input; `null` when the envelope carries none.
    #[must_use]
    pub fn data(&self) -> &Value {
        self.fields.get("data").unwrap_or(&NULL)
    }

    /// Any other top-level field, such as an embedded credential object.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Take ownership of the handler input.
    #[must_use]
    pub fn into_data(mut self) -> Value {
        self.fields.remove("data").unwrap_or(Value::Null)
    }
}

/// Decode a raw payload into an [`Envelope`].
///
/// JSON `null` decodes to an empty envelope, which then fails routing.
///
/// # Errors
///
/// Returns [`DecodeError`] for invalid JSON or JSON that is not an object.
///
/// # Examples
///
/// ```
/// use gateway_dispatch::envelope::decode_envelope;
///
/// let envelope = decode_envelope(br#"{"handler":"predict","data":{"x":1}}"#).unwrap();
/// assert_eq!(envelope.handler(), Some("predict"));
/// assert_eq!(envelope.data()["x"], 1);
/// ```
pub fn decode_envelope(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|source| DecodeError::Malformed { source })?;
    match value {
        Value::Object(fields) => Ok(Envelope { fields }),
        Value::Null => Ok(Envelope::default()),
        other => Err(DecodeError::NotAnObject {
            kind: json_kind(&other),
        }),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
