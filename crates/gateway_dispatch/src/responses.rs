//! Response envelopes and the fixed error codes carried on the wire.
//!
//! Success serialises as `{"ok":true,"data":…}` and failure as
//! `{"ok":false,"status":…,"error":…}`. Both transports share this shape.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use std::fmt;

/// Failure codes a client can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Credentials were missing or wrong.
    Unauthorized,
    /// The payload was not a JSON object.
    InvalidJsonPayload,
    /// The envelope named no handler or an unregistered one.
    HandlerNotSupported,
    /// The handler failed or panicked.
    HandlerCallFailed,
    /// A reload was requested while another fetch was running.
    ReloadInProgress,
    /// A requested reload failed; the previous artefact keeps serving.
    ReloadFailed,
}

impl ErrorCode {
    /// Wire string placed in the `error` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidJsonPayload => "invalid_json_payload",
            Self::HandlerNotSupported => "handler_not_supported",
            Self::HandlerCallFailed => "handler_call_failed",
            Self::ReloadInProgress => "reload_in_progress",
            Self::ReloadFailed => "reload_failed",
        }
    }

    /// HTTP-style status code placed in the `status` field.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::InvalidJsonPayload | Self::HandlerNotSupported => 400,
            Self::ReloadInProgress => 409,
            Self::HandlerCallFailed | Self::ReloadFailed => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One response sent back to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    /// The handler returned `data`.
    Success {
        /// Handler result.
        data: Value,
    },
    /// The request failed with `code`.
    Failure {
        /// Failure code.
        code: ErrorCode,
    },
}

impl ResponseEnvelope {
    /// Wrap a handler result.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    /// Build a failure envelope.
    #[must_use]
    pub const fn failure(code: ErrorCode) -> Self {
        Self::Failure { code }
    }

    /// Whether this is a success envelope.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The failure code, if any.
    #[must_use]
    pub const fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { code } => Some(*code),
        }
    }

    /// Status code for transports that carry one alongside the body.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::Failure { code } => code.status(),
        }
    }

    /// Serialise to the JSON wire form.
    #[must_use]
    pub fn to_json(&self) -> String {
        // Serialising a `Value` tree into a string cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| {
            String::from(r#"{"ok":false,"status":500,"error":"handler_call_failed"}"#)
        })
    }
}

impl Serialize for ResponseEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success { data } => {
                let mut state = serializer.serialize_struct("ResponseEnvelope", 2)?;
                state.serialize_field("ok", &true)?;
                state.serialize_field("data", data)?;
                state.end()
            }
            Self::Failure { code } => {
                let mut state = serializer.serialize_struct("ResponseEnvelope", 3)?;
                state.serialize_field("ok", &false)?;
                state.serialize_field("status", &code.status())?;
                state.serialize_field("error", code.as_str())?;
                state.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::unauthorized(ErrorCode::Unauthorized, json!({"ok": false, "status": 401, "error": "unauthorized"}))]
    #[case::invalid(ErrorCode::InvalidJsonPayload, json!({"ok": false, "status": 400, "error": "invalid_json_payload"}))]
    #[case::unsupported(ErrorCode::HandlerNotSupported, json!({"ok": false, "status": 400, "error": "handler_not_supported"}))]
    #[case::failed(ErrorCode::HandlerCallFailed, json!({"ok": false, "status": 500, "error": "handler_call_failed"}))]
    #[case::busy(ErrorCode::ReloadInProgress, json!({"ok": false, "status": 409, "error": "reload_in_progress"}))]
    #[case::reload(ErrorCode::ReloadFailed, json!({"ok": false, "status": 500, "error": "reload_failed"}))]
    fn failures_have_fixed_wire_shape(#[case] code: ErrorCode, #[case] expected: Value) {
        let envelope = ResponseEnvelope::failure(code);
        assert_eq!(serde_json::to_value(&envelope).expect("serialise"), expected);
        assert_eq!(envelope.status(), code.status());
    }

    #[test]
    fn success_carries_data_without_status() {
        let envelope = ResponseEnvelope::success(json!({"label": "cat"}));
        assert_eq!(envelope.to_json(), r#"{"ok":true,"data":{"label":"cat"}}"#);
        assert_eq!(envelope.status(), 200);
    }

    #[test]
    fn null_result_is_still_reported() {
        let envelope = ResponseEnvelope::success(Value::Null);
        assert_eq!(envelope.to_json(), r#"{"ok":true,"data":null}"#);
    }
}
