//! Wire-level JSON-RPC 2.0 message types.
//!
//! These types model exactly what appears on the wire: requests carry an
//! id and expect a response, notifications carry no id and expect none,
//! and responses carry exactly one of `result` or `error`. Batch framing
//! and tolerant parsing of mixed/malformed input live in [`crate::batch`];
//! this module only defines the shapes and their serde mapping.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes;

/// The only protocol version this crate emits or accepts.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request or response identifier.
///
/// JSON-RPC allows an id to be a JSON string, a JSON number, or `null`.
/// This crate treats a `null` id the same way an absent id is treated for
/// notification purposes, but preserves it verbatim when it appears on a
/// response to a request that could not otherwise be parsed (see
/// [`crate::batch`]).
///
/// # Examples
///
/// ```
/// use jrpc2::message::RequestId;
///
/// let id: RequestId = 7.into();
/// assert_eq!(id, RequestId::Number(7));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric id, as produced by this crate's own client id counter.
    Number(i64),
    /// A string id, accepted from peers that mint their own ids this way.
    String(String),
    /// An explicit JSON `null` id.
    Null,
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id as i64)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

/// A JSON-RPC 2.0 request: expects exactly one [`Response`] carrying the
/// same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The method name to invoke.
    pub method: String,
    /// Method parameters, if any. JSON-RPC permits this to be a structured
    /// value (object or array); this crate leaves interpretation of its
    /// shape to the handler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlates the eventual response back to this request.
    pub id: RequestId,
}

impl Request {
    /// Builds a new request with the standard protocol version.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// A JSON-RPC 2.0 notification: carries no `id` and receives no response,
/// by design -- the sender has no way to learn whether it arrived or
/// whether the method even exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The method name to invoke.
    pub method: String,
    /// Method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Builds a new notification with the standard protocol version.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object, as embedded in a [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Error {
    /// A numeric code identifying the error class. See [`crate::codes`]
    /// for the reserved and sentinel values this crate assigns meaning to.
    pub code: i32,
    /// A short, single-line description of the error.
    pub message: String,
    /// Optional structured detail the handler chose to attach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Error {
    /// Builds a new error object with no attached data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Error {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data to this error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builds the standard "method not found" error for the given method.
    pub fn method_not_found(method: &str) -> Self {
        Error::new(
            codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    /// Builds the standard "invalid params" error, optionally detailing why.
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Error::new(codes::INVALID_PARAMS, detail.into())
    }

    /// Builds the standard "parse error" for input that was not valid JSON.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Error::new(codes::PARSE_ERROR, detail.into())
    }

    /// Builds the standard "invalid request" error for well-formed JSON
    /// that is not a valid Request object.
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Error::new(codes::INVALID_REQUEST, detail.into())
    }

    /// Builds the sentinel error used when a handler's context was
    /// cancelled before it produced a result.
    pub fn cancelled() -> Self {
        Error::new(codes::CANCELLED, "request cancelled")
    }

    /// Builds the sentinel error used when a handler's context deadline
    /// elapsed before it produced a result.
    pub fn deadline_exceeded() -> Self {
        Error::new(codes::DEADLINE_EXCEEDED, "deadline exceeded")
    }

    /// Builds the sentinel error used when a handler panicked or failed in
    /// a way that isn't otherwise classified.
    pub fn system_error(detail: impl Into<String>) -> Self {
        Error::new(codes::SYSTEM_ERROR, detail.into())
    }

    /// Builds the standard "internal error" for unexpected server-side
    /// failures not attributable to the caller.
    pub fn internal_error(detail: impl Into<String>) -> Self {
        Error::new(codes::INTERNAL_ERROR, detail.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// The payload of a [`Response`]: exactly one of a result value or an
/// error object, never both and never neither.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The call succeeded, with this result value (possibly `Value::Null`).
    Result(Value),
    /// The call failed with this error object.
    Error(Error),
}

/// A JSON-RPC 2.0 response to a single [`Request`].
#[derive(Debug, Clone)]
pub struct Response {
    /// The id copied from the originating request.
    pub id: RequestId,
    /// The result or error payload.
    pub outcome: Outcome,
}

impl Response {
    /// Builds a successful response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Response {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// Builds a failed response.
    pub fn failure(id: RequestId, error: Error) -> Self {
        Response {
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Returns `true` if this response carries an error outcome.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }
}

/// Wire-shape mirror of [`Response`], used only for serde (de)serialization
/// -- keeps the public `Response` type from needing a serde-unfriendly
/// `#[serde(flatten)]` dance over the result/error union.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseWire {
    jsonrpc: String,
    id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = match &self.outcome {
            Outcome::Result(v) => ResponseWire {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: self.id.clone(),
                result: Some(v.clone()),
                error: None,
            },
            Outcome::Error(e) => ResponseWire {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: self.id.clone(),
                result: None,
                error: Some(e.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = ResponseWire::deserialize(deserializer)?;
        let outcome = match (wire.result, wire.error) {
            (Some(r), None) => Outcome::Result(r),
            (None, Some(e)) => Outcome::Error(e),
            (None, None) => Outcome::Result(Value::Null),
            (Some(_), Some(_)) => {
                return Err(serde::de::Error::custom(
                    "response carries both result and error",
                ))
            }
        };
        Ok(Response {
            id: wire.id,
            outcome,
        })
    }
}
