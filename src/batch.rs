//! Tolerant parsing of inbound JSON-RPC traffic: single messages and
//! batches, malformed elements included.
//!
//! The server side of this crate never rejects a whole batch because one
//! element in it is broken -- it defers the error to that element's own
//! reply and keeps processing the rest. This mirrors §4.2 of the wire
//! protocol: a batch is an array, a single call is a bare object, and the
//! shape of the reply mirrors the shape of the request (an array in, an
//! array out; a bare object in, a bare object out; a notification-only
//! batch produces no reply at all).
//!
//! Classification of a single parsed [`Value`] follows the same
//! has-`id`/has-`method` decision tree used by LSP-style JSON-RPC
//! transports: present `method` + present `id` is a request, present
//! `method` + absent `id` is a notification, absent `method` is treated as
//! a response shape (used by [`crate::client`], not this module).

use serde_json::Value;

use crate::message::{Error, Notification, Request, RequestId};

/// One element of an inbound batch (or a lone inbound message), after
/// shape classification but before dispatch.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A well-formed request: has both `method` and `id`.
    Request(Request),
    /// A well-formed notification: has `method`, no `id`.
    Notification(Notification),
    /// JSON that parsed but is not a valid Request object (wrong types,
    /// missing `method`, non-object element, etc). Carries the id if one
    /// could be salvaged, so the reply can still be correlated.
    Invalid {
        /// The id extracted from the raw value, if any was present and
        /// well-typed. `None` if no id could be recovered at all, in
        /// which case the resulting error reply carries `RequestId::Null`.
        id: Option<RequestId>,
        /// The reason the element was rejected.
        error: Error,
    },
}

impl Inbound {
    /// The id to use when replying to this element, or `None` if this
    /// element must not produce a reply (a well-formed notification, or
    /// an invalid element with no recoverable id at all is still replied
    /// to with `null` per the base JSON-RPC spec -- only notifications
    /// are silent).
    pub fn reply_id(&self) -> Option<RequestId> {
        match self {
            Inbound::Request(r) => Some(r.id.clone()),
            Inbound::Notification(_) => None,
            Inbound::Invalid { id, .. } => Some(id.clone().unwrap_or(RequestId::Null)),
        }
    }
}

/// The shape an inbound payload arrived in, preserved so the reply can be
/// sent back in the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A single bare object.
    Single,
    /// A JSON array, even if it contained exactly one element.
    Batch,
}

/// The result of parsing one inbound payload (a raw record handed up from
/// the framing layer).
#[derive(Debug)]
pub struct ParsedBatch {
    /// The shape the payload arrived in.
    pub shape: Shape,
    /// Every element, in array order, after per-element classification.
    pub elements: Vec<Inbound>,
}

/// Parses a raw inbound payload into a [`ParsedBatch`].
///
/// Returns `Err` only when the payload is not valid JSON at all, or is
/// valid JSON but neither an object nor an array (e.g. a bare number or
/// string) -- both are protocol-level parse errors with no element to
/// attach them to. An empty array is a distinct, explicit protocol error
/// (`Invalid Request`), matching the base spec's rule that `[]` is
/// invalid rather than a silent no-op.
pub fn parse(raw: &[u8]) -> Result<ParsedBatch, Error> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| Error::parse_error(format!("invalid JSON: {e}")))?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Error::invalid_request("empty request batch"));
            }
            let elements = items.iter().map(classify).collect();
            Ok(ParsedBatch {
                shape: Shape::Batch,
                elements,
            })
        }
        Value::Object(_) => Ok(ParsedBatch {
            shape: Shape::Single,
            elements: vec![classify(&value)],
        }),
        other => Err(Error::invalid_request(format!(
            "expected an object or array, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn classify(value: &Value) -> Inbound {
    let Value::Object(obj) = value else {
        return Inbound::Invalid {
            id: None,
            error: Error::invalid_request(format!(
                "batch element must be an object, got {}",
                type_name(value)
            )),
        };
    };

    let mut unknown_keys: Vec<&str> = Vec::new();
    for key in obj.keys() {
        if !matches!(key.as_str(), "jsonrpc" | "method" | "params" | "id") {
            unknown_keys.push(key.as_str());
        }
    }

    let recovered_id = extract_id(obj.get("id"));

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Inbound::Invalid {
            id: recovered_id,
            error: Error::invalid_request("invalid version marker"),
        };
    }

    let has_method = obj.contains_key("method");
    let has_id = obj.contains_key("id") && !matches!(obj.get("id"), Some(Value::Null));

    if !has_method {
        return Inbound::Invalid {
            id: recovered_id,
            error: Error::invalid_request("missing \"method\""),
        };
    }

    if obj.contains_key("result") || obj.contains_key("error") {
        return Inbound::Invalid {
            id: recovered_id,
            error: Error::invalid_request("request must not carry a \"result\" or \"error\" field"),
        };
    }

    if !unknown_keys.is_empty() {
        unknown_keys.sort_unstable();
        return Inbound::Invalid {
            id: recovered_id,
            error: Error::invalid_request("unexpected field(s) in request")
                .with_data(serde_json::json!(unknown_keys)),
        };
    }

    if let Some(params) = obj.get("params") {
        if !matches!(params, Value::Null | Value::Array(_) | Value::Object(_)) {
            return Inbound::Invalid {
                id: recovered_id,
                error: Error::invalid_request("\"params\" must be an object or array"),
            };
        }
    }

    if has_id {
        match serde_json::from_value::<Request>(value.clone()) {
            Ok(req) => Inbound::Request(req),
            Err(e) => Inbound::Invalid {
                id: recovered_id,
                error: Error::invalid_request(format!("malformed request: {e}")),
            },
        }
    } else {
        match serde_json::from_value::<Notification>(value.clone()) {
            Ok(n) => Inbound::Notification(n),
            Err(e) => Inbound::Invalid {
                id: None,
                error: Error::invalid_request(format!("malformed notification: {e}")),
            },
        }
    }
}

/// Recovers a [`RequestId`] from a raw `id` field, returning `None` if the
/// field is absent, `null`, or not a valid id type (object/array/bool).
fn extract_id(id: Option<&Value>) -> Option<RequestId> {
    match id? {
        Value::Number(n) => n.as_i64().map(RequestId::Number),
        Value::String(s) => Some(RequestId::String(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_request() {
        let raw = br#"{"jsonrpc":"2.0","method":"Math.Add","params":[1,2],"id":1}"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.shape, Shape::Single);
        assert_eq!(batch.elements.len(), 1);
        assert!(matches!(batch.elements[0], Inbound::Request(_)));
    }

    #[test]
    fn test_parse_single_notification() {
        let raw = br#"{"jsonrpc":"2.0","method":"Log.Emit","params":["hi"]}"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.shape, Shape::Single);
        assert!(matches!(batch.elements[0], Inbound::Notification(_)));
        assert_eq!(batch.elements[0].reply_id(), None);
    }

    #[test]
    fn test_parse_batch_mixed() {
        let raw = br#"[
            {"jsonrpc":"2.0","method":"A","id":1},
            {"jsonrpc":"2.0","method":"B"},
            {"jsonrpc":"2.0","method":"C","id":"x"}
        ]"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.shape, Shape::Batch);
        assert_eq!(batch.elements.len(), 3);
        assert!(matches!(batch.elements[0], Inbound::Request(_)));
        assert!(matches!(batch.elements[1], Inbound::Notification(_)));
        assert!(matches!(batch.elements[2], Inbound::Request(_)));
    }

    #[test]
    fn test_empty_batch_is_invalid_request() {
        let raw = b"[]";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.code, crate::codes::INVALID_REQUEST);
    }

    #[test]
    fn test_not_json_is_parse_error() {
        let raw = b"{not json";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.code, crate::codes::PARSE_ERROR);
    }

    #[test]
    fn test_bare_scalar_is_invalid_request() {
        let raw = b"42";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.code, crate::codes::INVALID_REQUEST);
    }

    #[test]
    fn test_batch_element_missing_method_is_invalid_with_recovered_id() {
        let raw = br#"[{"jsonrpc":"2.0","id":5}]"#;
        let batch = parse(raw).unwrap();
        match &batch.elements[0] {
            Inbound::Invalid { id, .. } => assert_eq!(*id, Some(RequestId::Number(5))),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_element_wrong_version_preserves_id_for_reply() {
        let raw = br#"[{"jsonrpc":"1.0","method":"A","id":9}]"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.elements[0].reply_id(), Some(RequestId::Number(9)));
    }

    #[test]
    fn test_non_object_batch_element() {
        let raw = br#"[1, {"jsonrpc":"2.0","method":"A","id":1}]"#;
        let batch = parse(raw).unwrap();
        assert!(matches!(batch.elements[0], Inbound::Invalid { id: None, .. }));
        assert!(matches!(batch.elements[1], Inbound::Request(_)));
    }

    #[test]
    fn test_unknown_keys_are_rejected_with_names_as_data() {
        let raw = br#"{"jsonrpc":"2.0","method":"A","id":1,"extra":true}"#;
        let batch = parse(raw).unwrap();
        match &batch.elements[0] {
            Inbound::Invalid { error, .. } => {
                assert_eq!(error.data, Some(json!(["extra"])));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_method_with_result_field_is_invalid() {
        let raw = br#"{"jsonrpc":"2.0","method":"A","id":1,"result":1}"#;
        let batch = parse(raw).unwrap();
        assert!(matches!(batch.elements[0], Inbound::Invalid { .. }));
    }

    #[test]
    fn test_scalar_params_is_invalid() {
        let raw = br#"{"jsonrpc":"2.0","method":"A","id":1,"params":"nope"}"#;
        let batch = parse(raw).unwrap();
        assert!(matches!(batch.elements[0], Inbound::Invalid { .. }));
    }

    #[test]
    fn test_array_params_is_accepted() {
        let raw = br#"{"jsonrpc":"2.0","method":"A","id":1,"params":[1,2]}"#;
        let batch = parse(raw).unwrap();
        assert!(matches!(batch.elements[0], Inbound::Request(_)));
    }

    #[test]
    fn test_null_id_treated_as_notification_shape() {
        let raw = br#"{"jsonrpc":"2.0","method":"A","id":null,"params":{}}"#;
        let batch = parse(raw).unwrap();
        assert!(matches!(batch.elements[0], Inbound::Notification(_)));
        let _ = json!({});
    }
}
