//! `jctx` context-metadata sidecar (§6): an optional wire envelope that
//! carries a deadline, caller metadata, and an auth token alongside a
//! request's `params`, for transports (line-framed, delimiter-split) with
//! no header channel of their own.
//!
//! A `jctx` request's entire `params` value *is* the envelope:
//!
//! ```json
//! {"jctx":"1", "deadline":"2024-01-01T00:00:00Z", "payload":{...}, "meta":{...}, "auth":"..."}
//! ```
//!
//! Only `jctx` is required. The receiving side replaces the request's
//! `params` with `payload` and attaches `deadline`/`meta`/`auth` to the
//! handler [`Context`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::context::{AuthInfo, Context};

/// The only `jctx` envelope version this crate emits or accepts.
pub const JCTX_VERSION: &str = "1";

/// The on-wire envelope. Field names match §6 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JctxEnvelope {
    /// Envelope version marker; always [`JCTX_VERSION`].
    pub jctx: String,
    /// Absolute deadline, RFC3339 UTC. Clocks are assumed synchronized
    /// closely enough between peers for this to be meaningful; callers on
    /// clock-skewed links should prefer `jctx`-free deadlines negotiated
    /// out of band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// The request's real params, unwrapped by the receiver.
    pub payload: Value,
    /// Opaque caller-supplied metadata, propagated verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Base64-encoded auth bytes: `user NUL token`, decoded back into an
    /// [`AuthInfo`] on receipt. The signature construction itself (HMAC
    /// over method/params/nonce) lives in [`crate::auth`]; this field just
    /// carries whatever token string a caller obtained from it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl JctxEnvelope {
    /// Wraps `payload` in an envelope carrying whatever of `ctx`'s
    /// deadline/metadata/auth are set. Returns `payload` unwrapped if none
    /// of those are present -- an envelope with nothing to carry is just
    /// overhead.
    pub fn wrap(ctx: &Context, payload: Value) -> Value {
        let deadline = ctx.deadline().map(instant_to_utc);
        let meta = match ctx.metadata() {
            Value::Null => None,
            other => Some(other.clone()),
        };
        let auth = ctx.auth().map(encode_auth);

        if deadline.is_none() && meta.is_none() && auth.is_none() {
            return payload;
        }

        let envelope = JctxEnvelope {
            jctx: JCTX_VERSION.to_string(),
            deadline,
            payload,
            meta,
            auth,
        };
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }

    /// Applies this envelope onto a child of `parent`, returning the
    /// unwrapped payload and the resulting context.
    pub fn apply(self, parent: &Context) -> (Value, Context) {
        let mut ctx = parent.child();
        if let Some(deadline) = self.deadline {
            let remaining = (deadline - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            ctx = ctx.with_timeout(remaining);
        }
        if let Some(meta) = self.meta {
            ctx = ctx.with_metadata(meta);
        }
        if let Some(auth) = self.auth.as_deref().and_then(decode_auth) {
            ctx = ctx.with_auth(auth);
        }
        (self.payload, ctx)
    }
}

/// Recovers a [`JctxEnvelope`] from a request's raw `params`, if `params`
/// is an object carrying a `"jctx"` key. Returns `None` for any params
/// shape that isn't a `jctx` envelope -- including a malformed one, which
/// is left for ordinary params validation to reject on its own terms.
pub fn extract(params: &Value) -> Option<JctxEnvelope> {
    let obj = params.as_object()?;
    if !obj.contains_key("jctx") {
        return None;
    }
    serde_json::from_value(params.clone()).ok()
}

fn instant_to_utc(deadline: Instant) -> DateTime<Utc> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default()
}

fn encode_auth(auth: &AuthInfo) -> String {
    let mut bytes = auth.user.as_bytes().to_vec();
    bytes.push(0u8);
    bytes.extend_from_slice(auth.token.as_bytes());
    STANDARD.encode(bytes)
}

fn decode_auth(encoded: &str) -> Option<AuthInfo> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let nul = bytes.iter().position(|&b| b == 0)?;
    let user = String::from_utf8(bytes[..nul].to_vec()).ok()?;
    let token = String::from_utf8(bytes[nul + 1..].to_vec()).ok()?;
    Some(AuthInfo { user, token })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_wrap_is_noop_when_context_carries_nothing() {
        let ctx = Context::background();
        let payload = json!({"a": 1});
        assert_eq!(JctxEnvelope::wrap(&ctx, payload.clone()), payload);
    }

    #[test]
    fn test_wrap_carries_metadata() {
        let ctx = Context::background().with_metadata(json!({"trace": "abc"}));
        let wrapped = JctxEnvelope::wrap(&ctx, json!({"a": 1}));
        assert_eq!(wrapped["jctx"], JCTX_VERSION);
        assert_eq!(wrapped["payload"], json!({"a": 1}));
        assert_eq!(wrapped["meta"]["trace"], "abc");
    }

    #[test]
    fn test_extract_requires_jctx_key() {
        assert!(extract(&json!({"a": 1})).is_none());
        assert!(extract(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_wrap_then_extract_round_trip() {
        let ctx = Context::background()
            .with_metadata(json!({"k": "v"}))
            .with_auth(AuthInfo {
                user: "alice".to_string(),
                token: "tok".to_string(),
            });
        let wrapped = JctxEnvelope::wrap(&ctx, json!({"a": 1}));
        let envelope = extract(&wrapped).unwrap();
        assert_eq!(envelope.payload, json!({"a": 1}));
        assert_eq!(envelope.meta, Some(json!({"k": "v"})));

        let (payload, applied) = envelope.apply(&Context::background());
        assert_eq!(payload, json!({"a": 1}));
        assert_eq!(applied.metadata()["k"], "v");
        assert_eq!(applied.auth().unwrap().user, "alice");
    }

    #[tokio::test]
    async fn test_apply_sets_deadline_from_envelope() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let wrapped = JctxEnvelope::wrap(&ctx, json!({}));
        let envelope = extract(&wrapped).unwrap();
        let (_payload, applied) = envelope.apply(&Context::background());
        assert!(applied.deadline().is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(applied.is_done());
    }

    #[test]
    fn test_deadline_round_trips_through_rfc3339() {
        let ctx = Context::background().with_timeout(Duration::from_secs(30));
        let wrapped = JctxEnvelope::wrap(&ctx, json!({}));
        assert!(wrapped["deadline"].as_str().unwrap().ends_with('Z') || wrapped["deadline"].as_str().unwrap().contains('+'));
    }
}
