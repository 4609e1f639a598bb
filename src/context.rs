//! Per-request context: cancellation, deadline, and metadata.
//!
//! Every server-side handler invocation and every client-side call
//! carries a [`Context`]. It is built explicitly and passed as a value
//! rather than threaded through task-local storage, so that a handler's
//! signature makes clear what it can observe and cancel -- this is a
//! deliberate choice over the "ambient context" pattern some async
//! frameworks use (see DESIGN.md's Open Question on this).
//!
//! `Context` generalizes the cancellation-token usage already present in
//! this crate's client read loop (a child [`CancellationToken`] derived
//! from a shared root, checked in a `tokio::select!` against inbound
//! work) into a full value also carrying a deadline and an opaque
//! metadata blob, so the same primitive can flow across the wire via
//! [`crate::jctx`].

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::Error;

/// Identity/authorization info attached to a context, if the transport or
/// an inbound `jctx` sidecar supplied one. See [`crate::auth`] for the
/// token format this crate defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    /// The authenticated principal, as asserted by the token.
    pub user: String,
    /// The raw token string, kept for re-signing outbound propagation.
    pub token: String,
}

/// Why a context ended, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    /// The token was cancelled explicitly (caller abort, `rpc.cancel`,
    /// or server shutdown).
    Cancelled,
    /// The deadline elapsed.
    DeadlineExceeded,
}

/// A per-call context: cancellation, optional deadline, and an opaque
/// metadata value threaded alongside a request.
///
/// Cloning a `Context` is cheap -- the cancellation token, deadline, and
/// metadata are all reference-counted or `Copy`, and all clones observe
/// the same cancellation.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    metadata: Arc<Value>,
    auth: Option<AuthInfo>,
}

impl Context {
    /// Builds a fresh root context with no deadline, no metadata, and no
    /// auth info.
    pub fn background() -> Self {
        Context {
            token: CancellationToken::new(),
            deadline: None,
            metadata: Arc::new(Value::Null),
            auth: None,
        }
    }

    /// Derives a child context that is cancelled whenever `self` is
    /// cancelled, in addition to however it is independently cancelled.
    /// Deadline and metadata are inherited unless overridden.
    pub fn child(&self) -> Self {
        Context {
            token: self.token.child_token(),
            deadline: self.deadline,
            metadata: Arc::clone(&self.metadata),
            auth: self.auth.clone(),
        }
    }

    /// Returns a child context with the given deadline, clamped to the
    /// earlier of `self`'s existing deadline (if any) and `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.child();
        ctx.deadline = Some(match ctx.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        ctx
    }

    /// Returns a child context with the given deadline expressed as a
    /// duration from now.
    pub fn with_timeout(&self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a child context carrying the given metadata value,
    /// replacing whatever was inherited.
    pub fn with_metadata(&self, metadata: Value) -> Self {
        let mut ctx = self.child();
        ctx.metadata = Arc::new(metadata);
        ctx
    }

    /// Returns a child context carrying the given auth info.
    pub fn with_auth(&self, auth: AuthInfo) -> Self {
        let mut ctx = self.child();
        ctx.auth = Some(auth);
        ctx
    }

    /// The metadata value attached to this context, or `Value::Null` if
    /// none was ever set.
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// The auth info attached to this context, if any.
    pub fn auth(&self) -> Option<&AuthInfo> {
        self.auth.as_ref()
    }

    /// The deadline attached to this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` if this context has already ended, either by
    /// cancellation or deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Returns why this context ended, or `None` if it hasn't.
    pub fn done(&self) -> Option<Done> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Done::DeadlineExceeded)
        } else if self.token.is_cancelled() {
            Some(Done::Cancelled)
        } else {
            None
        }
    }

    /// Maps this context's termination reason to the sentinel wire error
    /// it corresponds to, per §4.5. Returns `None` if the context has not
    /// ended.
    pub fn err(&self) -> Option<Error> {
        match self.done()? {
            Done::Cancelled => Some(Error::cancelled()),
            Done::DeadlineExceeded => Some(Error::deadline_exceeded()),
        }
    }

    /// Resolves when this context ends, by cancellation or deadline,
    /// whichever comes first. Intended for use inside `tokio::select!`
    /// alongside the work the context guards.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_background_not_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.err().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let root = Context::background();
        let child = root.child();
        root.cancel();
        assert!(child.is_done());
        assert_eq!(child.done(), Some(Done::Cancelled));
    }

    #[test]
    fn test_err_maps_cancelled() {
        let ctx = Context::background();
        ctx.cancel();
        let err = ctx.err().unwrap();
        assert_eq!(err.code, crate::codes::CANCELLED);
    }

    #[tokio::test]
    async fn test_deadline_marks_done() {
        let ctx = Context::background().with_timeout(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctx.is_done());
        assert_eq!(ctx.done(), Some(Done::DeadlineExceeded));
        let err = ctx.err().unwrap();
        assert_eq!(err.code, crate::codes::DEADLINE_EXCEEDED);
    }

    #[test]
    fn test_metadata_inherited_by_child() {
        let root = Context::background().with_metadata(serde_json::json!({"trace": "abc"}));
        let child = root.child();
        assert_eq!(child.metadata()["trace"], "abc");
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves_on_cancel() {
        let ctx = Context::background();
        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move {
            ctx2.cancelled().await;
        });
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("did not cancel in time")
            .unwrap();
    }
}
