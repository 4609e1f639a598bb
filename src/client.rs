//! The JSON-RPC 2.0 client: outbound id assignment, a pending-waiter map,
//! a decode loop that demuxes inbound responses back to waiters, and
//! handling of server-initiated push (notifications and callbacks).
//!
//! A `pending: Arc<Mutex<HashMap<u64, oneshot::Sender<...>>>>` waiter map,
//! a `next_id: Arc<AtomicU64>` counter, and notification/server-request
//! handler slots, generalized from fixed typed methods to arbitrary
//! `method`/`params` pairs and from a fixed channel pair to any
//! [`crate::framing::Framed`] implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{JrpcError, Result};
use crate::framing::{Framed, FramedReader, FramedWriter, TriggerReader};
use crate::message::{Error, Notification, Request, RequestId, Response};
use crate::server::Handler;

/// One element of an outbound [`Client::batch`] call: either a request
/// expecting a reply or a fire-and-forget notification.
#[derive(Debug, Clone)]
pub struct CallSpec {
    /// The method name to invoke.
    pub method: String,
    /// Method parameters, if any.
    pub params: Option<Value>,
    /// `true` for a notification (no id assigned, no reply expected).
    pub notify: bool,
}

impl CallSpec {
    /// Builds a call spec for a request expecting a response.
    pub fn call(method: impl Into<String>, params: Option<Value>) -> Self {
        CallSpec {
            method: method.into(),
            params,
            notify: false,
        }
    }

    /// Builds a call spec for a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        CallSpec {
            method: method.into(),
            params,
            notify: true,
        }
    }
}

/// Something that handles a server-originated notification.
///
/// Only one invocation of this trait is ever in flight at a time for a
/// given [`Client`] -- the decode loop awaits each call before reading
/// the next record, so a slow handler throttles delivery rather than
/// running concurrently with a sibling notification.
#[async_trait::async_trait]
pub trait PushHandler: Send + Sync {
    /// Handles one server-originated notification.
    async fn handle(&self, method: &str, params: Option<Value>);
}

/// Adapts a plain async closure into a [`PushHandler`].
pub struct FnPushHandler<F>(F);

impl<F, Fut> FnPushHandler<F>
where
    F: Fn(String, Option<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    /// Wraps `f` as a [`PushHandler`].
    pub fn new(f: F) -> Self {
        FnPushHandler(f)
    }
}

#[async_trait::async_trait]
impl<F, Fut> PushHandler for FnPushHandler<F>
where
    F: Fn(String, Option<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, method: &str, params: Option<Value>) {
        (self.0)(method.to_string(), params).await
    }
}

/// Builds a [`Client`] by optionally registering server-push handlers
/// before [`ClientBuilder::connect`].
#[derive(Default)]
pub struct ClientBuilder {
    notification_handler: Option<Arc<dyn PushHandler>>,
    callback_handler: Option<Arc<dyn Handler>>,
    default_timeout: Option<std::time::Duration>,
}

impl ClientBuilder {
    /// Starts a builder with no push handlers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder seeded from a [`ClientConfig`]: the default
    /// per-call deadline. The config's `framing`/`content_type` fields are
    /// not consumed here -- the framing is chosen when the caller
    /// constructs the `Framed` passed to [`ClientBuilder::connect`],
    /// typically via [`crate::framing::by_name`].
    pub fn from_config(config: &ClientConfig) -> Self {
        ClientBuilder {
            default_timeout: config.default_timeout(),
            ..Self::default()
        }
    }

    /// Installs the handler invoked for server-originated notifications.
    /// Without one, server notifications are logged and discarded.
    pub fn on_notification(mut self, handler: impl PushHandler + 'static) -> Self {
        self.notification_handler = Some(Arc::new(handler));
        self
    }

    /// Installs the handler invoked for server-originated calls
    /// (requests with an id). Without one, server calls are answered with
    /// a `-32601` method-not-found response.
    pub fn on_callback(mut self, handler: impl Handler + 'static) -> Self {
        self.callback_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the deadline applied to an outbound call's context when the
    /// caller's own context carries none. `None` (the default) means
    /// calls never get an implicit deadline.
    pub fn default_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Connects over `framed`, spawning the decode loop, and returns the
    /// ready-to-use client.
    pub fn connect(self, framed: Box<dyn Framed>) -> Client {
        let (reader, writer) = framed.into_halves();

        let inner = Arc::new(Inner {
            writer: Mutex::new(Some(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            notification_handler: self.notification_handler,
            callback_handler: self.callback_handler,
            default_timeout: self.default_timeout,
            base_ctx: Context::background(),
        });

        let trigger_inner = Arc::clone(&inner);
        let reader: Box<dyn FramedReader> = Box::new(TriggerReader::new(reader, move || {
            trigger_inner.base_ctx.cancel();
        }));

        let loop_inner = Arc::clone(&inner);
        tokio::spawn(async move { decode_loop(loop_inner, reader).await });

        Client(inner)
    }
}

struct Inner {
    writer: Mutex<Option<Box<dyn FramedWriter>>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Response>>>,
    next_id: AtomicI64,
    notification_handler: Option<Arc<dyn PushHandler>>,
    callback_handler: Option<Arc<dyn Handler>>,
    /// Applied to an outbound call's context when the caller's own
    /// context carries no deadline. See [`ClientBuilder::default_timeout`].
    default_timeout: Option<std::time::Duration>,
    /// Cancelled the moment the peer disconnects (driven by the
    /// [`TriggerReader`] wrapping the decode loop's reader). Not exposed
    /// to callers directly; `call`/`batch` race the caller's own `ctx`
    /// against the response, not this one -- this token exists purely so
    /// server-push callback handlers have something to derive a context
    /// from that ends on disconnect.
    base_ctx: Context,
}

/// A connected JSON-RPC 2.0 client. Cheap to clone -- all clones share
/// the same outbound writer, pending map, and id counter.
#[derive(Clone)]
pub struct Client(Arc<Inner>);

impl Client {
    /// Starts a [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connects over `framed` with no push handlers registered.
    pub fn connect(framed: Box<dyn Framed>) -> Client {
        ClientBuilder::new().connect(framed)
    }

    /// Sends a single request and awaits its response, or `ctx` ending
    /// first. On context expiry, sends `rpc.cancel` for the pending id as
    /// a best-effort notification and returns the context's error.
    ///
    /// If `ctx` carries no deadline of its own, the client's configured
    /// `default_timeout` (see [`ClientBuilder::default_timeout`]) is
    /// applied as a fallback.
    pub async fn call(&self, ctx: &Context, method: impl Into<String>, params: Option<Value>) -> Result<Response> {
        let ctx = &self.with_default_timeout(ctx);
        let method = method.into();
        let id = self.next_id();
        let params = wrap_outbound_params(ctx, params);

        let (tx, rx) = oneshot::channel();
        self.0.pending.lock().await.insert(id.clone(), tx);

        let req = Request::new(id.clone(), method, params);
        let payload = match serde_json::to_vec(&req) {
            Ok(payload) => payload,
            Err(e) => {
                self.0.pending.lock().await.remove(&id);
                return Err(JrpcError::Serialization(e));
            }
        };

        if let Err(e) = self.send_record(&payload).await {
            self.0.pending.lock().await.remove(&id);
            return Err(e);
        }

        tokio::select! {
            biased;
            result = rx => result.map_err(|_| JrpcError::Incomplete("client closed before response arrived".into())),
            _ = ctx.cancelled() => {
                self.0.pending.lock().await.remove(&id);
                let _ = self.send_cancel(&id).await;
                Err(context_error(ctx))
            }
        }
    }

    /// Sends a notification. Returns once the bytes are flushed to the
    /// channel; notifications never receive a reply.
    pub async fn notify(&self, ctx: &Context, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        let ctx = self.with_default_timeout(ctx);
        let params = wrap_outbound_params(&ctx, params);
        let n = Notification::new(method, params);
        let payload = serde_json::to_vec(&n)?;
        self.send_record(&payload).await
    }

    /// Sends many specs as a single batch (a bare object if there is
    /// exactly one element, an array otherwise) and returns the responses
    /// to the non-notification specs, in the order those specs were given
    /// (not necessarily the order the server replied in). Pending entries
    /// for every non-notification spec are registered atomically with the
    /// send; if encoding fails, no entries are created at all.
    pub async fn batch(&self, ctx: &Context, specs: Vec<CallSpec>) -> Result<Vec<Response>> {
        let ctx = &self.with_default_timeout(ctx);
        let mut messages = Vec::with_capacity(specs.len());
        let mut ids = Vec::new();

        for spec in &specs {
            let params = wrap_outbound_params(ctx, spec.params.clone());
            if spec.notify {
                let n = Notification::new(spec.method.clone(), params);
                messages.push(serde_json::to_value(&n)?);
            } else {
                let id = self.next_id();
                let req = Request::new(id.clone(), spec.method.clone(), params);
                messages.push(serde_json::to_value(&req)?);
                ids.push(id);
            }
        }

        let payload_value = if messages.len() == 1 {
            messages.into_iter().next().unwrap()
        } else {
            Value::Array(messages)
        };
        let payload = serde_json::to_vec(&payload_value)?;

        let mut receivers = Vec::with_capacity(ids.len());
        {
            let mut writer = self.0.writer.lock().await;
            let Some(w) = writer.as_mut() else {
                return Err(JrpcError::Closed);
            };

            let mut pending = self.0.pending.lock().await;
            for id in &ids {
                let (tx, rx) = oneshot::channel();
                pending.insert(id.clone(), tx);
                receivers.push(rx);
            }
            drop(pending);

            if let Err(e) = w.send_record(&payload).await {
                let mut pending = self.0.pending.lock().await;
                for id in &ids {
                    pending.remove(id);
                }
                return Err(e);
            }
        }

        let mut responses = Vec::with_capacity(receivers.len());
        let mut pending_ids = ids.into_iter().zip(receivers);
        while let Some((id, rx)) = pending_ids.next() {
            tokio::select! {
                biased;
                result = rx => {
                    match result {
                        Ok(response) => responses.push(response),
                        Err(_) => return Err(JrpcError::Incomplete("client closed before response arrived".into())),
                    }
                }
                _ = ctx.cancelled() => {
                    // Cancel the id we were waiting on plus every id still
                    // further back in the batch -- none of them will ever
                    // be awaited now, so each needs its own pending-map
                    // removal and `rpc.cancel` just as much as this one.
                    self.0.pending.lock().await.remove(&id);
                    let _ = self.send_cancel(&id).await;
                    for (remaining_id, _) in pending_ids {
                        self.0.pending.lock().await.remove(&remaining_id);
                        let _ = self.send_cancel(&remaining_id).await;
                    }
                    return Err(context_error(ctx));
                }
            }
        }
        Ok(responses)
    }

    /// Closes the channel and abandons every pending waiter with an
    /// "incomplete" error. Idempotent.
    pub async fn close(&self) -> Result<()> {
        *self.0.writer.lock().await = None;
        self.0.base_ctx.cancel();
        abandon_all(&self.0).await;
        Ok(())
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.0.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Applies the client's configured `default_timeout` to `ctx` as a
    /// fallback when `ctx` carries no deadline of its own. See
    /// [`ClientBuilder::default_timeout`].
    fn with_default_timeout(&self, ctx: &Context) -> Context {
        match (ctx.deadline(), self.0.default_timeout) {
            (None, Some(timeout)) => ctx.with_timeout(timeout),
            _ => ctx.clone(),
        }
    }

    async fn send_record(&self, payload: &[u8]) -> Result<()> {
        let mut writer = self.0.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w.send_record(payload).await,
            None => Err(JrpcError::Closed),
        }
    }

    async fn send_cancel(&self, id: &RequestId) -> Result<()> {
        let params = match id {
            RequestId::Number(n) => Value::Array(vec![Value::from(*n)]),
            RequestId::String(s) => Value::Array(vec![Value::String(s.clone())]),
            RequestId::Null => return Ok(()),
        };
        let n = Notification::new(crate::server::RPC_CANCEL, Some(params));
        let payload = serde_json::to_vec(&n)?;
        self.send_record(&payload).await
    }
}

/// Wraps `params` in a `jctx` envelope carrying whatever of `ctx`'s
/// deadline/metadata/auth are set, collapsing back to `None` if the result
/// is bare `null` (no envelope was needed and no params were given).
fn wrap_outbound_params(ctx: &Context, params: Option<Value>) -> Option<Value> {
    match crate::jctx::JctxEnvelope::wrap(ctx, params.unwrap_or(Value::Null)) {
        Value::Null => None,
        wrapped => Some(wrapped),
    }
}

/// Maps a context's termination reason to this crate's internal error
/// type. Panics if called on a context that has not ended -- callers only
/// reach this from the `ctx.cancelled()` arm of a `select!`.
fn context_error(ctx: &Context) -> JrpcError {
    match ctx.done() {
        Some(crate::context::Done::Cancelled) => JrpcError::Cancelled,
        Some(crate::context::Done::DeadlineExceeded) => JrpcError::DeadlineExceeded,
        None => JrpcError::Internal("context ended with no recorded reason".into()),
    }
}

async fn abandon_all(inner: &Arc<Inner>) {
    inner.pending.lock().await.clear();
}

async fn decode_loop(inner: Arc<Inner>, mut reader: Box<dyn FramedReader>) {
    loop {
        let record = match reader.recv_record().await {
            Ok(record) => record,
            Err(_) => {
                abandon_all(&inner).await;
                return;
            }
        };

        let value: Value = match serde_json::from_slice(&record) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "client: malformed inbound JSON, closing");
                abandon_all(&inner).await;
                return;
            }
        };

        let elements: Vec<Value> = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            other => {
                tracing::warn!(?other, "client: unexpected top-level JSON shape; ignoring");
                continue;
            }
        };

        for element in elements {
            handle_element(&inner, element).await;
        }
    }
}

async fn handle_element(inner: &Arc<Inner>, element: Value) {
    let Some(obj) = element.as_object() else {
        tracing::debug!("client: batch element is not an object; ignoring");
        return;
    };

    let has_method = obj.contains_key("method");
    if has_method {
        let has_id = obj.get("id").is_some_and(|v| !v.is_null());
        if has_id {
            match serde_json::from_value::<Request>(element.clone()) {
                Ok(req) => dispatch_server_call(inner, req).await,
                Err(e) => tracing::warn!(error = %e, "client: malformed server-initiated call; ignoring"),
            }
        } else {
            match serde_json::from_value::<Notification>(element.clone()) {
                Ok(n) => dispatch_notification(inner, n).await,
                Err(e) => tracing::warn!(error = %e, "client: malformed server notification; ignoring"),
            }
        }
        return;
    }

    match serde_json::from_value::<Response>(element) {
        Ok(response) => deliver(inner, response).await,
        Err(e) => tracing::warn!(error = %e, "client: malformed response; ignoring"),
    }
}

async fn deliver(inner: &Arc<Inner>, response: Response) {
    if let Some(tx) = inner.pending.lock().await.remove(&response.id) {
        let _ = tx.send(response);
    } else {
        tracing::debug!(id = %response.id, "client: response for unknown or already-delivered id; discarding");
    }
}

async fn dispatch_notification(inner: &Arc<Inner>, n: Notification) {
    match &inner.notification_handler {
        Some(handler) => handler.handle(&n.method, n.params).await,
        None => tracing::debug!(method = %n.method, "client: no notification handler registered; ignoring"),
    }
}

/// Server-initiated calls are dispatched concurrently with each other and
/// with whatever else the decode loop does next -- unlike notifications,
/// a slow server call must not stall the read loop for everyone else.
async fn dispatch_server_call(inner: &Arc<Inner>, req: Request) {
    let Some(handler) = inner.callback_handler.clone() else {
        let response = Response::failure(req.id, Error::method_not_found(&req.method));
        send_push_response(inner, response).await;
        return;
    };

    let inner = Arc::clone(inner);
    let id = req.id;
    let params = req.params;
    tokio::spawn(async move {
        let ctx = inner.base_ctx.child();
        let join = tokio::spawn(async move { handler.call(ctx, params).await });
        let response = match join.await {
            Ok(Ok(value)) => Response::success(id, value),
            Ok(Err(error)) => Response::failure(id, error),
            Err(join_error) => {
                if join_error.is_cancelled() {
                    Response::failure(id, Error::cancelled())
                } else {
                    Response::failure(id, Error::system_error("callback handler panicked"))
                }
            }
        };
        send_push_response(&inner, response).await;
    });
}

async fn send_push_response(inner: &Arc<Inner>, response: Response) {
    let Ok(payload) = serde_json::to_vec(&response) else {
        return;
    };
    let mut writer = inner.writer.lock().await;
    if let Some(w) = writer.as_mut() {
        if let Err(e) = w.send_record(&payload).await {
            tracing::warn!(error = %e, "client: failed to send server-call response");
        }
    }
}
