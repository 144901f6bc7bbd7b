use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;

/// Callback invoked once per message delivered to a subscription.
///
/// Callbacks must be cheap — heavy work should be handed off to a task or a
/// channel (the conversation handler forwards into a oneshot).
pub type MessageCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Server-side request handler: request payload in, reply payload out.
///
/// Handlers that fail should return `{"error": "…"}` themselves; panics are
/// not caught.
pub type ReplyFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Common interface implemented by every bus transport.
///
/// Implementations must be `Send + Sync` so a single instance can be shared
/// behind an `Arc` by the planner, orchestrator, and handler.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget publish of a JSON payload to a subject.
    async fn publish(&self, subject: &str, message: Value) -> Result<()>;

    /// Send a request and wait up to `timeout` for the single reply.
    ///
    /// Replier-side failures come back as `{"error": "…"}` payloads in the
    /// `Ok` branch; the `Err` branch is transport-only (no responder,
    /// deadline exceeded, connection lost).
    async fn request(&self, subject: &str, message: Value, timeout: Duration) -> Result<Value>;

    /// Subscribe to a subject; `callback` is invoked for every message.
    ///
    /// Subscribers in the same `queue` group share the subject: each message
    /// is delivered to exactly one member of the group.
    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        callback: MessageCallback,
    ) -> Result<()>;

    /// Register a request/reply endpoint for a subject.
    async fn reply_handler(&self, subject: &str, handler: ReplyFn) -> Result<()>;

    /// Tear down the transport. Subsequent calls fail with `NotConnected`.
    async fn disconnect(&self) -> Result<()>;
}

/// Wrap an async closure as a [`ReplyFn`].
///
/// ```rust,no_run
/// use nlx_bus::bus::reply_fn;
/// use serde_json::json;
///
/// let echo = reply_fn(|req| async move { json!({ "echo": req }) });
/// ```
pub fn reply_fn<F, Fut>(f: F) -> ReplyFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Value> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}
