//! In-process bus — pub/sub and request/reply without a broker.
//!
//! Services and the conversation engine share one `Arc<LocalBus>`. Delivery
//! is synchronous (callbacks run on the publisher's task), which keeps test
//! ordering deterministic.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::bus::{MessageBus, MessageCallback, ReplyFn};
use crate::error::{BusError, Result};

struct Subscription {
    queue: Option<String>,
    callback: MessageCallback,
}

/// In-process [`MessageBus`] implementation.
pub struct LocalBus {
    subscriptions: DashMap<String, Vec<Subscription>>,
    repliers: DashMap<String, ReplyFn>,
    /// Rotating cursor for queue-group delivery.
    cursor: AtomicUsize,
    connected: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            repliers: DashMap::new(),
            cursor: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BusError::NotConnected)
        }
    }

    /// Snapshot the callbacks a message should reach.
    ///
    /// Plain subscribers all receive the message; each queue group receives
    /// it exactly once, rotating through its members.
    fn delivery_targets(&self, subject: &str) -> Vec<MessageCallback> {
        let Some(entries) = self.subscriptions.get(subject) else {
            return Vec::new();
        };

        let mut targets: Vec<MessageCallback> = Vec::new();
        let mut groups: Vec<(&str, Vec<&Subscription>)> = Vec::new();

        for sub in entries.iter() {
            match &sub.queue {
                None => targets.push(sub.callback.clone()),
                Some(q) => match groups.iter_mut().find(|(name, _)| *name == q.as_str()) {
                    Some((_, members)) => members.push(sub),
                    None => groups.push((q.as_str(), vec![sub])),
                },
            }
        }

        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        for (_, members) in groups {
            targets.push(members[turn % members.len()].callback.clone());
        }
        targets
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, message: Value) -> Result<()> {
        self.ensure_connected()?;
        // Clone targets out before invoking so a callback may publish again
        // without holding a map guard.
        let targets = self.delivery_targets(subject);
        debug!(subject, subscribers = targets.len(), "local publish");
        for callback in targets {
            callback(message.clone());
        }
        Ok(())
    }

    async fn request(&self, subject: &str, message: Value, timeout: Duration) -> Result<Value> {
        self.ensure_connected()?;
        let handler = self
            .repliers
            .get(subject)
            .map(|h| h.clone())
            .ok_or_else(|| BusError::NoResponders(subject.to_string()))?;

        match tokio::time::timeout(timeout, handler(message)).await {
            Ok(reply) => Ok(reply),
            Err(_) => Err(BusError::Timeout {
                subject: subject.to_string(),
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue: Option<&str>,
        callback: MessageCallback,
    ) -> Result<()> {
        self.ensure_connected()?;
        self.subscriptions
            .entry(subject.to_string())
            .or_default()
            .push(Subscription {
                queue: queue.map(String::from),
                callback,
            });
        debug!(subject, ?queue, "local subscribe");
        Ok(())
    }

    async fn reply_handler(&self, subject: &str, handler: ReplyFn) -> Result<()> {
        self.ensure_connected()?;
        self.repliers.insert(subject.to_string(), handler);
        debug!(subject, "registered local reply handler");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        self.subscriptions.clear();
        self.repliers.clear();
        Ok(())
    }
}
