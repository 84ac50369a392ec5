#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-bus** – Topic-based pub/sub transport for the Rookery core.
//!
//! The bus provides in-memory, at-most-once delivery with per-subscription
//! bounded FIFO queues. Publishers never block: a slow subscriber only ever
//! loses its own oldest messages (the drop is counted). Messages from one
//! sender to one topic are observed in publish order by every subscriber;
//! across senders or topics no ordering is promised.
//!
//! Request/reply is a correlation-id round-trip: `request` publishes on a
//! topic and awaits the first message carrying the same correlation id on
//! `<topic>.reply`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use rookery_types::{CoreError, CoreResult};

pub mod topic;
pub use topic::{validate_topic, TopicPattern};

/// Default bound on each subscription's queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Default bound on the observability history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

//─────────────────────────────
//  Message envelope
//─────────────────────────────

/// The pub/sub envelope. Never persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id.
    pub id: String,
    /// Publishing entity.
    pub sender: String,
    /// Dotted topic the message was published on.
    pub topic: String,
    /// Opaque payload.
    pub payload: serde_json::Value,
    /// Publish timestamp.
    pub timestamp: DateTime<Utc>,
    /// Ties a reply to its request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

//─────────────────────────────
//  Subscription
//─────────────────────────────

struct SubscriptionShared {
    id: u64,
    pattern: TopicPattern,
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
    depth: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriptionShared {
    /// Enqueue, dropping the oldest message when the queue is full.
    /// Returns `true` when a message was dropped.
    fn push(&self, message: Message) -> bool {
        let mut queue = self.queue.lock().expect("subscription queue poisoned");
        let mut dropped = false;
        if queue.len() >= self.depth {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            dropped = true;
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        dropped
    }
}

/// Receiving half of a subscription. Dropping it detaches from the bus.
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    /// Subscription handle id, usable with [`Bus::unsubscribe`].
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Messages this subscription has lost to queue overflow.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Await the next message. Returns `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Pop a queued message without waiting.
    pub fn try_recv(&self) -> Option<Message> {
        self.shared
            .queue
            .lock()
            .expect("subscription queue poisoned")
            .pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

//─────────────────────────────
//  Bus statistics
//─────────────────────────────

/// Counters exposed for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Total messages published.
    pub published: u64,
    /// Total messages dropped across all subscription queues.
    pub dropped: u64,
    /// Live subscriptions.
    pub active_subscriptions: usize,
    /// Publish counts per topic.
    pub per_topic: HashMap<String, u64>,
}

//─────────────────────────────
//  Bus
//─────────────────────────────

/// In-memory topic bus. Cheap to share via `Arc`.
pub struct Bus {
    subscriptions: RwLock<Vec<Arc<SubscriptionShared>>>,
    next_sub_id: AtomicU64,
    queue_depth: usize,
    history: Mutex<VecDeque<Message>>,
    history_capacity: usize,
    topic_counts: Mutex<HashMap<String, u64>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH, DEFAULT_HISTORY_CAPACITY)
    }
}

impl Bus {
    /// Create a bus with the given per-subscription queue depth and
    /// history ring capacity.
    pub fn new(queue_depth: usize, history_capacity: usize) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            topic_counts: Mutex::new(HashMap::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Subscribe to a topic pattern (`agent.*.result`, `session.debate.#`).
    pub fn subscribe(&self, pattern: &str) -> CoreResult<Subscription> {
        let pattern = TopicPattern::parse(pattern)?;
        let shared = Arc::new(SubscriptionShared {
            id: self.next_sub_id.fetch_add(1, Ordering::Relaxed),
            pattern,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            depth: self.queue_depth,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.subscriptions
            .write()
            .expect("subscription table poisoned")
            .push(Arc::clone(&shared));
        trace!(sub_id = shared.id, "subscription created");
        Ok(Subscription { shared })
    }

    /// Detach a subscription by handle id. Unknown ids are a no-op.
    pub fn unsubscribe(&self, sub_id: u64) {
        let table = self.subscriptions.read().expect("subscription table poisoned");
        for sub in table.iter() {
            if sub.id == sub_id {
                sub.closed.store(true, Ordering::Release);
                sub.notify.notify_one();
            }
        }
    }

    /// Publish a message. Returns the assigned message id.
    pub fn publish(
        &self,
        sender: &str,
        topic: &str,
        payload: serde_json::Value,
    ) -> CoreResult<String> {
        self.publish_with_correlation(sender, topic, payload, None)
    }

    /// Publish with an explicit correlation id (request/reply plumbing).
    pub fn publish_with_correlation(
        &self,
        sender: &str,
        topic: &str,
        payload: serde_json::Value,
        correlation_id: Option<String>,
    ) -> CoreResult<String> {
        validate_topic(topic)?;
        let message = Message {
            id: Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
            correlation_id,
        };

        self.record(&message);

        // Snapshot matching subscriptions under the read lock, then deliver
        // with the lock released so fan-out cannot block new subscribers.
        let targets: Vec<Arc<SubscriptionShared>> = {
            let mut table = self.subscriptions.write().expect("subscription table poisoned");
            table.retain(|sub| !sub.closed.load(Ordering::Acquire));
            table
                .iter()
                .filter(|sub| sub.pattern.matches(topic))
                .cloned()
                .collect()
        };

        for target in targets {
            if target.push(message.clone()) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic, sub_id = target.id, "subscription queue overflow, oldest dropped");
            }
        }

        Ok(message.id)
    }

    /// Correlation-id round trip: publish on `topic`, await the matching
    /// reply on `<topic>.reply`.
    pub async fn request(
        &self,
        sender: &str,
        topic: &str,
        payload: serde_json::Value,
        timeout: Duration,
    ) -> CoreResult<serde_json::Value> {
        validate_topic(topic)?;
        let correlation = Uuid::new_v4().to_string();
        let reply_topic = format!("{topic}.reply");
        // Subscribe before publishing so the reply cannot race past us.
        let mut reply = self.subscribe(&reply_topic)?;
        self.publish_with_correlation(sender, topic, payload, Some(correlation.clone()))?;

        let wait = tokio::time::timeout(timeout, async {
            while let Some(message) = reply.recv().await {
                if message.correlation_id.as_deref() == Some(correlation.as_str()) {
                    return Some(message.payload);
                }
            }
            None
        })
        .await;

        match wait {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(CoreError::Bus(format!("reply stream for '{topic}' closed"))),
            Err(_) => {
                debug!(topic, "request timed out");
                Err(CoreError::Timeout(timeout))
            }
        }
    }

    /// Publish a reply to a request message, copying its correlation id.
    pub fn respond(
        &self,
        sender: &str,
        request: &Message,
        payload: serde_json::Value,
    ) -> CoreResult<String> {
        let reply_topic = format!("{}.reply", request.topic);
        self.publish_with_correlation(sender, &reply_topic, payload, request.correlation_id.clone())
    }

    /// Current counters.
    pub fn stats(&self) -> BusStats {
        let active_subscriptions = self
            .subscriptions
            .read()
            .expect("subscription table poisoned")
            .iter()
            .filter(|sub| !sub.closed.load(Ordering::Acquire))
            .count();
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            active_subscriptions,
            per_topic: self.topic_counts.lock().expect("topic counts poisoned").clone(),
        }
    }

    /// Up to `n` most recent messages whose topic matches `pattern`,
    /// oldest first.
    pub fn history(&self, pattern: &str, n: usize) -> CoreResult<Vec<Message>> {
        let pattern = TopicPattern::parse(pattern)?;
        let history = self.history.lock().expect("history ring poisoned");
        let matching: Vec<Message> = history
            .iter()
            .filter(|m| pattern.matches(&m.topic))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(n);
        Ok(matching.into_iter().skip(skip).collect())
    }

    fn record(&self, message: &Message) {
        self.published.fetch_add(1, Ordering::Relaxed);
        *self
            .topic_counts
            .lock()
            .expect("topic counts poisoned")
            .entry(message.topic.clone())
            .or_insert(0) += 1;
        let mut history = self.history.lock().expect("history ring poisoned");
        if history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back(message.clone());
    }
}
