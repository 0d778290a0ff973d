//! Topic-based messaging seam
//!
//! Every actor talks through a [`Fabric`]: it publishes JSON payloads on a [`Topic`]
//! and reads the topics it subscribed to. Which peers a topic reaches is the backend's
//! business.

use crate::NodeResult;
use access_core::ParticipantId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Message channels of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "name", content = "guard", rename_all = "kebab-case")]
pub enum Topic {
    /// Relay → every Dealer: token requests
    TokenRequests,
    /// Relay → every Guard: access requests
    AccessRequests,
    /// Dealer → Relay
    DealerReplies,
    /// Guard → Relay
    GuardReplies,
    /// Dealer → one Guard: share distribution, addressed by Guard index
    Shares(ParticipantId),
    /// Guard → every Guard: partial results
    Gather,
    /// Guard → Relay: readiness announcements
    GuardReady,
    /// User → Relay
    UserRequests,
    /// Relay → User
    UserReplies,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Shares(guard) => write!(f, "shares/{}", guard),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait Fabric: Send + Sync {
    /// Publish a payload on a topic
    async fn publish(&self, topic: Topic, payload: String) -> NodeResult<()>;

    /// Receive every payload delivered to this node on `topic` from now on
    async fn subscribe(&self, topic: Topic) -> NodeResult<Subscription>;
}

/// Encode and publish a message
pub async fn publish_json<T: Serialize>(
    fabric: &dyn Fabric,
    topic: Topic,
    message: &T,
) -> NodeResult<()> {
    let payload = serde_json::to_string(message)?;
    fabric.publish(topic, payload).await
}

/// Stream of payloads for one topic
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub(crate) fn new(topic: Topic, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Subscription { topic, receiver }
    }

    /// Subscribed topic
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next raw payload; `None` once the fabric is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Next payload that decodes as `T`. Malformed payloads are logged and skipped.
    pub async fn recv_json<T: DeserializeOwned>(&mut self) -> Option<T> {
        loop {
            let payload = self.receiver.recv().await?;
            match serde_json::from_str(&payload) {
                Ok(message) => return Some(message),
                Err(e) => log::warn!("Dropping malformed message on {}: {}", self.topic, e),
            }
        }
    }
}

/// Local delivery table shared by the backends.
///
/// Payloads for a topic nobody subscribed to yet are held back and handed to its
/// first subscriber, so a node may subscribe after its peers started publishing.
/// At most [`BACKLOG_LIMIT`] payloads are held per topic; the oldest go first.
pub(crate) const BACKLOG_LIMIT: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct LocalRouter {
    inner: Mutex<RouterState>,
}

#[derive(Debug, Default)]
struct RouterState {
    subscribers: HashMap<Topic, Vec<mpsc::UnboundedSender<String>>>,
    backlog: HashMap<Topic, VecDeque<String>>,
}

impl LocalRouter {
    pub(crate) fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = state.backlog.remove(&topic) {
            for payload in held {
                let _ = tx.send(payload);
            }
        }
        state.subscribers.entry(topic).or_default().push(tx);
        Subscription::new(topic, rx)
    }

    /// Deliver to every live subscriber of `topic`, or hold it back if there is none
    pub(crate) fn dispatch(&self, topic: Topic, payload: String) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let delivered = match state.subscribers.get_mut(&topic) {
            Some(senders) => {
                senders.retain(|tx| tx.send(payload.clone()).is_ok());
                !senders.is_empty()
            }
            None => false,
        };
        if !delivered {
            log::trace!("No subscriber for {} yet, holding message", topic);
            let held = state.backlog.entry(topic).or_default();
            if held.len() >= BACKLOG_LIMIT {
                held.pop_front();
                log::warn!("Backlog for {} is full, dropping its oldest message", topic);
            }
            held.push_back(payload);
        }
    }
}
