//! In-process fabric
//!
//! Every node of a simulation shares one bus; a published payload reaches every
//! subscriber of its topic.

use crate::fabric::{Fabric, LocalRouter, Subscription, Topic};
use crate::NodeResult;
use async_trait::async_trait;

/// Shared in-memory publish/subscribe bus
#[derive(Debug, Default)]
pub struct MessageBus {
    router: LocalRouter,
}

impl MessageBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fabric for MessageBus {
    async fn publish(&self, topic: Topic, payload: String) -> NodeResult<()> {
        log::trace!("bus: {} <- {}", topic, payload);
        self.router.dispatch(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> NodeResult<Subscription> {
        Ok(self.router.subscribe(topic))
    }
}
