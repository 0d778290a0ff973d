//! Dealer actor

use crate::fabric::{publish_json, Fabric, Subscription, Topic};
use crate::NodeResult;
use access_core::{Dealer, TokenRequest};
use std::sync::Arc;

/// Drives a [`Dealer`]: distributes its shares, then answers token requests
pub struct DealerNode {
    dealer: Dealer,
    fabric: Arc<dyn Fabric>,
    requests: Subscription,
}

impl DealerNode {
    /// Subscribe to token requests
    pub async fn start(dealer: Dealer, fabric: Arc<dyn Fabric>) -> NodeResult<Self> {
        let requests = fabric.subscribe(Topic::TokenRequests).await?;
        Ok(DealerNode {
            dealer,
            fabric,
            requests,
        })
    }

    /// Send each Guard its share
    pub async fn distribute(&self) -> NodeResult<()> {
        for message in self.dealer.distribution() {
            publish_json(self.fabric.as_ref(), Topic::Shares(message.receiver), &message).await?;
        }
        log::info!(
            "Dealer {} distributed {} {} shares",
            self.dealer.id(),
            self.dealer.shares().len(),
            self.dealer.scheme().name()
        );
        Ok(())
    }

    /// Distribute shares, then serve token requests until the fabric closes
    pub async fn run(mut self) -> NodeResult<()> {
        self.distribute().await?;

        while let Some(request) = self.requests.recv_json::<TokenRequest>().await {
            log::debug!("Dealer {} evaluating {}", self.dealer.id(), request.id);
            let reply = self.dealer.evaluate(&request);
            publish_json(self.fabric.as_ref(), Topic::DealerReplies, &reply).await?;
        }

        log::info!("Dealer {} stopped", self.dealer.id());
        Ok(())
    }
}
