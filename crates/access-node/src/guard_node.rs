//! Guard actor
//!
//! Two phases: collect one share per Dealer, announce readiness, then serve access
//! requests and peer partials while sweeping stalled requests on a timer.

use crate::config::Timeouts;
use crate::fabric::{publish_json, Fabric, Subscription, Topic};
use crate::NodeResult;
use access_core::{AccessRequest, GatherMessage, Guard, GuardReply, ShareDistribution};
use std::sync::Arc;
use std::time::Instant;

/// Drives a [`Guard`]
pub struct GuardNode {
    guard: Guard,
    fabric: Arc<dyn Fabric>,
    shares: Subscription,
    requests: Subscription,
    gather: Subscription,
    timeouts: Timeouts,
}

impl GuardNode {
    /// Subscribe to this Guard's shares, access requests and peer partials
    pub async fn start(
        guard: Guard,
        fabric: Arc<dyn Fabric>,
        timeouts: Timeouts,
    ) -> NodeResult<Self> {
        let shares = fabric.subscribe(Topic::Shares(guard.id())).await?;
        let requests = fabric.subscribe(Topic::AccessRequests).await?;
        let gather = fabric.subscribe(Topic::Gather).await?;
        Ok(GuardNode {
            guard,
            fabric,
            shares,
            requests,
            gather,
            timeouts,
        })
    }

    /// Collect every Dealer's share and announce readiness
    async fn collect_shares(&mut self) -> NodeResult<bool> {
        while !self.guard.is_ready() {
            let share = match self.shares.recv_json::<ShareDistribution>().await {
                Some(share) => share,
                None => return Ok(false),
            };
            if let Err(e) = self.guard.on_dealer_share(&share) {
                log::warn!(
                    "Guard {} rejected share from dealer {}: {}",
                    self.guard.id(),
                    share.sender,
                    e
                );
            }
        }

        let ready = self.guard.ready_announcement();
        log::info!(
            "Guard {} ready with {} shares, transcript {}",
            ready.guard,
            ready.shares,
            ready.transcript
        );
        publish_json(self.fabric.as_ref(), Topic::GuardReady, &ready).await?;
        Ok(true)
    }

    async fn reply(&self, reply: &GuardReply) -> NodeResult<()> {
        publish_json(self.fabric.as_ref(), Topic::GuardReplies, reply).await
    }

    async fn on_request(&mut self, request: AccessRequest) -> NodeResult<()> {
        let step = match self.guard.on_access_request(&request, Instant::now()) {
            Ok(step) => step,
            Err(e) => {
                log::warn!("Guard {} dropped {}: {}", self.guard.id(), request.anonymous_id, e);
                return Ok(());
            }
        };
        if let Some(gather) = step.gather {
            publish_json(self.fabric.as_ref(), Topic::Gather, &gather).await?;
        }
        if let Some(decision) = step.decision {
            self.reply(&decision).await?;
        }
        Ok(())
    }

    async fn on_gather(&mut self, message: GatherMessage) -> NodeResult<()> {
        match self.guard.on_gather(&message, Instant::now()) {
            Ok(Some(decision)) => self.reply(&decision).await,
            Ok(None) => Ok(()),
            Err(e) => {
                log::warn!(
                    "Guard {} dropped partial from {}: {}",
                    self.guard.id(),
                    message.sender,
                    e
                );
                Ok(())
            }
        }
    }

    /// Run until the fabric closes
    pub async fn run(mut self) -> NodeResult<()> {
        if !self.collect_shares().await? {
            log::warn!("Guard {} stopped before receiving every share", self.guard.id());
            return Ok(());
        }

        let mut sweep = tokio::time::interval(self.timeouts.sweep);
        loop {
            tokio::select! {
                request = self.requests.recv_json::<AccessRequest>() => match request {
                    Some(request) => self.on_request(request).await?,
                    None => break,
                },
                message = self.gather.recv_json::<GatherMessage>() => match message {
                    Some(message) => self.on_gather(message).await?,
                    None => break,
                },
                _ = sweep.tick() => {
                    for stalled in self.guard.expire(Instant::now(), self.timeouts.request) {
                        self.reply(&stalled).await?;
                    }
                }
            }
        }

        log::info!("Guard {} stopped", self.guard.id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use access_core::messages::REQUEST_STALLED;
    use access_core::{
        GuardReady, Modulus, ParticipantId, Polynomial, SecretScheme, SecretShare, Term, Token,
    };
    use num_bigint::BigUint;
    use std::time::Duration;

    fn linear(coefficient: u32) -> SecretShare {
        SecretShare::Polynomial(Polynomial::from_terms(vec![Term::new(1u32, coefficient)]))
    }

    async fn single_guard(
        bus: &Arc<MessageBus>,
        num_guards: u32,
        timeouts: Timeouts,
    ) -> tokio::task::JoinHandle<NodeResult<()>> {
        let guard =
            Guard::new(ParticipantId(1), SecretScheme::Additive, Modulus::default(), 1, num_guards)
                .unwrap();
        let node = GuardNode::start(guard, bus.clone(), timeouts).await.unwrap();
        tokio::spawn(node.run())
    }

    async fn send_share(bus: &Arc<MessageBus>, coefficient: u32) {
        let share = ShareDistribution {
            sender: ParticipantId(1),
            receiver: ParticipantId(1),
            partial_secret: linear(coefficient),
        };
        publish_json(&**bus, Topic::Shares(ParticipantId(1)), &share).await.unwrap();
    }

    fn access(value: u32, signature: u32) -> AccessRequest {
        AccessRequest {
            anonymous_id: "anon".to_string(),
            token: Token::new(BigUint::from(value), BigUint::from(signature)),
        }
    }

    #[tokio::test]
    async fn test_guard_announces_readiness_and_decides() {
        let bus = Arc::new(MessageBus::new());
        let mut ready = bus.subscribe(Topic::GuardReady).await.unwrap();
        let mut replies = bus.subscribe(Topic::GuardReplies).await.unwrap();
        let task = single_guard(&bus, 1, Timeouts::default()).await;

        send_share(&bus, 10).await;
        let announcement: GuardReady = ready.recv_json().await.unwrap();
        assert_eq!(announcement.guard, ParticipantId(1));
        assert_eq!(announcement.shares, 1);

        publish_json(&*bus, Topic::AccessRequests, &access(7, 70)).await.unwrap();
        let reply: GuardReply = tokio::time::timeout(Duration::from_secs(5), replies.recv_json())
            .await
            .unwrap()
            .unwrap();
        assert!(reply.success);
        assert_eq!(reply.id, "anon");

        task.abort();
    }

    #[tokio::test]
    async fn test_guard_scatters_and_stalls_without_two_peers() {
        let bus = Arc::new(MessageBus::new());
        let mut gather = bus.subscribe(Topic::Gather).await.unwrap();
        let mut replies = bus.subscribe(Topic::GuardReplies).await.unwrap();
        let timeouts = Timeouts::with_request_timeout(Duration::from_millis(200));
        let task = single_guard(&bus, 3, timeouts).await;

        send_share(&bus, 10).await;
        publish_json(&*bus, Topic::AccessRequests, &access(7, 70)).await.unwrap();

        let partial: GatherMessage = gather.recv_json().await.unwrap();
        assert_eq!(partial.sender, ParticipantId(1));
        assert_eq!(partial.partial_result, BigUint::from(70u32));

        let reply: GuardReply = tokio::time::timeout(Duration::from_secs(5), replies.recv_json())
            .await
            .unwrap()
            .unwrap();
        assert!(!reply.success);
        assert_eq!(reply.message, REQUEST_STALLED);

        task.abort();
    }
}
