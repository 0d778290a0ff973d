//! Relay: fans user requests out to Dealers or Guards and aggregates their replies
//!
//! - Token requests are tracked by `id` until every Dealer answered. A request whose id is
//!   already in flight is still forwarded so the Dealers reject it, and their refusals are
//!   returned to the user as a separate reply
//! - Access requests are tracked by `anonymousId`; the first Guard decision is forwarded
//!   and later ones for the same id are dropped. A repeated `anonymousId` is answered at
//!   once with an empty Guard reply
//! - User requests are held back until every Guard announced readiness
//! - Requests still open after the Relay timeout are flushed with whatever arrived

use crate::config::Timeouts;
use crate::fabric::{publish_json, Fabric, Subscription, Topic};
use crate::NodeResult;
use access_core::{
    AccessError, ClientRequest, DealerReply, GuardReady, GuardReply, ParticipantId, PendingTable,
    Quorum, RelayReply,
};
use num_bigint::BigUint;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// One forwarded `getToken` and the Dealer replies collected for it
struct TokenRound {
    value: BigUint,
    replies: Quorum<DealerReply>,
}

impl TokenRound {
    fn answered_by(&self, dealer: ParticipantId) -> bool {
        self.replies.responses().iter().any(|r| r.dealer == dealer)
    }

    fn into_reply(self, id: String) -> RelayReply {
        RelayReply::Dealers {
            id,
            value: self.value,
            responses: self.replies.into_responses(),
        }
    }
}

fn is_replay_refusal(reply: &DealerReply) -> bool {
    !reply.success && reply.message == AccessError::DuplicateRequest(reply.id.clone()).to_string()
}

enum PendingAccess {
    Waiting,
    Answered,
}

/// Relay state
pub struct Relay {
    fabric: Arc<dyn Fabric>,
    num_dealers: usize,
    num_guards: usize,
    timeouts: Timeouts,
    users: Subscription,
    dealer_replies: Subscription,
    guard_replies: Subscription,
    readiness: Subscription,
    ready_guards: BTreeMap<ParticipantId, GuardReady>,
    held: Vec<ClientRequest>,
    tokens: PendingTable<String, Vec<TokenRound>>,
    accesses: PendingTable<String, PendingAccess>,
}

impl Relay {
    /// Subscribe to user requests, Dealer and Guard replies and Guard readiness
    pub async fn start(
        fabric: Arc<dyn Fabric>,
        num_dealers: u32,
        num_guards: u32,
        timeouts: Timeouts,
    ) -> NodeResult<Self> {
        let users = fabric.subscribe(Topic::UserRequests).await?;
        let dealer_replies = fabric.subscribe(Topic::DealerReplies).await?;
        let guard_replies = fabric.subscribe(Topic::GuardReplies).await?;
        let readiness = fabric.subscribe(Topic::GuardReady).await?;
        Ok(Relay {
            fabric,
            num_dealers: num_dealers as usize,
            num_guards: num_guards as usize,
            timeouts,
            users,
            dealer_replies,
            guard_replies,
            readiness,
            ready_guards: BTreeMap::new(),
            held: Vec::new(),
            tokens: PendingTable::new(),
            accesses: PendingTable::new(),
        })
    }

    fn all_ready(&self) -> bool {
        self.ready_guards.len() >= self.num_guards
    }

    async fn on_ready(&mut self, ready: GuardReady) -> NodeResult<()> {
        log::debug!("Relay: guard {} ready, transcript {}", ready.guard, ready.transcript);
        self.ready_guards.insert(ready.guard, ready);
        if !self.all_ready() {
            return Ok(());
        }

        if !self.held.is_empty() {
            log::info!(
                "Relay: all {} guards ready, releasing {} held requests",
                self.num_guards,
                self.held.len()
            );
        }
        for request in std::mem::take(&mut self.held) {
            self.forward(request).await?;
        }
        Ok(())
    }

    async fn on_user(&mut self, request: ClientRequest) -> NodeResult<()> {
        if self.all_ready() {
            self.forward(request).await
        } else {
            log::debug!("Relay: holding {} until guards are ready", request.correlation_id());
            self.held.push(request);
            Ok(())
        }
    }

    async fn forward(&mut self, request: ClientRequest) -> NodeResult<()> {
        let now = Instant::now();
        match request {
            ClientRequest::GetToken(request) => {
                let round = TokenRound {
                    value: request.value.clone(),
                    replies: Quorum::new(self.num_dealers),
                };
                match self.tokens.get_mut(&request.id) {
                    Some(rounds) => {
                        log::warn!(
                            "Relay: token request {} already in flight, forwarding the repeat",
                            request.id
                        );
                        rounds.push(round);
                    }
                    None => self.tokens.insert(request.id.clone(), now, vec![round]),
                }
                publish_json(self.fabric.as_ref(), Topic::TokenRequests, &request).await
            }
            ClientRequest::GetAccess(request) => {
                if self.accesses.contains(&request.anonymous_id) {
                    log::warn!(
                        "Relay: {}",
                        AccessError::DuplicateRequest(request.anonymous_id.clone())
                    );
                    let response = RelayReply::Guards {
                        id: request.anonymous_id,
                        responses: Vec::new(),
                    };
                    return publish_json(self.fabric.as_ref(), Topic::UserReplies, &response).await;
                }
                self.accesses.insert(request.anonymous_id.clone(), now, PendingAccess::Waiting);
                publish_json(self.fabric.as_ref(), Topic::AccessRequests, &request).await
            }
        }
    }

    async fn on_dealer_reply(&mut self, reply: DealerReply) -> NodeResult<()> {
        let rounds = match self.tokens.get_mut(&reply.id) {
            Some(rounds) => rounds,
            None => {
                log::debug!("Relay: late reply from dealer {} for {}", reply.dealer, reply.id);
                return Ok(());
            }
        };

        // Refusals of a repeat belong to the newest round this Dealer has not answered yet
        let mut open = rounds
            .iter()
            .enumerate()
            .filter(|(_, round)| !round.answered_by(reply.dealer))
            .map(|(slot, _)| slot);
        let slot = if is_replay_refusal(&reply) { open.last() } else { open.next() };
        let slot = match slot {
            Some(slot) => slot,
            None => {
                log::debug!("Relay: extra reply from dealer {} for {}", reply.dealer, reply.id);
                return Ok(());
            }
        };
        if !rounds[slot].replies.push(reply.clone()) {
            return Ok(());
        }

        let round = rounds.remove(slot);
        if rounds.is_empty() {
            self.tokens.remove(&reply.id);
        }
        publish_json(self.fabric.as_ref(), Topic::UserReplies, &round.into_reply(reply.id)).await
    }

    async fn on_guard_reply(&mut self, reply: GuardReply) -> NodeResult<()> {
        let state = match self.accesses.get_mut(&reply.id) {
            Some(state) => state,
            None => {
                log::debug!("Relay: late reply from guard {} for {}", reply.guard, reply.id);
                return Ok(());
            }
        };
        if matches!(state, PendingAccess::Answered) {
            log::debug!(
                "Relay: dropping later decision from guard {} for {}",
                reply.guard,
                reply.id
            );
            return Ok(());
        }
        *state = PendingAccess::Answered;

        let response = RelayReply::Guards {
            id: reply.id.clone(),
            responses: vec![reply],
        };
        publish_json(self.fabric.as_ref(), Topic::UserReplies, &response).await
    }

    async fn sweep(&mut self) -> NodeResult<()> {
        let now = Instant::now();

        for (id, rounds) in self.tokens.drain_expired(now, self.timeouts.relay) {
            for round in rounds {
                log::warn!(
                    "Relay: {}",
                    AccessError::IncompleteQuorum {
                        id: id.clone(),
                        got: round.replies.len(),
                        need: round.replies.expected(),
                    }
                );
                let response = round.into_reply(id.clone());
                publish_json(self.fabric.as_ref(), Topic::UserReplies, &response).await?;
            }
        }

        for (id, state) in self.accesses.drain_expired(now, self.timeouts.relay) {
            if let PendingAccess::Waiting = state {
                log::warn!(
                    "Relay: {}",
                    AccessError::IncompleteQuorum { id: id.clone(), got: 0, need: 1 }
                );
                let response = RelayReply::Guards { id, responses: Vec::new() };
                publish_json(self.fabric.as_ref(), Topic::UserReplies, &response).await?;
            }
        }
        Ok(())
    }

    /// Run until the fabric closes
    pub async fn run(mut self) -> NodeResult<()> {
        log::info!(
            "Relay serving {} dealers and {} guards",
            self.num_dealers,
            self.num_guards
        );
        let mut sweep = tokio::time::interval(self.timeouts.sweep);
        loop {
            tokio::select! {
                ready = self.readiness.recv_json::<GuardReady>() => match ready {
                    Some(ready) => self.on_ready(ready).await?,
                    None => break,
                },
                request = self.users.recv_json::<ClientRequest>() => match request {
                    Some(request) => self.on_user(request).await?,
                    None => break,
                },
                reply = self.dealer_replies.recv_json::<DealerReply>() => match reply {
                    Some(reply) => self.on_dealer_reply(reply).await?,
                    None => break,
                },
                reply = self.guard_replies.recv_json::<GuardReply>() => match reply {
                    Some(reply) => self.on_guard_reply(reply).await?,
                    None => break,
                },
                _ = sweep.tick() => self.sweep().await?,
            }
        }
        log::info!("Relay stopped");
        Ok(())
    }
}
