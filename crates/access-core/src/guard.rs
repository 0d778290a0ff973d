//! Guard: holder of a share of the verification secret
//!
//! A Guard folds the one share it receives from every Dealer into its aggregate
//! secret. For each access request it evaluates that aggregate on the token's value,
//! scatters the partial result to its peers and gathers theirs. Whichever message
//! brings the collected partials to `N_guards` triggers the decision: the combined
//! partials must equal the token's signature.
//!
//! The Guard is a plain state machine; the caller owns the transport and the clock.

use crate::bigfield::Modulus;
use crate::correlation::{PendingTable, Quorum};
use crate::messages::{
    AccessRequest, GatherMessage, GuardReady, GuardReply, ShareDistribution, ACCESS_DENIED,
    ACCESS_GRANTED, REQUEST_STALLED,
};
use crate::scheme::{AggregateSecret, SecretScheme, SecretShare};
use crate::transcript::ShareTranscript;
use crate::types::{ParticipantId, Token};
use crate::{AccessError, AccessResult};
use num_bigint::BigUint;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Outbound messages produced by one inbound event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardStep {
    /// Partial result to scatter to every peer Guard
    pub gather: Option<GatherMessage>,
    /// Final decision for the Relay
    pub decision: Option<GuardReply>,
}

/// Per-`anonymousId` verification state
#[derive(Debug)]
struct AccessState {
    token: Token,
    partials: Quorum<BigUint>,
    contributors: HashSet<ParticipantId>,
    decided: bool,
}

impl AccessState {
    fn new(token: Token, num_guards: usize) -> Self {
        AccessState {
            token,
            partials: Quorum::new(num_guards),
            contributors: HashSet::with_capacity(num_guards),
            decided: false,
        }
    }
}

/// Guard state
#[derive(Debug)]
pub struct Guard {
    id: ParticipantId,
    scheme: SecretScheme,
    modulus: Modulus,
    num_dealers: u32,
    num_guards: u32,
    /// Shares received so far, in arrival order
    shares: Vec<SecretShare>,
    aggregate: AggregateSecret,
    transcript: ShareTranscript,
    requests: PendingTable<String, AccessState>,
}

impl Guard {
    /// Create a Guard expecting one share from each of `num_dealers` Dealers
    pub fn new(
        id: ParticipantId,
        scheme: SecretScheme,
        modulus: Modulus,
        num_dealers: u32,
        num_guards: u32,
    ) -> AccessResult<Self> {
        if num_dealers == 0 || num_guards == 0 {
            return Err(AccessError::InvalidParameter(format!(
                "guard needs at least one dealer and one guard, got {} and {}",
                num_dealers, num_guards
            )));
        }
        if id.as_u32() == 0 || id.as_u32() > num_guards {
            return Err(AccessError::InvalidParticipantIndex(id.as_u32()));
        }

        Ok(Guard {
            id,
            scheme,
            modulus,
            num_dealers,
            num_guards,
            shares: Vec::with_capacity(num_dealers as usize),
            aggregate: scheme.empty_aggregate(),
            transcript: ShareTranscript::new(),
            requests: PendingTable::new(),
        })
    }

    /// My participant ID
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Aggregate of the shares received so far
    pub fn aggregate(&self) -> &AggregateSecret {
        &self.aggregate
    }

    /// Shares received so far
    pub fn shares(&self) -> &[SecretShare] {
        &self.shares
    }

    /// Whether every Dealer's share has arrived
    pub fn is_ready(&self) -> bool {
        self.shares.len() == self.num_dealers as usize
    }

    /// Number of access requests currently tracked
    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Readiness announcement, including the share transcript digest
    pub fn ready_announcement(&self) -> GuardReady {
        GuardReady {
            guard: self.id,
            shares: self.shares.len(),
            transcript: self.transcript.digest_hex(),
        }
    }

    /// Fold a Dealer's share in. Returns `true` when this share completes the set.
    ///
    /// Arrival order does not matter; a second share from the same Dealer is rejected
    /// without touching the aggregate.
    pub fn on_dealer_share(&mut self, share: &ShareDistribution) -> AccessResult<bool> {
        if share.receiver != self.id {
            return Err(AccessError::InvalidParticipantIndex(share.receiver.as_u32()));
        }
        let sender = share.sender.as_u32();
        if sender == 0 || sender > self.num_dealers {
            return Err(AccessError::InvalidParticipantIndex(sender));
        }
        self.scheme.check_share(&share.partial_secret)?;
        self.transcript.record(share)?;
        self.aggregate.fold(&share.partial_secret, &self.modulus)?;
        self.shares.push(share.partial_secret.clone());

        log::debug!(
            "Guard {} received share from dealer {} ({}/{})",
            self.id,
            sender,
            self.shares.len(),
            self.num_dealers
        );

        Ok(self.is_ready())
    }

    /// Evaluate my aggregate on an access request's token.
    ///
    /// Below the threshold the partial is returned for scattering; if it completes the
    /// threshold the decision is returned instead.
    pub fn on_access_request(
        &mut self,
        request: &AccessRequest,
        now: Instant,
    ) -> AccessResult<GuardStep> {
        if !self.is_ready() {
            return Err(AccessError::NotReady {
                have: self.shares.len(),
                need: self.num_dealers as usize,
            });
        }

        let partial = self.aggregate.evaluate(&request.token.value, &self.modulus);
        let gather = GatherMessage {
            sender: self.id,
            anonymous_id: request.anonymous_id.clone(),
            partial_result: partial.clone(),
            token: request.token.clone(),
        };

        match self.record_partial(&request.anonymous_id, self.id, partial, &request.token, now) {
            Recorded::Pending => Ok(GuardStep {
                gather: Some(gather),
                decision: None,
            }),
            Recorded::Completed(reply) => Ok(GuardStep {
                gather: None,
                decision: Some(reply),
            }),
            Recorded::Ignored => Ok(GuardStep::default()),
        }
    }

    /// Add a peer's partial result. Returns the decision if it completes the threshold.
    ///
    /// My own scattered partial echoing back is ignored.
    pub fn on_gather(
        &mut self,
        message: &GatherMessage,
        now: Instant,
    ) -> AccessResult<Option<GuardReply>> {
        if message.sender == self.id {
            return Ok(None);
        }
        let sender = message.sender.as_u32();
        if sender == 0 || sender > self.num_guards {
            return Err(AccessError::InvalidParticipantIndex(sender));
        }

        let partial = self.modulus.reduce(&message.partial_result);
        let recorded = self.record_partial(
            &message.anonymous_id,
            message.sender,
            partial,
            &message.token,
            now,
        );
        match recorded {
            Recorded::Completed(reply) => Ok(Some(reply)),
            Recorded::Pending | Recorded::Ignored => Ok(None),
        }
    }

    /// Fail every undecided request older than `timeout` with a stalled reply and
    /// forget decided ones
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<GuardReply> {
        let id = self.id;
        self.requests
            .drain_expired(now, timeout)
            .into_iter()
            .filter(|(_, state)| !state.decided)
            .filter_map(|(request, state)| {
                let (have, need) = (state.partials.len(), state.partials.expected());
                // One missing partial: the owner of it completed locally and never scatters
                if have + 1 >= need {
                    log::debug!(
                        "Guard {}: dropping request {} with {} of {} partials",
                        id,
                        request,
                        have,
                        need
                    );
                    return None;
                }
                log::warn!(
                    "Guard {}: {} ({} of {} partials)",
                    id,
                    AccessError::StalledRequest(request.clone()),
                    have,
                    need
                );
                Some(GuardReply {
                    guard: id,
                    id: request,
                    success: false,
                    message: REQUEST_STALLED.to_string(),
                })
            })
            .collect()
    }

    fn record_partial(
        &mut self,
        anonymous_id: &str,
        contributor: ParticipantId,
        partial: BigUint,
        token: &Token,
        now: Instant,
    ) -> Recorded {
        let num_guards = self.num_guards as usize;
        let state = self
            .requests
            .get_or_insert_with(anonymous_id.to_string(), now, || {
                AccessState::new(token.clone(), num_guards)
            });

        if state.decided {
            log::debug!("Guard {}: {} already decided", self.id, anonymous_id);
            return Recorded::Ignored;
        }
        if !state.contributors.insert(contributor) {
            log::warn!(
                "Guard {}: duplicate partial from guard {} for {}",
                self.id,
                contributor,
                anonymous_id
            );
            return Recorded::Ignored;
        }
        if &state.token != token {
            log::warn!(
                "Guard {}: guard {} sent a different token for {}",
                self.id,
                contributor,
                anonymous_id
            );
        }

        if !state.partials.push(partial) {
            return Recorded::Pending;
        }

        state.decided = true;
        let combined = self.scheme.combine(state.partials.responses(), &self.modulus);
        let granted = combined == state.token.signature;
        log::debug!(
            "Guard {} decided {}: {}",
            self.id,
            anonymous_id,
            if granted { ACCESS_GRANTED } else { ACCESS_DENIED }
        );

        Recorded::Completed(GuardReply {
            guard: self.id,
            id: anonymous_id.to_string(),
            success: granted,
            message: if granted { ACCESS_GRANTED } else { ACCESS_DENIED }.to_string(),
        })
    }
}

enum Recorded {
    Pending,
    Completed(GuardReply),
    Ignored,
}
