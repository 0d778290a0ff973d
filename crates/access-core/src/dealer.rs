//! Dealer: holder of a share of the signing secret
//!
//! Protocol flow:
//! 1. At startup the Dealer generates one random share per Guard
//! 2. Its aggregate secret is the fold of those shares
//! 3. Each share is sent to the Guard with the matching index
//! 4. Token requests are evaluated against the aggregate, at most once per id

use crate::bigfield::Modulus;
use crate::correlation::UsedIds;
use crate::messages::{DealerReply, ShareDistribution, TokenRequest, TOKEN_EVALUATED};
use crate::scheme::{AggregateSecret, SecretScheme, SecretShare};
use crate::types::ParticipantId;
use crate::{AccessError, AccessResult};
use num_bigint::BigUint;
use rand::Rng;

/// Fewest terms in a generated polynomial share
pub const MIN_POLYNOMIAL_TERMS: usize = 3;
/// Upper bound (exclusive) on terms in a generated polynomial share
pub const MAX_POLYNOMIAL_TERMS: usize = 5;

/// Dealer state
#[derive(Debug)]
pub struct Dealer {
    /// My participant ID
    id: ParticipantId,
    /// Selected algebra
    scheme: SecretScheme,
    /// Process-wide modulus
    modulus: Modulus,
    /// One share per Guard, indexed by Guard position
    shares: Vec<SecretShare>,
    /// Fold of `shares`
    aggregate: AggregateSecret,
    /// Replay guard
    used_ids: UsedIds,
}

impl Dealer {
    /// Create a Dealer with freshly generated shares for `num_guards` Guards
    pub fn new<R: Rng + ?Sized>(
        id: ParticipantId,
        num_guards: u32,
        scheme: SecretScheme,
        modulus: Modulus,
        bit_size: u64,
        rng: &mut R,
    ) -> AccessResult<Self> {
        if num_guards == 0 {
            return Err(AccessError::InvalidParameter(
                "a dealer needs at least one guard".to_string(),
            ));
        }

        let num_terms = rng.gen_range(MIN_POLYNOMIAL_TERMS..MAX_POLYNOMIAL_TERMS);
        let shares = (0..num_guards)
            .map(|_| scheme.generate_share(num_terms, bit_size, &modulus, rng))
            .collect();

        Self::with_shares(id, scheme, modulus, shares)
    }

    /// Create a Dealer from known shares (one per Guard)
    pub fn with_shares(
        id: ParticipantId,
        scheme: SecretScheme,
        modulus: Modulus,
        shares: Vec<SecretShare>,
    ) -> AccessResult<Self> {
        if shares.is_empty() {
            return Err(AccessError::InvalidParameter(
                "a dealer needs at least one share".to_string(),
            ));
        }

        let mut aggregate = scheme.empty_aggregate();
        for share in &shares {
            scheme.check_share(share)?;
            aggregate.fold(share, &modulus)?;
        }

        log::debug!("Dealer {} prepared {} {} shares", id, shares.len(), scheme.name());

        Ok(Dealer {
            id,
            scheme,
            modulus,
            shares,
            aggregate,
            used_ids: UsedIds::new(),
        })
    }

    /// My participant ID
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Selected algebra
    pub fn scheme(&self) -> SecretScheme {
        self.scheme
    }

    /// Shares destined for the Guards
    pub fn shares(&self) -> &[SecretShare] {
        &self.shares
    }

    /// Aggregate secret used to answer token requests
    pub fn aggregate(&self) -> &AggregateSecret {
        &self.aggregate
    }

    /// Replay ledger
    pub fn used_ids(&self) -> &UsedIds {
        &self.used_ids
    }

    /// One message per Guard, addressed by Guard index
    pub fn distribution(&self) -> Vec<ShareDistribution> {
        ParticipantId::range(self.shares.len() as u32)
            .zip(self.shares.iter())
            .map(|(receiver, share)| ShareDistribution {
                sender: self.id,
                receiver,
                partial_secret: share.clone(),
            })
            .collect()
    }

    /// Evaluate the aggregate on a request's value, once per request id
    pub fn try_evaluate(&mut self, request: &TokenRequest) -> AccessResult<BigUint> {
        self.used_ids.record(request)?;
        Ok(self.aggregate.evaluate(&request.value, &self.modulus))
    }

    /// Answer a token request. Duplicates still get a reply, flagged unsuccessful.
    pub fn evaluate(&mut self, request: &TokenRequest) -> DealerReply {
        match self.try_evaluate(request) {
            Ok(value) => DealerReply {
                dealer: self.id,
                id: request.id.clone(),
                value: Some(value),
                success: true,
                message: TOKEN_EVALUATED.to_string(),
            },
            Err(err) => {
                log::warn!("Dealer {} rejected request {}: {}", self.id, request.id, err);
                DealerReply {
                    dealer: self.id,
                    id: request.id.clone(),
                    value: None,
                    success: false,
                    message: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::{Polynomial, Term};
    use rand::rngs::OsRng;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    fn request(id: &str, value: u64) -> TokenRequest {
        TokenRequest {
            id: id.to_string(),
            value: big(value),
        }
    }

    fn linear(coefficient: u32) -> SecretShare {
        SecretShare::Polynomial(Polynomial::from_terms(vec![Term::new(1u32, coefficient)]))
    }

    #[test]
    fn test_random_dealer() {
        let mut rng = OsRng;
        let m = Modulus::from_u64(373_587_923).unwrap();
        let dealer =
            Dealer::new(ParticipantId(1), 4, SecretScheme::Additive, m, 64, &mut rng).unwrap();

        assert_eq!(dealer.shares().len(), 4);
        assert_eq!(dealer.aggregate().folded(), 4);

        let distribution = dealer.distribution();
        assert_eq!(distribution.len(), 4);
        for (i, msg) in distribution.iter().enumerate() {
            assert_eq!(msg.sender, ParticipantId(1));
            assert_eq!(msg.receiver, ParticipantId(i as u32 + 1));
            assert_eq!(&msg.partial_secret, &dealer.shares()[i]);
        }
    }

    #[test]
    fn test_dealer_requires_guards() {
        let mut rng = OsRng;
        let m = Modulus::from_u64(91).unwrap();
        let scheme = SecretScheme::Multiplicative;
        assert!(Dealer::new(ParticipantId(1), 0, scheme, m.clone(), 8, &mut rng).is_err());
        assert!(Dealer::with_shares(ParticipantId(1), SecretScheme::Additive, m, vec![]).is_err());
    }

    #[test]
    fn test_dealer_rejects_mismatched_shares() {
        let m = Modulus::from_u64(91).unwrap();
        let result = Dealer::with_shares(
            ParticipantId(1),
            SecretScheme::Multiplicative,
            m,
            vec![linear(2)],
        );
        assert!(matches!(result, Err(AccessError::SchemeMismatch(_))));
    }

    #[test]
    fn test_evaluate_sums_own_shares() {
        let m = Modulus::from_u64(373_587_923).unwrap();
        // Shares for 4 guards summing to 2x
        let shares = vec![linear(1), linear(1), linear(0), linear(0)];
        let mut dealer =
            Dealer::with_shares(ParticipantId(1), SecretScheme::Additive, m, shares).unwrap();

        let reply = dealer.evaluate(&request("r1", 7));
        assert!(reply.success);
        assert_eq!(reply.value, Some(big(14)));
        assert_eq!(reply.dealer, ParticipantId(1));
        assert_eq!(reply.id, "r1");
    }

    #[test]
    fn test_replay_rejection() {
        let m = Modulus::from_u64(91).unwrap();
        let shares = vec![SecretShare::Scalar(big(2)), SecretShare::Scalar(big(3))];
        let scheme = SecretScheme::Multiplicative;
        let mut dealer = Dealer::with_shares(ParticipantId(2), scheme, m, shares).unwrap();
        let aggregate_before = dealer.aggregate().clone();

        let first = dealer.evaluate(&request("r1", 4));
        assert!(first.success);
        assert_eq!(first.value, Some(big(23)));

        let second = dealer.evaluate(&request("r1", 5));
        assert!(!second.success);
        assert!(second.value.is_none());
        assert_eq!(second.message, "Duplicate request identifier: r1");

        assert_eq!(dealer.aggregate(), &aggregate_before);
        assert_eq!(dealer.used_ids().len(), 1);
        assert_eq!(dealer.used_ids().get("r1").unwrap().value, big(4));
    }
}
