//! Secret-sharing algebras
//!
//! The operating mode is chosen once per process and fixes the shape of a
//! [`SecretShare`], how shares fold into an [`AggregateSecret`], how a secret is
//! evaluated on a value, and how partial results are combined.
//!
//! | Scheme         | Share       | Fold                 | Evaluate            | Combine        |
//! |----------------|-------------|----------------------|---------------------|----------------|
//! | Additive       | polynomial  | polynomial addition  | `p(v) mod M`        | sum mod M      |
//! | Multiplicative | scalar      | exponent addition    | `v^s mod n`         | product mod n  |

use crate::bigfield::{decimal, Modulus};
use crate::polynomial::Polynomial;
use crate::{AccessError, AccessResult};
use num_bigint::BigUint;
use num_traits::Zero;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperatingMode {
    /// Additive scheme with a single Dealer
    CentralizedAdditive,
    /// Additive scheme with any number of Dealers
    DistributedAdditive,
    /// Multiplicative scheme with RSA blinding (anonymous)
    DistributedMultiplicative,
}

impl OperatingMode {
    /// All modes, in display order
    pub const ALL: [OperatingMode; 3] = [
        OperatingMode::CentralizedAdditive,
        OperatingMode::DistributedAdditive,
        OperatingMode::DistributedMultiplicative,
    ];

    /// Algebra used by this mode
    pub fn scheme(&self) -> SecretScheme {
        match self {
            OperatingMode::CentralizedAdditive | OperatingMode::DistributedAdditive => {
                SecretScheme::Additive
            }
            OperatingMode::DistributedMultiplicative => SecretScheme::Multiplicative,
        }
    }

    /// Whether values are blinded before they reach the Dealers
    pub fn is_anonymous(&self) -> bool {
        matches!(self, OperatingMode::DistributedMultiplicative)
    }

    /// Stable name used on the command line and in report file names
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::CentralizedAdditive => "centralized-additive",
            OperatingMode::DistributedAdditive => "distributed-additive",
            OperatingMode::DistributedMultiplicative => "distributed-multiplicative",
        }
    }

    /// Check the participant counts this mode allows
    pub fn validate(&self, num_dealers: u32, num_guards: u32) -> AccessResult<()> {
        if num_dealers == 0 || num_guards == 0 {
            return Err(AccessError::InvalidParameter(format!(
                "need at least one dealer and one guard, got {} dealers and {} guards",
                num_dealers, num_guards
            )));
        }
        if *self == OperatingMode::CentralizedAdditive && num_dealers != 1 {
            return Err(AccessError::InvalidParameter(format!(
                "{} requires exactly one dealer, got {}",
                self, num_dealers
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatingMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AccessError::InvalidParameter(format!("unknown mode: {}", s)))
    }
}

/// The two interchangeable algebras
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretScheme {
    /// Polynomial secrets, sum aggregation
    Additive,
    /// Scalar exponent secrets, product aggregation
    Multiplicative,
}

impl SecretScheme {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            SecretScheme::Additive => "additive",
            SecretScheme::Multiplicative => "multiplicative",
        }
    }

    /// Generate one random share.
    ///
    /// Additive shares draw `num_terms` terms with degrees and coefficients of at most
    /// `bits` bits. Multiplicative shares are a random exponent below the modulus.
    pub fn generate_share<R: Rng + ?Sized>(
        &self,
        num_terms: usize,
        bits: u64,
        modulus: &Modulus,
        rng: &mut R,
    ) -> SecretShare {
        match self {
            SecretScheme::Additive => {
                SecretShare::Polynomial(Polynomial::random(num_terms, bits, rng).reduce(modulus))
            }
            SecretScheme::Multiplicative => SecretShare::Scalar(modulus.random_element(rng)),
        }
    }

    /// Aggregate holding no shares yet
    pub fn empty_aggregate(&self) -> AggregateSecret {
        let secret = match self {
            SecretScheme::Additive => SecretShare::Polynomial(Polynomial::zero()),
            SecretScheme::Multiplicative => SecretShare::Scalar(BigUint::zero()),
        };
        AggregateSecret { secret, folded: 0 }
    }

    /// Combine partial results from several evaluators: sum (additive) or product
    /// (multiplicative), reduced modulo `modulus`
    pub fn combine(&self, partials: &[BigUint], modulus: &Modulus) -> BigUint {
        match self {
            SecretScheme::Additive => modulus.sum(partials),
            SecretScheme::Multiplicative => modulus.product(partials),
        }
    }

    /// Check a share has this scheme's shape
    pub fn check_share(&self, share: &SecretShare) -> AccessResult<()> {
        match (self, share) {
            (SecretScheme::Additive, SecretShare::Polynomial(_))
            | (SecretScheme::Multiplicative, SecretShare::Scalar(_)) => Ok(()),
            _ => Err(AccessError::SchemeMismatch(self.name())),
        }
    }
}

/// One Dealer's share addressed to one Guard
///
/// On the wire a scalar is a decimal string and a polynomial is a list of
/// `{degree, coefficient}` records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretShare {
    /// Scalar exponent (multiplicative scheme)
    Scalar(#[serde(with = "decimal")] BigUint),
    /// Sparse polynomial (additive scheme)
    Polynomial(Polynomial),
}

/// Running fold of every share an entity holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSecret {
    secret: SecretShare,
    folded: usize,
}

impl AggregateSecret {
    /// Fold one more share in.
    ///
    /// Polynomials are merged and their coefficients reduced. Exponents are summed
    /// exactly: reducing them modulo `n` would break `v^(a+b) = v^a * v^b`.
    pub fn fold(&mut self, share: &SecretShare, modulus: &Modulus) -> AccessResult<()> {
        match (&mut self.secret, share) {
            (SecretShare::Polynomial(acc), SecretShare::Polynomial(p)) => {
                *acc = acc.add(p, modulus);
            }
            (SecretShare::Scalar(acc), SecretShare::Scalar(s)) => {
                *acc += s;
            }
            (SecretShare::Polynomial(_), _) => {
                return Err(AccessError::SchemeMismatch(SecretScheme::Additive.name()))
            }
            (SecretShare::Scalar(_), _) => {
                return Err(AccessError::SchemeMismatch(SecretScheme::Multiplicative.name()))
            }
        }
        self.folded += 1;
        Ok(())
    }

    /// Evaluate the aggregate on `value`
    pub fn evaluate(&self, value: &BigUint, modulus: &Modulus) -> BigUint {
        match &self.secret {
            SecretShare::Polynomial(p) => p.evaluate(value, modulus),
            SecretShare::Scalar(s) => modulus.pow(value, s),
        }
    }

    /// The folded secret
    pub fn secret(&self) -> &SecretShare {
        &self.secret
    }

    /// Number of shares folded so far
    pub fn folded(&self) -> usize {
        self.folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::Term;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    fn big(v: u64) -> BigUint {
        BigUint::from(v)
    }

    #[test]
    fn test_mode_parsing() {
        for mode in OperatingMode::ALL {
            assert_eq!(mode.as_str().parse::<OperatingMode>().unwrap(), mode);
        }
        assert!("ARA2".parse::<OperatingMode>().is_err());

        let json = serde_json::to_string(&OperatingMode::DistributedMultiplicative).unwrap();
        assert_eq!(json, "\"distributed-multiplicative\"");
    }

    #[test]
    fn test_mode_validation() {
        assert!(OperatingMode::CentralizedAdditive.validate(1, 4).is_ok());
        assert!(OperatingMode::CentralizedAdditive.validate(3, 4).is_err());
        assert!(OperatingMode::DistributedAdditive.validate(3, 4).is_ok());
        assert!(OperatingMode::DistributedMultiplicative.validate(2, 0).is_err());
        assert!(OperatingMode::DistributedMultiplicative.is_anonymous());
        assert!(!OperatingMode::DistributedAdditive.is_anonymous());
    }

    #[test]
    fn test_multiplicative_scenario() {
        // n = 91, shares 2 and 3 sum to 5, v = 4
        let n = Modulus::from_u64(91).unwrap();
        let scheme = SecretScheme::Multiplicative;

        let mut aggregate = scheme.empty_aggregate();
        aggregate.fold(&SecretShare::Scalar(big(2)), &n).unwrap();
        aggregate.fold(&SecretShare::Scalar(big(3)), &n).unwrap();
        assert_eq!(aggregate.secret(), &SecretShare::Scalar(big(5)));
        assert_eq!(aggregate.evaluate(&big(4), &n), big(23));

        let partials = [n.pow(&big(4), &big(2)), n.pow(&big(4), &big(3))];
        assert_eq!(partials, [big(16), big(64)]);
        assert_eq!(scheme.combine(&partials, &n), big(23));
    }

    #[test]
    fn test_additive_fold_and_combine() {
        let m = Modulus::from_u64(373_587_923).unwrap();
        let scheme = SecretScheme::Additive;

        let mut aggregate = scheme.empty_aggregate();
        for c in [2u32, 3, 5] {
            let share = SecretShare::Polynomial(Polynomial::from_terms(vec![Term::new(1u32, c)]));
            aggregate.fold(&share, &m).unwrap();
        }
        assert_eq!(aggregate.folded(), 3);
        assert_eq!(aggregate.evaluate(&big(7), &m), big(70));
        assert_eq!(scheme.combine(&[big(14), big(21), big(35)], &m), big(70));
    }

    #[test]
    fn test_fold_rejects_mismatched_share() {
        let m = Modulus::from_u64(91).unwrap();
        let mut aggregate = SecretScheme::Multiplicative.empty_aggregate();
        let share = SecretShare::Polynomial(Polynomial::zero());
        assert_eq!(
            aggregate.fold(&share, &m),
            Err(AccessError::SchemeMismatch("multiplicative"))
        );
        assert_eq!(aggregate.folded(), 0);
        assert!(SecretScheme::Additive.check_share(&share).is_ok());
    }

    #[test]
    fn test_generated_share_shapes() {
        let mut rng = OsRng;
        let m = Modulus::from_u64(373_587_923).unwrap();

        let share = SecretScheme::Additive.generate_share(3, 32, &m, &mut rng);
        assert!(SecretScheme::Additive.check_share(&share).is_ok());

        let share = SecretScheme::Multiplicative.generate_share(3, 32, &m, &mut rng);
        match share {
            SecretShare::Scalar(s) => assert!(&s < m.value()),
            _ => panic!("expected scalar share"),
        }
    }

    #[test]
    fn test_share_wire_format() {
        let scalar = SecretShare::Scalar(big(12345));
        assert_eq!(serde_json::to_string(&scalar).unwrap(), "\"12345\"");

        let poly = SecretShare::Polynomial(Polynomial::from_terms(vec![Term::new(1u32, 2u32)]));
        let json = serde_json::to_string(&poly).unwrap();
        assert_eq!(json, r#"[{"degree":"1","coefficient":"2"}]"#);

        assert_eq!(serde_json::from_str::<SecretShare>("\"12345\"").unwrap(), scalar);
        assert_eq!(serde_json::from_str::<SecretShare>(&json).unwrap(), poly);
    }

    proptest! {
        #[test]
        fn prop_multiplicative_homomorphism(
            shares in prop::collection::vec(any::<u64>(), 1..6),
            v in 2u64..1_000_000,
        ) {
            // 2^61 - 1 is prime
            let n = Modulus::from_u64((1u64 << 61) - 1).unwrap();
            let v = big(v);
            let scheme = SecretScheme::Multiplicative;

            let partials: Vec<BigUint> = shares.iter().map(|s| n.pow(&v, &big(*s))).collect();

            let mut aggregate = scheme.empty_aggregate();
            for s in &shares {
                aggregate.fold(&SecretShare::Scalar(big(*s)), &n).unwrap();
            }

            prop_assert_eq!(scheme.combine(&partials, &n), aggregate.evaluate(&v, &n));
        }
    }
}
