//! Arbitrary-precision modular arithmetic
//!
//! Every group operation in the protocol is reduced modulo a single process-wide
//! [`Modulus`]. Exponentiation always goes through `modpow`: operands can be as large
//! as the configured bit size, so `base^exponent` is never materialized.

use crate::{AccessError, AccessResult};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Prime modulus used by the additive modes unless configured otherwise
pub const DEFAULT_MODULUS: u64 = 373_587_923;

/// Process-wide modulus shared by every party
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Modulus(BigUint);

impl Modulus {
    /// Create a modulus; values below 2 cannot define a ring worth using
    pub fn new(value: BigUint) -> AccessResult<Self> {
        if value <= BigUint::one() {
            return Err(AccessError::InvalidParameter(format!(
                "modulus must be at least 2, got {}",
                value
            )));
        }
        Ok(Modulus(value))
    }

    /// Create from a machine integer
    pub fn from_u64(value: u64) -> AccessResult<Self> {
        Self::new(BigUint::from(value))
    }

    /// Underlying value
    pub fn value(&self) -> &BigUint {
        &self.0
    }

    /// Bit length of the modulus
    pub fn bits(&self) -> u64 {
        self.0.bits()
    }

    /// `x mod m`
    pub fn reduce(&self, x: &BigUint) -> BigUint {
        x % &self.0
    }

    /// `(a + b) mod m`
    pub fn add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.0
    }

    /// `(a * b) mod m`
    pub fn mul(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a * b) % &self.0
    }

    /// `base^exponent mod m`
    pub fn pow(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        pow_mod(base, exponent, &self.0)
    }

    /// Congruence test: `a ≡ b (mod m)`
    pub fn congruent(&self, a: &BigUint, b: &BigUint) -> bool {
        self.reduce(a) == self.reduce(b)
    }

    /// Sum of all values, reduced
    pub fn sum<'a, I>(&self, values: I) -> BigUint
    where
        I: IntoIterator<Item = &'a BigUint>,
    {
        values
            .into_iter()
            .fold(BigUint::zero(), |acc, v| self.add(&acc, v))
    }

    /// Product of all values, reduced
    pub fn product<'a, I>(&self, values: I) -> BigUint
    where
        I: IntoIterator<Item = &'a BigUint>,
    {
        values
            .into_iter()
            .fold(BigUint::one() % &self.0, |acc, v| self.mul(&acc, v))
    }

    /// Uniformly random element in `[0, m)`
    pub fn random_element<R: Rng + ?Sized>(&self, rng: &mut R) -> BigUint {
        rng.gen_biguint_below(&self.0)
    }
}

impl Default for Modulus {
    fn default() -> Self {
        Modulus(BigUint::from(DEFAULT_MODULUS))
    }
}

impl fmt::Display for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Modulus {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Modulus::new(parse_decimal(s)?)
    }
}

impl Serialize for Modulus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        decimal::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Modulus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = decimal::deserialize(deserializer)?;
        Modulus::new(value).map_err(serde::de::Error::custom)
    }
}

/// `base^exponent mod modulus` by square-and-multiply
pub fn pow_mod(base: &BigUint, exponent: &BigUint, modulus: &BigUint) -> BigUint {
    base.modpow(exponent, modulus)
}

/// Random integer of at most `bits` bits
pub fn random_bounded<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    rng.gen_biguint(bits)
}

/// Parse a base-10 big integer, tolerating surrounding whitespace
pub fn parse_decimal(s: &str) -> AccessResult<BigUint> {
    BigUint::parse_bytes(s.trim().as_bytes(), 10)
        .ok_or_else(|| AccessError::MalformedNumber(s.to_string()))
}

/// Serde support for `BigUint` as a decimal string.
pub mod decimal {
    use super::*;

    /// Serialize as a base-10 string
    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    /// Deserialize from a base-10 string
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_decimal(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde support for `Option<BigUint>` as an optional decimal string.
pub mod decimal_opt {
    use super::*;

    /// Serialize as a base-10 string or `null`
    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize from a base-10 string or `null`
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| parse_decimal(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
