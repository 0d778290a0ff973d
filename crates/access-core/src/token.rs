//! User-side token handling
//!
//! The [`TokenAssembler`] turns the Dealers' partial results into a token and reads
//! the Guards' replies back into a verdict. In the anonymous mode it also blinds the
//! value before it leaves the user and unblinds the combined signature.

use crate::bigfield::{random_bounded, Modulus};
use crate::blinding::BlindingKey;
use crate::messages::{DealerReply, GuardReply, ACCESS_DENIED};
use crate::scheme::{OperatingMode, SecretScheme};
use crate::types::Token;
use crate::{AccessError, AccessResult};
use num_bigint::BigUint;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of an access request as seen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessVerdict {
    /// A Guard reconstructed the signature
    Granted,
    /// A Guard reconstructed a different value
    Denied,
    /// The Guards gave up waiting for their peers
    Stalled,
    /// No Guard answered in time
    Incomplete,
}

impl AccessVerdict {
    /// Read a verdict out of whatever Guard replies arrived
    pub fn from_replies(replies: &[GuardReply]) -> Self {
        if replies.is_empty() {
            AccessVerdict::Incomplete
        } else if replies.iter().any(|r| r.success) {
            AccessVerdict::Granted
        } else if replies.iter().any(|r| r.message == ACCESS_DENIED) {
            AccessVerdict::Denied
        } else {
            AccessVerdict::Stalled
        }
    }

    /// Whether access was granted
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessVerdict::Granted)
    }
}

impl fmt::Display for AccessVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessVerdict::Granted => "granted",
            AccessVerdict::Denied => "denied",
            AccessVerdict::Stalled => "stalled",
            AccessVerdict::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Builds tokens from Dealer replies
#[derive(Debug, Clone)]
pub struct TokenAssembler {
    mode: OperatingMode,
    modulus: Modulus,
    blinding: Option<BlindingKey>,
    num_dealers: usize,
}

impl TokenAssembler {
    /// Create an assembler. The anonymous mode needs the blinding key whose modulus
    /// the Dealers use.
    pub fn new(
        mode: OperatingMode,
        modulus: Modulus,
        blinding: Option<BlindingKey>,
        num_dealers: usize,
    ) -> AccessResult<Self> {
        match (&blinding, mode.is_anonymous()) {
            (None, true) => {
                return Err(AccessError::InvalidParameter(format!(
                    "{} requires a blinding key",
                    mode
                )))
            }
            (Some(key), true) if &key.n != modulus.value() => {
                return Err(AccessError::InvalidParameter(
                    "blinding key modulus differs from the dealers' modulus".to_string(),
                ))
            }
            (Some(_), false) => {
                log::warn!("{} does not blind values; ignoring the blinding key", mode);
            }
            _ => {}
        }

        Ok(TokenAssembler {
            mode,
            modulus,
            blinding: blinding.filter(|_| mode.is_anonymous()),
            num_dealers,
        })
    }

    /// Operating mode
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Random value to tokenize, at most `bits` bits. Blinded values must live below
    /// the RSA modulus.
    pub fn random_value<R: Rng + ?Sized>(&self, bits: u64, rng: &mut R) -> BigUint {
        let value = random_bounded(bits, rng);
        if self.blinding.is_some() {
            self.modulus.reduce(&value)
        } else {
            value
        }
    }

    /// Value to send to the Dealers for `value`
    pub fn prepare(&self, value: &BigUint) -> BigUint {
        match &self.blinding {
            Some(key) => key.blind(value),
            None => value.clone(),
        }
    }

    /// Combine one successful reply per Dealer into a token on the original `value`
    pub fn assemble(
        &self,
        id: &str,
        value: &BigUint,
        replies: &[DealerReply],
    ) -> AccessResult<Token> {
        let mut partials = BTreeMap::new();
        for reply in replies {
            match (&reply.value, reply.success) {
                (Some(partial), true) => {
                    partials.entry(reply.dealer).or_insert(partial);
                }
                _ => log::warn!("Dealer {} refused {}: {}", reply.dealer, id, reply.message),
            }
        }

        if partials.len() < self.num_dealers {
            return Err(AccessError::IncompleteQuorum {
                id: id.to_string(),
                got: partials.len(),
                need: self.num_dealers,
            });
        }

        let partials: Vec<BigUint> = partials.into_values().cloned().collect();
        let combined = match self.mode {
            // A single Dealer's value already is the signature
            OperatingMode::CentralizedAdditive if partials.len() == 1 => {
                self.modulus.reduce(&partials[0])
            }
            _ => self.mode.scheme().combine(&partials, &self.modulus),
        };

        let signature = match &self.blinding {
            Some(key) => key.unblind(&combined),
            None => combined,
        };

        Ok(Token::new(value.clone(), signature))
    }

    /// Algebra in use
    pub fn scheme(&self) -> SecretScheme {
        self.mode.scheme()
    }
}
