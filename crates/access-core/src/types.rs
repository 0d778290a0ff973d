//! Core types shared by Dealers, Guards and users

use crate::bigfield::parse_decimal;
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Participant identifier (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    /// Create a new participant ID
    pub fn new(id: u32) -> Option<Self> {
        if id > 0 {
            Some(ParticipantId(id))
        } else {
            None
        }
    }

    /// Get the underlying u32 value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Zero-based position, for indexing per-participant vectors
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// All ids `1..=count`
    pub fn range(count: u32) -> impl Iterator<Item = ParticipantId> {
        (1..=count).map(ParticipantId)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access token: a value together with the collective Dealer signature on it.
///
/// Serialized as `[value, signature]`, both decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    /// The signed value (never blinded)
    pub value: BigUint,
    /// Collective evaluation of the Dealer secret on `value`
    pub signature: BigUint,
}

impl Token {
    /// Create a new token
    pub fn new(value: BigUint, signature: BigUint) -> Self {
        Token { value, signature }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.value.to_str_radix(10), self.signature.to_str_radix(10)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Token {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (value, signature): (String, String) = Deserialize::deserialize(deserializer)?;
        Ok(Token {
            value: parse_decimal(&value).map_err(serde::de::Error::custom)?,
            signature: parse_decimal(&signature).map_err(serde::de::Error::custom)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id() {
        assert!(ParticipantId::new(0).is_none());
        assert!(ParticipantId::new(1).is_some());
        assert_eq!(ParticipantId::new(5).unwrap().as_u32(), 5);
        assert_eq!(ParticipantId(3).index(), 2);
        assert_eq!(ParticipantId::range(3).collect::<Vec<_>>(), vec![
            ParticipantId(1),
            ParticipantId(2),
            ParticipantId(3),
        ]);
    }

    #[test]
    fn test_token_wire_format() {
        let token = Token::new(BigUint::from(7u32), BigUint::from(70u32));
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, r#"["7","70"]"#);
        assert_eq!(serde_json::from_str::<Token>(&json).unwrap(), token);

        assert!(serde_json::from_str::<Token>(r#"["7"]"#).is_err());
        assert!(serde_json::from_str::<Token>(r#"["7","x"]"#).is_err());
    }
}
