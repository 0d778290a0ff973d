//! Wire messages
//!
//! Every message is a JSON record; big integers travel as decimal strings.
//!
//! ```text
//! User            Relay               Dealers            Guards
//!  ├─getToken───────→├──getToken──────────→│                  │
//!  │                 │←─DealerReply────────┤                  │
//!  │←─dealers────────┤                     ├─ShareDistribution→│ (startup)
//!  ├─getAccess──────→├──getAccess─────────────────────────────→│
//!  │                 │                     │      GatherMessage ↻ (guard mesh)
//!  │                 │←─GuardReply─────────────────────────────┤
//!  │←─guards─────────┤                     │                  │
//! ```

use crate::bigfield::{decimal, decimal_opt};
use crate::scheme::SecretShare;
use crate::types::{ParticipantId, Token};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Reply text for a token that passed verification
pub const ACCESS_GRANTED: &str = "Access Granted";
/// Reply text for a token that failed verification
pub const ACCESS_DENIED: &str = "Access Denied";
/// Reply text for a Guard request whose threshold was never reached
pub const REQUEST_STALLED: &str = "Request Stalled";
/// Reply text for a successful Dealer evaluation
pub const TOKEN_EVALUATED: &str = "Token evaluated";

/// Requests a user sends to the Relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientRequest {
    /// Ask every Dealer to evaluate its secret on a value
    #[serde(rename = "getToken")]
    GetToken(TokenRequest),
    /// Ask the Guards to verify a token
    #[serde(rename = "getAccess")]
    GetAccess(AccessRequest),
}

impl ClientRequest {
    /// Identifier the reply will be correlated on
    pub fn correlation_id(&self) -> &str {
        match self {
            ClientRequest::GetToken(r) => &r.id,
            ClientRequest::GetAccess(r) => &r.anonymous_id,
        }
    }
}

/// Token request; `value` is blinded in the anonymous mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Request identifier
    pub id: String,
    /// Value to sign
    #[serde(with = "decimal")]
    pub value: BigUint,
}

/// Access request carrying a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    /// Identifier unrelated to any token request id
    pub anonymous_id: String,
    /// `(value, signature)`
    pub token: Token,
}

/// One Dealer's answer to a token request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerReply {
    /// Answering Dealer
    pub dealer: ParticipantId,
    /// Original request identifier
    pub id: String,
    /// Partial result; absent when `success` is false
    #[serde(with = "decimal_opt", default)]
    pub value: Option<BigUint>,
    /// Whether the request was evaluated
    pub success: bool,
    /// Explanation
    pub message: String,
}

/// One Guard's decision on an access request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardReply {
    /// Deciding Guard
    pub guard: ParticipantId,
    /// Anonymous identifier of the access request
    pub id: String,
    /// Access granted
    pub success: bool,
    /// `"Access Granted"`, `"Access Denied"` or `"Request Stalled"`
    pub message: String,
}

/// Aggregated replies the Relay sends back to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RelayReply {
    /// Every Dealer's partial result for a token request
    #[serde(rename = "dealers")]
    Dealers {
        /// Request identifier
        id: String,
        /// Value as submitted
        #[serde(with = "decimal")]
        value: BigUint,
        /// Individual Dealer replies
        responses: Vec<DealerReply>,
    },
    /// Guard decisions for an access request
    #[serde(rename = "guards")]
    Guards {
        /// Anonymous identifier
        id: String,
        /// Individual Guard replies
        responses: Vec<GuardReply>,
    },
}

impl RelayReply {
    /// Identifier of the request this reply answers
    pub fn id(&self) -> &str {
        match self {
            RelayReply::Dealers { id, .. } | RelayReply::Guards { id, .. } => id,
        }
    }
}

/// A Dealer's share addressed to one Guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareDistribution {
    /// Sending Dealer
    pub sender: ParticipantId,
    /// Receiving Guard
    pub receiver: ParticipantId,
    /// Scalar or polynomial share
    pub partial_secret: SecretShare,
}

/// A Guard's partial evaluation, scattered to every peer Guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherMessage {
    /// Guard that computed the partial
    pub sender: ParticipantId,
    /// Anonymous identifier of the access request
    pub anonymous_id: String,
    /// Partial evaluation on `token.value`
    #[serde(with = "decimal")]
    pub partial_result: BigUint,
    /// Token under verification
    pub token: Token,
}

/// Announcement that a Guard holds every Dealer's share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardReady {
    /// Announcing Guard
    pub guard: ParticipantId,
    /// Number of shares received
    pub shares: usize,
    /// Hex SHA-256 digest of the received shares
    pub transcript: String,
}
