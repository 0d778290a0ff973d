//! Threshold Access Token Core
//!
//! This crate implements the secret-sharing and threshold-aggregation protocol behind
//! anonymous access tokens:
//! - Dealers jointly hold a split signing secret and evaluate it on user-chosen values
//! - Guards jointly hold the matching verification secret and decide token validity
//!   by gathering every Guard's partial evaluation
//! - Two interchangeable algebras: additive (sparse polynomials) and multiplicative
//!   (scalar exponents with RSA blinding for anonymity)
//!
//! Everything here is synchronous and free of I/O; the actors that move these
//! messages around live in `access-node`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bigfield;
pub mod polynomial;
pub mod scheme;
pub mod blinding;
pub mod types;
pub mod messages;
pub mod correlation;
pub mod transcript;
pub mod dealer;
pub mod guard;
pub mod token;

pub use bigfield::{Modulus, DEFAULT_MODULUS};
pub use polynomial::{Polynomial, Term};
pub use scheme::{AggregateSecret, OperatingMode, SecretScheme, SecretShare};
pub use blinding::BlindingKey;
pub use types::{ParticipantId, Token};
pub use messages::{
    AccessRequest, ClientRequest, DealerReply, GatherMessage, GuardReady, GuardReply,
    RelayReply, ShareDistribution, TokenRequest,
};
pub use correlation::{PendingTable, Quorum, UsedIds};
pub use transcript::ShareTranscript;
pub use dealer::Dealer;
pub use guard::{Guard, GuardStep};
pub use token::{AccessVerdict, TokenAssembler};

use thiserror::Error;

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// A request identifier was already evaluated by this Dealer
    #[error("Duplicate request identifier: {0}")]
    DuplicateRequest(String),

    /// Fewer responses than expected arrived before the request was closed
    #[error("Incomplete quorum for {id}: got {got}, need {need}")]
    IncompleteQuorum {
        /// Request identifier
        id: String,
        /// Responses received
        got: usize,
        /// Responses required
        need: usize,
    },

    /// A Guard request never reached its threshold
    #[error("Request stalled: {0}")]
    StalledRequest(String),

    /// A Guard was asked to evaluate before holding every Dealer's share
    #[error("Guard not ready: holds {have} of {need} shares")]
    NotReady {
        /// Shares received
        have: usize,
        /// Shares required
        need: usize,
    },

    /// Invalid participant index
    #[error("Invalid participant index: {0}")]
    InvalidParticipantIndex(u32),

    /// A Dealer delivered more than one share to the same Guard
    #[error("Duplicate share from dealer {0}")]
    DuplicateShare(u32),

    /// Share shape does not match the selected scheme
    #[error("Share does not match the {0} scheme")]
    SchemeMismatch(&'static str),

    /// Invalid configuration parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A decimal big integer could not be parsed
    #[error("Malformed number: {0}")]
    MalformedNumber(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}

/// Result type for protocol operations
pub type AccessResult<T> = Result<T, AccessError>;

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        AccessError::SerializationError(err.to_string())
    }
}
