//! Runtime layer for the threshold access protocol
//!
//! Provides the message fabric and the actors that drive `access-core` state machines:
//! - [`fabric::Fabric`]: topic-based publish/subscribe seam
//! - [`bus::MessageBus`]: in-process backend for simulations and tests
//! - [`tcp::TcpFabric`]: JSON-lines over TCP for one-process-per-node deployments
//! - Dealer, Guard and Relay actors, plus the load-generating client harness

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fabric;
pub mod bus;
pub mod tcp;
pub mod config;
pub mod dealer_node;
pub mod guard_node;
pub mod relay;
pub mod client;
pub mod launch;

pub use fabric::{Fabric, Subscription, Topic};
pub use bus::MessageBus;
pub use tcp::TcpFabric;
pub use config::{ConnectPolicy, PeerAddresses, Role, Setup, SystemConfig, Timeouts};
pub use dealer_node::DealerNode;
pub use guard_node::GuardNode;
pub use relay::Relay;
pub use client::{ClientHarness, HarnessConfig, HarnessReport, LatencyStats, RequestTiming};
pub use launch::{run_node, simulate, spawn_node, Deployment};

use access_core::AccessError;
use thiserror::Error;

/// Node runtime errors
#[derive(Error, Debug)]
pub enum NodeError {
    /// Protocol state machine rejected an operation
    #[error("Protocol error: {0}")]
    Protocol(#[from] AccessError),

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Peer never accepted a connection
    #[error("Connection to {addr} failed after {attempts} attempts")]
    ConnectFailed {
        /// Peer address
        addr: String,
        /// Attempts made
        attempts: u32,
    },

    /// A node task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors() {
        let err = NodeError::ConnectFailed { addr: "127.0.0.1:9000".to_string(), attempts: 3 };
        assert_eq!(err.to_string(), "Connection to 127.0.0.1:9000 failed after 3 attempts");

        let err: NodeError = AccessError::DuplicateRequest("x".to_string()).into();
        assert_eq!(err.to_string(), "Protocol error: Duplicate request identifier: x");
    }
}
