//! Share distribution transcript
//!
//! Each Guard keeps a digest of the shares it received, announced alongside its
//! readiness so operators can compare distribution runs. Entries are hashed in
//! sender order, making the digest independent of arrival order.

use crate::messages::ShareDistribution;
use crate::{AccessError, AccessResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const DOMAIN: &[u8] = b"THRESHOLD-ACCESS-SHARE-TRANSCRIPT-v1";

/// Record of every share a Guard received
#[derive(Debug, Clone, Default)]
pub struct ShareTranscript {
    entries: BTreeMap<u32, Vec<u8>>,
}

impl ShareTranscript {
    /// Create an empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a share. Each sender may appear once.
    pub fn record(&mut self, share: &ShareDistribution) -> AccessResult<()> {
        let sender = share.sender.as_u32();
        if self.entries.contains_key(&sender) {
            return Err(AccessError::DuplicateShare(sender));
        }
        self.entries.insert(sender, serde_json::to_vec(share)?);
        Ok(())
    }

    /// Number of recorded shares
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over the domain tag and every entry in sender order
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update((self.entries.len() as u64).to_le_bytes());
        for (sender, encoded) in &self.entries {
            hasher.update(sender.to_le_bytes());
            hasher.update((encoded.len() as u64).to_le_bytes());
            hasher.update(encoded);
        }
        hasher.finalize().into()
    }

    /// Hex-encoded digest
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}
