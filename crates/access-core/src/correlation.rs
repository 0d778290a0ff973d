//! Request/response bookkeeping shared by Dealers, Guards and the Relay
//!
//! - [`UsedIds`]: a Dealer's replay guard, never pruned
//! - [`Quorum`]: responses gathered for one request, bounded by the responder count
//! - [`PendingTable`]: in-flight requests keyed by id, with expiry

use crate::messages::TokenRequest;
use crate::{AccessError, AccessResult};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Ledger of every request id a Dealer has evaluated
#[derive(Debug, Default)]
pub struct UsedIds {
    entries: HashMap<String, TokenRequest>,
}

impl UsedIds {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request, rejecting ids seen before. A rejected request leaves the
    /// ledger untouched.
    pub fn record(&mut self, request: &TokenRequest) -> AccessResult<()> {
        if self.entries.contains_key(&request.id) {
            return Err(AccessError::DuplicateRequest(request.id.clone()));
        }
        self.entries.insert(request.id.clone(), request.clone());
        Ok(())
    }

    /// Whether an id was already used
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// The original request recorded under `id`
    pub fn get(&self, id: &str) -> Option<&TokenRequest> {
        self.entries.get(id)
    }

    /// Number of recorded ids
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Responses collected for a single request until `expected` have arrived
#[derive(Debug, Clone)]
pub struct Quorum<T> {
    expected: usize,
    responses: Vec<T>,
}

impl<T> Quorum<T> {
    /// Create an empty quorum waiting for `expected` responses
    pub fn new(expected: usize) -> Self {
        Quorum {
            expected,
            responses: Vec::with_capacity(expected),
        }
    }

    /// Add a response. Returns `true` exactly once: on the push that completes the
    /// quorum. Pushes past completion are dropped and return `false`.
    pub fn push(&mut self, response: T) -> bool {
        if self.is_complete() {
            return false;
        }
        self.responses.push(response);
        self.is_complete()
    }

    /// Whether every expected response arrived
    pub fn is_complete(&self) -> bool {
        self.responses.len() >= self.expected
    }

    /// Responses so far
    pub fn responses(&self) -> &[T] {
        &self.responses
    }

    /// Number of responses so far
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// True if no response arrived yet
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Expected number of responses
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Consume into the collected responses
    pub fn into_responses(self) -> Vec<T> {
        self.responses
    }
}

#[derive(Debug)]
struct Pending<V> {
    state: V,
    opened_at: Instant,
}

/// In-flight requests keyed by identifier
#[derive(Debug)]
pub struct PendingTable<K, V> {
    entries: HashMap<K, Pending<V>>,
}

impl<K: Eq + Hash + Clone, V> Default for PendingTable<K, V> {
    fn default() -> Self {
        PendingTable {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> PendingTable<K, V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, creating its entry with `init` on first reference
    pub fn get_or_insert_with<F>(&mut self, key: K, now: Instant, init: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        &mut self
            .entries
            .entry(key)
            .or_insert_with(|| Pending {
                state: init(),
                opened_at: now,
            })
            .state
    }

    /// Insert a fresh entry, replacing any previous one
    pub fn insert(&mut self, key: K, now: Instant, state: V) {
        self.entries.insert(key, Pending { state, opened_at: now });
    }

    /// Shared access to an entry
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|p| &p.state)
    }

    /// Mutable access to an entry
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|p| &mut p.state)
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|p| p.state)
    }

    /// Whether `key` is pending
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry opened more than `timeout` before `now`
    pub fn drain_expired(&mut self, now: Instant, timeout: Duration) -> Vec<(K, V)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.opened_at) > timeout)
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|p| (k, p.state)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn request(id: &str, value: u32) -> TokenRequest {
        TokenRequest {
            id: id.to_string(),
            value: BigUint::from(value),
        }
    }

    #[test]
    fn test_used_ids_rejects_replay() {
        let mut ledger = UsedIds::new();
        assert!(ledger.record(&request("a", 1)).is_ok());
        assert_eq!(
            ledger.record(&request("a", 2)),
            Err(AccessError::DuplicateRequest("a".to_string()))
        );

        // The original entry is kept
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("a").unwrap().value, BigUint::from(1u32));
        assert!(ledger.contains("a"));
        assert!(!ledger.contains("b"));
    }

    #[test]
    fn test_quorum_completes_once() {
        let mut quorum = Quorum::new(3);
        assert!(!quorum.push(1));
        assert!(!quorum.push(2));
        assert!(!quorum.is_complete());
        assert!(quorum.push(3));
        assert!(quorum.is_complete());

        // Late responses are dropped
        assert!(!quorum.push(4));
        assert_eq!(quorum.responses(), &[1, 2, 3]);
    }

    #[test]
    fn test_pending_table_entry_lifecycle() {
        let mut table: PendingTable<String, Quorum<u32>> = PendingTable::new();
        let now = Instant::now();

        table.get_or_insert_with("x".to_string(), now, || Quorum::new(2)).push(1);
        table.get_or_insert_with("x".to_string(), now, || Quorum::new(99)).push(2);

        let quorum = table.get(&"x".to_string()).unwrap();
        assert_eq!(quorum.expected(), 2);
        assert!(quorum.is_complete());

        assert!(table.remove(&"x".to_string()).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_pending_table_expiry() {
        let mut table: PendingTable<u32, &str> = PendingTable::new();
        let start = Instant::now();
        table.insert(1, start, "old");
        table.insert(2, start + Duration::from_secs(10), "new");

        let expired = table.drain_expired(start + Duration::from_secs(12), Duration::from_secs(5));
        assert_eq!(expired, vec![(1, "old")]);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&2));
    }
}
