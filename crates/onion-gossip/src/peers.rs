//! The node's local view of reachable peers.
//!
//! This module provides:
//! - [`PeerBook`]: validated address set with failure-driven eviction
//! - Uniform fanout sampling via [`PeerBook::random_peers`]

use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

use crate::address::{PeerAddress, sanitize};

/// Consecutive send failures after which a peer is evicted.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Validated peer addresses plus per-peer failure counters.
///
/// Only canonical addresses are ever inserted. A failure counter is forgiven in full by
/// a single success.
#[derive(Debug, Clone)]
pub struct PeerBook {
    peers: HashSet<PeerAddress>,
    failures: HashMap<PeerAddress, u32>,
    failure_threshold: u32,
}

impl PeerBook {
    /// Creates an empty peer book evicting after `failure_threshold` failures (minimum 1).
    #[must_use]
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            peers: HashSet::new(),
            failures: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Sanitizes `input` and inserts it, returning whether a new peer was added.
    pub fn add_peer(&mut self, input: &str) -> bool {
        sanitize(input).is_some_and(|address| self.insert(address))
    }

    /// Inserts an already canonical address, returning whether it was new.
    ///
    /// A newly inserted peer starts with no recorded failures.
    pub fn insert(&mut self, address: PeerAddress) -> bool {
        if self.peers.contains(&address) {
            return false;
        }
        self.failures.remove(&address);
        self.peers.insert(address)
    }

    /// Removes a peer and its failure counter, returning whether it was present.
    ///
    /// Input that does not sanitize is matched verbatim.
    pub fn remove_peer(&mut self, input: &str) -> bool {
        let key = canonical_or_raw(input);
        self.failures.remove(key.as_str());
        self.peers.remove(key.as_str())
    }

    /// Returns true if the (sanitized) address is in the book.
    #[must_use]
    pub fn contains(&self, input: &str) -> bool {
        self.peers.contains(canonical_or_raw(input).as_str())
    }

    /// Samples up to `count` distinct peers uniformly, skipping anything in `exclude`.
    #[must_use]
    pub fn random_peers(&self, count: usize, exclude: &[&str]) -> Vec<PeerAddress> {
        let excluded: HashSet<String> = exclude.iter().map(|e| canonical_or_raw(e)).collect();
        let candidates: Vec<&PeerAddress> = self
            .peers
            .iter()
            .filter(|p| !excluded.contains(p.as_str()))
            .collect();

        candidates
            .choose_multiple(&mut rand::thread_rng(), count)
            .map(|p| (*p).clone())
            .collect()
    }

    /// Counts a failed delivery. Returns true if the peer was evicted as a result.
    ///
    /// Peers that are not in the book are ignored, so a send that outlives a removal
    /// leaves nothing behind.
    pub fn report_failure(&mut self, peer: &PeerAddress) -> bool {
        if !self.peers.contains(peer) {
            return false;
        }
        let count = self.failures.entry(peer.clone()).or_insert(0);
        *count += 1;

        if *count >= self.failure_threshold {
            self.remove_peer(peer.as_str());
            return true;
        }
        false
    }

    /// Forgives every failure recorded against `peer`.
    pub fn report_success(&mut self, peer: &PeerAddress) {
        self.failures.remove(peer);
    }

    /// Returns the failures recorded since the peer's last success.
    #[must_use]
    pub fn failure_count(&self, peer: &PeerAddress) -> u32 {
        self.failures.get(peer).copied().unwrap_or(0)
    }

    /// Returns the number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns all known peers, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<_> = self.peers.iter().cloned().collect();
        peers.sort();
        peers
    }
}

impl Default for PeerBook {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

fn canonical_or_raw(input: &str) -> String {
    sanitize(input).map_or_else(|| input.to_string(), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with(n: usize) -> (PeerBook, Vec<PeerAddress>) {
        let mut book = PeerBook::default();
        let peers: Vec<_> = (0..n).map(|_| PeerAddress::random()).collect();
        for p in &peers {
            book.insert(p.clone());
        }
        (book, peers)
    }

    // ========== Membership Tests ==========

    #[test]
    fn add_peer_sanitizes_input() {
        let mut book = PeerBook::default();
        let peer = PeerAddress::random();
        let url = format!("http://{}:9050/gossip", peer.as_str().to_uppercase());

        assert!(book.add_peer(&url));
        assert!(!book.add_peer(peer.as_str()));
        assert_eq!(book.snapshot(), vec![peer]);
    }

    #[test]
    fn add_peer_rejects_malformed() {
        let mut book = PeerBook::default();
        assert!(!book.add_peer("example.com"));
        assert!(!book.add_peer(""));
        assert!(book.is_empty());
    }

    #[test]
    fn remove_peer_clears_failures() {
        let (mut book, peers) = book_with(1);
        book.report_failure(&peers[0]);
        assert_eq!(book.failure_count(&peers[0]), 1);

        assert!(book.remove_peer(&format!("https://{}/", peers[0])));
        assert!(book.is_empty());
        assert_eq!(book.failure_count(&peers[0]), 0);
    }

    #[test]
    fn remove_unknown_peer_is_noop() {
        let (mut book, _) = book_with(2);
        assert!(!book.remove_peer("garbage"));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn contains_accepts_any_equivalent_form() {
        let (book, peers) = book_with(1);
        assert!(book.contains(&peers[0].as_str().to_uppercase()));
        assert!(!book.contains(PeerAddress::random().as_str()));
    }

    #[test]
    fn snapshot_is_sorted() {
        let (book, mut peers) = book_with(5);
        peers.sort();
        assert_eq!(book.snapshot(), peers);
    }

    // ========== Fanout Sampling Tests ==========

    #[test]
    fn random_peers_respects_count_and_exclusion() {
        let (book, peers) = book_with(10);
        let excluded = peers[3].clone();

        for _ in 0..50 {
            let picked = book.random_peers(3, &[excluded.as_str()]);
            assert_eq!(picked.len(), 3);
            let distinct: HashSet<_> = picked.iter().collect();
            assert_eq!(distinct.len(), 3);
            assert!(!picked.contains(&excluded));
        }
    }

    #[test]
    fn random_peers_returns_all_candidates_when_few() {
        let (book, peers) = book_with(2);
        let picked = book.random_peers(3, &[]);
        assert_eq!(picked.len(), 2);
        for p in &peers {
            assert!(picked.contains(p));
        }
    }

    #[test]
    fn random_peers_empty_when_everything_excluded() {
        let (book, peers) = book_with(2);
        let exclude: Vec<&str> = peers.iter().map(PeerAddress::as_str).collect();
        assert!(book.random_peers(3, &exclude).is_empty());
        assert!(PeerBook::default().random_peers(3, &[]).is_empty());
    }

    #[test]
    fn random_peers_excludes_non_canonical_forms() {
        let (book, peers) = book_with(1);
        let upper = peers[0].as_str().to_uppercase();
        assert!(book.random_peers(3, &[upper.as_str()]).is_empty());
    }

    #[test]
    fn random_peers_covers_every_candidate() {
        let (book, peers) = book_with(6);
        let mut hit = HashSet::new();
        for _ in 0..500 {
            hit.extend(book.random_peers(1, &[]));
        }
        assert_eq!(hit.len(), peers.len());
    }

    // ========== Failure Eviction Tests ==========

    #[test]
    fn three_failures_evict() {
        let (mut book, peers) = book_with(1);
        assert!(!book.report_failure(&peers[0]));
        assert!(!book.report_failure(&peers[0]));
        assert!(book.report_failure(&peers[0]));
        assert!(!book.contains(peers[0].as_str()));
    }

    #[test]
    fn success_resets_failure_count() {
        let (mut book, peers) = book_with(1);
        let peer = &peers[0];

        book.report_failure(peer);
        book.report_failure(peer);
        book.report_success(peer);
        assert_eq!(book.failure_count(peer), 0);

        assert!(!book.report_failure(peer));
        assert!(!book.report_failure(peer));
        assert!(book.contains(peer.as_str()));
        assert!(book.report_failure(peer));
        assert!(book.is_empty());
    }

    #[test]
    fn failure_on_unknown_peer_is_ignored() {
        let mut book = PeerBook::default();
        let stranger = PeerAddress::random();
        assert!(!book.report_failure(&stranger));
        assert_eq!(book.failure_count(&stranger), 0);
        assert!(book.is_empty());
    }

    #[test]
    fn failure_after_removal_does_not_carry_over_to_readd() {
        let (mut book, peers) = book_with(1);
        let peer = &peers[0];

        assert!(book.remove_peer(peer.as_str()));
        assert!(!book.report_failure(peer));
        assert_eq!(book.failure_count(peer), 0);

        assert!(book.add_peer(peer.as_str()));
        assert!(!book.report_failure(peer));
        assert!(!book.report_failure(peer));
        assert!(book.contains(peer.as_str()));
        assert!(book.report_failure(peer));
        assert!(!book.contains(peer.as_str()));
    }

    #[test]
    fn custom_threshold() {
        let mut book = PeerBook::new(1);
        let peer = PeerAddress::random();
        book.insert(peer.clone());
        assert!(book.report_failure(&peer));
        assert!(book.is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fanout_never_exceeds_count(count in 0usize..10, num_peers in 0usize..20) {
                let (book, _) = book_with(num_peers);
                let picked = book.random_peers(count, &[]);
                prop_assert_eq!(picked.len(), count.min(num_peers));
            }
        }
    }
}
