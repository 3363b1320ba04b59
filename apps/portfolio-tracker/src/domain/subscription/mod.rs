//! Subscription Registry
//!
//! Tracks the pairs the caller wants streamed and replays them after every
//! reconnect.
//!
//! # Design
//!
//! The registry keeps two sets:
//! - `active`: pairs already registered with the provider on the current
//!   (or last) session
//! - `pending`: pairs requested while no session was open, awaiting
//!   registration on the next open
//!
//! Both sets survive reconnects. On every session open the union of the two
//! is replayed as a single subscribe command and everything becomes active,
//! so the set replayed after a reconnect is exactly the set desired before
//! the disconnect.

use std::collections::BTreeSet;

use crate::domain::streaming::PairKey;

/// Aggregate index feed prefix for ticker channel tokens.
pub const AGGREGATE_INDEX_PREFIX: &str = "5~CCCAGG";

/// Encode a pair key as a provider channel token (`5~CCCAGG~FROM~TO`).
#[must_use]
pub fn channel_token(pair: &PairKey) -> String {
    format!(
        "{AGGREGATE_INDEX_PREFIX}~{}~{}",
        pair.from_symbol(),
        pair.to_symbol()
    )
}

/// Set of desired subscriptions, split by registration status.
///
/// # Example
///
/// ```rust
/// use portfolio_tracker::domain::subscription::SubscriptionRegistry;
/// use portfolio_tracker::domain::streaming::PairKey;
///
/// let mut registry = SubscriptionRegistry::new();
/// let btc: PairKey = "BTC-USD".parse().unwrap();
///
/// // No session yet: queued
/// registry.subscribe(&[btc.clone()]);
/// assert!(registry.pending().contains(&btc));
///
/// // Session opened: everything is replayed and becomes active
/// let replay = registry.take_replay();
/// assert_eq!(replay, vec![btc.clone()]);
/// assert!(registry.active().contains(&btc));
/// ```
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    active: BTreeSet<PairKey>,
    pending: BTreeSet<PairKey>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add pairs to the desired set.
    ///
    /// Pairs not yet active are queued as pending. Returns the pairs that
    /// were not desired before this call.
    pub fn subscribe(&mut self, pairs: &[PairKey]) -> Vec<PairKey> {
        let mut added = Vec::new();
        for pair in pairs {
            if !self.active.contains(pair) && self.pending.insert(pair.clone()) {
                added.push(pair.clone());
            }
        }
        added
    }

    /// Remove pairs from the desired set.
    ///
    /// Returns the pairs that were active, i.e. registered with the provider.
    pub fn unsubscribe(&mut self, pairs: &[PairKey]) -> Vec<PairKey> {
        let mut removed_active = Vec::new();
        for pair in pairs {
            self.pending.remove(pair);
            if self.active.remove(pair) {
                removed_active.push(pair.clone());
            }
        }
        removed_active
    }

    /// Mark pairs as registered with the provider.
    ///
    /// Pairs that are no longer desired are ignored.
    pub fn mark_registered(&mut self, pairs: &[PairKey]) {
        for pair in pairs {
            if self.pending.remove(pair) {
                self.active.insert(pair.clone());
            }
        }
    }

    /// Promote every pending pair and return the full set to replay.
    ///
    /// Called on every session open.
    pub fn take_replay(&mut self) -> Vec<PairKey> {
        self.active.append(&mut self.pending);
        self.active.iter().cloned().collect()
    }

    /// Every desired pair, active or pending.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<PairKey> {
        self.active.union(&self.pending).cloned().collect()
    }

    /// Pairs registered with the provider.
    #[must_use]
    pub const fn active(&self) -> &BTreeSet<PairKey> {
        &self.active
    }

    /// Pairs awaiting registration.
    #[must_use]
    pub const fn pending(&self) -> &BTreeSet<PairKey> {
        &self.pending
    }

    /// Number of desired pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len() + self.pending.len()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair(s: &str) -> PairKey {
        s.parse().unwrap()
    }

    #[test]
    fn channel_token_format() {
        assert_eq!(channel_token(&pair("ADA-BTC")), "5~CCCAGG~ADA~BTC");
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();

        let added = registry.subscribe(&[pair("BTC-USD"), pair("BTC-USD")]);
        assert_eq!(added, vec![pair("BTC-USD")]);

        let added = registry.subscribe(&[pair("BTC-USD")]);
        assert!(added.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscribe_skips_active_pairs() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&[pair("ETH-USD")]);
        registry.take_replay();

        let added = registry.subscribe(&[pair("ETH-USD")]);
        assert!(added.is_empty());
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn unsubscribe_reports_only_active_removals() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&[pair("BTC-USD")]);
        registry.take_replay();
        registry.subscribe(&[pair("ETH-USD")]);

        let removed = registry.unsubscribe(&[pair("BTC-USD"), pair("ETH-USD"), pair("XRP-BTC")]);
        assert_eq!(removed, vec![pair("BTC-USD")]);
        assert!(registry.is_empty());
    }

    #[test]
    fn mark_registered_ignores_undesired_pairs() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&[pair("BTC-USD")]);
        registry.mark_registered(&[pair("BTC-USD"), pair("DOGE-BTC")]);

        assert_eq!(registry.active().len(), 1);
        assert!(registry.pending().is_empty());
        assert!(!registry.snapshot().contains(&pair("DOGE-BTC")));
    }

    #[test]
    fn replay_repeats_full_active_set() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&[pair("BTC-USD"), pair("ETH-BTC")]);

        let first = registry.take_replay();
        let second = registry.take_replay();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(Vec<usize>),
        Unsubscribe(Vec<usize>),
        Open,
    }

    const UNIVERSE: [&str; 6] = ["BTC-USD", "ETH-USD", "ETH-BTC", "ADA-BTC", "XMR-ETH", "SOL-BTC"];

    fn op_strategy() -> impl Strategy<Value = Op> {
        let idx = proptest::collection::vec(0..UNIVERSE.len(), 0..4);
        prop_oneof![
            idx.clone().prop_map(Op::Subscribe),
            idx.prop_map(Op::Unsubscribe),
            Just(Op::Open),
        ]
    }

    proptest! {
        #[test]
        fn replay_equals_desired_set(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let mut registry = SubscriptionRegistry::new();
            let mut model = BTreeSet::new();
            let mut open = false;

            for op in ops {
                match op {
                    Op::Subscribe(ids) => {
                        let pairs: Vec<_> = ids.iter().map(|i| pair(UNIVERSE[*i])).collect();
                        registry.subscribe(&pairs);
                        if open {
                            registry.mark_registered(&pairs);
                        }
                        model.extend(pairs);
                    }
                    Op::Unsubscribe(ids) => {
                        let pairs: Vec<_> = ids.iter().map(|i| pair(UNIVERSE[*i])).collect();
                        registry.unsubscribe(&pairs);
                        for p in &pairs {
                            model.remove(p);
                        }
                    }
                    Op::Open => {
                        open = true;
                        registry.take_replay();
                    }
                }
            }

            // Forced reconnect: the replay must equal the desired set.
            let before = registry.snapshot();
            let replay: BTreeSet<_> = registry.take_replay().into_iter().collect();
            prop_assert_eq!(&replay, &model);
            prop_assert_eq!(replay, before);
        }
    }
}
