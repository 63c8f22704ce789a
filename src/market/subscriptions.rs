use crate::error::AppError;
use crate::market::filters::FilterDescriptor;
use crate::market::types::{Chain, TokenRecord};
use crate::market::wire::OutboundMessage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity triple used by the per-row detail and statistics channels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub pair: String,
    pub token: String,
    pub chain: Chain,
}

impl RowKey {
    pub fn new(pair: impl Into<String>, token: impl Into<String>, chain: Chain) -> Self {
        Self {
            pair: pair.into(),
            token: token.into(),
            chain,
        }
    }

    pub fn from_record(record: &TokenRecord) -> Self {
        Self::new(
            record.pair_address.clone(),
            record.token_address.clone(),
            record.chain,
        )
    }

    pub fn canonical(&self) -> String {
        format!("{}|{}|{}", self.pair, self.token, self.chain)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Desired server-push interest: filter scopes, row detail channels, row stats channels.
///
/// Every mutation returns the control messages that bring the server in line with the
/// registry. Repeating a subscribe or an unsubscribe produces no message.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    filters: BTreeMap<String, FilterDescriptor>,
    pairs: BTreeSet<RowKey>,
    pair_stats: BTreeSet<RowKey>,
}

impl SubscriptionRegistry {
    pub fn subscribe_filter(
        &mut self,
        descriptor: &FilterDescriptor,
    ) -> Result<Option<OutboundMessage>, AppError> {
        let key = descriptor.canonical_key()?;
        if self.filters.contains_key(&key) {
            return Ok(None);
        }
        self.filters.insert(key, descriptor.clone());
        Ok(Some(OutboundMessage::ScannerFilter(descriptor.clone())))
    }

    pub fn unsubscribe_filter(
        &mut self,
        descriptor: &FilterDescriptor,
    ) -> Result<Option<OutboundMessage>, AppError> {
        let key = descriptor.canonical_key()?;
        Ok(self
            .filters
            .remove(&key)
            .map(OutboundMessage::UnsubscribeScannerFilter))
    }

    pub fn subscribe_pair(&mut self, key: &RowKey) -> Option<OutboundMessage> {
        self.pairs
            .insert(key.clone())
            .then(|| OutboundMessage::SubscribePair(key.clone()))
    }

    pub fn unsubscribe_pair(&mut self, key: &RowKey) -> Option<OutboundMessage> {
        self.pairs
            .remove(key)
            .then(|| OutboundMessage::UnsubscribePair(key.clone()))
    }

    pub fn subscribe_pair_stats(&mut self, key: &RowKey) -> Option<OutboundMessage> {
        self.pair_stats
            .insert(key.clone())
            .then(|| OutboundMessage::SubscribePairStats(key.clone()))
    }

    pub fn unsubscribe_pair_stats(&mut self, key: &RowKey) -> Option<OutboundMessage> {
        self.pair_stats
            .remove(key)
            .then(|| OutboundMessage::UnsubscribePairStats(key.clone()))
    }

    /// Subscribes both row channels.
    pub fn subscribe_row(&mut self, key: &RowKey) -> Vec<OutboundMessage> {
        [self.subscribe_pair(key), self.subscribe_pair_stats(key)]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn unsubscribe_row(&mut self, key: &RowKey) -> Vec<OutboundMessage> {
        [self.unsubscribe_pair(key), self.unsubscribe_pair_stats(key)]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Converges both row channels onto exactly `desired`.
    pub fn sync_rows(&mut self, desired: &BTreeSet<RowKey>) -> Vec<OutboundMessage> {
        let stale: BTreeSet<RowKey> = self
            .pairs
            .union(&self.pair_stats)
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();

        let mut messages = Vec::new();
        for key in &stale {
            messages.extend(self.unsubscribe_row(key));
        }
        for key in desired {
            messages.extend(self.subscribe_row(key));
        }
        messages
    }

    /// One message per registered entry, in a stable order.
    pub fn replay_messages(&self) -> Vec<OutboundMessage> {
        let filters = self
            .filters
            .values()
            .cloned()
            .map(OutboundMessage::ScannerFilter);
        let pairs = self.pairs.iter().cloned().map(OutboundMessage::SubscribePair);
        let stats = self
            .pair_stats
            .iter()
            .cloned()
            .map(OutboundMessage::SubscribePairStats);
        filters.chain(pairs).chain(stats).collect()
    }

    pub fn has_filter(&self, descriptor: &FilterDescriptor) -> bool {
        descriptor
            .canonical_key()
            .map(|key| self.filters.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn has_pair(&self, key: &RowKey) -> bool {
        self.pairs.contains(key)
    }

    pub fn has_pair_stats(&self, key: &RowKey) -> bool {
        self.pair_stats.contains(key)
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn pair_stats_count(&self) -> usize {
        self.pair_stats.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::filters::ScannerFilters;
    use crate::market::types::{OrderBy, RankBy};

    fn key(pair: &str) -> RowKey {
        RowKey::new(pair, format!("{pair}-token"), Chain::Sol)
    }

    #[test]
    fn builds_pipe_delimited_canonical_key() {
        assert_eq!(key("0xa").canonical(), "0xa|0xa-token|SOL");
    }

    #[test]
    fn row_subscription_is_idempotent() {
        let mut registry = SubscriptionRegistry::default();
        let first = registry.subscribe_row(&key("a"));
        let second = registry.subscribe_row(&key("a"));

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(registry.pair_count(), 1);
        assert_eq!(registry.pair_stats_count(), 1);
    }

    #[test]
    fn channels_are_tracked_independently() {
        let mut registry = SubscriptionRegistry::default();
        assert!(registry.subscribe_pair(&key("a")).is_some());

        assert!(registry.has_pair(&key("a")));
        assert!(!registry.has_pair_stats(&key("a")));
        assert!(registry.unsubscribe_pair_stats(&key("a")).is_none());
    }

    #[test]
    fn separately_built_filters_collapse() {
        let mut registry = SubscriptionRegistry::default();
        let first = ScannerFilters::default().descriptor(RankBy::Volume, OrderBy::Desc, 1);
        let second = ScannerFilters::default().descriptor(RankBy::Volume, OrderBy::Desc, 1);

        assert!(registry.subscribe_filter(&first).expect("serializes").is_some());
        assert!(registry.subscribe_filter(&second).expect("serializes").is_none());
        assert_eq!(registry.filter_count(), 1);

        let removed = registry.unsubscribe_filter(&second).expect("serializes");
        assert!(matches!(removed, Some(OutboundMessage::UnsubscribeScannerFilter(_))));
        assert_eq!(registry.filter_count(), 0);
        assert!(registry.unsubscribe_filter(&first).expect("serializes").is_none());
    }

    #[test]
    fn sync_rows_cancels_both_channels_for_dropped_rows() {
        let mut registry = SubscriptionRegistry::default();
        registry.sync_rows(&[key("a"), key("b")].into_iter().collect());

        let messages = registry.sync_rows(&[key("a"), key("c")].into_iter().collect());

        assert!(messages.contains(&OutboundMessage::UnsubscribePair(key("b"))));
        assert!(messages.contains(&OutboundMessage::UnsubscribePairStats(key("b"))));
        assert!(messages.contains(&OutboundMessage::SubscribePair(key("c"))));
        assert!(messages.contains(&OutboundMessage::SubscribePairStats(key("c"))));
        assert_eq!(messages.len(), 4);
        assert!(!registry.has_pair(&key("b")));
        assert!(registry.has_pair_stats(&key("a")));
    }

    #[test]
    fn sync_rows_repairs_half_subscribed_rows() {
        let mut registry = SubscriptionRegistry::default();
        registry.subscribe_pair(&key("a"));

        let messages = registry.sync_rows(&[key("a")].into_iter().collect());
        assert_eq!(messages, vec![OutboundMessage::SubscribePairStats(key("a"))]);
    }

    #[test]
    fn replays_each_entry_exactly_once() {
        let mut registry = SubscriptionRegistry::default();
        let descriptor = ScannerFilters::default().descriptor(RankBy::Age, OrderBy::Desc, 1);
        registry.subscribe_filter(&descriptor).expect("serializes");
        registry.subscribe_row(&key("a"));
        registry.subscribe_row(&key("a"));

        let replay = registry.replay_messages();
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[0], OutboundMessage::ScannerFilter(descriptor));
        assert_eq!(registry.replay_messages(), replay);
    }
}
