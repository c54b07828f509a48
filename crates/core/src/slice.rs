//! Partition subsets of a single asset.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::asset::{AssetKey, AssetPartition, PartitionKey};

/// An ordered set of partitions belonging to one asset.
///
/// All set operations assume both operands refer to the same asset; the
/// asset key of `self` is kept in the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetSlice {
    pub asset_key: AssetKey,
    pub partitions: BTreeSet<PartitionKey>,
}

impl AssetSlice {
    pub fn empty(asset_key: AssetKey) -> Self {
        Self {
            asset_key,
            partitions: BTreeSet::new(),
        }
    }

    pub fn new<I>(asset_key: AssetKey, partitions: I) -> Self
    where
        I: IntoIterator<Item = PartitionKey>,
    {
        Self {
            asset_key,
            partitions: partitions.into_iter().collect(),
        }
    }

    /// The single implicit partition of an unpartitioned asset.
    pub fn unpartitioned(asset_key: AssetKey) -> Self {
        Self::new(asset_key, [PartitionKey::Unpartitioned])
    }

    /// Convenience constructor from named partition keys.
    pub fn from_keys<I, S>(asset_key: AssetKey, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(asset_key, keys.into_iter().map(PartitionKey::key))
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.partitions.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionKey> {
        self.partitions.iter()
    }

    pub fn union(&self, other: &AssetSlice) -> AssetSlice {
        Self {
            asset_key: self.asset_key.clone(),
            partitions: self.partitions.union(&other.partitions).cloned().collect(),
        }
    }

    pub fn intersection(&self, other: &AssetSlice) -> AssetSlice {
        Self {
            asset_key: self.asset_key.clone(),
            partitions: self
                .partitions
                .intersection(&other.partitions)
                .cloned()
                .collect(),
        }
    }

    pub fn difference(&self, other: &AssetSlice) -> AssetSlice {
        Self {
            asset_key: self.asset_key.clone(),
            partitions: self
                .partitions
                .difference(&other.partitions)
                .cloned()
                .collect(),
        }
    }

    /// Keep only partitions matching `predicate`.
    pub fn filter<F>(&self, mut predicate: F) -> AssetSlice
    where
        F: FnMut(&PartitionKey) -> bool,
    {
        Self {
            asset_key: self.asset_key.clone(),
            partitions: self
                .partitions
                .iter()
                .filter(|k| predicate(k))
                .cloned()
                .collect(),
        }
    }

    /// Concrete asset partitions in key order.
    pub fn asset_partitions(&self) -> Vec<AssetPartition> {
        self.partitions
            .iter()
            .map(|k| AssetPartition {
                asset_key: self.asset_key.clone(),
                partition_key: k.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(keys: &[&str]) -> AssetSlice {
        AssetSlice::from_keys("a".into(), keys.iter().copied())
    }

    #[test]
    fn set_operations() {
        let a = slice(&["1", "2", "3"]);
        let b = slice(&["2", "3", "4"]);
        assert_eq!(a.union(&b), slice(&["1", "2", "3", "4"]));
        assert_eq!(a.intersection(&b), slice(&["2", "3"]));
        assert_eq!(a.difference(&b), slice(&["1"]));
    }

    #[test]
    fn filter_keeps_order() {
        let a = slice(&["3", "1", "2"]);
        let odd = a.filter(|k| k.as_str() != Some("2"));
        let keys: Vec<_> = odd.iter().filter_map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["1", "3"]);
    }

    #[test]
    fn unpartitioned_slice_has_one_partition() {
        let s = AssetSlice::unpartitioned("a".into());
        assert_eq!(s.len(), 1);
        assert!(s.contains(&PartitionKey::Unpartitioned));
        assert_eq!(s.asset_partitions()[0].to_string(), "a");
    }
}
