//! Per-tick inputs: partition state, planned requests and the clock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::{AssetDetails, AssetKey, AssetSlice, PartitionKey};

use crate::error::Result;

/// Observed state of one asset partition. Timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    #[serde(default)]
    pub last_materialized_at: Option<f64>,
    #[serde(default)]
    pub last_requested_at: Option<f64>,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub failed: bool,
}

/// Read access to materialization, request, run and wipe state.
pub trait AssetStateReader: Send + Sync {
    fn partition_record(&self, asset: &AssetKey, partition: &PartitionKey)
        -> Result<PartitionRecord>;

    /// Wipe details of `asset`, if any were ever recorded.
    fn asset_details(&self, asset: &AssetKey) -> Result<Option<AssetDetails>>;
}

/// Partitions already planned for request during the current tick.
#[derive(Debug, Clone, Default)]
pub struct TickRequests {
    by_asset: BTreeMap<AssetKey, BTreeSet<PartitionKey>>,
}

impl TickRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slice: &AssetSlice) {
        if slice.is_empty() {
            return;
        }
        self.by_asset
            .entry(slice.asset_key.clone())
            .or_default()
            .extend(slice.iter().cloned());
    }

    pub fn requested(&self, asset: &AssetKey) -> AssetSlice {
        match self.by_asset.get(asset) {
            Some(keys) => AssetSlice::new(asset.clone(), keys.iter().cloned()),
            None => AssetSlice::empty(asset.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_asset.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AssetSlice> + '_ {
        self.by_asset
            .iter()
            .map(|(k, keys)| AssetSlice::new(k.clone(), keys.iter().cloned()))
    }
}

/// Source of wall-clock time for result timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Unix seconds with millisecond precision.
pub fn timestamp_secs(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_requests_accumulate_per_asset() {
        let mut requests = TickRequests::new();
        requests.insert(&AssetSlice::from_keys("a".into(), ["1"]));
        requests.insert(&AssetSlice::from_keys("a".into(), ["2"]));
        requests.insert(&AssetSlice::empty("b".into()));

        assert_eq!(
            requests.requested(&"a".into()),
            AssetSlice::from_keys("a".into(), ["1", "2"])
        );
        assert!(requests.requested(&"b".into()).is_empty());
        assert_eq!(requests.iter().count(), 1);
    }

    #[test]
    fn timestamp_keeps_millis() {
        let t = DateTime::parse_from_rfc3339("2024-01-01T00:00:01.500Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp_secs(t), 1_704_067_201.5);
    }
}
