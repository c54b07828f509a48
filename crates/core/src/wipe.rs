//! Partition wipe history.
//!
//! Each asset keeps a list of [`PartitionWipeRecord`]s that is sorted by range
//! start and never overlaps. The list is only ever changed through
//! [`update_partition_wipe_records`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CoreResult;
use crate::partitions::{PartitionKeyRange, PartitionsDefinition};

/// A wipe of a contiguous partition range at `timestamp` (unix seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionWipeRecord {
    pub partition_range: PartitionKeyRange,
    pub timestamp: f64,
}

impl PartitionWipeRecord {
    pub fn new(partition_range: PartitionKeyRange, timestamp: f64) -> Self {
        Self {
            partition_range,
            timestamp,
        }
    }
}

/// Merge `new` into `existing`.
///
/// Existing records overlapping `new` are truncated by subtracting the new
/// range (a record may become zero, one or two records, keeping its timestamp);
/// `new` is inserted where it keeps the list sorted by range start. Runs in a
/// single pass over `existing`.
pub fn update_partition_wipe_records(
    existing: &[PartitionWipeRecord],
    new: PartitionWipeRecord,
    partitions_def: &PartitionsDefinition,
) -> CoreResult<Vec<PartitionWipeRecord>> {
    let new_range = &new.partition_range;
    let mut merged = Vec::with_capacity(existing.len() + 2);
    let mut pending = Some(new.clone());

    for (i, record) in existing.iter().enumerate() {
        let range = &record.partition_range;

        // no more overlap is possible
        if partitions_def.compare_keys(&range.start, &new_range.end)? == Ordering::Greater {
            merged.extend(pending.take());
            merged.extend_from_slice(&existing[i..]);
            return Ok(merged);
        }

        // entirely before the new range
        if partitions_def.compare_keys(&range.end, &new_range.start)? == Ordering::Less {
            merged.push(record.clone());
            continue;
        }

        for piece in partitions_def.subtract_ranges(range, new_range)? {
            let after_new =
                partitions_def.compare_keys(&piece.start, &new_range.start)? == Ordering::Greater;
            if after_new {
                merged.extend(pending.take());
            }
            merged.push(PartitionWipeRecord::new(piece, record.timestamp));
        }
    }

    merged.extend(pending);
    Ok(merged)
}

/// Asset fields that change on non-materialization actions such as wipes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetDetails {
    /// Wipe of the whole asset.
    pub last_wipe_timestamp: Option<f64>,
    #[serde(default)]
    pub last_partition_wipe_timestamps: Vec<PartitionWipeRecord>,
}

impl AssetDetails {
    /// Decode stored details. Empty or malformed input yields `None`.
    pub fn from_db_string(db_string: &str) -> Option<Self> {
        if db_string.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(db_string) {
            Ok(details) => Some(details),
            Err(e) => {
                warn!(error = %e, "discarding malformed asset details");
                None
            }
        }
    }

    pub fn to_db_string(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Effective wipe time for one partition key: the later of the asset-wide
    /// wipe and the range record covering `key`.
    pub fn last_wipe_for(
        &self,
        key: Option<&str>,
        partitions_def: Option<&PartitionsDefinition>,
    ) -> CoreResult<Option<f64>> {
        let mut latest = self.last_wipe_timestamp;
        if let (Some(key), Some(def)) = (key, partitions_def) {
            for record in &self.last_partition_wipe_timestamps {
                if def.range_contains(&record.partition_range, key)? {
                    latest = Some(latest.map_or(record.timestamp, |t| t.max(record.timestamp)));
                    break;
                }
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def() -> PartitionsDefinition {
        PartitionsDefinition::static_keys((1..=20).map(|i| i.to_string()))
    }

    fn rec(start: u32, end: u32, ts: f64) -> PartitionWipeRecord {
        PartitionWipeRecord::new(PartitionKeyRange::new(start.to_string(), end.to_string()), ts)
    }

    fn assert_sorted_non_overlapping(records: &[PartitionWipeRecord]) {
        let d = def();
        for pair in records.windows(2) {
            assert_eq!(
                d.compare_keys(&pair[0].partition_range.end, &pair[1].partition_range.start)
                    .unwrap(),
                Ordering::Less,
                "{:?} overlaps or precedes {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn merge_contained_range_splits_existing() {
        let merged = update_partition_wipe_records(&[rec(1, 5, 10.0)], rec(3, 4, 20.0), &def())
            .unwrap();
        assert_eq!(merged, vec![rec(1, 2, 10.0), rec(3, 4, 20.0), rec(5, 5, 10.0)]);
    }

    #[test]
    fn merge_into_empty() {
        let merged = update_partition_wipe_records(&[], rec(2, 3, 1.0), &def()).unwrap();
        assert_eq!(merged, vec![rec(2, 3, 1.0)]);
    }

    #[test]
    fn merge_disjoint_after_appends() {
        let existing = vec![rec(1, 2, 1.0), rec(4, 5, 2.0)];
        let merged = update_partition_wipe_records(&existing, rec(8, 9, 3.0), &def()).unwrap();
        assert_eq!(merged, vec![rec(1, 2, 1.0), rec(4, 5, 2.0), rec(8, 9, 3.0)]);
    }

    #[test]
    fn merge_disjoint_before_prepends() {
        let existing = vec![rec(4, 5, 2.0)];
        let merged = update_partition_wipe_records(&existing, rec(1, 2, 3.0), &def()).unwrap();
        assert_eq!(merged, vec![rec(1, 2, 3.0), rec(4, 5, 2.0)]);
    }

    #[test]
    fn merge_disjoint_between_keeps_neighbours() {
        let existing = vec![rec(1, 2, 1.0), rec(8, 9, 2.0)];
        let merged = update_partition_wipe_records(&existing, rec(4, 5, 3.0), &def()).unwrap();
        assert_eq!(merged, vec![rec(1, 2, 1.0), rec(4, 5, 3.0), rec(8, 9, 2.0)]);
    }

    #[test]
    fn merge_spanning_several_records() {
        let existing = vec![rec(1, 3, 1.0), rec(5, 6, 2.0), rec(8, 12, 3.0)];
        let merged = update_partition_wipe_records(&existing, rec(2, 9, 4.0), &def()).unwrap();
        assert_eq!(merged, vec![rec(1, 1, 1.0), rec(2, 9, 4.0), rec(10, 12, 3.0)]);
    }

    #[test]
    fn merge_sequence_stays_sorted_and_disjoint() {
        let mut records = Vec::new();
        for (s, e, ts) in [(5, 10, 1.0), (1, 3, 2.0), (8, 15, 3.0), (2, 6, 4.0), (7, 7, 5.0), (1, 20, 6.0), (4, 4, 7.0)] {
            records = update_partition_wipe_records(&records, rec(s, e, ts), &def()).unwrap();
            assert_sorted_non_overlapping(&records);
        }
        assert_eq!(records, vec![rec(1, 3, 6.0), rec(4, 4, 7.0), rec(5, 20, 6.0)]);
    }

    #[test]
    fn merging_same_contained_range_twice_does_not_duplicate() {
        let once = update_partition_wipe_records(&[rec(1, 5, 10.0)], rec(3, 4, 20.0), &def())
            .unwrap();
        let twice = update_partition_wipe_records(&once, rec(3, 4, 30.0), &def()).unwrap();
        assert_eq!(twice, vec![rec(1, 2, 10.0), rec(3, 4, 30.0), rec(5, 5, 10.0)]);
    }

    #[test]
    fn details_decode_malformed_as_none() {
        assert!(AssetDetails::from_db_string("").is_none());
        assert!(AssetDetails::from_db_string("{not json").is_none());
        let details = AssetDetails {
            last_wipe_timestamp: Some(1.0),
            last_partition_wipe_timestamps: vec![rec(1, 2, 3.0)],
        };
        assert_eq!(
            AssetDetails::from_db_string(&details.to_db_string()),
            Some(details)
        );
    }

    #[test]
    fn last_wipe_for_takes_latest_of_asset_and_range() {
        let details = AssetDetails {
            last_wipe_timestamp: Some(5.0),
            last_partition_wipe_timestamps: vec![rec(1, 2, 3.0), rec(3, 4, 9.0)],
        };
        let d = def();
        assert_eq!(details.last_wipe_for(Some("1"), Some(&d)).unwrap(), Some(5.0));
        assert_eq!(details.last_wipe_for(Some("4"), Some(&d)).unwrap(), Some(9.0));
        assert_eq!(details.last_wipe_for(None, None).unwrap(), Some(5.0));
    }
}
