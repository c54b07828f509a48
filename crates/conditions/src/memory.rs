//! In-memory collaborators, loadable from a JSON snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use cadence_core::{
    AssetDetails, AssetKey, AssetPartition, PartitionKey, PartitionWipeRecord,
    PartitionsDefinition,
};

use crate::error::{EvaluationError, Result};
use crate::graph::AssetGraph;
use crate::state::{AssetStateReader, PartitionRecord};
use crate::store::WipeHistoryStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<PartitionsDefinition>,
    #[serde(default)]
    pub parents: Vec<AssetKey>,
}

/// A static asset graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryAssetGraph {
    assets: BTreeMap<AssetKey, AssetNode>,
}

impl InMemoryAssetGraph {
    pub fn add_asset(
        &mut self,
        key: AssetKey,
        partitions: Option<PartitionsDefinition>,
        parents: Vec<AssetKey>,
    ) {
        self.assets.insert(
            key,
            AssetNode {
                partitions,
                parents,
            },
        );
    }

    fn node(&self, asset: &AssetKey) -> Result<&AssetNode> {
        self.assets
            .get(asset)
            .ok_or_else(|| EvaluationError::Graph(format!("unknown asset '{}'", asset)))
    }
}

impl AssetGraph for InMemoryAssetGraph {
    fn asset_keys(&self) -> Vec<AssetKey> {
        self.assets.keys().cloned().collect()
    }

    fn parent_keys(&self, asset: &AssetKey) -> Result<Vec<AssetKey>> {
        Ok(self.node(asset)?.parents.clone())
    }

    fn partitions_def(&self, asset: &AssetKey) -> Result<Option<PartitionsDefinition>> {
        Ok(self.node(asset)?.partitions.clone())
    }
}

/// Serializable form of [`InMemoryAssetState`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
    /// Stored [`AssetDetails`] strings per asset.
    #[serde(default)]
    pub asset_details: BTreeMap<AssetKey, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub asset: AssetKey,
    /// `None` for the single partition of an unpartitioned asset.
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(flatten)]
    pub record: PartitionRecord,
}

/// Mutable partition and wipe state.
///
/// Asset details are held in their stored string form and decoded on read,
/// the way a database-backed reader would see them.
#[derive(Debug, Default)]
pub struct InMemoryAssetState {
    records: RwLock<HashMap<AssetPartition, PartitionRecord>>,
    details: RwLock<HashMap<AssetKey, String>>,
}

impl InMemoryAssetState {
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let records = snapshot
            .partitions
            .into_iter()
            .map(|entry| {
                let partition_key = match entry.partition {
                    Some(k) => PartitionKey::Key(k),
                    None => PartitionKey::Unpartitioned,
                };
                (
                    AssetPartition {
                        asset_key: entry.asset,
                        partition_key,
                    },
                    entry.record,
                )
            })
            .collect();
        Self {
            records: RwLock::new(records),
            details: RwLock::new(snapshot.asset_details.into_iter().collect()),
        }
    }

    pub fn set_record(&self, asset: &AssetKey, partition: &PartitionKey, record: PartitionRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(asset_partition(asset, partition), record);
    }

    fn update_record<F>(&self, asset: &AssetKey, partition: &PartitionKey, update: F)
    where
        F: FnOnce(&mut PartitionRecord),
    {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        update(records.entry(asset_partition(asset, partition)).or_default());
    }

    /// Mark a partition materialized at `timestamp`, ending any in-flight run.
    pub fn record_materialization(&self, asset: &AssetKey, partition: &PartitionKey, timestamp: f64) {
        self.update_record(asset, partition, |r| {
            r.last_materialized_at = Some(timestamp);
            r.in_progress = false;
            r.failed = false;
        });
    }

    pub fn record_request(&self, asset: &AssetKey, partition: &PartitionKey, timestamp: f64) {
        self.update_record(asset, partition, |r| r.last_requested_at = Some(timestamp));
    }

    pub fn set_in_progress(&self, asset: &AssetKey, partition: &PartitionKey, in_progress: bool) {
        self.update_record(asset, partition, |r| r.in_progress = in_progress);
    }

    pub fn set_failed(&self, asset: &AssetKey, partition: &PartitionKey, failed: bool) {
        self.update_record(asset, partition, |r| r.failed = failed);
    }

    /// Store a raw details string, exactly as a storage layer would hold it.
    pub fn set_asset_details_string(&self, asset: &AssetKey, db_string: impl Into<String>) {
        self.details
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(asset.clone(), db_string.into());
    }

    /// Record a wipe of the whole asset at `timestamp`.
    pub fn wipe_asset(&self, asset: &AssetKey, timestamp: f64) {
        let mut details = self.decoded_details(asset).unwrap_or_default();
        details.last_wipe_timestamp = Some(timestamp);
        self.set_asset_details_string(asset, details.to_db_string());
    }

    fn decoded_details(&self, asset: &AssetKey) -> Option<AssetDetails> {
        self.details
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(asset)
            .and_then(|s| AssetDetails::from_db_string(s))
    }
}

fn asset_partition(asset: &AssetKey, partition: &PartitionKey) -> AssetPartition {
    AssetPartition {
        asset_key: asset.clone(),
        partition_key: partition.clone(),
    }
}

impl AssetStateReader for InMemoryAssetState {
    fn partition_record(
        &self,
        asset: &AssetKey,
        partition: &PartitionKey,
    ) -> Result<PartitionRecord> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&asset_partition(asset, partition))
            .cloned()
            .unwrap_or_default())
    }

    fn asset_details(&self, asset: &AssetKey) -> Result<Option<AssetDetails>> {
        Ok(self.decoded_details(asset))
    }
}

impl WipeHistoryStore for InMemoryAssetState {
    fn load_wipe_records(&self, asset: &AssetKey) -> Result<Vec<PartitionWipeRecord>> {
        Ok(self
            .decoded_details(asset)
            .map(|d| d.last_partition_wipe_timestamps)
            .unwrap_or_default())
    }

    fn save_wipe_records(
        &self,
        asset: &AssetKey,
        records: Vec<PartitionWipeRecord>,
    ) -> Result<()> {
        let mut details = self.decoded_details(asset).unwrap_or_default();
        details.last_partition_wipe_timestamps = records;
        self.set_asset_details_string(asset, details.to_db_string());
        Ok(())
    }
}

/// Graph plus partition state, as read by the `cadence-eval` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub graph: InMemoryAssetGraph,
    #[serde(default)]
    pub state: StateSnapshot,
}

impl Snapshot {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn into_parts(self) -> (InMemoryAssetGraph, InMemoryAssetState) {
        (self.graph, InMemoryAssetState::from_snapshot(self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT_JSON: &str = r#"{
        "graph": {
            "raw/events": {
                "partitions": {"type": "static", "keys": ["a", "b"]}
            },
            "mart/daily": {"parents": ["raw/events"]}
        },
        "state": {
            "partitions": [
                {"asset": "raw/events", "partition": "a", "last_materialized_at": 10.0},
                {"asset": "mart/daily", "in_progress": true}
            ],
            "asset_details": {"raw/events": "{\"last_wipe_timestamp\": 12.0}"}
        }
    }"#;

    #[test]
    fn snapshot_loads_graph_and_state() {
        let snapshot: Snapshot = serde_json::from_str(SNAPSHOT_JSON).unwrap();
        let (graph, state) = snapshot.into_parts();

        let mart = AssetKey::from("mart/daily");
        let raw = AssetKey::from("raw/events");
        assert_eq!(graph.parent_keys(&mart).unwrap(), vec![raw.clone()]);
        assert!(graph.partitions_def(&mart).unwrap().is_none());

        let record = state.partition_record(&raw, &PartitionKey::key("a")).unwrap();
        assert_eq!(record.last_materialized_at, Some(10.0));
        assert!(state
            .partition_record(&mart, &PartitionKey::Unpartitioned)
            .unwrap()
            .in_progress);
        assert_eq!(
            state.asset_details(&raw).unwrap().unwrap().last_wipe_timestamp,
            Some(12.0)
        );
    }

    #[test]
    fn unknown_asset_is_graph_error() {
        let graph = InMemoryAssetGraph::default();
        let err = graph.parent_keys(&"nope".into()).unwrap_err();
        assert!(matches!(err, EvaluationError::Graph(_)));
    }

    #[test]
    fn malformed_details_read_as_none() {
        let state = InMemoryAssetState::default();
        let asset = AssetKey::from("a");
        state.set_asset_details_string(&asset, "garbage");
        assert!(state.asset_details(&asset).unwrap().is_none());
        assert!(state.load_wipe_records(&asset).unwrap().is_empty());
    }

    #[test]
    fn materialization_clears_run_flags() {
        let state = InMemoryAssetState::default();
        let asset = AssetKey::from("a");
        let pk = PartitionKey::Unpartitioned;
        state.set_in_progress(&asset, &pk, true);
        state.set_failed(&asset, &pk, true);
        state.record_materialization(&asset, &pk, 3.0);
        let record = state.partition_record(&asset, &pk).unwrap();
        assert_eq!(record.last_materialized_at, Some(3.0));
        assert!(!record.in_progress && !record.failed);
    }
}
