//! Per-tick, read-through view of the asset graph and partition state.
//!
//! Every collaborator answer is cached for the lifetime of the view, so one
//! tick observes one consistent picture of the world even when several
//! condition trees are evaluated against it.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use cadence_core::{AssetDetails, AssetKey, AssetPartition, AssetSlice, PartitionKey, PartitionsDefinition};

use crate::error::Result;
use crate::graph::AssetGraph;
use crate::result::MetadataMap;
use crate::state::{AssetStateReader, PartitionRecord};

/// Memo key of a leaf evaluation: asset, structural key (kind and
/// description) and the node's previous evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct LeafKey {
    pub asset_key: AssetKey,
    pub structure: String,
    pub previous_evaluation: Option<u64>,
}

impl LeafKey {
    pub fn new(asset_key: &AssetKey, kind: &str, description: &str, previous: Option<f64>) -> Self {
        Self {
            asset_key: asset_key.clone(),
            structure: format!("{}:{}", kind, description),
            previous_evaluation: previous.map(f64::to_bits),
        }
    }
}

/// A leaf's answer over the asset's full partition universe.
#[derive(Debug, Clone)]
pub(crate) struct LeafOutcome {
    pub true_slice: AssetSlice,
    pub slices_with_metadata: Vec<(AssetSlice, MetadataMap)>,
}

impl LeafOutcome {
    pub fn plain(true_slice: AssetSlice) -> Self {
        Self {
            true_slice,
            slices_with_metadata: Vec::new(),
        }
    }

    /// Restrict the outcome to `candidate`, dropping annotations left empty.
    pub fn restrict_to(&self, candidate: &AssetSlice) -> LeafOutcome {
        LeafOutcome {
            true_slice: self.true_slice.intersection(candidate),
            slices_with_metadata: self
                .slices_with_metadata
                .iter()
                .map(|(slice, metadata)| (slice.intersection(candidate), metadata.clone()))
                .filter(|(slice, _)| !slice.is_empty())
                .collect(),
        }
    }
}

pub struct AssetGraphView<'a> {
    graph: &'a dyn AssetGraph,
    state: &'a dyn AssetStateReader,
    now: DateTime<Utc>,
    full_slices: Mutex<HashMap<AssetKey, AssetSlice>>,
    partitions_defs: Mutex<HashMap<AssetKey, Option<PartitionsDefinition>>>,
    records: Mutex<HashMap<AssetPartition, PartitionRecord>>,
    details: Mutex<HashMap<AssetKey, Option<AssetDetails>>>,
    leaves: Mutex<HashMap<LeafKey, LeafOutcome>>,
}

impl<'a> AssetGraphView<'a> {
    pub fn new(
        graph: &'a dyn AssetGraph,
        state: &'a dyn AssetStateReader,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            graph,
            state,
            now,
            full_slices: Mutex::new(HashMap::new()),
            partitions_defs: Mutex::new(HashMap::new()),
            records: Mutex::new(HashMap::new()),
            details: Mutex::new(HashMap::new()),
            leaves: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn graph(&self) -> &dyn AssetGraph {
        self.graph
    }

    pub fn parent_keys(&self, asset: &AssetKey) -> Result<Vec<AssetKey>> {
        self.graph.parent_keys(asset)
    }

    pub fn partitions_def(&self, asset: &AssetKey) -> Result<Option<PartitionsDefinition>> {
        cached(&self.partitions_defs, asset.clone(), || {
            self.graph.partitions_def(asset)
        })
    }

    pub fn is_partitioned(&self, asset: &AssetKey) -> Result<bool> {
        Ok(self.partitions_def(asset)?.is_some())
    }

    /// Every partition of `asset` that exists at the view's instant.
    pub fn full_slice(&self, asset: &AssetKey) -> Result<AssetSlice> {
        cached(&self.full_slices, asset.clone(), || {
            match self.partitions_def(asset)? {
                None => Ok(AssetSlice::unpartitioned(asset.clone())),
                Some(def) => Ok(AssetSlice::new(asset.clone(), def.valid_keys_at(self.now)?)),
            }
        })
    }

    pub fn partition_record(
        &self,
        asset: &AssetKey,
        partition: &PartitionKey,
    ) -> Result<PartitionRecord> {
        let key = AssetPartition {
            asset_key: asset.clone(),
            partition_key: partition.clone(),
        };
        cached(&self.records, key, || self.state.partition_record(asset, partition))
    }

    pub fn asset_details(&self, asset: &AssetKey) -> Result<Option<AssetDetails>> {
        cached(&self.details, asset.clone(), || self.state.asset_details(asset))
    }

    /// Map a child slice onto the partitions of `parent` it depends on.
    pub fn map_to_parent(&self, child_slice: &AssetSlice, parent: &AssetKey) -> Result<AssetSlice> {
        self.map_slice(child_slice, parent)
    }

    /// Map a parent slice onto the partitions of `child` that depend on it.
    pub fn map_to_child(&self, parent_slice: &AssetSlice, child: &AssetKey) -> Result<AssetSlice> {
        self.map_slice(parent_slice, child)
    }

    // Partitioned on both sides: identity restricted to the target's keys.
    // Otherwise every source partition depends on every target partition.
    fn map_slice(&self, from: &AssetSlice, to: &AssetKey) -> Result<AssetSlice> {
        let target = self.full_slice(to)?;
        if from.is_empty() {
            return Ok(AssetSlice::empty(to.clone()));
        }
        if self.is_partitioned(&from.asset_key)? && self.is_partitioned(to)? {
            let relabeled = AssetSlice::new(to.clone(), from.iter().cloned());
            Ok(relabeled.intersection(&target))
        } else {
            Ok(target)
        }
    }

    pub(crate) fn cached_leaf<F>(&self, key: LeafKey, compute: F) -> Result<LeafOutcome>
    where
        F: FnOnce() -> Result<LeafOutcome>,
    {
        cached(&self.leaves, key, compute)
    }
}

/// Read-through cache lookup. The lock is not held while computing, so
/// concurrent misses may compute the same value; the first insert wins.
fn cached<K, V, F>(cache: &Mutex<HashMap<K, V>>, key: K, compute: F) -> Result<V>
where
    K: std::hash::Hash + Eq,
    V: Clone,
    F: FnOnce() -> Result<V>,
{
    if let Some(hit) = cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
        return Ok(hit.clone());
    }
    let value = compute()?;
    Ok(cache
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .entry(key)
        .or_insert(value)
        .clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryAssetGraph, InMemoryAssetState};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn graph() -> InMemoryAssetGraph {
        let keys = || Some(PartitionsDefinition::static_keys(["1", "2", "3"]));
        let mut graph = InMemoryAssetGraph::default();
        graph.add_asset("p".into(), keys(), vec![]);
        graph.add_asset("c".into(), keys(), vec!["p".into(), "u".into()]);
        graph.add_asset("u".into(), None, vec![]);
        graph.add_asset("d".into(), None, vec!["p".into()]);
        graph
    }

    #[test]
    fn identity_mapping_between_partitioned_assets() {
        let graph = graph();
        let state = InMemoryAssetState::default();
        let view = AssetGraphView::new(&graph, &state, at("2024-01-01T00:00:00Z"));

        let child = AssetSlice::from_keys("c".into(), ["2"]);
        let mapped = view.map_to_parent(&child, &"p".into()).unwrap();
        assert_eq!(mapped, AssetSlice::from_keys("p".into(), ["2"]));
    }

    #[test]
    fn unpartitioned_parent_fans_out_to_all_children() {
        let graph = graph();
        let state = InMemoryAssetState::default();
        let view = AssetGraphView::new(&graph, &state, at("2024-01-01T00:00:00Z"));

        let child = AssetSlice::from_keys("c".into(), ["2"]);
        let parent = view.map_to_parent(&child, &"u".into()).unwrap();
        assert_eq!(parent, AssetSlice::unpartitioned("u".into()));

        let back = view.map_to_child(&parent, &"c".into()).unwrap();
        assert_eq!(back, AssetSlice::from_keys("c".into(), ["1", "2", "3"]));
    }

    #[test]
    fn unpartitioned_child_depends_on_every_parent_partition() {
        let graph = graph();
        let state = InMemoryAssetState::default();
        let view = AssetGraphView::new(&graph, &state, at("2024-01-01T00:00:00Z"));

        let child = AssetSlice::unpartitioned("d".into());
        let parents = view.map_to_parent(&child, &"p".into()).unwrap();
        assert_eq!(parents.len(), 3);

        let one = AssetSlice::from_keys("p".into(), ["3"]);
        assert_eq!(
            view.map_to_child(&one, &"d".into()).unwrap(),
            AssetSlice::unpartitioned("d".into())
        );
        assert!(view
            .map_to_child(&AssetSlice::empty("p".into()), &"d".into())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn records_are_cached_for_the_tick() {
        let graph = graph();
        let state = InMemoryAssetState::default();
        let view = AssetGraphView::new(&graph, &state, at("2024-01-01T00:00:00Z"));
        let asset = AssetKey::from("p");
        let pk = PartitionKey::key("1");

        assert!(view.partition_record(&asset, &pk).unwrap().last_materialized_at.is_none());
        state.record_materialization(&asset, &pk, 5.0);
        assert!(view.partition_record(&asset, &pk).unwrap().last_materialized_at.is_none());
    }
}
