//! Asset dependency graph interface.

use std::collections::{BTreeMap, BTreeSet};

use cadence_core::{AssetKey, PartitionsDefinition};

use crate::error::{EvaluationError, Result};

/// Read access to the asset dependency graph.
pub trait AssetGraph: Send + Sync {
    /// Every asset known to the graph.
    fn asset_keys(&self) -> Vec<AssetKey>;

    /// Direct upstream dependencies of `asset`.
    fn parent_keys(&self, asset: &AssetKey) -> Result<Vec<AssetKey>>;

    /// Partition scheme of `asset`; `None` for unpartitioned assets.
    fn partitions_def(&self, asset: &AssetKey) -> Result<Option<PartitionsDefinition>>;
}

/// Order `assets` so every asset comes after its parents that are also in
/// `assets`. Ties are broken by key order, so the result is deterministic.
pub fn toposort(graph: &dyn AssetGraph, assets: &[AssetKey]) -> Result<Vec<AssetKey>> {
    let wanted: BTreeSet<&AssetKey> = assets.iter().collect();
    let mut pending_parents: BTreeMap<&AssetKey, usize> = BTreeMap::new();
    let mut children: BTreeMap<AssetKey, Vec<&AssetKey>> = BTreeMap::new();

    for asset in &wanted {
        let parents = graph.parent_keys(asset)?;
        let mut count = 0;
        for parent in parents.into_iter().filter(|p| wanted.contains(p)) {
            count += 1;
            children.entry(parent).or_default().push(*asset);
        }
        pending_parents.insert(*asset, count);
    }

    let mut ready: BTreeSet<&AssetKey> = pending_parents
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(k, _)| *k)
        .collect();
    let mut ordered = Vec::with_capacity(wanted.len());

    while let Some(next) = ready.pop_first() {
        ordered.push(next.clone());
        for child in children.get(next).into_iter().flatten() {
            if let Some(n) = pending_parents.get_mut(child) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(*child);
                }
            }
        }
    }

    if ordered.len() != wanted.len() {
        return Err(EvaluationError::Graph(format!(
            "dependency cycle among {} assets",
            wanted.len() - ordered.len()
        )));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAssetGraph;

    #[test]
    fn parents_come_first() {
        let mut graph = InMemoryAssetGraph::default();
        graph.add_asset("c".into(), None, vec!["b".into()]);
        graph.add_asset("b".into(), None, vec!["a".into()]);
        graph.add_asset("a".into(), None, vec![]);

        let order = toposort(&graph, &graph.asset_keys()).unwrap();
        let names: Vec<_> = order.iter().map(|k| k.to_user_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_is_graph_error() {
        let mut graph = InMemoryAssetGraph::default();
        graph.add_asset("a".into(), None, vec!["b".into()]);
        graph.add_asset("b".into(), None, vec!["a".into()]);

        let err = toposort(&graph, &graph.asset_keys()).unwrap_err();
        assert!(matches!(err, EvaluationError::Graph(_)));
    }
}
