//! Immutable per-node evaluation results and their durable envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cadence_core::AssetSlice;

use crate::condition::unique_id_for;
use crate::context::SchedulingContext;
use crate::error::{EvaluationError, Result};

/// Current [`EvaluationRecord`] format version.
pub const EVALUATION_RECORD_VERSION: u32 = 1;

pub type MetadataMap = BTreeMap<String, serde_json::Value>;

/// Identity of the node a result was produced for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSnapshot {
    pub kind: String,
    pub description: String,
    pub unique_id: String,
}

impl ConditionSnapshot {
    pub fn new(
        kind: &str,
        description: String,
        parent_unique_id: Option<&str>,
        index: Option<usize>,
    ) -> Self {
        Self {
            unique_id: unique_id_for(parent_unique_id, index, kind, &description),
            kind: kind.to_string(),
            description,
        }
    }
}

/// Annotation attached to a subset of the evaluated partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSubsetWithMetadata {
    pub subset: AssetSlice,
    pub metadata: MetadataMap,
}

/// Outcome of evaluating one node for one tick. The tree of results mirrors
/// the condition tree, plus one wrapper node per dependency under fan-outs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub condition: ConditionSnapshot,
    pub condition_unique_id: String,
    pub start_timestamp: f64,
    pub end_timestamp: f64,
    pub true_slice: AssetSlice,
    pub candidate_subset: AssetSlice,
    #[serde(default)]
    pub subsets_with_metadata: Vec<AssetSubsetWithMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_state: Option<serde_json::Value>,
    #[serde(default)]
    pub child_results: Vec<SchedulingResult>,
}

impl SchedulingResult {
    /// Result of a combinator, built from its children's results.
    pub fn create_from_children(
        context: &SchedulingContext<'_>,
        true_slice: AssetSlice,
        child_results: Vec<SchedulingResult>,
    ) -> Self {
        Self {
            condition: context.snapshot().clone(),
            condition_unique_id: context.unique_id().to_string(),
            start_timestamp: context.start_timestamp(),
            end_timestamp: context.end_timestamp(),
            true_slice,
            candidate_subset: context.candidate_slice().clone(),
            subsets_with_metadata: Vec::new(),
            extra_state: None,
            child_results,
        }
    }

    /// Result of a node without children. At most one of
    /// `subsets_with_metadata` and `slices_with_metadata` may be non-empty.
    pub fn create(
        context: &SchedulingContext<'_>,
        true_slice: AssetSlice,
        subsets_with_metadata: Vec<AssetSubsetWithMetadata>,
        slices_with_metadata: Vec<(AssetSlice, MetadataMap)>,
        extra_state: Option<serde_json::Value>,
    ) -> Result<Self> {
        if !subsets_with_metadata.is_empty() && !slices_with_metadata.is_empty() {
            return Err(EvaluationError::Config(
                "cannot provide both subsets_with_metadata and slices_with_metadata".to_string(),
            ));
        }
        let subsets_with_metadata = if slices_with_metadata.is_empty() {
            subsets_with_metadata
        } else {
            slices_with_metadata
                .into_iter()
                .map(|(subset, metadata)| AssetSubsetWithMetadata { subset, metadata })
                .collect()
        };
        Ok(Self {
            condition: context.snapshot().clone(),
            condition_unique_id: context.unique_id().to_string(),
            start_timestamp: context.start_timestamp(),
            end_timestamp: context.end_timestamp(),
            true_slice,
            candidate_subset: context.candidate_slice().clone(),
            subsets_with_metadata,
            extra_state,
            child_results: Vec::new(),
        })
    }

    /// This result and all descendants, depth-first pre-order.
    pub fn iter_tree(&self) -> Vec<&SchedulingResult> {
        let mut out = vec![self];
        for child in &self.child_results {
            out.extend(child.iter_tree());
        }
        out
    }

    pub fn to_record(&self) -> EvaluationRecord {
        EvaluationRecord {
            version: EVALUATION_RECORD_VERSION,
            condition_unique_id: self.condition_unique_id.clone(),
            result: self.clone(),
        }
    }
}

/// Versioned, durable form of a result tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub version: u32,
    pub condition_unique_id: String,
    pub result: SchedulingResult,
}

impl EvaluationRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let record: EvaluationRecord = serde_json::from_str(json)?;
        if record.version != EVALUATION_RECORD_VERSION {
            return Err(EvaluationError::Store(format!(
                "unsupported evaluation record version {}",
                record.version
            )));
        }
        Ok(record)
    }
}
