//! Declarative scheduling conditions.
//!
//! This crate provides:
//! - Condition trees (leaf predicates, AND/OR/NOT, `Since`, dependency fan-out)
//!   with stable unique IDs and a YAML representation
//! - A per-tick evaluator producing result trees, with cross-tick state threading
//! - Collaborator traits for the asset graph, partition state and persistence,
//!   plus in-memory and file-backed implementations
//! - A filesystem loader for YAML policy documents

pub mod condition;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod loader;
pub mod memory;
pub mod result;
pub mod state;
pub mod store;
pub mod view;

pub use condition::{all_of, and_of, any_of, not_of, or_of, AssetSelection, SchedulingCondition};
pub use error::{EvaluationError, Result};
pub use evaluator::{Evaluator, PolicyTick};
pub use graph::AssetGraph;
pub use loader::{LoadResult, LoadStatus, Policy, PolicyDocument, PolicyLoader};
pub use result::{AssetSubsetWithMetadata, EvaluationRecord, SchedulingResult};
pub use state::{AssetStateReader, Clock, FixedClock, PartitionRecord, SystemClock, TickRequests};
pub use store::{
    record_partition_wipe, ConditionCursor, ConditionStateStore, FileStateStore,
    InMemoryStateStore, WipeHistoryStore,
};
