//! Cross-tick persistence: per-condition cursors and wipe history.
//!
//! Cursors follow a load → use → replace lifecycle keyed by the evaluated
//! asset and the condition's unique ID. A cursor that cannot be decoded is treated as absent, so the
//! affected node starts cold instead of failing the tick.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cadence_core::{
    update_partition_wipe_records, AssetKey, PartitionKeyRange, PartitionWipeRecord,
    PartitionsDefinition,
};

use crate::error::{EvaluationError, Result};

/// State persisted for one condition node between ticks.
///
/// Cursors are stored per `(asset, unique_id)`: the asset is the one the
/// tree was evaluated for, so the same tree attached to two assets keeps
/// separate histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionCursor {
    /// Unix seconds of the tick that produced this cursor.
    pub previous_evaluation_timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_state: Option<serde_json::Value>,
}

/// Storage for [`ConditionCursor`]s. Implementations serialize access per ID.
pub trait ConditionStateStore: Send + Sync {
    fn load_state(&self, asset: &AssetKey, unique_id: &str) -> Result<Option<ConditionCursor>>;

    fn save_state(&self, asset: &AssetKey, unique_id: &str, cursor: ConditionCursor)
        -> Result<()>;
}

/// Storage for per-asset partition wipe history.
pub trait WipeHistoryStore: Send + Sync {
    fn load_wipe_records(&self, asset: &AssetKey) -> Result<Vec<PartitionWipeRecord>>;

    fn save_wipe_records(&self, asset: &AssetKey, records: Vec<PartitionWipeRecord>)
        -> Result<()>;
}

/// Record a wipe of `range` at `timestamp`, merging it into the stored history.
pub fn record_partition_wipe(
    store: &dyn WipeHistoryStore,
    asset: &AssetKey,
    partitions_def: &PartitionsDefinition,
    range: PartitionKeyRange,
    timestamp: f64,
) -> Result<Vec<PartitionWipeRecord>> {
    let existing = store.load_wipe_records(asset)?;
    let merged = update_partition_wipe_records(
        &existing,
        PartitionWipeRecord::new(range.clone(), timestamp),
        partitions_def,
    )?;
    store.save_wipe_records(asset, merged.clone())?;
    info!(asset = %asset, range = %range, records = merged.len(), "recorded partition wipe");
    Ok(merged)
}

// ── In-memory ───────────────────────────────────────────────────────

/// Process-local cursor store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    cursors: RwLock<HashMap<(AssetKey, String), ConditionCursor>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cursors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConditionStateStore for InMemoryStateStore {
    fn load_state(&self, asset: &AssetKey, unique_id: &str) -> Result<Option<ConditionCursor>> {
        Ok(self
            .cursors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(asset.clone(), unique_id.to_string()))
            .cloned())
    }

    fn save_state(&self, asset: &AssetKey, unique_id: &str, cursor: ConditionCursor) -> Result<()> {
        self.cursors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((asset.clone(), unique_id.to_string()), cursor);
        Ok(())
    }
}

// ── File-backed ─────────────────────────────────────────────────────

/// One JSON file per condition under `<dir>/<asset path>/<unique_id>.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cursor_path(&self, asset: &AssetKey, unique_id: &str) -> Result<PathBuf> {
        let mut path = self.dir.clone();
        for segment in asset.path().iter().map(String::as_str).chain([unique_id]) {
            if segment.is_empty() || segment.starts_with('.') || segment.contains(['/', '\\']) {
                return Err(EvaluationError::Store(format!(
                    "invalid cursor path segment '{}' for {}",
                    segment, asset
                )));
            }
            path.push(segment);
        }
        path.set_extension("json");
        Ok(path)
    }
}

impl ConditionStateStore for FileStateStore {
    fn load_state(&self, asset: &AssetKey, unique_id: &str) -> Result<Option<ConditionCursor>> {
        let path = self.cursor_path(asset, unique_id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(cursor) => Ok(Some(cursor)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding malformed condition cursor");
                Ok(None)
            }
        }
    }

    fn save_state(&self, asset: &AssetKey, unique_id: &str, cursor: ConditionCursor) -> Result<()> {
        let path = self.cursor_path(asset, unique_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&cursor)?)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "saved condition cursor");
        Ok(())
    }
}
