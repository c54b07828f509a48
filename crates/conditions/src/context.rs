use chrono::{DateTime, Utc};

use cadence_core::{AssetKey, AssetSlice};

use crate::result::ConditionSnapshot;
use crate::state::{timestamp_secs, Clock};
use crate::store::ConditionCursor;

/// Environment of one node for one tick.
///
/// Holds the node's identity, the candidate slice it may narrow, the instant
/// the tick is evaluated at, and the cursor the node persisted on its
/// previous tick (if any).
pub struct SchedulingContext<'a> {
    snapshot: ConditionSnapshot,
    candidate_slice: AssetSlice,
    evaluation_time: DateTime<Utc>,
    create_time: DateTime<Utc>,
    cursor: Option<ConditionCursor>,
    clock: &'a dyn Clock,
}

impl<'a> SchedulingContext<'a> {
    pub(crate) fn new(
        snapshot: ConditionSnapshot,
        candidate_slice: AssetSlice,
        evaluation_time: DateTime<Utc>,
        cursor: Option<ConditionCursor>,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            snapshot,
            candidate_slice,
            evaluation_time,
            create_time: clock.now(),
            cursor,
            clock,
        }
    }

    pub fn snapshot(&self) -> &ConditionSnapshot {
        &self.snapshot
    }

    pub fn unique_id(&self) -> &str {
        &self.snapshot.unique_id
    }

    pub fn asset_key(&self) -> &AssetKey {
        &self.candidate_slice.asset_key
    }

    pub fn candidate_slice(&self) -> &AssetSlice {
        &self.candidate_slice
    }

    /// The instant the tick is evaluated at.
    pub fn evaluation_time(&self) -> DateTime<Utc> {
        self.evaluation_time
    }

    /// Wall-clock time at which this context was created.
    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn previous_evaluation_timestamp(&self) -> Option<f64> {
        self.cursor.as_ref().map(|c| c.previous_evaluation_timestamp)
    }

    pub fn previous_extra_state(&self) -> Option<&serde_json::Value> {
        self.cursor.as_ref().and_then(|c| c.extra_state.as_ref())
    }

    pub fn empty_slice(&self) -> AssetSlice {
        AssetSlice::empty(self.asset_key().clone())
    }

    pub(crate) fn start_timestamp(&self) -> f64 {
        timestamp_secs(self.create_time)
    }

    pub(crate) fn end_timestamp(&self) -> f64 {
        timestamp_secs(self.clock.now())
    }
}
