//! Leaf predicates.
//!
//! Leaves are computed over the asset's full partition universe, memoized on
//! the tick's view, and then restricted to the node's candidate slice.

use std::collections::BTreeSet;

use tracing::warn;

use cadence_core::cron::most_recent_tick;
use cadence_core::{AssetDetails, AssetKey, AssetSlice, PartitionKey, PartitionsDefinition};

use crate::condition::SchedulingCondition;
use crate::context::SchedulingContext;
use crate::error::{EvaluationError, Result};
use crate::result::{MetadataMap, SchedulingResult};
use crate::state::{timestamp_secs, PartitionRecord};
use crate::view::{AssetGraphView, LeafKey, LeafOutcome};

use super::Pass;

pub(super) fn evaluate_leaf(
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    condition: &SchedulingCondition,
) -> Result<SchedulingResult> {
    // Planned requests change within a tick, so they are never memoized.
    let outcome = if let SchedulingCondition::WillBeRequested = condition {
        LeafOutcome::plain(pass.requests.requested(context.asset_key()))
    } else {
        let key = LeafKey::new(
            context.asset_key(),
            condition.kind(),
            &context.snapshot().description,
            context.previous_evaluation_timestamp(),
        );
        pass.view
            .cached_leaf(key, || compute_leaf(pass.view, context, condition))?
    };

    let outcome = outcome.restrict_to(context.candidate_slice());
    SchedulingResult::create(
        context,
        outcome.true_slice,
        Vec::new(),
        outcome.slices_with_metadata,
        None,
    )
}

fn compute_leaf(
    view: &AssetGraphView<'_>,
    context: &SchedulingContext<'_>,
    condition: &SchedulingCondition,
) -> Result<LeafOutcome> {
    let asset = context.asset_key();
    let full = view.full_slice(asset)?;
    let previous = context.previous_evaluation_timestamp();

    let true_slice = match condition {
        SchedulingCondition::Missing => {
            let details = view.asset_details(asset)?;
            let partitions_def = view.partitions_def(asset)?;
            select(view, &full, |key, record| {
                Ok(match record.last_materialized_at {
                    None => true,
                    Some(materialized) => {
                        last_wipe(details.as_ref(), key, partitions_def.as_ref(), asset)
                            .map_or(false, |wiped| wiped >= materialized)
                    }
                })
            })?
        }
        SchedulingCondition::InProgress => select(view, &full, |_, r| Ok(r.in_progress))?,
        SchedulingCondition::Failed => select(view, &full, |_, r| Ok(r.failed))?,
        SchedulingCondition::NewlyUpdated => select(view, &full, |_, r| {
            Ok(match (r.last_materialized_at, previous) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(materialized), Some(prev)) => materialized > prev,
            })
        })?,
        SchedulingCondition::NewlyRequested => select(view, &full, |_, r| {
            Ok(match (r.last_requested_at, previous) {
                (Some(requested), Some(prev)) => requested >= prev,
                _ => false,
            })
        })?,
        SchedulingCondition::CronTickPassed {
            cron_schedule,
            cron_timezone,
        } => {
            let tick = most_recent_tick(cron_schedule, cron_timezone, view.now())?;
            let passed = match (tick, previous) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(tick), Some(prev)) => timestamp_secs(tick) > prev,
            };
            if passed {
                full
            } else {
                AssetSlice::empty(asset.clone())
            }
        }
        SchedulingCondition::InLatestTimeWindow { lookback } => {
            latest_time_window(view, asset, full, *lookback)?
        }
        SchedulingCondition::ParentNewer => return parent_newer(view, asset, &full),
        SchedulingCondition::WillBeRequested => {
            return Err(EvaluationError::Config(
                "will_be_requested is resolved from tick requests".to_string(),
            ))
        }
        other => {
            return Err(EvaluationError::Config(format!(
                "'{}' is not a leaf condition",
                other.kind()
            )))
        }
    };
    Ok(LeafOutcome::plain(true_slice))
}

/// When an event leaf last fired for one partition: the materialization for
/// `NewlyUpdated`, the request for `NewlyRequested`, the latest tick for
/// `CronTickPassed`. `None` for every other condition.
pub(super) fn event_time(
    view: &AssetGraphView<'_>,
    asset: &AssetKey,
    key: &PartitionKey,
    condition: &SchedulingCondition,
) -> Result<Option<f64>> {
    Ok(match condition {
        SchedulingCondition::NewlyUpdated => view.partition_record(asset, key)?.last_materialized_at,
        SchedulingCondition::NewlyRequested => view.partition_record(asset, key)?.last_requested_at,
        SchedulingCondition::CronTickPassed {
            cron_schedule,
            cron_timezone,
        } => most_recent_tick(cron_schedule, cron_timezone, view.now())?.map(timestamp_secs),
        _ => None,
    })
}

/// Partitions of `slice` whose record satisfies `keep`.
fn select<F>(view: &AssetGraphView<'_>, slice: &AssetSlice, mut keep: F) -> Result<AssetSlice>
where
    F: FnMut(&PartitionKey, &PartitionRecord) -> Result<bool>,
{
    let mut kept = Vec::new();
    for key in slice.iter() {
        let record = view.partition_record(&slice.asset_key, key)?;
        if keep(key, &record)? {
            kept.push(key.clone());
        }
    }
    Ok(AssetSlice::new(slice.asset_key.clone(), kept))
}

/// Effective wipe time of one partition. Wipe history that does not fit the
/// current partition scheme falls back to the asset-wide wipe.
fn last_wipe(
    details: Option<&AssetDetails>,
    key: &PartitionKey,
    partitions_def: Option<&PartitionsDefinition>,
    asset: &AssetKey,
) -> Option<f64> {
    let details = details?;
    match details.last_wipe_for(key.as_str(), partitions_def) {
        Ok(wiped) => wiped,
        Err(e) => {
            warn!(asset = %asset, partition = %key, error = %e, "ignoring unreadable partition wipe history");
            details.last_wipe_timestamp
        }
    }
}

fn latest_time_window(
    view: &AssetGraphView<'_>,
    asset: &AssetKey,
    full: AssetSlice,
    lookback: Option<std::time::Duration>,
) -> Result<AssetSlice> {
    let time_windows = match view.partitions_def(asset)? {
        Some(PartitionsDefinition::TimeWindow(tw)) => tw,
        _ => return Ok(full),
    };
    let windows = time_windows.windows_at(view.now())?;
    let Some(latest) = windows.last() else {
        return Ok(AssetSlice::empty(asset.clone()));
    };

    let keys: Vec<String> = match lookback {
        None => vec![latest.key.clone()],
        Some(lookback) => {
            let lookback = chrono::Duration::from_std(lookback)
                .map_err(|e| EvaluationError::Config(format!("lookback out of range: {}", e)))?;
            let cutoff = latest.end - lookback;
            windows
                .iter()
                .filter(|w| w.end > cutoff || w.key == latest.key)
                .map(|w| w.key.clone())
                .collect()
        }
    };
    Ok(AssetSlice::from_keys(asset.clone(), keys))
}

/// Partitions with a mapped parent partition materialized more recently than
/// themselves; one annotation per newer parent asset.
fn parent_newer(
    view: &AssetGraphView<'_>,
    asset: &AssetKey,
    full: &AssetSlice,
) -> Result<LeafOutcome> {
    let mut parents = view.parent_keys(asset)?;
    parents.sort();

    let mut all_newer = BTreeSet::new();
    let mut slices_with_metadata = Vec::new();
    for parent in &parents {
        let mut newer = Vec::new();
        for key in full.iter() {
            let own = view.partition_record(asset, key)?.last_materialized_at;
            let single = AssetSlice::new(asset.clone(), [key.clone()]);
            let mapped = view.map_to_parent(&single, parent)?;
            for parent_key in mapped.iter() {
                let parent_materialized = view.partition_record(parent, parent_key)?.last_materialized_at;
                let is_newer = match (parent_materialized, own) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(p), Some(c)) => p > c,
                };
                if is_newer {
                    newer.push(key.clone());
                    break;
                }
            }
        }
        if !newer.is_empty() {
            all_newer.extend(newer.iter().cloned());
            let mut metadata = MetadataMap::new();
            metadata.insert(
                "parent".to_string(),
                serde_json::Value::String(parent.to_user_string()),
            );
            slices_with_metadata.push((AssetSlice::new(asset.clone(), newer), metadata));
        }
    }

    Ok(LeafOutcome {
        true_slice: AssetSlice::new(asset.clone(), all_newer),
        slices_with_metadata,
    })
}
