//! Boolean combinators and the temporal `Since` operator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use cadence_core::PartitionKey;

use crate::condition::SchedulingCondition;
use crate::context::SchedulingContext;
use crate::error::Result;
use crate::result::SchedulingResult;
use crate::state::timestamp_secs;

use super::operands::event_time;
use super::{Evaluator, Pass};

/// Operand `i` sees the running true slice. Every operand is evaluated, even
/// once the running slice is empty, so the result tree is always complete.
pub(super) fn evaluate_and(
    evaluator: &Evaluator<'_>,
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    operands: &[SchedulingCondition],
) -> Result<SchedulingResult> {
    let mut true_slice = context.candidate_slice().clone();
    let mut child_results = Vec::with_capacity(operands.len());
    for (i, operand) in operands.iter().enumerate() {
        let child = evaluator.evaluate_node(
            pass,
            operand,
            Some(context.unique_id()),
            Some(i),
            true_slice.clone(),
        )?;
        true_slice = true_slice.intersection(&child.true_slice);
        child_results.push(child);
    }
    Ok(SchedulingResult::create_from_children(context, true_slice, child_results))
}

pub(super) fn evaluate_or(
    evaluator: &Evaluator<'_>,
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    operands: &[SchedulingCondition],
) -> Result<SchedulingResult> {
    let mut true_slice = context.empty_slice();
    let mut child_results = Vec::with_capacity(operands.len());
    for (i, operand) in operands.iter().enumerate() {
        let child = evaluator.evaluate_node(
            pass,
            operand,
            Some(context.unique_id()),
            Some(i),
            context.candidate_slice().clone(),
        )?;
        true_slice = true_slice.union(&child.true_slice);
        child_results.push(child);
    }
    let true_slice = true_slice.intersection(context.candidate_slice());
    Ok(SchedulingResult::create_from_children(context, true_slice, child_results))
}

pub(super) fn evaluate_not(
    evaluator: &Evaluator<'_>,
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    operand: &SchedulingCondition,
) -> Result<SchedulingResult> {
    let child = evaluator.evaluate_node(
        pass,
        operand,
        Some(context.unique_id()),
        Some(0),
        context.candidate_slice().clone(),
    )?;
    let true_slice = context.candidate_slice().difference(&child.true_slice);
    Ok(SchedulingResult::create_from_children(context, true_slice, vec![child]))
}

/// When the operands of a `Since` were last true for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SinceEntry {
    partition: PartitionKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_true_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference_true_at: Option<f64>,
}

type SinceTimes = BTreeMap<PartitionKey, (Option<f64>, Option<f64>)>;

fn load_since_times(context: &SchedulingContext<'_>) -> SinceTimes {
    let Some(value) = context.previous_extra_state() else {
        return SinceTimes::new();
    };
    match serde_json::from_value::<Vec<SinceEntry>>(value.clone()) {
        Ok(entries) => entries
            .into_iter()
            .map(|e| (e.partition, (e.primary_true_at, e.reference_true_at)))
            .collect(),
        Err(e) => {
            warn!(condition = %context.unique_id(), error = %e, "discarding malformed since state");
            SinceTimes::new()
        }
    }
}

/// True where `primary` became true strictly after `reference` last did.
/// Both operands see the candidate slice.
///
/// Operands are stamped with the tick they were true on, so `reference` wins
/// when both are true on the same tick. The one exception is a pair of event
/// leaves (materialization, request, cron tick) true together: their event
/// instants are stored instead, which orders a materialization after the cron
/// tick it follows even when both are first seen on one tick.
pub(super) fn evaluate_since(
    evaluator: &Evaluator<'_>,
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    primary: &SchedulingCondition,
    reference: &SchedulingCondition,
) -> Result<SchedulingResult> {
    let candidate = context.candidate_slice();
    let primary_result = evaluator.evaluate_node(
        pass,
        primary,
        Some(context.unique_id()),
        Some(0),
        candidate.clone(),
    )?;
    let reference_result = evaluator.evaluate_node(
        pass,
        reference,
        Some(context.unique_id()),
        Some(1),
        candidate.clone(),
    )?;

    let valid = pass.view.full_slice(context.asset_key())?;
    let mut times = load_since_times(context);
    times.retain(|key, _| valid.contains(key));

    let now = timestamp_secs(context.evaluation_time());
    for key in candidate.iter() {
        let primary_true = primary_result.true_slice.contains(key);
        let reference_true = reference_result.true_slice.contains(key);
        if !primary_true && !reference_true {
            continue;
        }
        let (primary_at, reference_at) = if primary_true && reference_true {
            let asset = context.asset_key();
            match (
                event_time(pass.view, asset, key, primary)?,
                event_time(pass.view, asset, key, reference)?,
            ) {
                (Some(primary_at), Some(reference_at)) => (primary_at, reference_at),
                _ => (now, now),
            }
        } else {
            (now, now)
        };
        let entry = times.entry(key.clone()).or_default();
        if primary_true {
            entry.0 = Some(primary_at);
        }
        if reference_true {
            entry.1 = Some(reference_at);
        }
    }

    let true_slice = candidate.filter(|key| match times.get(key) {
        Some((Some(primary_at), Some(reference_at))) => primary_at > reference_at,
        Some((Some(_), None)) => true,
        _ => false,
    });

    let extra_state = if times.is_empty() {
        None
    } else {
        let entries: Vec<SinceEntry> = times
            .into_iter()
            .map(|(partition, (primary_true_at, reference_true_at))| SinceEntry {
                partition,
                primary_true_at,
                reference_true_at,
            })
            .collect();
        Some(serde_json::to_value(entries)?)
    };

    Ok(SchedulingResult {
        extra_state,
        ..SchedulingResult::create_from_children(
            context,
            true_slice,
            vec![primary_result, reference_result],
        )
    })
}
