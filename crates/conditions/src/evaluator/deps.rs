//! Dependency fan-out: `AnyDepsMatch` and `AllDepsMatch`.

use rayon::prelude::*;

use cadence_core::AssetKey;

use crate::condition::{AssetSelection, SchedulingCondition};
use crate::context::SchedulingContext;
use crate::error::Result;
use crate::result::{ConditionSnapshot, SchedulingResult};

use super::{Evaluator, Pass};

/// Kind recorded on the per-dependency wrapper results.
pub const DEP_WRAPPER_KIND: &str = "dep_wrapper";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Quantifier {
    Any,
    All,
}

/// Parents of `asset` passing `include` and `exclude`, sorted.
fn dependency_keys(
    parents: Vec<AssetKey>,
    include: Option<&AssetSelection>,
    exclude: Option<&AssetSelection>,
) -> Vec<AssetKey> {
    let mut keys: Vec<AssetKey> = parents
        .into_iter()
        .filter(|k| include.map_or(true, |sel| sel.matches(k)))
        .filter(|k| !exclude.map_or(false, |sel| sel.matches(k)))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Evaluate `operand` once per dependency, in parallel, and reduce the
/// per-dependency answers with `quantifier`. With no dependencies `All` is
/// the whole candidate slice and `Any` is empty.
pub(super) fn evaluate_deps(
    evaluator: &Evaluator<'_>,
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    operand: &SchedulingCondition,
    include: Option<&AssetSelection>,
    exclude: Option<&AssetSelection>,
    quantifier: Quantifier,
) -> Result<SchedulingResult> {
    let deps = dependency_keys(pass.view.parent_keys(context.asset_key())?, include, exclude);

    let wrappers = deps
        .par_iter()
        .enumerate()
        .map(|(i, dep)| evaluate_dep(evaluator, pass, context, operand, i, dep))
        .collect::<Result<Vec<_>>>()?;

    let candidate = context.candidate_slice();
    let true_slice = match quantifier {
        Quantifier::Any => wrappers
            .iter()
            .fold(context.empty_slice(), |acc, w| acc.union(&w.true_slice))
            .intersection(candidate),
        Quantifier::All => wrappers
            .iter()
            .fold(candidate.clone(), |acc, w| acc.intersection(&w.true_slice)),
    };
    Ok(SchedulingResult::create_from_children(context, true_slice, wrappers))
}

/// Wrapper node for one dependency. Its candidate and true slices are in
/// terms of the evaluated asset; its single child runs on the dependency.
fn evaluate_dep(
    evaluator: &Evaluator<'_>,
    pass: &Pass<'_>,
    context: &SchedulingContext<'_>,
    operand: &SchedulingCondition,
    index: usize,
    dep: &AssetKey,
) -> Result<SchedulingResult> {
    let snapshot = ConditionSnapshot::new(
        DEP_WRAPPER_KIND,
        dep.to_user_string(),
        Some(context.unique_id()),
        Some(index),
    );
    let wrapper = evaluator.context(pass, snapshot, context.candidate_slice().clone())?;

    let dep_candidate = pass.view.map_to_parent(context.candidate_slice(), dep)?;
    let child = evaluator.evaluate_node(
        pass,
        operand,
        Some(wrapper.unique_id()),
        Some(0),
        dep_candidate,
    )?;

    let true_slice = pass
        .view
        .map_to_child(&child.true_slice, context.asset_key())?
        .intersection(context.candidate_slice());
    Ok(SchedulingResult::create_from_children(&wrapper, true_slice, vec![child]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_keys_filters_and_sorts() {
        let parents = vec!["raw/b".into(), "mart/x".into(), "raw/a".into(), "raw/a".into()];
        let include = AssetSelection::key_prefix("raw");
        let exclude = AssetSelection::keys(["raw/b"]);

        let keys = dependency_keys(parents, Some(&include), Some(&exclude));
        assert_eq!(keys, vec![AssetKey::from("raw/a")]);
    }
}
