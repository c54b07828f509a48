//! Recursive tick evaluation of condition trees.
//!
//! The evaluator walks a [`SchedulingCondition`] tree once per tick, narrowing
//! the candidate slice at `And` and fan-out nodes, and returns a
//! [`SchedulingResult`] tree of the same shape. Prior per-node state is read
//! from a [`ConditionStateStore`] when a node's context is created; nothing is
//! written until [`Evaluator::commit`] is called for a finished tick.

mod deps;
mod operands;
mod operators;


pub use self::deps::DEP_WRAPPER_KIND;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info};

use cadence_core::config::EvaluatorConfig;
use cadence_core::{AssetKey, AssetSlice};

use crate::condition::SchedulingCondition;
use crate::context::SchedulingContext;
use crate::error::{EvaluationError, Result};
use crate::graph::{toposort, AssetGraph};
use crate::loader::Policy;
use crate::result::{ConditionSnapshot, SchedulingResult};
use crate::state::{timestamp_secs, AssetStateReader, Clock, SystemClock, TickRequests};
use crate::store::{ConditionCursor, ConditionStateStore};
use crate::view::AssetGraphView;

/// Everything one tree evaluation reads: the tick's view, the requests planned
/// so far, and the asset whose cursors the tree owns.
pub(crate) struct Pass<'t> {
    view: &'t AssetGraphView<'t>,
    requests: &'t TickRequests,
    owner: &'t AssetKey,
}

/// Outcome of [`Evaluator::evaluate_policies`].
#[derive(Debug, Clone)]
pub struct PolicyTick {
    /// One result per policy, in evaluation order.
    pub results: Vec<(AssetKey, SchedulingResult)>,
    /// Every partition requested this tick, including the initial requests.
    pub requests: TickRequests,
}

pub struct Evaluator<'a> {
    graph: &'a dyn AssetGraph,
    state: &'a dyn AssetStateReader,
    store: &'a dyn ConditionStateStore,
    clock: Box<dyn Clock>,
    requests: TickRequests,
    worker_threads: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        graph: &'a dyn AssetGraph,
        state: &'a dyn AssetStateReader,
        store: &'a dyn ConditionStateStore,
    ) -> Self {
        Self {
            graph,
            state,
            store,
            clock: Box::new(SystemClock),
            requests: TickRequests::new(),
            worker_threads: 0,
        }
    }

    /// Use `clock` for result start/end timestamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Partitions already planned for request this tick, seen by `WillBeRequested`.
    pub fn with_requests(mut self, requests: TickRequests) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_config(mut self, config: &EvaluatorConfig) -> Self {
        self.worker_threads = config.resolved_worker_threads();
        self
    }

    /// Evaluate `root` for the asset of `universe`, with `universe` as the
    /// initial candidate slice.
    pub fn evaluate(
        &self,
        root: &SchedulingCondition,
        universe: &AssetSlice,
        now: DateTime<Utc>,
    ) -> Result<SchedulingResult> {
        root.validate()?;
        let view = AssetGraphView::new(self.graph, self.state, now);
        let pass = Pass {
            view: &view,
            requests: &self.requests,
            owner: &universe.asset_key,
        };
        let result = self.evaluate_root(&pass, root, universe)?;
        info!(
            asset = %universe.asset_key,
            condition = %result.condition_unique_id,
            candidates = universe.len(),
            requested = result.true_slice.len(),
            "evaluated condition tree"
        );
        Ok(result)
    }

    /// Evaluate independent trees in parallel against one shared view.
    /// Results come back in input order; the first failure aborts the batch.
    pub fn evaluate_many(
        &self,
        trees: &[(SchedulingCondition, AssetSlice)],
        now: DateTime<Utc>,
    ) -> Result<Vec<SchedulingResult>> {
        for (root, _) in trees {
            root.validate()?;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_threads)
            .build()
            .map_err(|e| EvaluationError::ThreadPool(e.to_string()))?;
        let view = AssetGraphView::new(self.graph, self.state, now);

        let results = pool.install(|| {
            trees
                .par_iter()
                .map(|(root, universe)| {
                    let pass = Pass {
                        view: &view,
                        requests: &self.requests,
                        owner: &universe.asset_key,
                    };
                    self.evaluate_root(&pass, root, universe)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        info!(trees = results.len(), threads = pool.current_num_threads(), "evaluated condition trees");
        Ok(results)
    }

    /// Evaluate every policy in dependency order for its asset's full
    /// partition universe. Each asset's true slice is added to the tick's
    /// requests before its children are evaluated.
    ///
    /// The first policy of an asset gets the same node ids as
    /// [`evaluate`](Self::evaluate); the `n`th further policy is rooted at
    /// index `n`, giving every policy its own cursors.
    pub fn evaluate_policies(&self, policies: &[Policy], now: DateTime<Utc>) -> Result<PolicyTick> {
        for policy in policies {
            policy.condition.validate()?;
        }
        let view = AssetGraphView::new(self.graph, self.state, now);
        let mut assets: Vec<AssetKey> = policies.iter().map(|p| p.asset.clone()).collect();
        assets.sort();
        assets.dedup();
        let order = toposort(self.graph, &assets)?;

        let mut requests = self.requests.clone();
        let mut results = Vec::with_capacity(policies.len());
        for asset in &order {
            let universe = view.full_slice(asset)?;
            for (ordinal, policy) in policies.iter().filter(|p| &p.asset == asset).enumerate() {
                let pass = Pass {
                    view: &view,
                    requests: &requests,
                    owner: asset,
                };
                // Later policies on the same asset get their own node ids so
                // their cursors never collide with the first one's.
                let discriminator = (ordinal > 0).then_some(ordinal);
                let result =
                    self.evaluate_node(&pass, &policy.condition, None, discriminator, universe.clone())?;
                requests.insert(&result.true_slice);
                results.push((asset.clone(), result));
            }
        }
        info!(policies = results.len(), assets = order.len(), "evaluated policies");
        Ok(PolicyTick { results, requests })
    }

    /// Persist one cursor per node of `result`, stamped with `now`.
    /// Returns the number of cursors written.
    pub fn commit(&self, result: &SchedulingResult, now: DateTime<Utc>) -> Result<usize> {
        let owner = &result.candidate_subset.asset_key;
        let previous_evaluation_timestamp = timestamp_secs(now);
        let nodes = result.iter_tree();
        for node in &nodes {
            self.store.save_state(
                owner,
                &node.condition_unique_id,
                ConditionCursor {
                    previous_evaluation_timestamp,
                    extra_state: node.extra_state.clone(),
                },
            )?;
        }
        info!(asset = %owner, condition = %result.condition_unique_id, cursors = nodes.len(), "committed condition state");
        Ok(nodes.len())
    }

    /// [`evaluate`](Self::evaluate) then [`commit`](Self::commit). Nothing is
    /// persisted when evaluation fails.
    pub fn evaluate_and_commit(
        &self,
        root: &SchedulingCondition,
        universe: &AssetSlice,
        now: DateTime<Utc>,
    ) -> Result<SchedulingResult> {
        let result = self.evaluate(root, universe, now)?;
        self.commit(&result, now)?;
        Ok(result)
    }

    fn evaluate_root(
        &self,
        pass: &Pass<'_>,
        root: &SchedulingCondition,
        universe: &AssetSlice,
    ) -> Result<SchedulingResult> {
        self.evaluate_node(pass, root, None, None, universe.clone())
    }

    /// Build a context for `snapshot` on `candidate`, loading its cursor.
    fn context<'c>(
        &'c self,
        pass: &Pass<'_>,
        snapshot: ConditionSnapshot,
        candidate: AssetSlice,
    ) -> Result<SchedulingContext<'c>> {
        let cursor = self.store.load_state(pass.owner, &snapshot.unique_id)?;
        Ok(SchedulingContext::new(
            snapshot,
            candidate,
            pass.view.now(),
            cursor,
            self.clock.as_ref(),
        ))
    }

    pub(crate) fn evaluate_node(
        &self,
        pass: &Pass<'_>,
        condition: &SchedulingCondition,
        parent_unique_id: Option<&str>,
        index: Option<usize>,
        candidate: AssetSlice,
    ) -> Result<SchedulingResult> {
        let snapshot = ConditionSnapshot::new(
            condition.kind(),
            condition.description(),
            parent_unique_id,
            index,
        );
        let context = self.context(pass, snapshot, candidate)?;

        let result = match condition {
            SchedulingCondition::And { operands } => {
                operators::evaluate_and(self, pass, &context, operands)
            }
            SchedulingCondition::Or { operands } => {
                operators::evaluate_or(self, pass, &context, operands)
            }
            SchedulingCondition::Not { operand } => {
                operators::evaluate_not(self, pass, &context, operand)
            }
            SchedulingCondition::Since { primary, reference } => {
                operators::evaluate_since(self, pass, &context, primary, reference)
            }
            SchedulingCondition::AnyDepsMatch {
                operand,
                include,
                exclude,
            } => deps::evaluate_deps(
                self,
                pass,
                &context,
                operand,
                include.as_ref(),
                exclude.as_ref(),
                deps::Quantifier::Any,
            ),
            SchedulingCondition::AllDepsMatch {
                operand,
                include,
                exclude,
            } => deps::evaluate_deps(
                self,
                pass,
                &context,
                operand,
                include.as_ref(),
                exclude.as_ref(),
                deps::Quantifier::All,
            ),
            leaf => operands::evaluate_leaf(pass, &context, leaf),
        }?;

        debug!(
            kind = condition.kind(),
            asset = %context.asset_key(),
            candidates = result.candidate_subset.len(),
            true_partitions = result.true_slice.len(),
            "evaluated node"
        );
        Ok(result)
    }
}
