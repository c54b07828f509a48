//! Named constructors and the combinator algebra.

use std::ops::{BitAnd, BitOr, Not};
use std::time::Duration;

use super::{AssetSelection, SchedulingCondition};

/// Conjunction of `left` and `right`. Either side that is already an `And`
/// contributes its operands directly, so nesting order does not matter.
pub fn and_of(left: SchedulingCondition, right: SchedulingCondition) -> SchedulingCondition {
    let mut operands = and_operands(left);
    operands.extend(and_operands(right));
    SchedulingCondition::And { operands }
}

/// Disjunction of `left` and `right`, flattened like [`and_of`].
pub fn or_of(left: SchedulingCondition, right: SchedulingCondition) -> SchedulingCondition {
    let mut operands = or_operands(left);
    operands.extend(or_operands(right));
    SchedulingCondition::Or { operands }
}

pub fn not_of(operand: SchedulingCondition) -> SchedulingCondition {
    SchedulingCondition::Not {
        operand: Box::new(operand),
    }
}

/// `And` over an explicit operand list, without flattening.
pub fn all_of(operands: Vec<SchedulingCondition>) -> SchedulingCondition {
    SchedulingCondition::And { operands }
}

/// `Or` over an explicit operand list, without flattening.
pub fn any_of(operands: Vec<SchedulingCondition>) -> SchedulingCondition {
    SchedulingCondition::Or { operands }
}

fn and_operands(c: SchedulingCondition) -> Vec<SchedulingCondition> {
    match c {
        SchedulingCondition::And { operands } => operands,
        other => vec![other],
    }
}

fn or_operands(c: SchedulingCondition) -> Vec<SchedulingCondition> {
    match c {
        SchedulingCondition::Or { operands } => operands,
        other => vec![other],
    }
}

impl BitAnd for SchedulingCondition {
    type Output = SchedulingCondition;

    fn bitand(self, rhs: SchedulingCondition) -> SchedulingCondition {
        and_of(self, rhs)
    }
}

impl BitOr for SchedulingCondition {
    type Output = SchedulingCondition;

    fn bitor(self, rhs: SchedulingCondition) -> SchedulingCondition {
        or_of(self, rhs)
    }
}

impl Not for SchedulingCondition {
    type Output = SchedulingCondition;

    fn not(self) -> SchedulingCondition {
        not_of(self)
    }
}

impl SchedulingCondition {
    pub fn missing() -> Self {
        SchedulingCondition::Missing
    }

    pub fn in_progress() -> Self {
        SchedulingCondition::InProgress
    }

    pub fn failed() -> Self {
        SchedulingCondition::Failed
    }

    pub fn in_latest_time_window(lookback: Option<Duration>) -> Self {
        SchedulingCondition::InLatestTimeWindow { lookback }
    }

    pub fn will_be_requested() -> Self {
        SchedulingCondition::WillBeRequested
    }

    pub fn parent_newer() -> Self {
        SchedulingCondition::ParentNewer
    }

    pub fn newly_updated() -> Self {
        SchedulingCondition::NewlyUpdated
    }

    pub fn newly_requested() -> Self {
        SchedulingCondition::NewlyRequested
    }

    pub fn cron_tick_passed(cron_schedule: &str, cron_timezone: &str) -> Self {
        SchedulingCondition::CronTickPassed {
            cron_schedule: cron_schedule.to_string(),
            cron_timezone: cron_timezone.to_string(),
        }
    }

    pub fn any_deps_match(operand: SchedulingCondition) -> Self {
        SchedulingCondition::AnyDepsMatch {
            operand: Box::new(operand),
            include: None,
            exclude: None,
        }
    }

    pub fn all_deps_match(operand: SchedulingCondition) -> Self {
        SchedulingCondition::AllDepsMatch {
            operand: Box::new(operand),
            include: None,
            exclude: None,
        }
    }

    /// Restrict a dependency fan-out to `selection`. No-op on other kinds.
    pub fn with_include(mut self, selection: AssetSelection) -> Self {
        if let SchedulingCondition::AnyDepsMatch { include, .. }
        | SchedulingCondition::AllDepsMatch { include, .. } = &mut self
        {
            *include = Some(selection);
        }
        self
    }

    /// Skip `selection` in a dependency fan-out. No-op on other kinds.
    pub fn with_exclude(mut self, selection: AssetSelection) -> Self {
        if let SchedulingCondition::AnyDepsMatch { exclude, .. }
        | SchedulingCondition::AllDepsMatch { exclude, .. } = &mut self
        {
            *exclude = Some(selection);
        }
        self
    }

    /// True for partitions where `self` has been true more recently than `reference`.
    pub fn since(self, reference: SchedulingCondition) -> Self {
        SchedulingCondition::Since {
            primary: Box::new(self),
            reference: Box::new(reference),
        }
    }

    pub fn since_last_updated(self) -> Self {
        self.since(SchedulingCondition::newly_updated())
    }

    pub fn since_last_requested(self) -> Self {
        self.since(SchedulingCondition::newly_requested())
    }

    pub fn since_last_cron_tick(self, cron_schedule: &str, cron_timezone: &str) -> Self {
        self.since(SchedulingCondition::cron_tick_passed(cron_schedule, cron_timezone))
    }

    /// Request a partition whenever it is missing or a parent updated, as long
    /// as no parent is missing (unless it is about to be requested) or in progress.
    pub fn eager() -> Self {
        let became_stale = (SchedulingCondition::missing()
            | SchedulingCondition::any_deps_match(
                SchedulingCondition::newly_updated() | SchedulingCondition::will_be_requested(),
            ))
        .since_last_requested();
        let deps_missing = SchedulingCondition::any_deps_match(
            SchedulingCondition::missing() & !SchedulingCondition::will_be_requested(),
        );
        let deps_in_progress =
            SchedulingCondition::any_deps_match(SchedulingCondition::in_progress());

        SchedulingCondition::in_latest_time_window(None)
            & became_stale
            & !deps_missing
            & !deps_in_progress
    }

    /// Request a partition once per cron tick, after every parent has updated
    /// since that tick or will be requested this tick.
    pub fn on_cron(cron_schedule: &str, cron_timezone: &str) -> Self {
        let deps_updated = SchedulingCondition::all_deps_match(
            SchedulingCondition::newly_updated()
                .since_last_cron_tick(cron_schedule, cron_timezone)
                | SchedulingCondition::will_be_requested(),
        );

        SchedulingCondition::in_latest_time_window(None)
            & SchedulingCondition::cron_tick_passed(cron_schedule, cron_timezone)
                .since_last_requested()
            & deps_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves() -> (SchedulingCondition, SchedulingCondition, SchedulingCondition) {
        (
            SchedulingCondition::missing(),
            SchedulingCondition::in_progress(),
            SchedulingCondition::failed(),
        )
    }

    #[test]
    fn and_flattens_both_sides() {
        let (a, b, c) = leaves();
        let left = (a.clone() & b.clone()) & c.clone();
        let right = a.clone() & (b.clone() & c.clone());
        assert_eq!(left, right);
        assert_eq!(left, all_of(vec![a, b, c]));
    }

    #[test]
    fn or_flattens_both_sides() {
        let (a, b, c) = leaves();
        let left = or_of(or_of(a.clone(), b.clone()), c.clone());
        let right = or_of(a.clone(), or_of(b.clone(), c.clone()));
        assert_eq!(left, right);
        assert_eq!(left.children().len(), 3);
    }

    #[test]
    fn mixed_kinds_do_not_flatten() {
        let (a, b, c) = leaves();
        let mixed = (a | b) & c;
        assert_eq!(mixed.children().len(), 2);
        assert_eq!(mixed.children()[0].kind(), "or");
    }

    #[test]
    fn eager_shape() {
        let eager = SchedulingCondition::eager();
        let kinds: Vec<_> = eager.children().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["in_latest_time_window", "since", "not", "not"]);
    }

    #[test]
    fn on_cron_shape() {
        let on_cron = SchedulingCondition::on_cron("0 * * * *", "UTC");
        let kinds: Vec<_> = on_cron.children().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["in_latest_time_window", "since", "all_deps_match"]);
    }

    #[test]
    fn include_is_ignored_on_leaves() {
        let leaf = SchedulingCondition::missing().with_include(AssetSelection::key_prefix("a"));
        assert_eq!(leaf, SchedulingCondition::missing());
    }
}
