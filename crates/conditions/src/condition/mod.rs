//! Immutable condition trees.
//!
//! A [`SchedulingCondition`] is a closed sum of leaf predicates, boolean
//! combinators, the temporal `Since` operator and the dependency fan-out
//! operators. Conditions are plain data: they can be declared in YAML
//! (tagged by `kind`), compared, cloned and hashed into stable unique IDs.

mod builders;
mod selection;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cadence_core::cron::{format_duration, serde_duration_opt, CronSchedule};

use crate::error::{EvaluationError, Result};

pub use self::builders::{all_of, and_of, any_of, not_of, or_of};
pub use self::selection::AssetSelection;

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A node of a declarative scheduling condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulingCondition {
    /// Never materialized, or wiped at or after its last materialization.
    Missing,
    /// Part of a run that has not finished.
    InProgress,
    /// The latest run targeting the partition failed.
    Failed,
    /// Inside the latest closed time window, or within `lookback` of its end.
    InLatestTimeWindow {
        #[serde(default, with = "serde_duration_opt", skip_serializing_if = "Option::is_none")]
        lookback: Option<Duration>,
    },
    /// Already planned for request during the current tick.
    WillBeRequested,
    /// A mapped parent partition was materialized more recently.
    ParentNewer,
    /// Materialized since the previous evaluation of this node.
    NewlyUpdated,
    /// Requested since the previous evaluation of this node.
    NewlyRequested,
    /// A new tick of the cron schedule happened since the previous evaluation.
    CronTickPassed {
        cron_schedule: String,
        #[serde(default = "default_timezone")]
        cron_timezone: String,
    },
    And {
        operands: Vec<SchedulingCondition>,
    },
    Or {
        operands: Vec<SchedulingCondition>,
    },
    Not {
        operand: Box<SchedulingCondition>,
    },
    /// True once `primary` has been true more recently than `reference`.
    Since {
        primary: Box<SchedulingCondition>,
        reference: Box<SchedulingCondition>,
    },
    AnyDepsMatch {
        operand: Box<SchedulingCondition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include: Option<AssetSelection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<AssetSelection>,
    },
    AllDepsMatch {
        operand: Box<SchedulingCondition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include: Option<AssetSelection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude: Option<AssetSelection>,
    },
}

impl SchedulingCondition {
    /// Stable node kind, identical to the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulingCondition::Missing => "missing",
            SchedulingCondition::InProgress => "in_progress",
            SchedulingCondition::Failed => "failed",
            SchedulingCondition::InLatestTimeWindow { .. } => "in_latest_time_window",
            SchedulingCondition::WillBeRequested => "will_be_requested",
            SchedulingCondition::ParentNewer => "parent_newer",
            SchedulingCondition::NewlyUpdated => "newly_updated",
            SchedulingCondition::NewlyRequested => "newly_requested",
            SchedulingCondition::CronTickPassed { .. } => "cron_tick_passed",
            SchedulingCondition::And { .. } => "and",
            SchedulingCondition::Or { .. } => "or",
            SchedulingCondition::Not { .. } => "not",
            SchedulingCondition::Since { .. } => "since",
            SchedulingCondition::AnyDepsMatch { .. } => "any_deps_match",
            SchedulingCondition::AllDepsMatch { .. } => "all_deps_match",
        }
    }

    /// Human-readable description derived from the node's attributes only.
    pub fn description(&self) -> String {
        match self {
            SchedulingCondition::Missing => "Missing".to_string(),
            SchedulingCondition::InProgress => "Part of an in-progress run".to_string(),
            SchedulingCondition::Failed => "Latest run failed".to_string(),
            SchedulingCondition::InLatestTimeWindow { lookback: None } => {
                "Within latest time window".to_string()
            }
            SchedulingCondition::InLatestTimeWindow {
                lookback: Some(lookback),
            } => format!(
                "Within {} of the end of the latest time window",
                format_duration(*lookback)
            ),
            SchedulingCondition::WillBeRequested => "Will be requested this tick".to_string(),
            SchedulingCondition::ParentNewer => "Parent materialized more recently".to_string(),
            SchedulingCondition::NewlyUpdated => "Updated since previous evaluation".to_string(),
            SchedulingCondition::NewlyRequested => {
                "Requested since previous evaluation".to_string()
            }
            SchedulingCondition::CronTickPassed {
                cron_schedule,
                cron_timezone,
            } => format!("New tick of {} ({})", cron_schedule, cron_timezone),
            SchedulingCondition::And { .. } => "All of".to_string(),
            SchedulingCondition::Or { .. } => "Any of".to_string(),
            SchedulingCondition::Not { .. } => "Not".to_string(),
            SchedulingCondition::Since { .. } => "Since".to_string(),
            SchedulingCondition::AnyDepsMatch {
                include, exclude, ..
            } => deps_description("Any upstream partitions", include, exclude),
            SchedulingCondition::AllDepsMatch {
                include, exclude, ..
            } => deps_description("All upstream partitions", include, exclude),
        }
    }

    /// Ordered children.
    pub fn children(&self) -> Vec<&SchedulingCondition> {
        match self {
            SchedulingCondition::And { operands } | SchedulingCondition::Or { operands } => {
                operands.iter().collect()
            }
            SchedulingCondition::Not { operand }
            | SchedulingCondition::AnyDepsMatch { operand, .. }
            | SchedulingCondition::AllDepsMatch { operand, .. } => vec![operand.as_ref()],
            SchedulingCondition::Since { primary, reference } => {
                vec![primary.as_ref(), reference.as_ref()]
            }
            _ => Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }

    /// Deterministic identifier of this node at a position in a tree.
    pub fn unique_id(&self, parent_unique_id: Option<&str>, index: Option<usize>) -> String {
        unique_id_for(parent_unique_id, index, self.kind(), &self.description())
    }

    /// Check the whole tree for configuration errors: combinators with fewer
    /// than two operands, unparseable cron schedules and unknown timezones.
    pub fn validate(&self) -> Result<()> {
        match self {
            SchedulingCondition::And { operands } | SchedulingCondition::Or { operands }
                if operands.len() < 2 =>
            {
                return Err(EvaluationError::Config(format!(
                    "'{}' condition requires at least two operands, got {}",
                    self.kind(),
                    operands.len()
                )));
            }
            SchedulingCondition::CronTickPassed {
                cron_schedule,
                cron_timezone,
            } => {
                CronSchedule::parse(cron_schedule, cron_timezone)?;
            }
            _ => {}
        }
        self.children().into_iter().try_for_each(|c| c.validate())
    }
}

fn deps_description(
    base: &str,
    include: &Option<AssetSelection>,
    exclude: &Option<AssetSelection>,
) -> String {
    let mut out = base.to_string();
    if let Some(sel) = include {
        out.push_str(&format!(" within {}", sel));
    }
    if let Some(sel) = exclude {
        out.push_str(&format!(" excluding {}", sel));
    }
    out
}

/// SHA-256 hex digest of `parent ++ index ++ kind ++ description`, where a
/// missing parent or index renders as `None`.
pub fn unique_id_for(
    parent_unique_id: Option<&str>,
    index: Option<usize>,
    kind: &str,
    description: &str,
) -> String {
    let index = index.map_or_else(|| "None".to_string(), |i| i.to_string());
    let joined = [parent_unique_id.unwrap_or("None"), index.as_str(), kind, description].concat();
    let digest = Sha256::digest(joined.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_is_stable_and_position_sensitive() {
        let c = SchedulingCondition::missing();
        let root = c.unique_id(None, None);
        assert_eq!(root, c.unique_id(None, None));
        assert_eq!(root.len(), 64);
        assert_ne!(c.unique_id(Some(&root), Some(0)), c.unique_id(Some(&root), Some(1)));
    }

    #[test]
    fn unique_id_hashes_literal_none() {
        let expected = format!("{:x}", Sha256::digest("NoneNonemissingMissing".as_bytes()));
        assert_eq!(SchedulingCondition::missing().unique_id(None, None), expected);
    }

    #[test]
    fn description_mentions_lookback_and_selection() {
        let c = SchedulingCondition::in_latest_time_window(Some(Duration::from_secs(2 * 86_400)));
        assert_eq!(c.description(), "Within 2d of the end of the latest time window");

        let deps = SchedulingCondition::any_deps_match(SchedulingCondition::missing())
            .with_include(AssetSelection::key_prefix("raw"));
        assert_eq!(deps.description(), "Any upstream partitions within prefix raw/");
    }

    #[test]
    fn validate_requires_two_operands_per_combinator() {
        let err = all_of(Vec::new()).validate().unwrap_err();
        assert!(err.is_config());
        let nested = not_of(any_of(Vec::new()));
        assert!(nested.validate().unwrap_err().is_config());

        let lone = all_of(vec![SchedulingCondition::missing()]);
        assert!(lone.validate().unwrap_err().is_config());
        let lone = any_of(vec![SchedulingCondition::failed()]);
        assert!(not_of(lone).validate().unwrap_err().is_config());

        let pair = any_of(vec![SchedulingCondition::missing(), SchedulingCondition::failed()]);
        assert!(pair.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_cron_and_timezone() {
        let bad_cron = SchedulingCondition::cron_tick_passed("every day", "UTC");
        assert!(bad_cron.validate().unwrap_err().is_config());
        let bad_tz = SchedulingCondition::cron_tick_passed("0 0 * * *", "Mars/Olympus");
        assert!(bad_tz.validate().unwrap_err().is_config());
        assert!(SchedulingCondition::eager().validate().is_ok());
    }

    #[test]
    fn yaml_round_trip_keeps_structure() {
        let yaml = r#"
kind: and
operands:
  - kind: in_latest_time_window
    lookback: 1d12h
  - kind: since
    primary:
      kind: cron_tick_passed
      cron_schedule: "0 0 * * *"
    reference:
      kind: newly_requested
  - kind: any_deps_match
    operand:
      kind: missing
    exclude:
      keys: [raw/legacy]
"#;
        let parsed: SchedulingCondition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.children().len(), 3);
        assert_eq!(
            parsed.children()[0],
            &SchedulingCondition::in_latest_time_window(Some(Duration::from_secs(129_600)))
        );
        match parsed.children()[1] {
            SchedulingCondition::Since { primary, .. } => match primary.as_ref() {
                SchedulingCondition::CronTickPassed { cron_timezone, .. } => {
                    assert_eq!(cron_timezone, "UTC")
                }
                other => panic!("unexpected primary {:?}", other),
            },
            other => panic!("unexpected node {:?}", other),
        }
        let reparsed: SchedulingCondition =
            serde_yaml::from_str(&serde_yaml::to_string(&parsed).unwrap()).unwrap();
        assert_eq!(reparsed, parsed);
    }
}
