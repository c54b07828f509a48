//! Partition schemes and ordered partition-key range arithmetic.
//!
//! A [`PartitionsDefinition`] fixes which partition keys an asset has at a
//! given instant and how those keys are ordered. Range subtraction is defined
//! in terms of that order, never in terms of string comparison.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::PartitionKey;
use crate::cron::CronSchedule;
use crate::error::{CadenceError, CoreResult};

/// Upper bound on generated time windows, guarding against runaway schedules.
const MAX_TIME_WINDOWS: usize = 100_000;

/// Closed interval `[start, end]` of partition keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    pub start: String,
    pub end: String,
}

impl PartitionKeyRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn single(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            start: key.clone(),
            end: key,
        }
    }
}

impl std::fmt::Display for PartitionKeyRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...{}", self.start, self.end)
    }
}

/// A half-open time window `[start, end)` backing one time partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub key: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Fixed, explicitly ordered set of partition keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPartitions {
    pub keys: Vec<String>,
}

/// Partitions generated from consecutive ticks of a cron schedule.
///
/// Each tick `t_i` at or after `start` opens a window `[t_i, t_{i+1})` whose key
/// is `t_i` formatted with `fmt` in `timezone`. A window only exists once it has
/// closed, i.e. `t_{i+1} <= now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowPartitions {
    pub start: DateTime<Utc>,
    pub cron_schedule: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub fmt: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl TimeWindowPartitions {
    pub fn daily(start: DateTime<Utc>) -> Self {
        Self {
            start,
            cron_schedule: "0 0 * * *".to_string(),
            timezone: default_timezone(),
            fmt: "%Y-%m-%d".to_string(),
        }
    }

    pub fn hourly(start: DateTime<Utc>) -> Self {
        Self {
            start,
            cron_schedule: "0 * * * *".to_string(),
            timezone: default_timezone(),
            fmt: "%Y-%m-%d-%H:%M".to_string(),
        }
    }

    fn schedule(&self) -> CoreResult<CronSchedule> {
        CronSchedule::parse(&self.cron_schedule, &self.timezone)
    }

    fn format_key(&self, schedule: &CronSchedule, t: DateTime<Utc>) -> String {
        t.with_timezone(&schedule.timezone())
            .format(&self.fmt)
            .to_string()
    }

    /// All closed windows as of `now`, oldest first.
    pub fn windows_at(&self, now: DateTime<Utc>) -> CoreResult<Vec<TimeWindow>> {
        let schedule = self.schedule()?;
        let ticks: Vec<DateTime<Utc>> = schedule
            .ticks_between(self.start, now)
            .take(MAX_TIME_WINDOWS + 1)
            .collect();
        Ok(ticks
            .windows(2)
            .map(|pair| TimeWindow {
                key: self.format_key(&schedule, pair[0]),
                start: pair[0],
                end: pair[1],
            })
            .collect())
    }

    /// Start of the window named by `key`.
    pub fn key_start(&self, key: &str) -> CoreResult<DateTime<Utc>> {
        let schedule = self.schedule()?;
        let naive = NaiveDateTime::parse_from_str(key, &self.fmt)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(key, &self.fmt)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .ok_or_else(|| CadenceError::UnknownPartition(key.to_string()))?;
        schedule
            .timezone()
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| CadenceError::UnknownPartition(key.to_string()))
    }

    fn neighbour(&self, key: &str, forward: bool) -> CoreResult<Option<String>> {
        let schedule = self.schedule()?;
        let start = self.key_start(key)?;
        let t = if forward {
            schedule.next_tick_after(start)
        } else {
            schedule.previous_tick_before(start)
        };
        Ok(t
            .filter(|t| *t >= self.start)
            .map(|t| self.format_key(&schedule, t)))
    }
}

/// Partition scheme of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionsDefinition {
    Static(StaticPartitions),
    TimeWindow(TimeWindowPartitions),
}

impl PartitionsDefinition {
    pub fn static_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PartitionsDefinition::Static(StaticPartitions {
            keys: keys.into_iter().map(Into::into).collect(),
        })
    }

    /// Partition keys that exist at `now`, in scheme order.
    pub fn valid_keys_at(&self, now: DateTime<Utc>) -> CoreResult<Vec<PartitionKey>> {
        match self {
            PartitionsDefinition::Static(s) => {
                Ok(s.keys.iter().cloned().map(PartitionKey::Key).collect())
            }
            PartitionsDefinition::TimeWindow(tw) => Ok(tw
                .windows_at(now)?
                .into_iter()
                .map(|w| PartitionKey::Key(w.key))
                .collect()),
        }
    }

    /// Order two keys by their position in the scheme.
    pub fn compare_keys(&self, a: &str, b: &str) -> CoreResult<Ordering> {
        match self {
            PartitionsDefinition::Static(s) => {
                Ok(static_index(s, a)?.cmp(&static_index(s, b)?))
            }
            PartitionsDefinition::TimeWindow(tw) => Ok(tw.key_start(a)?.cmp(&tw.key_start(b)?)),
        }
    }

    /// Whether `key` lies inside the closed `range`.
    pub fn range_contains(&self, range: &PartitionKeyRange, key: &str) -> CoreResult<bool> {
        Ok(self.compare_keys(&range.start, key)? != Ordering::Greater
            && self.compare_keys(key, &range.end)? != Ordering::Greater)
    }

    fn next_key(&self, key: &str) -> CoreResult<Option<String>> {
        match self {
            PartitionsDefinition::Static(s) => Ok(s.keys.get(static_index(s, key)? + 1).cloned()),
            PartitionsDefinition::TimeWindow(tw) => tw.neighbour(key, true),
        }
    }

    fn previous_key(&self, key: &str) -> CoreResult<Option<String>> {
        match self {
            PartitionsDefinition::Static(s) => {
                let idx = static_index(s, key)?;
                Ok(idx.checked_sub(1).and_then(|i| s.keys.get(i).cloned()))
            }
            PartitionsDefinition::TimeWindow(tw) => tw.neighbour(key, false),
        }
    }

    /// Subtract `other` from `range`, returning zero, one, or two ranges in order.
    pub fn subtract_ranges(
        &self,
        range: &PartitionKeyRange,
        other: &PartitionKeyRange,
    ) -> CoreResult<Vec<PartitionKeyRange>> {
        let disjoint = self.compare_keys(&other.end, &range.start)? == Ordering::Less
            || self.compare_keys(&other.start, &range.end)? == Ordering::Greater;
        if disjoint {
            return Ok(vec![range.clone()]);
        }

        let mut pieces = Vec::with_capacity(2);
        if self.compare_keys(&range.start, &other.start)? == Ordering::Less {
            if let Some(before) = self.previous_key(&other.start)? {
                pieces.push(PartitionKeyRange::new(range.start.clone(), before));
            }
        }
        if self.compare_keys(&other.end, &range.end)? == Ordering::Less {
            if let Some(after) = self.next_key(&other.end)? {
                pieces.push(PartitionKeyRange::new(after, range.end.clone()));
            }
        }
        Ok(pieces)
    }
}

fn static_index(s: &StaticPartitions, key: &str) -> CoreResult<usize> {
    s.keys
        .iter()
        .position(|k| k == key)
        .ok_or_else(|| CadenceError::UnknownPartition(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn numbered(n: usize) -> PartitionsDefinition {
        PartitionsDefinition::static_keys((1..=n).map(|i| i.to_string()))
    }

    #[test]
    fn static_order_is_declaration_order() {
        let def = numbered(12);
        // "10" < "9" as strings, but not in scheme order.
        assert_eq!(def.compare_keys("9", "10").unwrap(), Ordering::Less);
    }

    #[test]
    fn subtract_splits_into_two() {
        let def = numbered(5);
        let pieces = def
            .subtract_ranges(&PartitionKeyRange::new("1", "5"), &PartitionKeyRange::new("3", "4"))
            .unwrap();
        assert_eq!(
            pieces,
            vec![PartitionKeyRange::new("1", "2"), PartitionKeyRange::single("5")]
        );
    }

    #[test]
    fn subtract_covering_range_removes_everything() {
        let def = numbered(5);
        let pieces = def
            .subtract_ranges(&PartitionKeyRange::new("2", "3"), &PartitionKeyRange::new("1", "5"))
            .unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn subtract_disjoint_is_identity() {
        let def = numbered(5);
        let range = PartitionKeyRange::new("1", "2");
        let pieces = def
            .subtract_ranges(&range, &PartitionKeyRange::new("4", "5"))
            .unwrap();
        assert_eq!(pieces, vec![range]);
    }

    #[test]
    fn unknown_key_is_error() {
        let def = numbered(3);
        assert!(matches!(
            def.compare_keys("1", "7"),
            Err(CadenceError::UnknownPartition(_))
        ));
    }

    #[test]
    fn daily_windows_only_include_closed_days() {
        let def = TimeWindowPartitions::daily(at("2024-01-01T00:00:00Z"));
        let windows = def.windows_at(at("2024-01-03T12:00:00Z")).unwrap();
        let keys: Vec<_> = windows.iter().map(|w| w.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01-01", "2024-01-02"]);
        assert_eq!(windows[1].end, at("2024-01-03T00:00:00Z"));
    }

    #[test]
    fn time_window_subtract_uses_calendar_neighbours() {
        let def = PartitionsDefinition::TimeWindow(TimeWindowPartitions::daily(at(
            "2024-01-01T00:00:00Z",
        )));
        let pieces = def
            .subtract_ranges(
                &PartitionKeyRange::new("2024-01-01", "2024-01-10"),
                &PartitionKeyRange::new("2024-01-03", "2024-01-05"),
            )
            .unwrap();
        assert_eq!(
            pieces,
            vec![
                PartitionKeyRange::new("2024-01-01", "2024-01-02"),
                PartitionKeyRange::new("2024-01-06", "2024-01-10"),
            ]
        );
    }

    #[test]
    fn hourly_keys_parse_back_to_window_start() {
        let def = TimeWindowPartitions::hourly(at("2024-01-01T00:00:00Z"));
        assert_eq!(
            def.key_start("2024-01-01-05:00").unwrap(),
            at("2024-01-01T05:00:00Z")
        );
    }
}
