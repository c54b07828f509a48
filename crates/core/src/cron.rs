//! Cron normalization, tick lookup, and compact duration helpers.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{CadenceError, CoreResult};

/// Backward search windows (hours) used to find the most recent tick.
///
/// The `cron` crate only iterates forward, so we step back from `at` by
/// growing windows until a tick shows up.
const SEARCH_WINDOWS_HOURS: [i64; 5] = [1, 24, 24 * 32, 24 * 367, 24 * 366 * 5];

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires 6 fields: `sec min hour day-of-month month day-of-week`.
/// Users write standard 5-field cron: `min hour day-of-month month day-of-week`.
pub fn normalize_cron(cron_5field: &str) -> String {
    let trimmed = cron_5field.trim();
    let field_count = trimmed.split_whitespace().count();
    if field_count == 5 {
        format!("0 {}", trimmed)
    } else {
        // Already 6-field or non-standard; pass through as-is.
        trimmed.to_string()
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(timezone: &str) -> CoreResult<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| CadenceError::UnknownTimezone(timezone.to_string()))
}

/// A parsed cron schedule bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    pub fn parse(expression: &str, timezone: &str) -> CoreResult<Self> {
        let normalized = normalize_cron(expression);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| CadenceError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
            tz: parse_timezone(timezone)?,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Most recent tick at or before `at`.
    pub fn most_recent_tick(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.last_tick(at, true)
    }

    /// Most recent tick strictly before `at`.
    pub fn previous_tick_before(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.last_tick(at, false)
    }

    /// First tick strictly after `at`.
    pub fn next_tick_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&at.with_timezone(&self.tz))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Ticks in `[from, until]`, in order.
    pub fn ticks_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let start = from.with_timezone(&self.tz) - chrono::Duration::seconds(1);
        self.schedule
            .after(&start)
            .map(|t| t.with_timezone(&Utc))
            .take_while(move |t| *t <= until)
    }

    fn last_tick(&self, at: DateTime<Utc>, inclusive: bool) -> Option<DateTime<Utc>> {
        let at_local = at.with_timezone(&self.tz);
        for hours in SEARCH_WINDOWS_HOURS {
            let from = at_local - chrono::Duration::hours(hours);
            let found = self
                .schedule
                .after(&from)
                .take_while(|t| if inclusive { *t <= at_local } else { *t < at_local })
                .last();
            if let Some(tick) = found {
                return Some(tick.with_timezone(&Utc));
            }
        }
        None
    }
}

/// Compute the most recent tick of `cron_schedule` in `timezone` at or before `at`.
pub fn most_recent_tick(
    cron_schedule: &str,
    timezone: &str,
    at: DateTime<Utc>,
) -> CoreResult<Option<DateTime<Utc>>> {
    Ok(CronSchedule::parse(cron_schedule, timezone)?.most_recent_tick(at))
}

/// Parse a window lookback such as `1d12h` or `90m` into a [`Duration`].
///
/// Units are `d`, `h`, `m` and `s`, in any combination. A bare number is a
/// count of seconds. `None` for empty input, unknown units, or digits left
/// dangling after a unit (`30m15`).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok().map(Duration::from_secs);
    }

    let mut total_secs: u64 = 0;
    let mut digits = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit_secs = match ch {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let count: u64 = digits.parse().ok()?;
        total_secs = total_secs.checked_add(count.checked_mul(unit_secs)?)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total_secs))
}

/// Render a duration in the compact form accepted by [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, size) in [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)] {
        let n = secs / size;
        if n > 0 {
            out.push_str(&format!("{}{}", n, unit));
            secs -= n * size;
        }
    }
    out
}

/// Serde adapter storing an optional [`Duration`] in the compact string form.
pub mod serde_duration_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_duration, parse_duration};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse_duration(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{}'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn normalize_cron_5_to_6_fields() {
        assert_eq!(normalize_cron("*/15 * * * *"), "0 */15 * * * *");
        assert_eq!(normalize_cron("0 6 * * 1-5"), "0 0 6 * * 1-5");
    }

    #[test]
    fn normalize_cron_already_6_fields() {
        assert_eq!(normalize_cron("0 */15 * * * *"), "0 */15 * * * *");
    }

    #[test]
    fn most_recent_daily_tick() {
        let tick = most_recent_tick("0 0 * * *", "UTC", at("2024-03-10T05:30:00Z"))
            .unwrap()
            .unwrap();
        assert_eq!(tick, at("2024-03-10T00:00:00Z"));
    }

    #[test]
    fn most_recent_tick_is_inclusive() {
        let tick = most_recent_tick("0 0 * * *", "UTC", at("2024-03-10T00:00:00Z"))
            .unwrap()
            .unwrap();
        assert_eq!(tick, at("2024-03-10T00:00:00Z"));
    }

    #[test]
    fn previous_tick_is_exclusive() {
        let schedule = CronSchedule::parse("0 0 * * *", "UTC").unwrap();
        let tick = schedule.previous_tick_before(at("2024-03-10T00:00:00Z")).unwrap();
        assert_eq!(tick, at("2024-03-09T00:00:00Z"));
    }

    #[test]
    fn sparse_schedule_found_with_wider_window() {
        // Yearly on Jan 1st.
        let tick = most_recent_tick("0 0 1 1 *", "UTC", at("2024-07-01T00:00:00Z"))
            .unwrap()
            .unwrap();
        assert_eq!(tick, at("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn timezone_shifts_tick() {
        let tick = most_recent_tick("0 0 * * *", "Asia/Manila", at("2024-03-10T05:30:00Z"))
            .unwrap()
            .unwrap();
        // Midnight in Manila is 16:00 UTC the previous day.
        assert_eq!(tick, at("2024-03-09T16:00:00Z"));
    }

    #[test]
    fn invalid_cron_and_timezone_are_errors() {
        assert!(matches!(
            CronSchedule::parse("not a cron", "UTC"),
            Err(CadenceError::InvalidCron { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("0 0 * * *", "Mars/Olympus"),
            Err(CadenceError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn ticks_between_is_inclusive() {
        let schedule = CronSchedule::parse("0 0 * * *", "UTC").unwrap();
        let ticks: Vec<_> = schedule
            .ticks_between(at("2024-01-01T00:00:00Z"), at("2024-01-03T00:00:00Z"))
            .collect();
        assert_eq!(ticks.len(), 3);
    }

    #[test]
    fn parse_duration_components() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1_800)));
        assert_eq!(
            parse_duration("1d2h30m15s"),
            Some(Duration::from_secs(86_400 + 7_200 + 1_800 + 15))
        );
        assert_eq!(parse_duration("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("30m15"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn format_duration_round_trips() {
        for s in ["2d", "1d12h", "48h", "90s", "0s"] {
            let d = parse_duration(s).unwrap();
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
        assert_eq!(format_duration(Duration::from_secs(172_800)), "2d");
    }
}
