//! Cron parsing, next-run computation and display classification.
//!
//! Expressions use the standard five fields (minute, hour, day-of-month,
//! month, day-of-week) evaluated in UTC, with `0` and `7` both meaning
//! Sunday. When day-of-month and day-of-week are both restricted a time
//! matches if either does.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The stored value meaning "manual trigger only".
pub const UNSET: &str = "unset";

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A recurrence, or the absence of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronSchedule {
    /// Never fires on its own.
    Unset,
    Cron(CronExpression),
}

impl CronSchedule {
    /// Parses a stored cron value; `None`, empty and `"unset"` mean no schedule.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidCronExpression` for anything that is not
    /// a valid five-field expression.
    pub fn parse(expression: Option<&str>) -> Result<Self, ScheduleError> {
        match expression.map(str::trim) {
            None => Ok(Self::Unset),
            Some(s) if s.is_empty() || s.eq_ignore_ascii_case(UNSET) => Ok(Self::Unset),
            Some(s) => CronExpression::parse(s).map(Self::Cron),
        }
    }

    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// The expression as written, if any.
    #[must_use]
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::Cron(cron) => Some(cron.as_str()),
        }
    }

    /// The first run strictly after `after`; `None` when unset.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Unset => None,
            Self::Cron(cron) => cron.next_after(after),
        }
    }

    /// Presentation form of the schedule.
    #[must_use]
    pub fn display(&self) -> DisplaySchedule {
        match self {
            Self::Unset => DisplaySchedule::unset(),
            Self::Cron(cron) => cron.display(),
        }
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(Some(s))
    }
}

/// A validated five-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    expression: String,
    /// minute, hour, day-of-month, month, day-of-week
    fields: [String; 5],
    /// One schedule, or two when day-of-month and day-of-week are both restricted.
    schedules: Vec<cron::Schedule>,
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for CronExpression {}

fn expand_alias(expression: &str) -> Option<&'static str> {
    match expression.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

impl CronExpression {
    /// Parses a five-field expression or one of the `@daily`-style aliases.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError::InvalidCronExpression` naming the problem.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expanded = expand_alias(expression).unwrap_or(expression);
        let parts: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts.as_slice() else {
            return Err(ScheduleError::invalid(
                expression,
                format!("expected 5 fields, got {}", parts.len()),
            ));
        };

        let weekdays = translate_day_of_week(dow)
            .map_err(|reason| ScheduleError::invalid(expression, reason))?;

        let sources = if *dom != "*" && *dow != "*" {
            vec![
                format!("0 {minute} {hour} {dom} {month} *"),
                format!("0 {minute} {hour} * {month} {weekdays}"),
            ]
        } else {
            vec![format!("0 {minute} {hour} {dom} {month} {weekdays}")]
        };

        let schedules = sources
            .iter()
            .map(|s| cron::Schedule::from_str(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ScheduleError::invalid(expression, e.to_string()))?;

        Ok(Self {
            expression: expression.trim().to_string(),
            fields: [
                (*minute).to_string(),
                (*hour).to_string(),
                (*dom).to_string(),
                (*month).to_string(),
                (*dow).to_string(),
            ],
            schedules,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// The first matching minute strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }

    /// Classifies the schedule and normalizes wildcard day fields for display.
    #[must_use]
    pub fn display(&self) -> DisplaySchedule {
        let [minute, hour, dom, month, dow] = &self.fields;
        let interval = if dom == "1" && month == "1" {
            Interval::Yearly
        } else if dow != "*" && dom == "*" {
            Interval::Weekly
        } else if dom != "*" && dow == "*" {
            Interval::Monthly
        } else {
            Interval::Daily
        };

        DisplaySchedule {
            interval,
            minute: minute.clone(),
            hour: hour.clone(),
            day_of_month: if dom == "*" { "1".to_string() } else { dom.clone() },
            month: month.clone(),
            day_of_week: if dow == "*" { "0".to_string() } else { dow.clone() },
        }
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn weekday(token: &str) -> Result<usize, String> {
    if let Ok(n) = token.parse::<usize>() {
        return match n {
            0..=6 => Ok(n),
            7 => Ok(0),
            _ => Err(format!("day-of-week {n} out of range 0-7")),
        };
    }
    WEEKDAYS
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day-of-week '{token}'"))
}

/// Rewrites a standard day-of-week field as explicit day names.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" {
        return Ok("*".to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}'"))?;
                if step == 0 {
                    return Err("step must be at least 1".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo = weekday(lo)?;
            // 7 closes a range ending on Sunday.
            let hi = if hi == "7" { 7 } else { weekday(hi)? };
            if lo > hi {
                return Err(format!("day-of-week range '{range}' is reversed"));
            }
            (lo, hi)
        } else {
            let day = weekday(range)?;
            (day, if step.is_some() { 6 } else { day })
        };

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7);
        }
    }

    Ok(days
        .into_iter()
        .map(|d| WEEKDAYS[d])
        .collect::<Vec<_>>()
        .join(","))
}

/// Coarse recurrence class shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Unset,
}

/// A schedule broken into fields for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySchedule {
    pub interval: Interval,
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month: String,
    pub day_of_week: String,
}

impl DisplaySchedule {
    /// The sentinel shown for jobs without a schedule.
    #[must_use]
    pub fn unset() -> Self {
        Self {
            interval: Interval::Unset,
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_month: "*".to_string(),
            month: "*".to_string(),
            day_of_week: "*".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().expect("valid time")
    }

    fn cron(expression: &str) -> CronSchedule {
        CronSchedule::parse(Some(expression)).expect("valid cron")
    }

    #[test]
    fn weekly_classification() {
        let display = cron("0 9 * * 1").display();
        assert_eq!(display.interval, Interval::Weekly);
        assert_eq!(display.day_of_week, "1");
        assert_eq!(display.day_of_month, "1");
    }

    #[test]
    fn yearly_classification() {
        let display = cron("0 0 1 1 *").display();
        assert_eq!(display.interval, Interval::Yearly);
        assert_eq!(display.day_of_week, "0");
    }

    #[test]
    fn every_minute_is_daily_with_normalized_days() {
        let display = cron("* * * * *").display();
        assert_eq!(display.interval, Interval::Daily);
        assert_eq!(display.day_of_week, "0");
        assert_eq!(display.day_of_month, "1");
        assert_eq!(display.minute, "*");
    }

    #[test]
    fn monthly_classification() {
        assert_eq!(cron("30 6 15 * *").display().interval, Interval::Monthly);
    }

    #[test]
    fn unset_yields_sentinel() {
        for value in [None, Some("unset"), Some("UNSET"), Some("")] {
            let schedule = CronSchedule::parse(value).expect("parse");
            assert!(schedule.is_unset());
            assert_eq!(schedule.display(), DisplaySchedule::unset());
            assert_eq!(schedule.next_after(at(2024, 1, 1, 0, 0)), None);
        }
    }

    #[test]
    fn display_normalization_does_not_affect_next_run() {
        // Normalized display says day-of-week 0, but the job fires every day.
        let schedule = cron("0 9 * * *");
        assert_eq!(schedule.display().day_of_week, "0");
        assert_eq!(schedule.next_after(at(2024, 1, 1, 10, 0)), Some(at(2024, 1, 2, 9, 0)));
    }

    #[test]
    fn next_run_for_weekly_schedule() {
        // 2024-01-01 is a Monday.
        let schedule = cron("0 9 * * 1");
        assert_eq!(schedule.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 1, 9, 0)));
        assert_eq!(schedule.next_after(at(2024, 1, 1, 9, 0)), Some(at(2024, 1, 8, 9, 0)));
    }

    #[test]
    fn sunday_is_zero_or_seven() {
        let expected = Some(at(2024, 1, 7, 12, 0));
        assert_eq!(cron("0 12 * * 0").next_after(at(2024, 1, 1, 0, 0)), expected);
        assert_eq!(cron("0 12 * * 7").next_after(at(2024, 1, 1, 0, 0)), expected);
        assert_eq!(cron("0 12 * * sun").next_after(at(2024, 1, 1, 0, 0)), expected);
    }

    #[test]
    fn weekday_ranges_and_steps() {
        // Saturday 2024-01-06 -> next weekday is Monday the 8th.
        assert_eq!(
            cron("0 8 * * 1-5").next_after(at(2024, 1, 6, 0, 0)),
            Some(at(2024, 1, 8, 8, 0))
        );
        assert_eq!(translate_day_of_week("*/2").as_deref(), Ok("SUN,TUE,THU,SAT"));
        assert_eq!(translate_day_of_week("5-7").as_deref(), Ok("SUN,FRI,SAT"));
        assert_eq!(translate_day_of_week("mon,wed").as_deref(), Ok("MON,WED"));
    }

    #[test]
    fn minute_steps() {
        assert_eq!(
            cron("*/15 * * * *").next_after(at(2024, 3, 10, 10, 7)),
            Some(at(2024, 3, 10, 10, 15))
        );
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // 13th of the month or any Friday. 2024-02-13 is a Tuesday.
        let schedule = cron("0 0 13 * 5");
        assert_eq!(schedule.next_after(at(2024, 2, 10, 0, 0)), Some(at(2024, 2, 13, 0, 0)));
        assert_eq!(schedule.next_after(at(2024, 2, 13, 0, 0)), Some(at(2024, 2, 16, 0, 0)));
    }

    #[test]
    fn aliases_expand() {
        let schedule = cron("@weekly");
        assert_eq!(schedule.display().interval, Interval::Weekly);
        assert_eq!(schedule.expression(), Some("@weekly"));
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        for expression in [
            "* * *",
            "61 * * * *",
            "0 0 * * 8",
            "0 0 * * 5-1",
            "0 0 * * */0",
            "bogus",
        ] {
            let err = CronSchedule::parse(Some(expression)).unwrap_err();
            assert!(
                matches!(err, ScheduleError::InvalidCronExpression { .. }),
                "{expression} should be invalid"
            );
        }
    }

    #[test]
    fn display_serializes_camel_case() {
        let value = serde_json::to_value(cron("0 9 * * 1").display()).expect("serialize");
        assert_eq!(value["interval"], "weekly");
        assert_eq!(value["dayOfWeek"], "1");
        assert_eq!(value["dayOfMonth"], "1");
    }
}
