//! Five-field cron expressions.
//!
//! Supports `*`, `N`, `A-B`, `*/S`, `A-B/S` and comma lists in each of
//! minute, hour, day-of-month, month and day-of-week. Times are UTC.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Cadence of the reference deployment.
pub const DEFAULT_SCHEDULE: &str = "*/45 * * * *";

/// Bitset of allowed values for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// false when the field starts with `*`
    restricted: bool,
}

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }

    fn parse(text: &str, min: u32, max: u32, name: &str) -> Result<Field, ScheduleError> {
        let mut bits = 0u64;
        for part in text.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| ScheduleError::new(name, part, "step is not a number"))?;
                    if step == 0 {
                        return Err(ScheduleError::new(name, part, "step must be positive"));
                    }
                    if step > max - min {
                        return Err(ScheduleError::new(
                            name,
                            part,
                            &format!("step must not exceed {}", max - min),
                        ));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (
                    parse_value(a, name, part)?,
                    parse_value(b, name, part)?,
                )
            } else {
                let v = parse_value(range, name, part)?;
                // `N/S` runs from N to the end of the field
                if step > 1 {
                    (v, max)
                } else {
                    (v, v)
                }
            };

            if start < min || end > max || start > end {
                return Err(ScheduleError::new(
                    name,
                    part,
                    &format!("values must lie within {}-{}", min, max),
                ));
            }

            let mut v = Some(start);
            while let Some(value) = v.filter(|value| *value <= end) {
                bits |= 1u64 << value;
                v = value.checked_add(step);
            }
        }

        Ok(Field {
            bits,
            restricted: !text.starts_with('*'),
        })
    }
}

fn parse_value(text: &str, name: &str, part: &str) -> Result<u32, ScheduleError> {
    text.parse()
        .map_err(|_| ScheduleError::new(name, part, "not a number"))
}

/// Parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expression: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl Schedule {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = self.day_of_month.contains(t.day());
        let dow = self.day_of_week.contains(t.weekday().num_days_from_sunday());
        // classic cron: with both day fields restricted either one may match
        if self.day_of_month.restricted && self.day_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First tick strictly after `after`, truncated to the minute.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(366 * 5);
        let mut t = start;

        while t < limit {
            if !self.month.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::new(
                "expression",
                s,
                "expected 5 fields: minute hour day-of-month month day-of-week",
            ));
        }

        let mut day_of_week = Field::parse(fields[4], 0, 7, "day-of-week")?;
        // 7 is an alias for Sunday
        if day_of_week.contains(7) {
            day_of_week.bits = (day_of_week.bits & !(1u64 << 7)) | 1;
        }

        Ok(Schedule {
            expression: fields.join(" "),
            minute: Field::parse(fields[0], 0, 59, "minute")?,
            hour: Field::parse(fields[1], 0, 23, "hour")?,
            day_of_month: Field::parse(fields[2], 1, 31, "day-of-month")?,
            month: Field::parse(fields[3], 1, 12, "month")?,
            day_of_week,
        })
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleError {
    field: String,
    text: String,
    reason: String,
}

impl ScheduleError {
    fn new(field: &str, text: &str, reason: &str) -> ScheduleError {
        ScheduleError {
            field: field.to_string(),
            text: text.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}' in schedule: {}",
            self.field, self.text, self.reason
        )
    }
}

impl std::error::Error for ScheduleError {}
