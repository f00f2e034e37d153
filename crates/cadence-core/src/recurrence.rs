//! Pure recurrence expansion: `(template, from, until, exceptions) ->
//! occurrences`. No I/O, no clock reads — every bound is supplied by the
//! caller so the function is fully deterministic and unit-testable without
//! a database.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    ExceptionType, OccurrenceDraft, RecurringTemplate, RecurringTemplateException,
};

/// Parsed, validated view of a template's `recurrence_config` JSON blob.
/// Only the keys a given pattern actually reads are required; see
/// [`RecurrenceConfig::parse`].
#[derive(Debug, Clone, Copy)]
struct RecurrenceConfig {
    interval: u32,
    days_of_week: Option<[bool; 7]>,
    hour: u32,
    minute: u32,
}

impl RecurrenceConfig {
    fn parse(
        pattern: crate::models::RecurrencePattern,
        raw: &serde_json::Value,
    ) -> Result<Self, CoreError> {
        use crate::models::RecurrencePattern::*;

        let obj = match raw {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => &serde_json::Map::new(),
            _ => {
                return Err(CoreError::InvalidRecurrenceConfig(
                    "recurrence_config must be a JSON object".to_string(),
                ))
            }
        };

        let interval = match obj.get("interval") {
            Some(v) => v
                .as_u64()
                .filter(|n| *n >= 1)
                .ok_or_else(|| {
                    CoreError::InvalidRecurrenceConfig(
                        "interval must be a positive integer".to_string(),
                    )
                })? as u32,
            None => match pattern {
                Weekdays => 1,
                Daily | Weekly | Monthly => {
                    return Err(CoreError::InvalidRecurrenceConfig(
                        "interval is required for this pattern".to_string(),
                    ))
                }
            },
        };

        let days_of_week = match obj.get("days_of_week") {
            None => None,
            Some(serde_json::Value::Array(items)) => {
                let mut mask = [false; 7];
                for item in items {
                    let n = item.as_u64().ok_or_else(|| {
                        CoreError::InvalidRecurrenceConfig(
                            "days_of_week entries must be integers 0-6 (Mon=0)".to_string(),
                        )
                    })?;
                    if n > 6 {
                        return Err(CoreError::InvalidRecurrenceConfig(
                            "days_of_week entries must be 0-6 (Mon=0)".to_string(),
                        ));
                    }
                    mask[n as usize] = true;
                }
                Some(mask)
            }
            Some(_) => {
                return Err(CoreError::InvalidRecurrenceConfig(
                    "days_of_week must be an array".to_string(),
                ))
            }
        };

        let hour = match obj.get("hour") {
            Some(v) => v
                .as_u64()
                .filter(|n| *n < 24)
                .ok_or_else(|| CoreError::InvalidRecurrenceConfig("hour must be 0-23".to_string()))?
                as u32,
            None => 0,
        };
        let minute = match obj.get("minute") {
            Some(v) => v
                .as_u64()
                .filter(|n| *n < 60)
                .ok_or_else(|| {
                    CoreError::InvalidRecurrenceConfig("minute must be 0-59".to_string())
                })? as u32,
            None => 0,
        };

        Ok(Self {
            interval,
            days_of_week,
            hour,
            minute,
        })
    }
}

fn weekday_index(w: Weekday) -> usize {
    // Mon=0 .. Sun=6, matching the `days_of_week` convention above.
    w.num_days_from_monday() as usize
}

fn at_time_of_day(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(
        date.and_hms_opt(hour, minute, 0).expect("validated hour/minute"),
        Utc,
    )
}

fn candidate_dates(
    pattern: crate::models::RecurrencePattern,
    config: &RecurrenceConfig,
    from: NaiveDate,
    until: NaiveDate,
) -> Vec<NaiveDate> {
    use crate::models::RecurrencePattern::*;

    let mut dates = Vec::new();
    match pattern {
        Daily => {
            let mut d = from;
            while d <= until {
                dates.push(d);
                d += Duration::days(config.interval as i64);
            }
        }
        Weekdays => {
            let mut d = from;
            while d <= until {
                if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
                    dates.push(d);
                }
                d += Duration::days(1);
            }
        }
        Weekly => {
            let week_start = from - Duration::days(weekday_index(from.weekday()) as i64);
            let days: Vec<usize> = match config.days_of_week {
                Some(mask) => (0..7).filter(|&i| mask[i]).collect(),
                None => vec![weekday_index(from.weekday())],
            };
            let mut week = week_start;
            while week <= until {
                for &offset in &days {
                    let d = week + Duration::days(offset as i64);
                    if d >= from && d <= until {
                        dates.push(d);
                    }
                }
                week += Duration::days(7 * config.interval as i64);
            }
            dates.sort();
            dates.dedup();
        }
        Monthly => {
            let day_of_month = from.day();
            let mut year = from.year();
            let mut month = from.month();
            loop {
                if let Some(d) = NaiveDate::from_ymd_opt(year, month, day_of_month) {
                    if d > until {
                        break;
                    }
                    if d >= from {
                        dates.push(d);
                    }
                } else if NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|d| d > until)
                    .unwrap_or(true)
                {
                    break;
                }
                month += config.interval;
                year += ((month - 1) / 12) as i32;
                month = ((month - 1) % 12) + 1;
                // Stop once the month start itself has passed `until`.
                if NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|d| d > until)
                    .unwrap_or(true)
                {
                    break;
                }
            }
        }
    }
    dates
}

/// Expands a template's recurrence rule against `[from, until]` (inclusive
/// on both ends), skipping occurrences covered by a `deleted` exception.
/// Pure function: no I/O, no clock read.
pub fn generate_tasks_for_template_with_exceptions(
    template: &RecurringTemplate,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    exceptions: &[RecurringTemplateException],
) -> Result<Vec<OccurrenceDraft>, CoreError> {
    let config_value = template.config();
    let config = RecurrenceConfig::parse(template.recurrence_pattern, &config_value)?;

    let deleted: std::collections::HashSet<DateTime<Utc>> = exceptions
        .iter()
        .filter(|e| e.exception_type == ExceptionType::Deleted)
        .map(|e| e.occurs_at)
        .collect();

    let from_date = from.date_naive();
    let until_date = until.date_naive();
    if from_date > until_date {
        return Ok(Vec::new());
    }

    let dates = candidate_dates(template.recurrence_pattern, &config, from_date, until_date);

    let mut drafts = Vec::with_capacity(dates.len());
    for date in dates {
        let occurs_at = at_time_of_day(date, config.hour, config.minute);
        if occurs_at < from || occurs_at > until {
            continue;
        }
        if deleted.contains(&occurs_at) {
            continue;
        }
        let due_at = template
            .due_offset_secs
            .map(|secs| occurs_at + Duration::seconds(secs));
        drafts.push(OccurrenceDraft {
            id: Uuid::now_v7(),
            list_id: template.list_id,
            title: template.title.clone(),
            occurs_at,
            starts_at: occurs_at,
            due_at,
            recurring_template_id: template.id,
            timezone: template.timezone.clone(),
        });
    }

    drafts.sort_by_key(|d| d.occurs_at);
    Ok(drafts)
}

/// Read-only preview of upcoming occurrences — the same pure expansion
/// used by the worker, exposed without requiring a database round trip.
pub fn preview(
    template: &RecurringTemplate,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    exceptions: &[RecurringTemplateException],
) -> Result<Vec<OccurrenceDraft>, CoreError> {
    generate_tasks_for_template_with_exceptions(template, from, until, exceptions)
}

/// Validates that `timezone` is a well-formed IANA name. Non-goal: no
/// calendar-grade DST arithmetic, only validation + UTC normalization.
pub fn validate_timezone(timezone: &str) -> Result<(), CoreError> {
    timezone
        .parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| CoreError::InvalidArgument(format!("invalid IANA timezone: {timezone}")))
}
