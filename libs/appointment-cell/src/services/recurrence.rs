use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::models::{RecurrenceCadence, RecurrenceEnd, RecurrenceRule, SchedulingError};

/// Occurrences generated when the series has no explicit termination.
pub const DEFAULT_MAX_OCCURRENCES: u32 = 10;

/// Absolute ceiling on occurrences per series, regardless of termination.
pub const MAX_SERIES_OCCURRENCES: u32 = 52;

/// Expand a recurrence rule into concrete occurrence datetimes, starting at
/// `start`. The first occurrence keeps the anchor's time of day; weekly and
/// biweekly cadences emit one occurrence per selected weekday per window.
///
/// An interval of N means every N cadence units: weekly interval 2 advances
/// the week window by two weeks, monthly interval 3 by three months, daily and
/// custom by N days. Biweekly is a fixed two-week cadence regardless of
/// interval.
///
/// Output is strictly ascending and never exceeds [`MAX_SERIES_OCCURRENCES`].
pub fn expand(
    start: DateTime<Utc>,
    rule: &RecurrenceRule,
) -> Result<Vec<DateTime<Utc>>, SchedulingError> {
    validate(rule)?;

    let target = match rule.end {
        RecurrenceEnd::Never => DEFAULT_MAX_OCCURRENCES,
        RecurrenceEnd::AfterCount { count } => count.min(MAX_SERIES_OCCURRENCES),
        RecurrenceEnd::OnDate { .. } => MAX_SERIES_OCCURRENCES,
    };

    let occurrences = match rule.cadence {
        RecurrenceCadence::Daily | RecurrenceCadence::Custom => {
            expand_by_days(start, rule.interval as i64, target, &rule.end)
        }
        RecurrenceCadence::Monthly => expand_monthly(start, rule.interval, target, &rule.end),
        RecurrenceCadence::Weekly => {
            expand_weekly(start, &rule.weekdays, rule.interval as i64, target, &rule.end)
        }
        RecurrenceCadence::Biweekly => {
            expand_weekly(start, &rule.weekdays, 2, target, &rule.end)
        }
    };

    Ok(occurrences)
}

fn validate(rule: &RecurrenceRule) -> Result<(), SchedulingError> {
    if rule.interval == 0 {
        return Err(SchedulingError::ValidationError(
            "Recurrence interval must be at least 1".to_string(),
        ));
    }

    if matches!(
        rule.cadence,
        RecurrenceCadence::Weekly | RecurrenceCadence::Biweekly
    ) {
        if rule.weekdays.is_empty() {
            return Err(SchedulingError::ValidationError(
                "Weekly recurrence requires at least one weekday".to_string(),
            ));
        }
        if rule.weekdays.iter().any(|d| *d > 6) {
            return Err(SchedulingError::ValidationError(
                "Weekdays must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
    }

    if let RecurrenceEnd::AfterCount { count } = rule.end {
        if count == 0 {
            return Err(SchedulingError::ValidationError(
                "Occurrence count must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}

fn within_end(occurrence: DateTime<Utc>, end: &RecurrenceEnd) -> bool {
    match end {
        // The end date itself still gets an occurrence.
        RecurrenceEnd::OnDate { date } => occurrence.date_naive() <= *date,
        _ => true,
    }
}

fn expand_by_days(
    start: DateTime<Utc>,
    step_days: i64,
    target: u32,
    end: &RecurrenceEnd,
) -> Vec<DateTime<Utc>> {
    let mut occurrences = Vec::new();
    let mut current = start;

    while occurrences.len() < target as usize && within_end(current, end) {
        occurrences.push(current);
        current += Duration::days(step_days);
    }

    occurrences
}

fn expand_monthly(
    start: DateTime<Utc>,
    interval: u32,
    target: u32,
    end: &RecurrenceEnd,
) -> Vec<DateTime<Utc>> {
    let mut occurrences = Vec::new();

    for k in 0..target {
        // checked_add_months clamps to the last day of shorter months,
        // so a series anchored on the 31st lands on Feb 28/29.
        let Some(current) = start.checked_add_months(Months::new(k.saturating_mul(interval)))
        else {
            break;
        };
        if !within_end(current, end) {
            break;
        }
        occurrences.push(current);
    }

    occurrences
}

fn expand_weekly(
    start: DateTime<Utc>,
    weekdays: &[u8],
    step_weeks: i64,
    target: u32,
    end: &RecurrenceEnd,
) -> Vec<DateTime<Utc>> {
    // 0 = Sunday .. 6 = Saturday, same convention as the stored
    // recurrence_days column.
    let anchor_weekday = start.weekday().num_days_from_sunday() as u8;

    let mut offsets: Vec<i64> = weekdays
        .iter()
        .map(|day| ((*day as i64) - (anchor_weekday as i64) + 7) % 7)
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut occurrences = Vec::new();
    let mut week = 0i64;

    'outer: loop {
        for offset in &offsets {
            let current = start + Duration::days(week * step_weeks * 7 + offset);
            if !within_end(current, end) {
                break 'outer;
            }
            occurrences.push(current);
            if occurrences.len() >= target as usize {
                break 'outer;
            }
        }
        week += 1;
    }

    occurrences
}
