//! Recurrence rule engine
//!
//! Computes the next occurrence of a repeating schedule from a pattern, a
//! start time and an optional end boundary. Patterns are either simplified
//! keywords (`DAILY`, `WEEKLY`, `MONTHLY`, `YEARLY`, interval 1) or an
//! RFC 5545 subset (`FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE`).
//!
//! All arithmetic is naive UTC: a daily task recurs exactly 24 hours later,
//! never 23 or 25. Timezone offsets are the caller's problem; strip them
//! before calling in.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Weekday};

/// The pattern could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid recurrence pattern {pattern:?}: {reason}")]
pub struct InvalidPatternError {
    pub pattern: String,
    pub reason: String,
}

impl InvalidPatternError {
    fn new(pattern: &str, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freq {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Parsed recurrence rule
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    freq: Freq,
    interval: u32,
    by_day: Vec<Weekday>,
    until: Option<NaiveDateTime>,
}

/// Compute the first occurrence strictly after `start`
///
/// Returns `Ok(None)` when the recurrence has ended: the computed next
/// occurrence falls after `end` (or after the rule's own `UNTIL`). An
/// occurrence exactly equal to the boundary is still returned - the
/// boundary is inclusive.
///
/// Pure and deterministic: same inputs always produce the same output.
pub fn calculate_next(
    pattern: &str,
    start: NaiveDateTime,
    end: Option<NaiveDateTime>,
) -> Result<Option<NaiveDateTime>, InvalidPatternError> {
    let rule = parse_pattern(pattern)?;

    let next = match rule.freq {
        Freq::Daily => Some(start + Duration::days(rule.interval as i64)),
        Freq::Weekly => {
            if rule.by_day.is_empty() {
                Some(start + Duration::weeks(rule.interval as i64))
            } else {
                Some(next_by_weekday(start, &rule.by_day, rule.interval))
            }
        }
        Freq::Monthly => add_months(start, rule.interval),
        Freq::Yearly => add_years(start, rule.interval),
    };

    let Some(next) = next else {
        // Date arithmetic overflowed chrono's range; treat as ended.
        return Ok(None);
    };

    let boundary = match (rule.until, end) {
        (Some(u), Some(e)) => Some(u.min(e)),
        (u, e) => u.or(e),
    };
    if let Some(boundary) = boundary {
        if next > boundary {
            return Ok(None);
        }
    }

    Ok(Some(next))
}

fn parse_pattern(pattern: &str) -> Result<Rule, InvalidPatternError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(InvalidPatternError::new(pattern, "empty pattern"));
    }

    let upper = trimmed.to_ascii_uppercase();
    let body = upper.strip_prefix("RRULE:").unwrap_or(&upper);

    // Simplified keyword form.
    if !body.contains('=') {
        let freq = parse_freq(pattern, body)?;
        return Ok(Rule {
            freq,
            interval: 1,
            by_day: vec![],
            until: None,
        });
    }

    let mut freq = None;
    let mut interval = 1u32;
    let mut by_day = vec![];
    let mut until = None;

    for part in body.split(';') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| InvalidPatternError::new(pattern, format!("malformed part {part:?}")))?;
        match key {
            "FREQ" => freq = Some(parse_freq(pattern, value)?),
            "INTERVAL" => {
                interval = value.parse().map_err(|_| {
                    InvalidPatternError::new(pattern, format!("invalid INTERVAL {value:?}"))
                })?;
                if interval == 0 {
                    return Err(InvalidPatternError::new(pattern, "INTERVAL must be >= 1"));
                }
            }
            "BYDAY" => {
                for day in value.split(',') {
                    by_day.push(parse_weekday(pattern, day)?);
                }
            }
            "UNTIL" => until = Some(parse_until(pattern, value)?),
            other => {
                return Err(InvalidPatternError::new(
                    pattern,
                    format!("unsupported rule part {other:?}"),
                ));
            }
        }
    }

    let freq = freq.ok_or_else(|| InvalidPatternError::new(pattern, "missing FREQ"))?;
    if !by_day.is_empty() && freq != Freq::Weekly {
        return Err(InvalidPatternError::new(
            pattern,
            "BYDAY is only supported with FREQ=WEEKLY",
        ));
    }

    Ok(Rule {
        freq,
        interval,
        by_day,
        until,
    })
}

fn parse_freq(pattern: &str, value: &str) -> Result<Freq, InvalidPatternError> {
    match value {
        "DAILY" => Ok(Freq::Daily),
        "WEEKLY" => Ok(Freq::Weekly),
        "MONTHLY" => Ok(Freq::Monthly),
        "YEARLY" => Ok(Freq::Yearly),
        other => Err(InvalidPatternError::new(
            pattern,
            format!("unsupported frequency {other:?}"),
        )),
    }
}

fn parse_weekday(pattern: &str, value: &str) -> Result<Weekday, InvalidPatternError> {
    match value {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(InvalidPatternError::new(
            pattern,
            format!("invalid BYDAY value {other:?}"),
        )),
    }
}

fn parse_until(pattern: &str, value: &str) -> Result<NaiveDateTime, InvalidPatternError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(InvalidPatternError::new(
        pattern,
        format!("invalid UNTIL value {value:?}"),
    ))
}

/// Next calendar day strictly after `start` whose weekday is in the set,
/// keeping the time of day. Weeks are counted from the Monday of the
/// start's week; with `INTERVAL=n` only every n-th week qualifies.
fn next_by_weekday(start: NaiveDateTime, days: &[Weekday], interval: u32) -> NaiveDateTime {
    let anchor = start.date()
        - Duration::days(start.date().weekday().num_days_from_monday() as i64);

    let mut candidate = start.date() + Duration::days(1);
    loop {
        let week_index = (candidate - anchor).num_days() / 7;
        if week_index % interval as i64 == 0 && days.contains(&candidate.weekday()) {
            return NaiveDateTime::new(candidate, start.time());
        }
        candidate += Duration::days(1);
    }
}

/// Calendar-month step with day-of-month clamping (Jan 31 + 1 month = Feb 28)
fn add_months(start: NaiveDateTime, interval: u32) -> Option<NaiveDateTime> {
    start
        .date()
        .checked_add_months(Months::new(interval))
        .map(|date| NaiveDateTime::new(date, start.time()))
}

/// Calendar-year step; Feb 29 skips ahead to the next year where it exists
fn add_years(start: NaiveDateTime, interval: u32) -> Option<NaiveDateTime> {
    let mut year = start.year().checked_add(interval as i32)?;
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, start.month(), start.day()) {
            return Some(NaiveDateTime::new(date, start.time()));
        }
        year = year.checked_add(interval as i32)?;
    }
}
