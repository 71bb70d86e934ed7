use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::series::intervals::Granularity;

const GAP_SEARCH_MINUTES: i64 = 180;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses a device timestamp. Offset-qualified values are absolute; naive values are wall-clock
/// time in `tz`.
pub fn parse_device_timestamp<Tz: TimeZone>(tz: &Tz, raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .and_then(|naive| resolve_local(tz, naive))
}

/// Maps a wall-clock time to an instant. Ambiguous times take the earlier instant, times inside
/// a DST gap move forward to the next valid local time.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    local_candidates(tz, naive).into_iter().next()
}

fn local_candidates<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Vec<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => vec![dt.with_timezone(&Utc)],
        chrono::LocalResult::Ambiguous(a, b) => {
            let mut candidates = vec![a.with_timezone(&Utc), b.with_timezone(&Utc)];
            candidates.sort();
            candidates
        }
        chrono::LocalResult::None => find_next_valid_local(tz, naive, GAP_SEARCH_MINUTES)
            .into_iter()
            .collect(),
    }
}

fn find_next_valid_local<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
    max_minutes: i64,
) -> Option<DateTime<Utc>> {
    for minutes in 0..=max_minutes {
        let candidate = naive + Duration::minutes(minutes);
        match tz.from_local_datetime(&candidate) {
            chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            chrono::LocalResult::Ambiguous(a, b) => {
                let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
                return Some(a.min(b));
            }
            chrono::LocalResult::None => continue,
        }
    }
    None
}

fn truncate_naive(naive: NaiveDateTime, granularity: Granularity) -> NaiveDateTime {
    let date = naive.date();
    match granularity {
        Granularity::Minute => date
            .and_hms_opt(naive.hour(), naive.minute(), 0)
            .unwrap_or(naive),
        Granularity::Hour => date.and_hms_opt(naive.hour(), 0, 0).unwrap_or(naive),
        Granularity::Day => midnight(date),
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

/// Start of the granularity unit containing `instant`, measured on the wall clock of `tz`.
///
/// Never returns an instant later than `instant`.
pub fn floor_to_granularity<Tz: TimeZone>(
    tz: &Tz,
    instant: DateTime<Utc>,
    granularity: Granularity,
) -> DateTime<Utc> {
    let local = instant.with_timezone(tz).naive_local();
    let floored = truncate_naive(local, granularity);
    let candidates = local_candidates(tz, floored);
    candidates
        .iter()
        .rev()
        .find(|candidate| **candidate <= instant)
        .copied()
        .unwrap_or(instant)
}

/// Start of the unit following the one that begins at `start`.
pub fn next_boundary<Tz: TimeZone>(
    tz: &Tz,
    start: DateTime<Utc>,
    granularity: Granularity,
) -> DateTime<Utc> {
    match granularity {
        Granularity::Minute => start + Duration::minutes(1),
        Granularity::Hour => start + Duration::hours(1),
        Granularity::Day => {
            let local_date = start.with_timezone(tz).date_naive();
            local_date
                .succ_opt()
                .and_then(|next| resolve_local(tz, midnight(next)))
                .filter(|next| *next > start)
                .unwrap_or_else(|| start + Duration::days(1))
        }
    }
}
