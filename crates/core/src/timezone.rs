//! Time Normalization
//!
//! Converts the locally-expressed date and time-of-day filters of a question into
//! UTC boundaries. The offset convention is "minutes to add to local time to reach
//! UTC", so a client at UTC-5 sends `300`.

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use crate::types::{ClockDirection, TimeFilter, UtcClock, UtcWindow, MINUTES_PER_DAY};

/// Shift a local minute of day into UTC.
///
/// Returns the UTC minute of day and the number of days the shift crossed
/// (`-1`, `0` or `+1` for realistic offsets).
pub fn shift_clock(minute: u16, offset_minutes: i32) -> (u16, i64) {
    let total = i64::from(minute) + i64::from(offset_minutes);
    let per_day = i64::from(MINUTES_PER_DAY);
    (total.rem_euclid(per_day) as u16, total.div_euclid(per_day))
}

fn shift_days(date: NaiveDate, days: i64) -> NaiveDate {
    if days >= 0 {
        date.checked_add_days(Days::new(days as u64)).unwrap_or(date)
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs())).unwrap_or(date)
    }
}

/// `minute` minutes past UTC midnight of `date`
fn at_utc(date: NaiveDate, minute: i64) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc() + Duration::minutes(minute)
}

/// Local midnight starting `date`, as a UTC instant
fn local_midnight(date: NaiveDate, offset_minutes: i32) -> DateTime<Utc> {
    at_utc(date, i64::from(offset_minutes))
}

/// Replace local date/time fields with UTC boundaries.
///
/// Already-normalized filters are returned unchanged, and without an offset
/// the local fields pass through as they are (interpreted as UTC downstream).
pub fn normalize_time(filter: &TimeFilter, offset_minutes: Option<i32>) -> TimeFilter {
    if filter.is_normalized() {
        return filter.clone();
    }
    let Some(offset) = offset_minutes else {
        return filter.clone();
    };

    let mut out = filter.clone();

    let shifted = filter.clock.map(|clock| {
        let (minute, day_shift) = shift_clock(clock.minute, offset);
        out.utc_clock = Some(UtcClock {
            direction: clock.direction,
            minute,
            offset_minutes: offset,
        });
        (clock.direction, minute, day_shift)
    });

    out.window = match (filter.date, filter.date_end, shifted) {
        (Some(date), None, Some((direction, utc_minute, day_shift))) => {
            let anchor = shift_days(date, day_shift);
            let bound = at_utc(anchor, i64::from(utc_minute));
            let day_start = local_midnight(date, offset);
            let day_end = local_midnight(shift_days(date, 1), offset);
            Some(match direction {
                ClockDirection::After => UtcWindow { start: bound, end: day_end },
                ClockDirection::Before => UtcWindow { start: day_start, end: bound },
            })
        }
        (Some(date), None, None) => Some(UtcWindow {
            start: local_midnight(date, offset),
            end: local_midnight(shift_days(date, 1), offset),
        }),
        (Some(start), Some(end), _) => Some(UtcWindow {
            start: local_midnight(start, offset),
            end: local_midnight(shift_days(end, 1), offset),
        }),
        _ => None,
    };

    out
}

fn minute_of_day(at: DateTime<Utc>) -> u16 {
    (at.hour() * 60 + at.minute()) as u16
}

/// Whether a game played at `played_at` satisfies the time filter.
///
/// A game without a timestamp never satisfies an active filter.
pub fn time_admits(filter: &TimeFilter, played_at: Option<DateTime<Utc>>) -> bool {
    if !filter.is_active() {
        return true;
    }
    let Some(at) = played_at else {
        return false;
    };

    if filter.is_normalized() {
        if let Some(window) = filter.window {
            if !window.contains(at) {
                return false;
            }
        }
        if let Some(clock) = filter.utc_clock {
            let local = (i64::from(minute_of_day(at)) - i64::from(clock.offset_minutes))
                .rem_euclid(i64::from(MINUTES_PER_DAY)) as u16;
            if !clock.direction.admits(local, clock.local_minute()) {
                return false;
            }
        }
        return true;
    }

    // No offset was supplied: local fields are read as UTC
    if let Some(start) = filter.date {
        let end = filter.date_end.unwrap_or(start);
        let day = at.date_naive();
        if day < start || day > end {
            return false;
        }
    }
    if let Some(clock) = filter.clock {
        if !clock.direction.admits(minute_of_day(at), clock.minute) {
            return false;
        }
    }
    true
}
