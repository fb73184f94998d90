//! Calendar arithmetic for subscription periods and credit rollovers.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, Utc};

use crate::error::{AppError, AppResult};

/// Hours of paid access retained after a subscription lapses.
pub const GRACE_PERIOD_HOURS: i64 = 48;

/// Adds calendar months, clamping to the last day of shorter months
/// (Jan 31 + 1 month = Feb 28/29).
pub fn compute_end_date(start: DateTime<Utc>, period_months: u32) -> AppResult<DateTime<Utc>> {
    start
        .checked_add_months(Months::new(period_months))
        .ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "Subscription end date out of range for {} month(s)",
                period_months
            ))
        })
}

pub fn compute_grace_period_end(subscription_end: DateTime<Utc>) -> DateTime<Utc> {
    subscription_end + Duration::hours(GRACE_PERIOD_HOURS)
}

/// The calendar day `ts` falls on at the rollover offset.
pub fn local_date(ts: DateTime<Utc>, rollover: FixedOffset) -> NaiveDate {
    ts.with_timezone(&rollover).date_naive()
}

/// `(year, month)` of `ts` at the rollover offset.
pub fn local_month(ts: DateTime<Utc>, rollover: FixedOffset) -> (i32, u32) {
    let local = ts.with_timezone(&rollover);
    (local.year(), local.month())
}

/// Start of the calendar month containing `ts` at the rollover offset, in UTC.
pub fn local_month_start(ts: DateTime<Utc>, rollover: FixedOffset) -> DateTime<Utc> {
    let (year, month) = local_month(ts, rollover);
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| naive.and_local_timezone(rollover).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn end_date_clamps_to_leap_february() {
        let end = compute_end_date(utc(2024, 1, 31, 0, 0), 1).unwrap();
        assert_eq!(end, utc(2024, 2, 29, 0, 0));
    }

    #[test]
    fn end_date_clamps_to_common_february() {
        let end = compute_end_date(utc(2023, 1, 31, 9, 15), 1).unwrap();
        assert_eq!(end, utc(2023, 2, 28, 9, 15));
    }

    #[test]
    fn end_date_keeps_day_of_month_when_possible() {
        assert_eq!(compute_end_date(utc(2024, 3, 15, 12, 0), 3).unwrap(), utc(2024, 6, 15, 12, 0));
        assert_eq!(compute_end_date(utc(2024, 2, 29, 0, 0), 12).unwrap(), utc(2025, 2, 28, 0, 0));
    }

    #[test]
    fn end_date_crosses_year() {
        assert_eq!(compute_end_date(utc(2024, 11, 30, 8, 0), 3).unwrap(), utc(2025, 2, 28, 8, 0));
    }

    #[test]
    fn grace_end_is_exactly_48_hours_later() {
        let end = utc(2024, 12, 31, 23, 0);
        assert_eq!(compute_grace_period_end(end), utc(2025, 1, 2, 23, 0));
    }

    #[test]
    fn local_date_respects_offset() {
        // 23:30 UTC is already the next day at UTC+1.
        let ts = utc(2024, 5, 10, 23, 30);
        let plus_one = FixedOffset::east_opt(3600).unwrap();
        let utc_offset = FixedOffset::east_opt(0).unwrap();
        assert_eq!(local_date(ts, plus_one), NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());
        assert_eq!(local_date(ts, utc_offset), NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
    }

    #[test]
    fn local_month_start_at_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let start = local_month_start(utc(2024, 7, 18, 10, 0), plus_two);
        assert_eq!(start, utc(2024, 6, 30, 22, 0));
    }
}
