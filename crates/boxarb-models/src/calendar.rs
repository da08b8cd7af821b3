//! NSE expiry-date arithmetic.
//!
//! Index derivatives on the NSE expire on Thursdays; the contract that expires
//! on the last Thursday of its month is the monthly series. All math here is
//! on `NaiveDate` — callers resolve "today" in the exchange time zone before
//! asking calendar questions, so host-local time never leaks in.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Returns the last Thursday of the given month.
pub fn last_thursday_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last_day = first_of_next.pred_opt()?;

    let days_since_thursday = (last_day.weekday().num_days_from_monday() as i64
        - Weekday::Thu.num_days_from_monday() as i64
        + 7)
        % 7;
    Some(last_day - Duration::days(days_since_thursday))
}

/// A monthly expiry is a Thursday whose date plus seven days falls in a later
/// calendar month (i.e. the last Thursday of its month).
pub fn is_monthly_expiry(date: NaiveDate) -> bool {
    if date.weekday() != Weekday::Thu {
        return false;
    }
    let next_week = date + Duration::days(7);
    next_week.month() != date.month() || next_week.year() != date.year()
}

/// A weekly expiry is any Thursday that is not the monthly one.
pub fn is_weekly_expiry(date: NaiveDate) -> bool {
    date.weekday() == Weekday::Thu && !is_monthly_expiry(date)
}
