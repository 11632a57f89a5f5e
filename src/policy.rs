//! Loan period, lateness, fee and point rules.
//!
//! All day boundaries are taken in the library's local calendar, expressed as a
//! fixed UTC offset so every calendar day is exactly 24 hours long. Instants are
//! stored and returned as UTC.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::Serialize;

pub const LOAN_PERIOD_DAYS: i64 = 14;
pub const LATE_FEE_PER_DAY: i64 = 100;
pub const ON_TIME_BONUS: i64 = 100;
pub const LATE_PENALTY_PER_DAY: i64 = 10;

/// Calendar day `instant` falls on in the local calendar.
#[must_use]
pub fn local_day(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// 00:00:00.000 local time on `day`.
#[must_use]
pub fn start_of_day(day: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    local_to_utc(day.and_time(NaiveTime::MIN), offset)
}

/// 23:59:59.999 local time on `day`.
#[must_use]
pub fn end_of_day(day: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    start_of_day(day, offset) + TimeDelta::days(1) - TimeDelta::milliseconds(1)
}

fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    (local - TimeDelta::seconds(i64::from(offset.local_minus_utc()))).and_utc()
}

/// Due date for a loan approved at `approved_at`: fourteen calendar days later, end of day.
#[must_use]
pub fn due_date(approved_at: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let due_day = local_day(approved_at, offset) + TimeDelta::days(LOAN_PERIOD_DAYS);
    end_of_day(due_day, offset)
}

/// A return is late only once its calendar day starts after the due day has ended.
#[must_use]
pub fn is_late(due: DateTime<Utc>, returned_at: DateTime<Utc>, offset: FixedOffset) -> bool {
    let return_day_start = start_of_day(local_day(returned_at, offset), offset);
    return_day_start > end_of_day(local_day(due, offset), offset)
}

/// Whole days between the start of the due day and the start of the return day.
#[must_use]
pub fn days_late(due: DateTime<Utc>, returned_at: DateTime<Utc>, offset: FixedOffset) -> i64 {
    if !is_late(due, returned_at, offset) {
        return 0;
    }
    let due_day_start = start_of_day(local_day(due, offset), offset);
    let return_day_start = start_of_day(local_day(returned_at, offset), offset);
    (return_day_start - due_day_start).num_days()
}

#[must_use]
pub const fn late_fee(days_late: i64) -> i64 {
    days_late * LATE_FEE_PER_DAY
}

#[must_use]
pub const fn points_delta(days_late: i64) -> i64 {
    if days_late == 0 {
        ON_TIME_BONUS
    } else {
        -LATE_PENALTY_PER_DAY * days_late
    }
}

/// Accounting fixed at return time from the due date stored at approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReturnAssessment {
    pub days_late: i64,
    pub late_fee: i64,
    pub points_delta: i64,
}

impl ReturnAssessment {
    #[must_use]
    pub fn on_time(&self) -> bool {
        self.days_late == 0
    }
}

#[must_use]
pub fn assess_return(due: DateTime<Utc>, returned_at: DateTime<Utc>, offset: FixedOffset) -> ReturnAssessment {
    let days_late = days_late(due, returned_at, offset);
    ReturnAssessment {
        days_late,
        late_fee: late_fee(days_late),
        points_delta: points_delta(days_late),
    }
}
