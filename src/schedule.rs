// Schedule calculator: pure next-run-date arithmetic.
//
// Month and year advancement clamp to the last valid day of the target month
// (chrono's `Months` rule): Jan 31 + 1 month lands on Feb 29 in a leap year
// and Feb 28 otherwise. Clamping never snaps back up; Feb 28 + 1 month is
// Mar 28. The same rule covers the yearly leap-day case (Feb 29 + 1 year =
// Feb 28).

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, Utc};

use crate::error::{BillingError, BillingResult};
use crate::models::IntervalType;

/// Compute the next eligible run date from an anchor date.
///
/// `interval_value` counts weeks/months/years for the matching interval
/// types; for `custom` it is a plain day count. Zero or negative values are
/// rejected rather than assumed away.
pub fn next_run_date(
    from: DateTime<Utc>,
    interval_type: IntervalType,
    interval_value: i32,
) -> BillingResult<DateTime<Utc>> {
    if interval_value <= 0 {
        return Err(BillingError::InvalidInterval {
            value: interval_value,
        });
    }

    let next = match interval_type {
        IntervalType::Weekly => from.checked_add_signed(Duration::weeks(interval_value as i64)),
        IntervalType::Monthly => from.checked_add_months(Months::new(interval_value as u32)),
        IntervalType::Yearly => from.checked_add_months(Months::new(interval_value as u32 * 12)),
        IntervalType::Custom => from.checked_add_signed(Duration::days(interval_value as i64)),
    };

    next.ok_or(BillingError::DateOverflow { from })
}

/// First run timestamp for a freshly authored template: one interval after
/// the start date, anchored at midnight UTC.
pub fn initial_run_at(
    start_date: NaiveDate,
    interval_type: IntervalType,
    interval_value: i32,
) -> BillingResult<DateTime<Utc>> {
    next_run_date(
        start_date.and_time(NaiveTime::MIN).and_utc(),
        interval_type,
        interval_value,
    )
}
