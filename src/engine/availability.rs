use chrono::{NaiveDate, NaiveDateTime};

use crate::model::*;

use super::calendar::Calendar;

/// Decide whether `party_size` guests may book `period` on `date`.
///
/// Pure: reads the calendar and the slot's `booked` guests, nothing else.
/// Checks run in a fixed order and the first failure wins. Used both for
/// pre-flight checks and as the guard inside a slot's critical section.
pub fn check(
    calendar: &Calendar,
    booked: u32,
    date: NaiveDate,
    period: &str,
    party_size: u32,
    now: NaiveDateTime,
) -> Decision {
    let Some(rules) = calendar.rules.as_ref() else {
        return Decision::Reject(RejectReason::TenantNotConfigured);
    };

    if !rules.admits_party(party_size) {
        return Decision::Reject(RejectReason::PartySizeOutOfBounds);
    }

    if matches!(calendar.is_date_closed(date), Ok(true)) {
        return Decision::Reject(RejectReason::DayClosed);
    }

    let Some(open) = calendar.find_open_period(date, period) else {
        return Decision::Reject(RejectReason::PeriodUnavailable);
    };

    let today = now.date();
    if date < today || (date == today && now.time() >= rules.same_day_cutoff) {
        return Decision::Reject(RejectReason::PastCutoff);
    }

    if let Some(capacity) = calendar.effective_capacity(open)
        && u64::from(booked) + u64::from(party_size) > u64::from(capacity)
    {
        return Decision::Reject(RejectReason::CapacityExceeded);
    }

    Decision::Accept
}

/// Seats left in an open period, `None` when the period has no limit.
pub fn remaining(calendar: &Calendar, booked: u32, date: NaiveDate, period: &str) -> Option<u32> {
    let open = calendar.find_open_period(date, period)?;
    calendar
        .effective_capacity(open)
        .map(|cap| cap.saturating_sub(booked))
}
