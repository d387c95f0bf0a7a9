use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::model::{DateSummary, Reservation};

use super::calendar::Calendar;

/// Per `(date, period)` totals of active reservations within `[from, to]`.
///
/// Ordered by date, then by the period's start time on that date; periods
/// no longer defined sort after the known ones, by name.
pub fn summarize<'a>(
    calendar: &Calendar,
    reservations: impl IntoIterator<Item = &'a Reservation>,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<DateSummary> {
    let mut totals: BTreeMap<(NaiveDate, String), (u32, u32)> = BTreeMap::new();
    for r in reservations {
        let d = &r.details;
        if !r.status.is_active() || d.date < from || d.date > to {
            continue;
        }
        let entry = totals.entry((d.date, d.period.clone())).or_default();
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(r.party_size());
    }

    let mut out: Vec<DateSummary> = totals
        .into_iter()
        .map(|((date, period), (reservation_count, guest_count))| DateSummary {
            date,
            weekday: date.weekday(),
            period,
            reservation_count,
            guest_count,
        })
        .collect();
    out.sort_by_cached_key(|s| (s.date, calendar.period_order(s.date, &s.period)));
    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, Weekday};
    use ulid::Ulid;

    use super::*;
    use crate::model::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn period(day: Weekday, name: &str, start: u32) -> Period {
        Period {
            id: Ulid::new(),
            recurrence: Recurrence::Weekly(day),
            name: name.into(),
            start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(start + 3, 0, 0).unwrap(),
            active: true,
            capacity_override: None,
        }
    }

    fn booking(d: &str, period: &str, adults: u32, children: u32, status: Status) -> Reservation {
        Reservation {
            id: Ulid::new(),
            client_id: None,
            source: Source::Manual,
            status,
            table: None,
            idempotency_key: None,
            details: BookingDetails {
                party_name: "Guest".into(),
                date: date(d),
                period: period.into(),
                adults,
                children,
                notes: None,
                is_birthday: false,
            },
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn groups_and_orders_by_start_time() {
        let cal = Calendar {
            rules: None,
            // Declared out of order on purpose
            periods: vec![period(Weekday::Wed, "Dinner", 19), period(Weekday::Wed, "Lunch", 12)],
        };
        let rs = vec![
            booking("2024-12-25", "Dinner", 2, 1, Status::Confirmed),
            booking("2024-12-25", "Dinner", 4, 0, Status::Pending),
            booking("2024-12-25", "Lunch", 2, 0, Status::Confirmed),
            booking("2024-12-25", "Lunch", 6, 0, Status::Canceled),
            booking("2024-12-24", "Dinner", 2, 0, Status::Confirmed),
            booking("2024-12-26", "Dinner", 2, 0, Status::Confirmed),
        ];

        let out = summarize(&cal, &rs, date("2024-12-24"), date("2024-12-25"));
        let rows: Vec<_> = out
            .iter()
            .map(|s| (s.date, s.period.as_str(), s.reservation_count, s.guest_count))
            .collect();
        assert_eq!(
            rows,
            vec![
                (date("2024-12-24"), "Dinner", 1, 2),
                (date("2024-12-25"), "Lunch", 1, 2),
                (date("2024-12-25"), "Dinner", 2, 7),
            ]
        );
        assert_eq!(out[1].weekday, Weekday::Wed);
    }

    #[test]
    fn undefined_periods_sort_last() {
        let cal = Calendar {
            rules: None,
            periods: vec![period(Weekday::Wed, "Dinner", 19)],
        };
        let rs = vec![
            booking("2024-12-25", "Apero", 2, 0, Status::Confirmed),
            booking("2024-12-25", "Dinner", 2, 0, Status::Confirmed),
        ];
        let out = summarize(&cal, &rs, date("2024-12-25"), date("2024-12-25"));
        assert_eq!(out[0].period, "Dinner");
        assert_eq!(out[1].period, "Apero");
    }

    #[test]
    fn empty_window() {
        let cal = Calendar::default();
        let rs = vec![booking("2024-12-25", "Dinner", 2, 0, Status::Confirmed)];
        assert!(summarize(&cal, &rs, date("2025-01-01"), date("2025-01-31")).is_empty());
    }
}
