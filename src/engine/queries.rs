use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability;
use super::summary::summarize;
use super::{Engine, EngineError};

/// Selection for listing reservations. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub period: Option<String>,
    pub status: Option<Status>,
    pub client_id: Option<String>,
}

impl ReservationFilter {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
            ..Self::default()
        }
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        let d = &r.details;
        self.from.is_none_or(|from| d.date >= from)
            && self.to.is_none_or(|to| d.date <= to)
            && self.period.as_ref().is_none_or(|p| *p == d.period)
            && self.status.is_none_or(|s| s == r.status)
            && self
                .client_id
                .as_ref()
                .is_none_or(|c| r.client_id.as_ref() == Some(c))
    }
}

fn check_window(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if from > to {
        return Err(EngineError::InvalidReservation(format!(
            "window start {from} is after end {to}"
        )));
    }
    if (to - from).num_days() >= MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    pub fn get(&self, id: Ulid) -> Option<Reservation> {
        self.reservations.get(&id).map(|r| r.value().clone())
    }

    /// The client's Pending or Confirmed reservation, if any.
    pub fn active_for_client(&self, client_id: &str) -> Option<Reservation> {
        let id = self.active_by_client.get(client_id).map(|e| *e.value())?;
        self.get(id).filter(|r| r.status.is_active())
    }

    /// Matching reservations ordered by date, service order, then creation.
    pub async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            check_window(from, to)?;
        }
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        let calendar = self.calendar.read().await;
        out.sort_by_cached_key(|r| {
            (
                r.details.date,
                calendar.period_order(r.details.date, &r.details.period),
                r.created_at,
                r.id,
            )
        });
        Ok(out)
    }

    /// Guests currently held in a slot.
    pub async fn booked(&self, slot: &SlotKey) -> u32 {
        match self.slots.get(slot).map(|s| s.value().clone()) {
            Some(state) => state.read().await.booked,
            None => 0,
        }
    }

    /// Pre-flight availability answer. Holds no slot lock while deciding, so
    /// a later `create` may still be turned down.
    pub async fn check(&self, date: NaiveDate, period: &str, party_size: u32) -> Decision {
        let booked = self.booked(&SlotKey::new(date, period)).await;
        let now = self.clock.now();
        let calendar = self.calendar.read().await;
        availability::check(&calendar, booked, date, period, party_size, now)
    }

    /// Seats left in a period on a date; `None` when unlimited or not open.
    pub async fn remaining(&self, date: NaiveDate, period: &str) -> Option<u32> {
        let booked = self.booked(&SlotKey::new(date, period)).await;
        let calendar = self.calendar.read().await;
        availability::remaining(&calendar, booked, date, period)
    }

    /// Per-date, per-period totals of active reservations within `[from, to]`.
    pub async fn summaries(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DateSummary>, EngineError> {
        check_window(from, to)?;
        let active: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| r.status.is_active() && r.details.date >= from && r.details.date <= to)
            .map(|r| r.value().clone())
            .collect();
        let calendar = self.calendar.read().await;
        Ok(summarize(&calendar, &active, from, to))
    }

    pub async fn rules(&self) -> Option<BookingRules> {
        self.calendar.read().await.rules.clone()
    }

    /// Every period definition, weekly ones first, in service order.
    pub async fn periods(&self) -> Vec<Period> {
        let mut periods = self.calendar.read().await.periods.clone();
        periods.sort_by_cached_key(|p| {
            let (weekday, date) = match p.recurrence {
                Recurrence::Weekly(day) => (day.num_days_from_monday(), None),
                Recurrence::On(date) => (7, Some(date)),
            };
            (weekday, date, p.start_time, p.name.clone())
        });
        periods
    }

    /// Periods bookable on `date`, in service order.
    pub async fn open_periods(&self, date: NaiveDate) -> Result<Vec<Period>, EngineError> {
        let calendar = self.calendar.read().await;
        if calendar.is_date_closed(date)? {
            return Ok(Vec::new());
        }
        Ok(calendar
            .resolve_open_periods(date)?
            .into_iter()
            .cloned()
            .collect())
    }
}
