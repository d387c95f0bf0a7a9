use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Booking rules plus the weekly and date-specific periods of one tenant.
///
/// Read-mostly configuration. Resolution is pure; the engine wraps this in a
/// lock and rewrites it through WAL events.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    pub rules: Option<BookingRules>,
    pub periods: Vec<Period>,
}

impl Calendar {
    pub fn rules(&self) -> Result<&BookingRules, EngineError> {
        self.rules.as_ref().ok_or(EngineError::TenantNotConfigured)
    }

    /// Active periods open on `date`.
    ///
    /// A date-specific entry replaces the weekly entry with the same name
    /// outright, even when the date-specific entry is inactive.
    pub fn resolve_open_periods(&self, date: NaiveDate) -> Result<Vec<&Period>, EngineError> {
        self.rules()?;
        Ok(self.open_periods(date))
    }

    fn open_periods(&self, date: NaiveDate) -> Vec<&Period> {
        let special: Vec<&Period> = self
            .periods
            .iter()
            .filter(|p| p.recurrence == Recurrence::On(date))
            .collect();
        let overridden: HashSet<&str> = special.iter().map(|p| p.name.as_str()).collect();

        let mut open: Vec<&Period> = special.into_iter().filter(|p| p.active).collect();
        open.extend(self.periods.iter().filter(|p| {
            p.active
                && p.recurrence == Recurrence::Weekly(date.weekday())
                && !overridden.contains(p.name.as_str())
        }));
        open.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.name.cmp(&b.name)));
        open
    }

    /// Closed weekday with no date-specific period opening it.
    pub fn is_date_closed(&self, date: NaiveDate) -> Result<bool, EngineError> {
        let rules = self.rules()?;
        if !rules.closed_weekdays.contains(date.weekday()) {
            return Ok(false);
        }
        let opened_specially = self
            .periods
            .iter()
            .any(|p| p.active && p.recurrence == Recurrence::On(date));
        Ok(!opened_specially)
    }

    pub fn find_open_period(&self, date: NaiveDate, name: &str) -> Option<&Period> {
        self.open_periods(date).into_iter().find(|p| p.name == name)
    }

    /// `capacity_override`, else the rules' per-period limit. `None` means unlimited.
    pub fn effective_capacity(&self, period: &Period) -> Option<u32> {
        period.capacity_override.or_else(|| {
            self.rules
                .as_ref()
                .and_then(|r| r.period_capacity.get(&period.name).copied())
        })
    }

    /// Sort key placing periods of a date in service order (Lunch before Dinner).
    /// Names with no configured period sort last, alphabetically.
    pub fn period_order(&self, date: NaiveDate, name: &str) -> (bool, NaiveTime, String) {
        let start = self
            .periods
            .iter()
            .filter(|p| p.name == name && p.applies_to(date))
            .min_by_key(|p| !p.is_special_date())
            .or_else(|| self.periods.iter().find(|p| p.name == name))
            .map(|p| p.start_time);
        match start {
            Some(t) => (false, t, name.to_string()),
            None => (true, NaiveTime::default(), name.to_string()),
        }
    }

    pub fn has_period_named(&self, name: &str) -> bool {
        self.periods.iter().any(|p| p.name == name)
    }

    pub fn validate_rules(&self, rules: &BookingRules) -> Result<(), EngineError> {
        if rules.min_party_size < 1 {
            return Err(EngineError::InvalidRules("min_party_size must be at least 1".into()));
        }
        if rules.min_party_size > rules.max_party_size {
            return Err(EngineError::InvalidRules(format!(
                "min_party_size {} exceeds max_party_size {}",
                rules.min_party_size, rules.max_party_size
            )));
        }
        if rules.max_party_size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("max_party_size too large"));
        }
        for name in rules.period_capacity.keys() {
            if !self.has_period_named(name) {
                return Err(EngineError::UnknownPeriod(name.clone()));
            }
        }
        Ok(())
    }

    pub fn validate_period(&self, period: &Period) -> Result<(), EngineError> {
        let name = period.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidPeriod("name must not be empty".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("period name too long"));
        }
        if period.start_time >= period.end_time {
            return Err(EngineError::InvalidPeriod(format!(
                "start {} must be before end {}",
                period.start_time, period.end_time
            )));
        }
        let is_new = !self.periods.iter().any(|p| p.id == period.id);
        if is_new && self.periods.len() >= MAX_PERIODS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many periods"));
        }
        let clash = self.periods.iter().any(|p| {
            p.id != period.id && p.recurrence == period.recurrence && p.name == period.name
        });
        if clash {
            return Err(EngineError::DuplicatePeriodName(period.name.clone()));
        }
        Ok(())
    }

    pub(super) fn upsert_period(&mut self, period: Period) {
        match self.periods.iter_mut().find(|p| p.id == period.id) {
            Some(existing) => *existing = period,
            None => self.periods.push(period),
        }
    }

    pub(super) fn remove_period(&mut self, id: Ulid) -> Option<Period> {
        let pos = self.periods.iter().position(|p| p.id == id)?;
        Some(self.periods.remove(pos))
    }
}
