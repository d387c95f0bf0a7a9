use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

// ── Weekdays ─────────────────────────────────────────────────────

/// Bit set of weekdays, bit 0 = Monday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0..7u8)
            .filter(move |i| self.0 & (1 << i) != 0)
            .filter_map(|i| Weekday::try_from(i).ok())
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = WeekdaySet::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// Comma-separated weekday names, e.g. `"mon,sun"`. Empty string is the empty set.
impl FromStr for WeekdaySet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<Weekday>()
                    .map_err(|_| format!("unknown weekday: {part}"))
            })
            .collect()
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|d| d.to_string().to_lowercase()).collect();
        write!(f, "{}", names.join(","))
    }
}

// ── Rules & periods ──────────────────────────────────────────────

/// Per-tenant booking rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRules {
    pub min_party_size: u32,
    pub max_party_size: u32,
    /// Same-day requests are accepted strictly before this time of day.
    pub same_day_cutoff: NaiveTime,
    pub closed_weekdays: WeekdaySet,
    /// Guest limit per period name. Keys must name a configured period.
    pub period_capacity: BTreeMap<String, u32>,
}

impl BookingRules {
    pub fn admits_party(&self, party_size: u32) -> bool {
        (self.min_party_size..=self.max_party_size).contains(&party_size)
    }
}

/// When a period applies: every week on a weekday, or on one specific date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    Weekly(Weekday),
    On(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: Ulid,
    pub recurrence: Recurrence,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
    pub capacity_override: Option<u32>,
}

impl Period {
    pub fn is_special_date(&self) -> bool {
        matches!(self.recurrence, Recurrence::On(_))
    }

    /// True if the period is defined for `date`, ignoring the active flag.
    pub fn applies_to(&self, date: NaiveDate) -> bool {
        match self.recurrence {
            Recurrence::Weekly(day) => date.weekday() == day,
            Recurrence::On(d) => d == date,
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Confirmed,
    Canceled,
}

impl Status {
    /// Pending and Confirmed reservations hold capacity.
    pub fn is_active(self) -> bool {
        !matches!(self, Status::Canceled)
    }

    pub fn can_transition_to(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Pending, Status::Confirmed)
                | (Status::Pending, Status::Canceled)
                | (Status::Confirmed, Status::Canceled)
                | (Status::Canceled, Status::Confirmed)
                | (Status::Canceled, Status::Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "confirmed" => Ok(Status::Confirmed),
            "canceled" | "cancelled" => Ok(Status::Canceled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Who entered the reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Self-service through the public link.
    Link,
    /// Entered by staff.
    Manual,
}

impl Source {
    pub fn default_status(self) -> Status {
        match self {
            Source::Link => Status::Pending,
            Source::Manual => Status::Confirmed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Link => "link",
            Source::Manual => "manual",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "link" => Ok(Source::Link),
            "manual" => Ok(Source::Manual),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// The part of a reservation an edit may replace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub party_name: String,
    pub date: NaiveDate,
    pub period: String,
    pub adults: u32,
    pub children: u32,
    pub notes: Option<String>,
    pub is_birthday: bool,
}

impl BookingDetails {
    pub fn party_size(&self) -> u32 {
        self.adults.saturating_add(self.children)
    }

    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.date, &self.period)
    }
}

/// Partial change to booking details. Absent fields keep the
/// reservation's current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsEdit {
    pub party_name: Option<String>,
    pub date: Option<NaiveDate>,
    pub period: Option<String>,
    pub adults: Option<u32>,
    pub children: Option<u32>,
    /// `Some(None)` clears the notes.
    pub notes: Option<Option<String>>,
    pub is_birthday: Option<bool>,
}

impl DetailsEdit {
    pub fn apply(&self, current: &BookingDetails) -> BookingDetails {
        BookingDetails {
            party_name: self.party_name.clone().unwrap_or_else(|| current.party_name.clone()),
            date: self.date.unwrap_or(current.date),
            period: self.period.clone().unwrap_or_else(|| current.period.clone()),
            adults: self.adults.unwrap_or(current.adults),
            children: self.children.unwrap_or(current.children),
            notes: self.notes.clone().unwrap_or_else(|| current.notes.clone()),
            is_birthday: self.is_birthday.unwrap_or(current.is_birthday),
        }
    }
}

/// A booking request before it is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// `None` for walk-ins.
    pub client_id: Option<String>,
    pub source: Source,
    /// Initial status; defaults from `source` when unset.
    pub status: Option<Status>,
    pub idempotency_key: Option<String>,
    pub details: BookingDetails,
}

impl Candidate {
    pub fn initial_status(&self) -> Status {
        self.status.unwrap_or_else(|| self.source.default_status())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub client_id: Option<String>,
    pub source: Source,
    pub status: Status,
    pub table: Option<String>,
    pub idempotency_key: Option<String>,
    pub details: BookingDetails,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn party_size(&self) -> u32 {
        self.details.party_size()
    }

    pub fn slot(&self) -> SlotKey {
        self.details.slot()
    }
}

/// `(date, period)` within a tenant; the unit capacity is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub period: String,
}

impl SlotKey {
    pub fn new(date: NaiveDate, period: &str) -> Self {
        Self {
            date,
            period: period.to_string(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.date, self.period)
    }
}

// ── Decisions ────────────────────────────────────────────────────

/// Why a booking request was turned down. Expected business outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    TenantNotConfigured,
    PartySizeOutOfBounds,
    DayClosed,
    PeriodUnavailable,
    PastCutoff,
    CapacityExceeded,
    DuplicateActiveReservation,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::TenantNotConfigured => "tenant_not_configured",
            RejectReason::PartySizeOutOfBounds => "party_size_out_of_bounds",
            RejectReason::DayClosed => "day_closed",
            RejectReason::PeriodUnavailable => "period_unavailable",
            RejectReason::PastCutoff => "past_cutoff",
            RejectReason::CapacityExceeded => "capacity_exceeded",
            RejectReason::DuplicateActiveReservation => "duplicate_active_reservation",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            RejectReason::TenantNotConfigured => "not yet open for booking",
            RejectReason::PartySizeOutOfBounds => "party size outside the accepted range",
            RejectReason::DayClosed => "closed on this day",
            RejectReason::PeriodUnavailable => "period not open on this date",
            RejectReason::PastCutoff => "too late to book for today",
            RejectReason::CapacityExceeded => "no seats left for this period",
            RejectReason::DuplicateActiveReservation => "client already has an active reservation",
        };
        f.write_str(msg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(RejectReason),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}

/// Result of a mutation that may be turned down by business rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Rejected(RejectReason),
}

impl<T> Outcome<T> {
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Rejected(r) => Some(*r),
        }
    }
}

// ── Read models ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateSummary {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub period: String,
    pub reservation_count: u32,
    pub guest_count: u32,
}

// ── WAL records ──────────────────────────────────────────────────

/// Flat event types; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RulesSet {
        rules: BookingRules,
    },
    PeriodUpserted {
        period: Period,
    },
    PeriodRemoved {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        status: Status,
        at: Ms,
    },
    ReservationReplaced {
        id: Ulid,
        details: BookingDetails,
        at: Ms,
    },
    TableAssigned {
        id: Ulid,
        table: Option<String>,
        at: Ms,
    },
}
