use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Reservation, Status};

const CHANNEL_CAPACITY: usize = 256;

/// Channel carrying every reservation change of a tenant.
pub const ALL_CHANNEL: &str = "reservations";

/// Per-date channel name, e.g. `reservations_20241225`.
pub fn date_channel(date: NaiveDate) -> String {
    format!("{ALL_CHANNEL}_{}", date.format("%Y%m%d"))
}

/// True for `reservations` and `reservations_YYYYMMDD` with a real date.
pub fn is_known_channel(channel: &str) -> bool {
    match channel.strip_prefix(ALL_CHANNEL) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|d| d.len() == 8 && NaiveDate::parse_from_str(d, "%Y%m%d").is_ok()),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Created,
    StatusChanged,
    Replaced,
}

/// Payload published on every reservation change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub tenant_id: String,
    pub reservation_id: Ulid,
    pub status: Status,
    pub kind: NoticeKind,
    pub date: NaiveDate,
    pub period: String,
    /// Set when a replace moved the reservation off another date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_date: Option<NaiveDate>,
}

impl Notice {
    pub fn new(tenant_id: &str, reservation: &Reservation, kind: NoticeKind) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            reservation_id: reservation.id,
            status: reservation.status,
            kind,
            date: reservation.details.date,
            period: reservation.details.period.clone(),
            previous_date: None,
        }
    }

    /// Record the date the reservation held before this change.
    pub fn moved_from(mut self, date: NaiveDate) -> Self {
        if date != self.date {
            self.previous_date = Some(date);
        }
        self
    }

    /// JSON text sent as the NOTIFY payload.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Broadcast hub for LISTEN/NOTIFY, keyed by channel name.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Creates the channel if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Fan a notice out to the tenant-wide and the per-date channels. A
    /// move between dates goes out on both days. No-op for channels nobody
    /// listens on.
    pub fn publish(&self, notice: Notice) {
        for date in std::iter::once(notice.date).chain(notice.previous_date) {
            if let Some(sender) = self.channels.get(date_channel(date).as_str()) {
                let _ = sender.send(notice.clone());
            }
        }
        if let Some(sender) = self.channels.get(ALL_CHANNEL) {
            let _ = sender.send(notice);
        }
    }

    /// Drop channels whose last listener went away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
