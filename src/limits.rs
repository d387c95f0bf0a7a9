use std::time::Duration;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_PERIODS_PER_TENANT: usize = 512;
pub const MAX_RESERVATIONS_PER_TENANT: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_LABEL_LEN: usize = 64;
pub const MAX_CLIENT_ID_LEN: usize = 128;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Upper bound for any configured party size.
pub const MAX_PARTY_SIZE: u32 = 1_000;

/// Widest date window a summary or listing may cover.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

/// Attempts made when a reservation moves between slots while a mutation
/// waits for its lock.
pub const MAX_LOCK_RETRIES: usize = 3;

/// Longest a mutation waits for a slot lock before reporting contention.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(250);
