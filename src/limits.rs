//! Hard limits enforced by the engine and the tenant manager.

use std::time::Duration;

use crate::model::Money;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_RESOURCES_PER_TENANT: usize = 100_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 2_048;

/// Seats for events/experiences, guests per reservation for stays.
pub const MAX_CAPACITY: u32 = 100_000;

/// Minor units. Keeps `units * base_price + fees` far away from `i64::MAX`.
pub const MAX_PRICE: Money = 10_000_000_000;

pub const MAX_STAY_NIGHTS: i64 = 365;
pub const MAX_QUERY_WINDOW_DAYS: i64 = 1_096;

/// Earliest and latest accepted calendar dates, as (year, month, day).
pub const MIN_VALID_DATE: (i32, u32, u32) = (2000, 1, 1);
pub const MAX_VALID_DATE: (i32, u32, u32) = (2199, 12, 31);

/// How long an admission waits for the resource lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
