use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;

/// 1970-01-01. Nothing before the epoch is bookable.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single service may not run longer than a day.
pub const MAX_SERVICE_DURATION_MS: Ms = 86_400_000;

pub const MAX_ACTIVE_PER_LANE: usize = 100_000;
pub const MAX_SLOTS_PER_WORKSPACE: u32 = 10_000;

/// How many times a unit of work re-plans its lane set before giving up.
pub const MAX_LOCK_ATTEMPTS: usize = 8;
