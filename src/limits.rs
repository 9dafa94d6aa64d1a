use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single reservation (long-term leases included).
pub const MAX_SPAN_DURATION_MS: Ms = 3 * 366 * DAY_MS;

/// Widest window a session or availability query may cover.
pub const MAX_WINDOW_MS: Ms = 400 * DAY_MS;

pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 10_000;
pub const MAX_CUSTOMER_REF_LEN: usize = 256;
pub const MAX_RESOURCES_PER_SCOPE: usize = 5_000;
