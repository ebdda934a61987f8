//! crates/moa_core/src/window.rs
//!
//! Day-window resolution for diary aggregation. This is the service's
//! sole time-zone contract: a diary day is the fixed UTC+9 local day,
//! local midnight through the next local midnight, expressed as UTC
//! instants and treated as a half-open interval `[start, end)`.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

/// The fixed local offset used for day boundaries (KST, no DST).
const LOCAL_OFFSET_SECS: i32 = 9 * 3600;

/// Computes the UTC range covering the given local calendar day.
pub fn day_range_utc(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECS).expect("static offset is in range");
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is a valid time");
    // A fixed offset maps every local datetime to exactly one instant.
    let start = offset
        .from_local_datetime(&midnight)
        .single()
        .expect("fixed offsets are unambiguous")
        .with_timezone(&Utc);
    (start, start + Duration::days(1))
}
