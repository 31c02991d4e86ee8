/// Timestamp keys for the time-series store.
///
/// Every series in the store is keyed by local wall-clock time formatted as
/// `YYYY-MM-DD-HH_MM_SS`. The format is fixed-width and big-endian, so the
/// lexicographic order of keys is also their temporal order. Keys in any other
/// format break that property and are ignored by the resolver.
///
/// # Clock injection
/// Functions that depend on the current time take a `now` parameter rather
/// than calling `Utc::now()` internally, keeping them deterministic in tests.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// `strftime` pattern of a store key.
pub const KEY_FORMAT: &str = "%Y-%m-%d-%H_%M_%S";

/// Length of every well-formed key.
const KEY_LEN: usize = 19;

/// Builds the local offset from whole hours east of UTC (`7` for WIB).
pub fn local_offset(utc_offset_hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)
}

/// Formats an instant as a store key in the given local offset.
pub fn format_key(instant: DateTime<Utc>, offset: &FixedOffset) -> String {
    instant.with_timezone(offset).format(KEY_FORMAT).to_string()
}

/// Parses a store key as local time in the given offset.
///
/// Returns `None` for anything that is not exactly `YYYY-MM-DD-HH_MM_SS`,
/// including marker keys such as `error`.
pub fn parse_key(key: &str, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    if key.len() != KEY_LEN {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(key, KEY_FORMAT).ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// True if `key` has the store key shape, independent of offset.
pub fn is_key(key: &str) -> bool {
    key.len() == KEY_LEN && NaiveDateTime::parse_from_str(key, KEY_FORMAT).is_ok()
}

/// Age of a keyed reading in whole minutes relative to `now`.
///
/// Negative when the key lies in the future (forecast entries do).
pub fn key_age_minutes_at(key: &str, offset: &FixedOffset, now: DateTime<Utc>) -> Option<i64> {
    parse_key(key, offset).map(|t| (now - t).num_minutes())
}

// ---------------------------------------------------------------------------
// Key minting
// ---------------------------------------------------------------------------

/// Mints write keys for decisions.
///
/// Keys have one-second resolution. Within one process every minted key is
/// strictly greater than the previous one: if the clock has not advanced a
/// full second since the last key (or stepped backwards), the new key is the
/// last key plus one second.
#[derive(Debug)]
pub struct KeyMinter {
    offset: FixedOffset,
    last_secs: AtomicI64,
}

impl KeyMinter {
    pub fn new(offset: FixedOffset) -> Self {
        KeyMinter {
            offset,
            last_secs: AtomicI64::new(i64::MIN),
        }
    }

    pub fn offset(&self) -> &FixedOffset {
        &self.offset
    }

    /// Mints a key for the current time.
    pub fn mint(&self) -> String {
        self.mint_at(Utc::now())
    }

    /// Mints a key as if the clock read `now`.
    pub fn mint_at(&self, now: DateTime<Utc>) -> String {
        let wanted = now.timestamp();
        let mut prev = self.last_secs.load(Ordering::Acquire);
        let chosen = loop {
            let candidate = if prev == i64::MIN { wanted } else { wanted.max(prev + 1) };
            match self.last_secs.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break candidate,
                Err(actual) => prev = actual,
            }
        };

        let instant = DateTime::<Utc>::from_timestamp(chosen, 0).unwrap_or(now);
        format_key(instant, &self.offset)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
