//! Client-side view counting helpers.
//!
//! Two stores are involved: a session store holding the last batch of view
//! counts for five minutes, and a long-lived store holding one "viewed"
//! marker per article so a reader is counted at most once a day. Storage
//! problems never surface to the caller: reads degrade to "nothing cached /
//! not viewed" and writes are best-effort.

use std::collections::HashMap;
use std::num::ParseIntError;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::storage::{Storage, StorageError};

/// Host of the remote view counter.
pub const VIEW_API_BASE: &str = "https://api.kon-carol.xyz";

pub const CACHE_KEY: &str = "viewCounts";
pub const CACHE_TIMESTAMP_KEY: &str = "viewCountsTimestamp";
pub const VIEWED_KEY_PREFIX: &str = "viewed:";

pub const CACHE_TTL_MILLIS: i64 = 5 * 60 * 1000;
pub const VIEWED_WINDOW_MILLIS: i64 = 24 * 60 * 60 * 1000;

// Same unreserved set as JavaScript's encodeURIComponent.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub type ViewCounts = HashMap<String, u64>;

#[derive(Error, Debug)]
enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("view counts are not valid JSON: {0}")]
    Counts(#[from] serde_json::Error),

    #[error("cached timestamp is not a number: {0}")]
    Timestamp(#[from] ParseIntError),
}

/// Render a count the way the post list shows it: `999`, `1.5k`, `2.5M`.
///
/// The decimal follows JavaScript's `toFixed(1)` on the quotient: the exact
/// value of the `f64` is rounded half-up, so `1250` becomes `1.3k` while
/// `1150` (stored as 1.1499...) stays `1.1k`.
pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        abbreviate(n, 1_000_000, "M")
    } else if n >= 1_000 {
        abbreviate(n, 1_000, "k")
    } else {
        n.to_string()
    }
}

fn abbreviate(n: u64, unit: u64, suffix: &str) -> String {
    let quotient = n as f64 / unit as f64;
    // Every digit of an f64 above 1.0 fits in 60 decimals.
    let exact = format!("{quotient:.60}");
    let (whole, fraction) = exact.split_once('.').unwrap_or((exact.as_str(), "0"));

    let mut digits = fraction.bytes();
    let tenth = u64::from(digits.next().unwrap_or(b'0') - b'0');
    let round_up = u64::from(digits.next().unwrap_or(b'0') >= b'5');

    let tenths = whole.parse::<u64>().unwrap_or(0) * 10 + tenth + round_up;
    format!("{}.{}{}", tenths / 10, tenths % 10, suffix)
}

/// Storage key of the "viewed" marker for an article.
pub fn viewed_key(id: &str) -> String {
    format!(
        "{VIEWED_KEY_PREFIX}{}",
        utf8_percent_encode(id, URI_COMPONENT)
    )
}

/// Structural check for the remote batch endpoint's payload:
/// `{"success": true, "views": { ... }}`.
pub fn is_valid_batch_response(payload: &Value) -> bool {
    match payload {
        Value::Object(map) => {
            map.get("success") == Some(&Value::Bool(true))
                && matches!(map.get("views"), Some(Value::Object(_)))
        }
        _ => false,
    }
}

/// Typed view of a validated batch payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchViews {
    pub views: ViewCounts,
}

/// Validate and convert a batch payload. Entries whose value is not a
/// non-negative integer are skipped.
pub fn parse_batch_response(payload: &Value) -> Option<BatchViews> {
    if !is_valid_batch_response(payload) {
        return None;
    }

    let views = payload["views"]
        .as_object()?
        .iter()
        .filter_map(|(id, count)| count.as_u64().map(|c| (id.clone(), c)))
        .collect();

    Some(BatchViews { views })
}

pub struct ViewTracker<S, C = SystemClock> {
    session: S,
    local: S,
    clock: C,
}

impl<S: Storage> ViewTracker<S> {
    pub fn new(session: S, local: S) -> Self {
        Self::with_clock(session, local, SystemClock)
    }
}

impl<S: Storage, C: Clock> ViewTracker<S, C> {
    pub fn with_clock(session: S, local: S, clock: C) -> Self {
        Self {
            session,
            local,
            clock,
        }
    }

    /// Cached counts if they are younger than five minutes, otherwise empty.
    pub fn get_cached_views(&self) -> ViewCounts {
        match self.read_cache() {
            Ok(Some(views)) => views,
            Ok(None) => ViewCounts::new(),
            Err(e) => {
                debug!("Failed to read view cache: {}", e);
                ViewCounts::new()
            }
        }
    }

    fn read_cache(&self) -> Result<Option<ViewCounts>, CacheError> {
        let cached = self.session.get(CACHE_KEY)?;
        let timestamp = self.session.get(CACHE_TIMESTAMP_KEY)?;

        let (Some(cached), Some(timestamp)) = (cached, timestamp) else {
            return Ok(None);
        };
        if cached.is_empty() || timestamp.is_empty() {
            return Ok(None);
        }

        let cached_at: i64 = timestamp.trim().parse()?;
        let fresh = self
            .clock
            .now_millis()
            .checked_sub(cached_at)
            .is_some_and(|age| age < CACHE_TTL_MILLIS);
        if !fresh {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&cached)?))
    }

    pub fn set_cached_views(&self, views: &ViewCounts) {
        if let Err(e) = self.write_cache(views) {
            debug!("Failed to write view cache: {}", e);
        }
    }

    fn write_cache(&self, views: &ViewCounts) -> Result<(), CacheError> {
        let body = serde_json::to_string(views)?;
        self.session.set(CACHE_KEY, &body)?;
        self.session
            .set(CACHE_TIMESTAMP_KEY, &self.clock.now_millis().to_string())?;
        Ok(())
    }

    /// Whether this client already counted `id` within the last 24 hours.
    pub fn has_viewed(&self, id: &str) -> bool {
        let key = viewed_key(id);
        let last_viewed = match self.local.get(&key) {
            Ok(Some(value)) if !value.is_empty() => value,
            Ok(_) => return false,
            Err(e) => {
                debug!("Failed to check viewed status for {}: {}", id, e);
                return false;
            }
        };

        match last_viewed.trim().parse::<i64>() {
            Ok(last) => self
                .clock
                .now_millis()
                .checked_sub(last)
                .is_some_and(|age| age < VIEWED_WINDOW_MILLIS),
            Err(e) => {
                debug!("Ignoring corrupt viewed marker for {}: {}", id, e);
                false
            }
        }
    }

    pub fn mark_viewed(&self, id: &str) {
        let now = self.clock.now_millis().to_string();
        if let Err(e) = self.local.set(&viewed_key(id), &now) {
            debug!("Failed to mark {} as viewed: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    const START: i64 = 1_760_000_000_000;

    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable)
        }

        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::QuotaExceeded(key.to_string()))
        }
    }

    fn fixture() -> (MemoryStorage, MemoryStorage, ManualClock) {
        (MemoryStorage::new(), MemoryStorage::new(), ManualClock::new(START))
    }

    fn counts(pairs: &[(&str, u64)]) -> ViewCounts {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn format_count_abbreviates() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1.0k");
        assert_eq!(format_count(1500), "1.5k");
        assert_eq!(format_count(1250), "1.3k");
        assert_eq!(format_count(1249), "1.2k");
        assert_eq!(format_count(1150), "1.1k");
        assert_eq!(format_count(1_150_000), "1.1M");
        assert_eq!(format_count(1_050), "1.1k");
        assert_eq!(format_count(999_999), "1000.0k");
        assert_eq!(format_count(1_000_000), "1.0M");
        assert_eq!(format_count(2_500_000), "2.5M");
        assert_eq!(format_count(12_340_000), "12.3M");
    }

    #[test]
    fn viewed_key_uses_uri_component_encoding() {
        assert_eq!(viewed_key("hello-world"), "viewed:hello-world");
        assert_eq!(viewed_key("a b/c"), "viewed:a%20b%2Fc");
        assert_eq!(viewed_key("it's (ok)!*~._"), "viewed:it's%20(ok)!*~._");
        assert_eq!(
            viewed_key("数据库事务"),
            "viewed:%E6%95%B0%E6%8D%AE%E5%BA%93%E4%BA%8B%E5%8A%A1"
        );
    }

    #[test]
    fn cached_views_round_trip_within_ttl() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        assert!(tracker.get_cached_views().is_empty());

        let views = counts(&[("spring-mvc", 42), ("网站速度优化", 7)]);
        tracker.set_cached_views(&views);
        clock.advance(CACHE_TTL_MILLIS - 1);

        assert_eq!(tracker.get_cached_views(), views);
    }

    #[test]
    fn cached_views_expire_after_ttl() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        tracker.set_cached_views(&counts(&[("a", 1)]));
        clock.advance(CACHE_TTL_MILLIS);

        assert!(tracker.get_cached_views().is_empty());
    }

    #[test]
    fn corrupted_cache_reads_as_empty() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        session.set(CACHE_KEY, "{not json").unwrap();
        session.set(CACHE_TIMESTAMP_KEY, &START.to_string()).unwrap();
        assert!(tracker.get_cached_views().is_empty());

        session.set(CACHE_KEY, r#"{"a":1}"#).unwrap();
        session.set(CACHE_TIMESTAMP_KEY, "yesterday").unwrap();
        assert!(tracker.get_cached_views().is_empty());

        session.set(CACHE_TIMESTAMP_KEY, &START.to_string()).unwrap();
        assert_eq!(tracker.get_cached_views(), counts(&[("a", 1)]));
    }

    #[test]
    fn out_of_range_cache_timestamp_reads_as_expired() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        session.set(CACHE_KEY, r#"{"a":1}"#).unwrap();
        session.set(CACHE_TIMESTAMP_KEY, &i64::MIN.to_string()).unwrap();
        assert!(tracker.get_cached_views().is_empty());
    }

    #[test]
    fn viewed_marker_lasts_a_day() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        assert!(!tracker.has_viewed("spring-mvc"));
        tracker.mark_viewed("spring-mvc");
        assert!(tracker.has_viewed("spring-mvc"));
        assert!(!tracker.has_viewed("other-post"));

        clock.advance(VIEWED_WINDOW_MILLIS - 1);
        assert!(tracker.has_viewed("spring-mvc"));

        clock.advance(1);
        assert!(!tracker.has_viewed("spring-mvc"));
    }

    #[test]
    fn markers_and_cache_use_separate_stores() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        tracker.mark_viewed("a b");
        tracker.set_cached_views(&counts(&[("a b", 3)]));

        assert_eq!(local.get("viewed:a%20b").unwrap(), Some(START.to_string()));
        assert_eq!(local.len(), 1);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn corrupt_marker_counts_as_not_viewed() {
        let (session, local, clock) = fixture();
        let tracker = ViewTracker::with_clock(&session, &local, &clock);

        local.set(&viewed_key("post"), "garbage").unwrap();
        assert!(!tracker.has_viewed("post"));

        local.set(&viewed_key("post"), &i64::MIN.to_string()).unwrap();
        assert!(!tracker.has_viewed("post"));
    }

    #[test]
    fn broken_storage_fails_open_and_silently() {
        let clock = ManualClock::new(START);
        let tracker = ViewTracker::with_clock(BrokenStorage, BrokenStorage, &clock);

        tracker.set_cached_views(&counts(&[("a", 1)]));
        tracker.mark_viewed("a");

        assert!(tracker.get_cached_views().is_empty());
        assert!(!tracker.has_viewed("a"));
    }

    #[test]
    fn batch_response_validation() {
        assert!(is_valid_batch_response(&json!({"success": true, "views": {"a": 1}})));
        assert!(is_valid_batch_response(&json!({"success": true, "views": {}})));
        assert!(!is_valid_batch_response(&json!({"success": true, "views": []})));
        assert!(!is_valid_batch_response(&json!({"success": true, "views": null})));
        assert!(!is_valid_batch_response(&json!({"success": true})));
        assert!(!is_valid_batch_response(&json!({"success": "true", "views": {}})));
        assert!(!is_valid_batch_response(&json!({"success": false, "views": {}})));
        assert!(!is_valid_batch_response(&json!([])));
        assert!(!is_valid_batch_response(&Value::Null));
    }

    #[test]
    fn parse_batch_response_drops_non_counts() {
        let payload = json!({
            "success": true,
            "views": {"a": 3, "b": -1, "c": "7", "d": 1.5, "e": 0}
        });
        let parsed = parse_batch_response(&payload).unwrap();
        assert_eq!(parsed.views, counts(&[("a", 3), ("e", 0)]));

        assert!(parse_batch_response(&json!({"success": true, "views": []})).is_none());
    }
}
