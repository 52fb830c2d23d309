/// Serialized `/api/contributions` response kept between upstream fetches.
pub struct CalendarCache {
    pub body: String,
    pub cached_at: i64, // unix seconds, UTC
}

impl CalendarCache {
    pub fn is_fresh(&self, now: i64, lifetime_secs: i64) -> bool {
        now - self.cached_at < lifetime_secs
    }
}
