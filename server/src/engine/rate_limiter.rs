use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Token-bucket rate limiter keyed by string (client IP).
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    tokens_per_sec: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, tokens_per_sec: f64) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * tokens_per_sec).min(capacity);
        self.updated = now;
    }
}

impl RateLimiter {
    /// `capacity` requests may burst; afterwards one is allowed every
    /// `seconds_per_token` seconds.
    pub fn new(capacity: u32, seconds_per_token: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(capacity),
            tokens_per_sec: 1.0 / seconds_per_token,
        }
    }

    /// Take a token for `key`. Returns false when the bucket is empty.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            updated: now,
        });
        bucket.refill(now, self.capacity, self.tokens_per_sec);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Forget keys untouched for longer than `idle_for`.
    pub fn prune(&self, idle_for: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, b| now.saturating_duration_since(b.updated) <= idle_for);
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    #[cfg(test)]
    fn rewind(&self, key: &str, by: Duration) {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            bucket.updated -= by;
        }
    }
}
