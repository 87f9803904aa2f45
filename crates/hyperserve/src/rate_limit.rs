//! Per-client-IP token buckets.
//!
//! Each bucket refills lazily from elapsed wall time, clamped at the
//! burst capacity. The outer map takes a read lock on the hot path and a
//! write lock only to insert; token mutation happens under a per-bucket
//! mutex. A background sweeper evicts buckets idle longer than
//! `max(10 min, 5 × refill interval)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Floor on the idle eviction window.
const MIN_IDLE_EVICTION: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_touch: Instant,
}

#[derive(Debug)]
struct Bucket {
    state: Mutex<BucketState>,
}

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Seconds until a token will be available (≥ 1 on refusal)
    pub retry_after: u64,
}

/// Token-bucket rate limiter keyed by normalized client IP.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
    /// Tokens per second
    rate: f64,
    /// Bucket capacity
    capacity: f64,
    /// Trust the first `X-Forwarded-For` entry
    trust_forwarded: bool,
}

impl RateLimiter {
    /// Limiter admitting `rate` requests/second with `burst` capacity.
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            rate: f64::from(rate.max(1)),
            capacity: f64::from(burst.max(1)),
            trust_forwarded: false,
        }
    }

    /// Trust `X-Forwarded-For` (off by default; enable behind a proxy).
    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    /// Configured steady rate, for the `X-RateLimit-Limit` header.
    pub fn rate(&self) -> u32 {
        self.rate as u32
    }

    /// Try to take one token for `client_ip`.
    pub fn try_acquire(&self, client_ip: &str) -> Decision {
        let bucket = self.bucket_for(client_ip);
        let mut state = bucket.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
        state.last_touch = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Decision {
                allowed: true,
                retry_after: 0,
            }
        } else {
            let deficit = 1.0 - state.tokens;
            let wait = (deficit / self.rate).ceil().max(1.0) as u64;
            Decision {
                allowed: false,
                retry_after: wait,
            }
        }
    }

    fn bucket_for(&self, client_ip: &str) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.read().get(client_ip) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write();
        Arc::clone(buckets.entry(client_ip.to_string()).or_insert_with(|| {
            let now = Instant::now();
            Arc::new(Bucket {
                state: Mutex::new(BucketState {
                    tokens: self.capacity,
                    last_refill: now,
                    last_touch: now,
                }),
            })
        }))
    }

    /// Extract and normalize the client IP for a request.
    pub fn client_ip(&self, headers: &http::HeaderMap, peer: std::net::SocketAddr) -> String {
        if self.trust_forwarded {
            if let Some(forwarded) = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
            {
                if let Some(first) = forwarded.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        return normalize_ip(first);
                    }
                }
            }
        }
        peer.ip().to_string()
    }

    /// Evict buckets idle longer than the eviction window.
    pub fn sweep(&self) {
        let idle_limit = Duration::from_secs_f64((5.0 / self.rate).max(
            MIN_IDLE_EVICTION.as_secs_f64(),
        ));
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.state.lock().last_touch) <= idle_limit);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = buckets.len(), "rate limiter sweep");
        }
    }

    /// Number of live buckets (observability).
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Spawn the periodic sweeper; exits on cancellation.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => limiter.sweep(),
                }
            }
        });
    }
}

/// Strip ports and brackets: `[::1]:8080` and `1.2.3.4:5` become bare
/// addresses.
fn normalize_ip(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return rest[..end].to_string();
        }
    }
    // v4:port has exactly one colon; bare v6 has several.
    if raw.matches(':').count() == 1 {
        if let Some((host, _port)) = raw.rsplit_once(':') {
            return host.to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_refusal() {
        let limiter = RateLimiter::new(2, 2);
        assert!(limiter.try_acquire("1.2.3.4").allowed);
        assert!(limiter.try_acquire("1.2.3.4").allowed);

        let refused = limiter.try_acquire("1.2.3.4");
        assert!(!refused.allowed);
        assert!(refused.retry_after >= 1);
    }

    #[test]
    fn buckets_are_per_ip() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.try_acquire("10.0.0.1").allowed);
        assert!(!limiter.try_acquire("10.0.0.1").allowed);
        assert!(limiter.try_acquire("10.0.0.2").allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(20, 1);
        assert!(limiter.try_acquire("1.1.1.1").allowed);
        assert!(!limiter.try_acquire("1.1.1.1").allowed);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(limiter.try_acquire("1.1.1.1").allowed);
    }

    #[test]
    fn refill_clamps_at_capacity() {
        let limiter = RateLimiter::new(100, 2);
        let bucket = limiter.bucket_for("9.9.9.9");
        {
            let mut state = bucket.state.lock();
            state.tokens = 0.0;
            state.last_refill = Instant::now() - Duration::from_secs(60);
        }
        // A minute at 100/s would be 6000 tokens; capacity caps at 2.
        assert!(limiter.try_acquire("9.9.9.9").allowed);
        assert!(limiter.try_acquire("9.9.9.9").allowed);
        assert!(!limiter.try_acquire("9.9.9.9").allowed);
    }

    #[test]
    fn sweep_evicts_idle_buckets() {
        let limiter = RateLimiter::new(10, 2);
        limiter.try_acquire("8.8.8.8");
        {
            let buckets = limiter.buckets.read();
            let bucket = buckets.get("8.8.8.8").unwrap();
            bucket.state.lock().last_touch = Instant::now() - Duration::from_secs(3600);
        }
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn ip_normalization() {
        assert_eq!(normalize_ip("1.2.3.4:8080"), "1.2.3.4");
        assert_eq!(normalize_ip("1.2.3.4"), "1.2.3.4");
        assert_eq!(normalize_ip("[::1]:8080"), "::1");
        assert_eq!(normalize_ip("2001:db8::1"), "2001:db8::1");
    }

    #[test]
    fn forwarded_for_requires_trust() {
        let peer: std::net::SocketAddr = "203.0.113.7:1234".parse().unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.1, 10.0.0.1".parse().unwrap());

        let untrusting = RateLimiter::new(1, 1);
        assert_eq!(untrusting.client_ip(&headers, peer), "203.0.113.7");

        let trusting = RateLimiter::new(1, 1).trust_forwarded_for(true);
        assert_eq!(trusting.client_ip(&headers, peer), "198.51.100.1");
    }
}
