use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-host minimum-interval gate. No two acquisitions for the same host
/// complete closer together than `min_interval`, measured at acquisition
/// time. Hosts never wait on each other beyond the map lock itself.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    slots: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Claims the next free slot for `host` and sleeps until it arrives.
    /// The slot is reserved under the lock before sleeping, so concurrent
    /// callers for one host queue up at interval spacing instead of racing
    /// for the same slot.
    pub async fn acquire(&self, host: &str) {
        let wait = {
            let mut slots = self.slots.lock().await;
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(&prev) => {
                    let ready = prev + self.min_interval;
                    if ready > now {
                        ready
                    } else {
                        now
                    }
                }
                None => now,
            };
            slots.insert(host.to_string(), slot);
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            tracing::debug!(host, wait_ms = wait.as_millis() as u64, "rate limit wait");
            tokio::time::sleep(wait).await;
        }
    }
}
