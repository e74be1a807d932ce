use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Minimum spacing between calls made through one provider instance.
///
/// The time of the last call is held behind an async mutex, so concurrent
/// callers queue up and each waits for the interval after its predecessor.
#[derive(Debug)]
pub struct RateLimiter {
  interval: Duration,
  last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      last_call: Mutex::new(None),
    }
  }

  /// Limiter for a quota of `requests` per minute.
  pub fn per_minute(requests: u32) -> Self {
    Self::new(Duration::from_secs(60) / requests.max(1))
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// Sleep until the interval since the previous call has elapsed.
  pub async fn wait(&self) {
    let mut last_call = self.last_call.lock().await;
    if let Some(previous) = *last_call {
      let ready_at = previous + self.interval;
      if ready_at > Instant::now() {
        trace!(delay_ms = (ready_at - Instant::now()).as_millis() as u64, "rate limited");
        tokio::time::sleep_until(ready_at).await;
      }
    }
    *last_call = Some(Instant::now());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[test]
  fn per_minute_quota() {
    assert_eq!(RateLimiter::per_minute(300).interval(), Duration::from_millis(200));
  }

  #[tokio::test]
  async fn first_call_is_immediate() {
    let limiter = RateLimiter::new(Duration::from_secs(5));
    let start = Instant::now();
    limiter.wait().await;
    assert!(start.elapsed() < Duration::from_secs(1));
  }

  #[tokio::test]
  async fn consecutive_calls_are_spaced() {
    let limiter = RateLimiter::new(Duration::from_millis(40));
    let start = Instant::now();
    for _ in 0..3 {
      limiter.wait().await;
    }
    assert!(start.elapsed() >= Duration::from_millis(80));
  }

  #[tokio::test]
  async fn concurrent_callers_are_serialized() {
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(30)));
    let start = Instant::now();
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.wait().await })
      })
      .collect();
    for handle in handles {
      handle.await.unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(90));
  }
}
