//! [`RateLimiter`]: a shared token bucket with a trailing-second guard.

use std::{
  collections::VecDeque,
  sync::{Mutex, MutexGuard},
  time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{RegistryError, Result};

const WINDOW: Duration = Duration::from_secs(1);
const STATS_WINDOW: Duration = Duration::from_secs(60);
const MIN_HISTORY: usize = 100;

/// Request counts over the trailing windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
  pub last_second: usize,
  pub last_minute: usize,
}

struct State {
  tokens:      u32,
  last_refill: Instant,
  /// Completion times, oldest first.
  history:     VecDeque<Instant>,
}

/// Token-bucket limiter shared by every request a crawl makes.
///
/// The bucket holds at most `rate` tokens and refills one token per
/// `1s / rate`. A grant is additionally refused while `rate` grants already
/// fall inside the trailing second, so no rolling one-second window ever
/// sees more than `rate` completions.
pub struct RateLimiter {
  rate:     u32,
  interval: Duration,
  capacity: usize,
  state:    Mutex<State>,
}

impl RateLimiter {
  /// A limiter admitting `rate` requests per second. A rate of zero is
  /// treated as one.
  pub fn new(rate: u32) -> Self {
    let rate = rate.max(1);
    let capacity = MIN_HISTORY.max(rate as usize * STATS_WINDOW.as_secs() as usize);
    Self {
      rate,
      interval: WINDOW / rate,
      capacity,
      state: Mutex::new(State {
        tokens:      rate,
        last_refill: Instant::now(),
        history:     VecDeque::with_capacity(capacity),
      }),
    }
  }

  pub fn rate(&self) -> u32 { self.rate }

  /// Time between refilled tokens.
  pub fn interval(&self) -> Duration { self.interval }

  fn lock(&self) -> MutexGuard<'_, State> {
    // A panic while holding the lock cannot leave the counters torn.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Take a token if one is available right now.
  pub fn try_acquire(&self) -> bool {
    let now = Instant::now();
    let mut state = self.lock();

    let owed = now.duration_since(state.last_refill).as_nanos() / self.interval.as_nanos();
    if owed > 0 {
      let owed = u32::try_from(owed).unwrap_or(u32::MAX);
      state.tokens = state.tokens.saturating_add(owed).min(self.rate);
      state.last_refill = now;
    }
    if state.tokens == 0 {
      return false;
    }

    let rate = self.rate as usize;
    if state.history.len() >= rate {
      let oldest_in_window = state.history[state.history.len() - rate];
      if now.duration_since(oldest_in_window) < WINDOW {
        return false;
      }
    }

    state.tokens -= 1;
    if state.history.len() == self.capacity {
      state.history.pop_front();
    }
    state.history.push_back(now);
    true
  }

  /// Block until a token is granted, sleeping one refill interval between
  /// checks. Returns [`RegistryError::Cancelled`] as soon as `cancel` fires.
  pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
    loop {
      if cancel.is_cancelled() {
        return Err(RegistryError::Cancelled);
      }
      if self.try_acquire() {
        return Ok(());
      }
      tokio::select! {
        _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
        _ = tokio::time::sleep(self.interval) => {}
      }
    }
  }

  pub fn stats(&self) -> LimiterStats {
    let now = Instant::now();
    let state = self.lock();
    let within = |window: Duration| {
      state
        .history
        .iter()
        .filter(|t| now.duration_since(**t) < window)
        .count()
    };
    LimiterStats { last_second: within(WINDOW), last_minute: within(STATS_WINDOW) }
  }
}

/// Sleep for `wait` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<()> {
  tokio::select! {
    _ = cancel.cancelled() => Err(RegistryError::Cancelled),
    _ = tokio::time::sleep(wait) => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test(start_paused = true)]
  async fn never_exceeds_rate_in_any_second() {
    let limiter = RateLimiter::new(5);
    let cancel = CancellationToken::new();

    let mut grants = Vec::new();
    for _ in 0..23 {
      limiter.wait(&cancel).await.unwrap();
      grants.push(Instant::now());
    }

    for pair in grants.windows(6) {
      assert!(
        pair[5].duration_since(pair[0]) >= WINDOW,
        "six grants inside one second"
      );
    }
  }

  #[tokio::test(start_paused = true)]
  async fn full_bucket_grants_immediately() {
    let limiter = RateLimiter::new(4);
    let cancel = CancellationToken::new();
    let start = Instant::now();
    for _ in 0..4 {
      limiter.wait(&cancel).await.unwrap();
    }
    assert_eq!(Instant::now(), start);
    assert!(!limiter.try_acquire());
  }

  #[tokio::test(start_paused = true)]
  async fn refills_after_an_interval() {
    let limiter = RateLimiter::new(2);
    assert!(limiter.try_acquire());
    assert!(limiter.try_acquire());
    assert!(!limiter.try_acquire());

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert!(limiter.try_acquire());
  }

  #[tokio::test(start_paused = true)]
  async fn cancelled_before_waiting() {
    let limiter = RateLimiter::new(1);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(limiter.wait(&cancel).await, Err(RegistryError::Cancelled)));
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_interrupts_a_blocked_wait() {
    let limiter = RateLimiter::new(1);
    let cancel = CancellationToken::new();
    limiter.wait(&cancel).await.unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      trigger.cancel();
    });

    let start = Instant::now();
    assert!(matches!(limiter.wait(&cancel).await, Err(RegistryError::Cancelled)));
    assert!(Instant::now().duration_since(start) < WINDOW);
  }

  #[tokio::test(start_paused = true)]
  async fn stats_count_trailing_windows() {
    let limiter = RateLimiter::new(10);
    let cancel = CancellationToken::new();
    for _ in 0..3 {
      limiter.wait(&cancel).await.unwrap();
    }
    assert_eq!(limiter.stats(), LimiterStats { last_second: 3, last_minute: 3 });

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(limiter.stats(), LimiterStats { last_second: 0, last_minute: 3 });
  }

  #[test]
  fn zero_rate_is_clamped() {
    let limiter = RateLimiter::new(0);
    assert_eq!(limiter.rate(), 1);
    assert_eq!(limiter.interval(), WINDOW);
  }
}
