//! [`RegistryClient`]: rate-limited, multi-key access to the registry API.

use std::{
  future::Future,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  RateLimiter, RegistryError, Result,
  limiter::sleep_or_cancel,
  parse::{CharityDetails, FinancialHistoryEntry},
};

pub const DEFAULT_BASE_URL: &str = "https://api.charitycommission.gov.uk/register/api";
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Connection settings for the registry API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub base_url:     String,
  pub api_keys:     Vec<String>,
  pub user_agent:   String,
  pub max_retries:  u32,
  pub timeout:      Duration,
  /// Base of the exponential backoff; attempt `n` waits `unit * 2^(n-1)`.
  pub backoff_unit: Duration,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url:     DEFAULT_BASE_URL.to_owned(),
      api_keys:     Vec::new(),
      user_agent:   default_user_agent(),
      max_retries:  DEFAULT_MAX_RETRIES,
      timeout:      DEFAULT_TIMEOUT,
      backoff_unit: Duration::from_secs(1),
    }
  }
}

pub fn default_user_agent() -> String {
  format!("charitylens-seeder/{}", env!("CARGO_PKG_VERSION"))
}

/// Usage counters for one credential, identified only by its masked form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStats {
  pub masked_key:      String,
  pub total_requests:  u64,
  pub failed_requests: u64,
  pub last_used:       Option<DateTime<Utc>>,
}

/// Stand-in for keys too short to show any part of.
const SHORT_KEY_MASK: &str = "********";

/// Render a key as its first 8 and last 4 characters. Shorter keys all
/// render as the same fixed mask, length included.
pub fn mask_key(key: &str) -> String {
  let chars: Vec<char> = key.chars().collect();
  if chars.len() <= 12 {
    return SHORT_KEY_MASK.to_owned();
  }
  let head: String = chars[..8].iter().collect();
  let tail: String = chars[chars.len() - 4..].iter().collect();
  format!("{head}...{tail}")
}

struct KeySlot {
  key:   String,
  stats: Mutex<KeyStats>,
}

impl KeySlot {
  fn record(&self, update: impl FnOnce(&mut KeyStats)) {
    let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
    update(&mut stats);
  }
}

/// The lookups the crawler needs from the registry.
pub trait Registry: Send + Sync {
  fn fetch_details(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> impl Future<Output = Result<CharityDetails>> + Send;

  fn fetch_financial_history(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> impl Future<Output = Result<Vec<FinancialHistoryEntry>>> + Send;

  fn key_stats(&self) -> Vec<KeyStats>;
}

// ─── Retry state machine ─────────────────────────────────────────────────────

/// Where one logical request stands between HTTP attempts.
enum RetryState {
  Attempting { attempt: u32 },
  Backoff { attempt: u32, wait: Duration, last: RegistryError },
  Succeeded(Bytes),
  ExhaustedRetries(RegistryError),
}

/// HTTP client for the registry JSON API.
///
/// Credentials rotate round-robin per attempt and every attempt first
/// passes the shared [`RateLimiter`].
pub struct RegistryClient {
  http:     reqwest::Client,
  base_url: Url,
  keys:     Vec<KeySlot>,
  next_key: AtomicUsize,
  limiter:  Arc<RateLimiter>,
  config:   ClientConfig,
}

impl RegistryClient {
  pub fn new(config: ClientConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
    let keys: Vec<KeySlot> = config
      .api_keys
      .iter()
      .map(|k| k.trim())
      .filter(|k| !k.is_empty())
      .map(|key| KeySlot {
        key:   key.to_owned(),
        stats: Mutex::new(KeyStats { masked_key: mask_key(key), ..KeyStats::default() }),
      })
      .collect();
    if keys.is_empty() {
      return Err(RegistryError::NoApiKey);
    }

    let base_url = Url::parse(config.base_url.trim_end_matches('/'))
      .ok()
      .filter(|u| !u.cannot_be_a_base())
      .ok_or_else(|| RegistryError::InvalidUrl(config.base_url.clone()))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout)
      .user_agent(config.user_agent.clone())
      .build()?;

    Ok(Self { http, base_url, keys, next_key: AtomicUsize::new(0), limiter, config })
  }

  fn url(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  // ── Endpoints ─────────────────────────────────────────────────────────────

  /// `GET allcharitydetailsV2/{number}/0`
  pub async fn fetch_details(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> Result<CharityDetails> {
    let number = registered_number.to_string();
    self.get_json(self.url(&["allcharitydetailsV2", &number, "0"]), cancel).await
  }

  /// `GET searchCharityName/{query}`
  pub async fn search_by_name(
    &self,
    query: &str,
    cancel: &CancellationToken,
  ) -> Result<Vec<Value>> {
    self.get_json(self.url(&["searchCharityName", query]), cancel).await
  }

  /// `GET charityRegNumber/{number}/0`, wrapped in a list like the name
  /// search.
  pub async fn search_by_number(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> Result<Vec<Value>> {
    let number = registered_number.to_string();
    let found: Value = self
      .get_json(self.url(&["charityRegNumber", &number, "0"]), cancel)
      .await?;
    Ok(vec![found])
  }

  /// `GET charityfinancialhistory/{number}/0`
  pub async fn fetch_financial_history(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> Result<Vec<FinancialHistoryEntry>> {
    let number = registered_number.to_string();
    self
      .get_json(self.url(&["charityfinancialhistory", &number, "0"]), cancel)
      .await
  }

  /// Per-key usage, masked.
  pub fn key_stats(&self) -> Vec<KeyStats> {
    self
      .keys
      .iter()
      .map(|slot| slot.stats.lock().unwrap_or_else(|p| p.into_inner()).clone())
      .collect()
  }

  // ── Request execution ─────────────────────────────────────────────────────

  async fn get_json<T: DeserializeOwned>(
    &self,
    url: Url,
    cancel: &CancellationToken,
  ) -> Result<T> {
    let body = self.get(url, cancel).await?;
    Ok(serde_json::from_slice(&body)?)
  }

  async fn get(&self, url: Url, cancel: &CancellationToken) -> Result<Bytes> {
    let mut state = RetryState::Attempting { attempt: 0 };
    loop {
      state = match state {
        RetryState::Attempting { attempt } => self.attempt(&url, attempt, cancel).await?,
        RetryState::Backoff { attempt, last, .. } if attempt >= self.config.max_retries => {
          RetryState::ExhaustedRetries(last)
        }
        RetryState::Backoff { attempt, wait, last } => {
          debug!(%url, attempt, ?wait, error = %last, "retrying registry request");
          if !wait.is_zero() {
            sleep_or_cancel(wait, cancel).await?;
          }
          RetryState::Attempting { attempt: attempt + 1 }
        }
        RetryState::Succeeded(body) => return Ok(body),
        RetryState::ExhaustedRetries(last) => {
          return Err(RegistryError::RetriesExhausted(Box::new(last)));
        }
      };
    }
  }

  fn backoff(&self, exponent: u32) -> Duration {
    self.config.backoff_unit * 2u32.saturating_pow(exponent)
  }

  /// One HTTP attempt. Terminal outcomes (not found, other client errors,
  /// cancellation) return `Err`; everything retriable becomes `Backoff`.
  async fn attempt(
    &self,
    url: &Url,
    attempt: u32,
    cancel: &CancellationToken,
  ) -> Result<RetryState> {
    let slot = &self.keys[self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len()];
    slot.record(|s| {
      s.total_requests += 1;
      s.last_used = Some(Utc::now());
    });

    self.limiter.wait(cancel).await?;
    if attempt > 0 {
      sleep_or_cancel(self.backoff(attempt - 1), cancel).await?;
    }

    let sent = self
      .http
      .get(url.clone())
      .header(SUBSCRIPTION_KEY_HEADER, &slot.key)
      .send()
      .await;

    let resp = match sent {
      Ok(resp) => resp,
      Err(e) => {
        slot.record(|s| s.failed_requests += 1);
        warn!(%url, key = %mask_key(&slot.key), error = %e, "registry request failed");
        return Ok(RetryState::Backoff {
          attempt,
          wait: Duration::ZERO,
          last: RegistryError::Transport(e),
        });
      }
    };

    let status = resp.status();
    match status {
      StatusCode::OK => Ok(RetryState::Succeeded(resp.bytes().await?)),
      StatusCode::NOT_FOUND => Err(RegistryError::NotFound),
      StatusCode::TOO_MANY_REQUESTS => {
        slot.record(|s| s.failed_requests += 1);
        let wait = resp
          .headers()
          .get(header::RETRY_AFTER)
          .and_then(|v| v.to_str().ok())
          .and_then(|v| v.trim().parse::<u64>().ok())
          .map(Duration::from_secs)
          .unwrap_or_else(|| self.backoff(attempt));
        let _ = resp.bytes().await;
        warn!(key = %mask_key(&slot.key), ?wait, "rate limited by registry");

        // With another key available, rotate instead of waiting.
        let rotate = self.keys.len() > 1 && attempt < self.config.max_retries;
        Ok(RetryState::Backoff {
          attempt,
          wait: if rotate { Duration::ZERO } else { wait },
          last: RegistryError::RateLimited(wait),
        })
      }
      s if s.is_server_error() => {
        slot.record(|s| s.failed_requests += 1);
        let body = resp.text().await.unwrap_or_default();
        warn!(%url, status = s.as_u16(), "registry server error");
        Ok(RetryState::Backoff {
          attempt,
          wait: self.backoff(attempt),
          last: RegistryError::Server { status: s.as_u16(), body },
        })
      }
      s => {
        slot.record(|s| s.failed_requests += 1);
        let body = resp.text().await.unwrap_or_default();
        Err(RegistryError::Client { status: s.as_u16(), body })
      }
    }
  }
}

impl Registry for RegistryClient {
  async fn fetch_details(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> Result<CharityDetails> {
    RegistryClient::fetch_details(self, registered_number, cancel).await
  }

  async fn fetch_financial_history(
    &self,
    registered_number: i64,
    cancel: &CancellationToken,
  ) -> Result<Vec<FinancialHistoryEntry>> {
    RegistryClient::fetch_financial_history(self, registered_number, cancel).await
  }

  fn key_stats(&self) -> Vec<KeyStats> { RegistryClient::key_stats(self) }
}
