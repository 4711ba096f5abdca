//! Error type for `charitylens-registry`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
  /// The registry has no record for the identifier. Never retried.
  #[error("not found")]
  NotFound,

  #[error("rate limited, retry after {0:?}")]
  RateLimited(Duration),

  #[error("server error {status}: {body}")]
  Server { status: u16, body: String },

  /// A 4xx other than 404 and 429. Never retried.
  #[error("client error {status}: {body}")]
  Client { status: u16, body: String },

  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("decode error: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("cancelled")]
  Cancelled,

  #[error("max retries exceeded: {0}")]
  RetriesExhausted(Box<RegistryError>),

  #[error("no API key configured")]
  NoApiKey,

  #[error("invalid base URL: {0}")]
  InvalidUrl(String),

  #[error("archive error: {0}")]
  Archive(#[from] zip::result::ZipError),

  #[error("archive contains no regular file")]
  EmptyArchive,

  #[error("some downloads failed: {0}")]
  Downloads(String),

  #[error("background task failed: {0}")]
  Join(#[from] tokio::task::JoinError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl RegistryError {
  pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound) }

  pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled) }
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
