//! Error type for `charitylens-ingest`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  /// The input is not a JSON array, or its structure breaks off. Element
  /// level decode failures never surface here.
  #[error("malformed array at byte {offset}: {message}")]
  Malformed { offset: u64, message: String },

  #[error("store error: {0}")]
  Store(Box<dyn std::error::Error + Send + Sync>),

  #[error("registry error: {0}")]
  Registry(#[from] charitylens_registry::RegistryError),

  #[error("scoring error: {0}")]
  Scoring(#[from] charitylens_core::Error),

  #[error("background task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

impl Error {
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
