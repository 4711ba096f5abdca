//! Error types for `charitylens-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("organization not found: {0}")]
  OrganizationNotFound(i64),

  #[error("unknown confidence level: {0:?}")]
  UnknownConfidence(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Box a backend error from any [`crate::store::CharityStore`].
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
