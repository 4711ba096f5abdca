//! [`ScoringEngine`] loads an organization's stored data and applies the
//! [`ScoringPolicy`].

use chrono::Utc;

use crate::{
  Error, Result,
  score::{Score, ScoringInputs, ScoringPolicy},
  store::CharityStore,
};

/// Computes scores on demand against any [`CharityStore`].
///
/// Cloning is as cheap as cloning the store.
#[derive(Clone)]
pub struct ScoringEngine<S> {
  store:  S,
  policy: ScoringPolicy,
}

impl<S: CharityStore> ScoringEngine<S> {
  pub fn new(store: S) -> Self { Self::with_policy(store, ScoringPolicy::default()) }

  pub fn with_policy(store: S, policy: ScoringPolicy) -> Self { Self { store, policy } }

  pub fn policy(&self) -> &ScoringPolicy { &self.policy }

  pub fn store(&self) -> &S { &self.store }

  /// Gather the scoring inputs for the primary organization behind
  /// `registered_number`, removed or not.
  pub async fn load_inputs(&self, registered_number: i64) -> Result<ScoringInputs> {
    let organization = self
      .store
      .get_organization(registered_number, true)
      .await
      .map_err(Error::store)?
      .ok_or(Error::OrganizationNotFound(registered_number))?;

    let latest_financial = self
      .store
      .latest_financial(registered_number)
      .await
      .map_err(Error::store)?;
    let trustee_count = self
      .store
      .trustee_count(registered_number)
      .await
      .map_err(Error::store)?;
    let filings = self
      .store
      .filing_history(registered_number)
      .await
      .map_err(Error::store)?;

    Ok(ScoringInputs { organization, latest_financial, trustee_count, filings })
  }

  /// Compute the score for `registered_number`. With `persist` set the
  /// result replaces any stored score; otherwise nothing is written.
  pub async fn score(&self, registered_number: i64, persist: bool) -> Result<Score> {
    let inputs = self.load_inputs(registered_number).await?;
    let score = self.policy.compute(&inputs, Utc::now());

    if persist {
      self
        .store
        .save_score(score.clone())
        .await
        .map_err(Error::store)?;
    }
    Ok(score)
  }
}
