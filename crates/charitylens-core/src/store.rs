//! The `CharityStore` trait and the batch types it accepts.
//!
//! The trait is implemented by storage backends (e.g.
//! `charitylens-store-sqlite`). The importer, crawler and scoring engine
//! depend on this abstraction, not on any concrete backend.
//!
//! Every write is an upsert keyed by the record's natural key: last writer
//! wins and nothing is versioned.

use std::future::Future;

use crate::{
  finance::{FilingHistoryRecord, FinancialRecord},
  organization::{Organization, Trustee},
  score::Score,
};

// ─── Write payloads ──────────────────────────────────────────────────────────

/// An organization dump row, optionally carrying the latest-year totals
/// published alongside it.
#[derive(Debug, Clone)]
pub struct OrganizationImport {
  pub organization: Organization,
  pub financial:    Option<FinancialRecord>,
}

/// Everything parsed out of one registry detail response. Persisted
/// atomically so a crash never leaves a partial record.
#[derive(Debug, Clone)]
pub struct FetchedCharity {
  pub organization: Organization,
  pub financial:    Option<FinancialRecord>,
  pub trustees:     Vec<Trustee>,
}

/// Result of a batched upsert. Rows that the backend rejects individually
/// are counted and described but do not abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
  pub written:  usize,
  pub failed:   usize,
  /// One message per rejected row.
  pub failures: Vec<String>,
}

impl BatchOutcome {
  pub fn record_failure(&mut self, message: String) {
    self.failed += 1;
    self.failures.push(message);
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a CharityLens store backend.
///
/// All methods return `Send` futures so the trait can be shared across
/// tokio worker tasks.
pub trait CharityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Organizations ─────────────────────────────────────────────────────

  /// Whether any row (primary or linked) exists for a registration number.
  fn organization_exists(
    &self,
    registered_number: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The primary (linked id 0) row for a registration number. Removed
  /// organizations are hidden unless `include_removed` is set.
  fn get_organization(
    &self,
    registered_number: i64,
    include_removed: bool,
  ) -> impl Future<Output = Result<Option<Organization>, Self::Error>> + Send + '_;

  /// Registration numbers of primary, non-removed organizations that have
  /// no score yet, in ascending order.
  fn unscored_organizations(
    &self,
  ) -> impl Future<Output = Result<Vec<i64>, Self::Error>> + Send + '_;

  // ── Ingest writes ─────────────────────────────────────────────────────

  /// Upsert an organization, its financial record and its trustees in one
  /// transaction.
  fn save_fetched(
    &self,
    fetched: FetchedCharity,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Upsert a batch of organizations (and their attached financial
  /// records) in one transaction.
  fn upsert_organizations(
    &self,
    batch: Vec<OrganizationImport>,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send + '_;

  fn upsert_trustees(
    &self,
    batch: Vec<Trustee>,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send + '_;

  fn upsert_financials(
    &self,
    batch: Vec<FinancialRecord>,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send + '_;

  fn upsert_filing_history(
    &self,
    batch: Vec<FilingHistoryRecord>,
  ) -> impl Future<Output = Result<BatchOutcome, Self::Error>> + Send + '_;

  // ── Reads for scoring ─────────────────────────────────────────────────

  /// The financial record with the latest year-end date.
  fn latest_financial(
    &self,
    registered_number: i64,
  ) -> impl Future<Output = Result<Option<FinancialRecord>, Self::Error>> + Send + '_;

  fn list_trustees(
    &self,
    registered_number: i64,
  ) -> impl Future<Output = Result<Vec<Trustee>, Self::Error>> + Send + '_;

  fn trustee_count(
    &self,
    registered_number: i64,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  fn filing_history(
    &self,
    registered_number: i64,
  ) -> impl Future<Output = Result<Vec<FilingHistoryRecord>, Self::Error>> + Send + '_;

  // ── Scores ────────────────────────────────────────────────────────────

  /// Insert or replace the score row for `score.registered_number`.
  fn save_score(
    &self,
    score: Score,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_score(
    &self,
    registered_number: i64,
  ) -> impl Future<Output = Result<Option<Score>, Self::Error>> + Send + '_;

  // ── Crawl checkpoint ──────────────────────────────────────────────────

  /// The last identifier dispatched by an enumeration crawl, if any.
  fn load_checkpoint(
    &self,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + '_;

  /// Overwrite the single checkpoint row.
  fn save_checkpoint(
    &self,
    identifier: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
