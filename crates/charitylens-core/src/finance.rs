//! Financial-year figures and filing history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ─── FinancialRecord ─────────────────────────────────────────────────────────

/// Figures for one financial year, keyed by (registration number, year end).
///
/// The spend breakdown, reserves and assets are only published for larger
/// organizations; `None` means "not reported", not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
  pub registered_number: i64,
  pub year_end:          NaiveDate,
  pub total_income:      f64,
  pub total_spending:    f64,
  pub charitable_spend:  Option<f64>,
  pub fundraising_spend: Option<f64>,
  /// Governance and any other spend outside the two categories above.
  pub other_spend:       Option<f64>,
  pub reserves:          Option<f64>,
  pub assets:            Option<f64>,
  pub employees:         Option<i64>,
  pub trustee_count:     Option<i64>,
  pub last_updated:      DateTime<Utc>,
}

impl FinancialRecord {
  /// A record with totals only; breakdown and balance-sheet fields unset.
  pub fn totals(
    registered_number: i64,
    year_end: NaiveDate,
    total_income: f64,
    total_spending: f64,
  ) -> Self {
    Self {
      registered_number,
      year_end,
      total_income,
      total_spending,
      charitable_spend: None,
      fundraising_spend: None,
      other_spend: None,
      reserves: None,
      assets: None,
      employees: None,
      trustee_count: None,
      last_updated: Utc::now(),
    }
  }

  /// Copy any reported breakdown figures from `breakdown` onto this record.
  pub fn merge_breakdown(&mut self, breakdown: &SpendBreakdown) {
    if let Some(v) = breakdown.charitable.filter(|v| *v > 0.0) {
      self.charitable_spend = Some(v);
    }
    if let Some(v) = breakdown.fundraising.filter(|v| *v > 0.0) {
      self.fundraising_spend = Some(v);
    }
    if let Some(v) = breakdown.governance.filter(|v| *v > 0.0) {
      self.other_spend = Some(v);
    }
  }
}

/// Spend categories published in the detailed financial history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendBreakdown {
  pub charitable:  Option<f64>,
  pub fundraising: Option<f64>,
  pub governance:  Option<f64>,
}

// ─── FilingHistoryRecord ─────────────────────────────────────────────────────

/// One reporting cycle for one organization. Only used for transparency
/// sub-scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingHistoryRecord {
  pub organisation_number: i64,
  pub registered_number:   i64,
  pub period_start:        Option<NaiveDate>,
  pub period_end:          Option<NaiveDate>,
  pub cycle_reference:     String,
  pub due_date:            Option<NaiveDate>,
  pub return_received:     Option<NaiveDate>,
  pub accounts_received:   Option<NaiveDate>,
  pub gross_income:        Option<f64>,
  pub gross_expenditure:   Option<f64>,
  pub accounts_qualified:  Option<bool>,
  pub suppressed:          bool,
  pub suppression_type:    Option<String>,
  pub date_of_extract:     Option<NaiveDate>,
}

impl FilingHistoryRecord {
  /// Whether anything (return or accounts) was received for this cycle.
  pub fn was_received(&self) -> bool {
    self.return_received.is_some() || self.accounts_received.is_some()
  }

  /// `None` when the cycle has no due date; otherwise whether the return or
  /// the accounts arrived on or before it.
  pub fn filed_on_time(&self) -> Option<bool> {
    let due = self.due_date?;
    let on_time = |d: Option<NaiveDate>| d.is_some_and(|d| d <= due);
    Some(on_time(self.return_received) || on_time(self.accounts_received))
  }

  /// The date used to place this cycle in time: period end, else due date.
  pub fn reference_date(&self) -> Option<NaiveDate> {
    self.period_end.or(self.due_date)
  }
}
