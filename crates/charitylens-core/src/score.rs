//! The composite trust score.
//!
//! A score is a pure function of an organization's stored data and the
//! moment it is computed at. Four dimensions are scored 0-100 and combined
//! with fixed weights; a confidence label summarises how complete and how
//! fresh the inputs were.
//!
//! Where data is missing the formula gives the benefit of the doubt with a
//! neutral value instead of zero. Those neutral values are policy, so they
//! live on [`ScoringPolicy`] rather than inline.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  finance::{FilingHistoryRecord, FinancialRecord},
  organization::Organization,
};

// ─── Transparency points ─────────────────────────────────────────────────────

const WEBSITE_POINTS: f64 = 30.0;
const FINANCIAL_DATA_POINTS: f64 = 20.0;
const TRUSTEE_POINTS: f64 = 10.0;
const TIMELINESS_FACTOR: f64 = 0.25;
const CONSISTENCY_FACTOR: f64 = 0.10;
const ACCOUNTS_QUALITY_FACTOR: f64 = 0.05;

/// How many of the most recent due-dated cycles count towards timeliness.
const TIMELINESS_CYCLES: usize = 3;
const CONSISTENCY_YEARS: u32 = 5;
const ACCOUNTS_QUALITY_YEARS: u32 = 3;

// ─── Confidence ──────────────────────────────────────────────────────────────

/// Qualitative completeness/freshness label attached to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
  High,
  Medium,
  Low,
}

impl Confidence {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::High => "high",
      Self::Medium => "medium",
      Self::Low => "low",
    }
  }

  fn from_completeness(counter: i32) -> Self {
    match counter {
      c if c >= 2 => Self::High,
      1 => Self::Medium,
      _ => Self::Low,
    }
  }
}

impl fmt::Display for Confidence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Confidence {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "high" => Ok(Self::High),
      "medium" => Ok(Self::Medium),
      "low" => Ok(Self::Low),
      other => Err(Error::UnknownConfidence(other.to_owned())),
    }
  }
}

// ─── Score ───────────────────────────────────────────────────────────────────

/// Derived data: one row per registration number, always recomputable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
  pub registered_number: i64,
  pub overall:           f64,
  pub efficiency:        f64,
  pub financial_health:  f64,
  pub transparency:      f64,
  pub governance:        f64,
  pub confidence:        Confidence,
  pub last_calculated:   DateTime<Utc>,
}

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// Everything the formula reads for one organization.
#[derive(Debug, Clone)]
pub struct ScoringInputs {
  /// The primary (linked id 0) row.
  pub organization:     Organization,
  /// The record with the latest year-end date, if any.
  pub latest_financial: Option<FinancialRecord>,
  pub trustee_count:    usize,
  pub filings:          Vec<FilingHistoryRecord>,
}

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Weights and policy constants of the formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
  pub efficiency_weight:          f64,
  pub financial_health_weight:    f64,
  pub transparency_weight:        f64,
  pub governance_weight:          f64,
  /// Efficiency when spending is known but has no breakdown.
  pub neutral_efficiency:         f64,
  /// Financial health when spending is known but reserves/assets are not.
  pub neutral_financial_health:   f64,
  /// Filing timeliness when no cycle has a due date.
  pub neutral_filing_timeliness:  f64,
  /// Filing consistency when no cycle falls in the lookback window.
  pub neutral_filing_consistency: f64,
  /// Accounts quality when no recent cycle reports a qualification flag.
  pub neutral_accounts_quality:   f64,
  /// Lower edge of the healthy reserve band, in months of spending.
  pub min_reserve_months:         f64,
  /// Upper edge of the healthy reserve band, in months of spending.
  pub max_reserve_months:         f64,
  /// Largest deduction applied for reserves above the band.
  pub max_excess_reserve_penalty: f64,
  /// Financial health never drops below this for excess reserves.
  pub excess_reserve_floor:       f64,
  /// Trustee count at which governance reaches 100.
  pub full_governance_trustees:   usize,
  /// Inputs older than this count against confidence.
  pub stale_after_days:           i64,
}

impl Default for ScoringPolicy {
  fn default() -> Self {
    Self {
      efficiency_weight:          0.4,
      financial_health_weight:    0.3,
      transparency_weight:        0.2,
      governance_weight:          0.1,
      neutral_efficiency:         60.0,
      neutral_financial_health:   50.0,
      neutral_filing_timeliness:  50.0,
      neutral_filing_consistency: 50.0,
      neutral_accounts_quality:   100.0,
      min_reserve_months:         3.0,
      max_reserve_months:         12.0,
      max_excess_reserve_penalty: 30.0,
      excess_reserve_floor:       70.0,
      full_governance_trustees:   3,
      stale_after_days:           365,
    }
  }
}

impl ScoringPolicy {
  /// Compute the score for `inputs` as of `now`.
  pub fn compute(&self, inputs: &ScoringInputs, now: DateTime<Utc>) -> Score {
    let fin = inputs.latest_financial.as_ref();

    let efficiency = self.efficiency(fin);
    let financial_health = self.financial_health(fin);
    let transparency = self.transparency(inputs, now.date_naive());
    let governance = self.governance(inputs.trustee_count);

    let overall = efficiency * self.efficiency_weight
      + financial_health * self.financial_health_weight
      + transparency * self.transparency_weight
      + governance * self.governance_weight;

    Score {
      registered_number: inputs.organization.registered_number,
      overall,
      efficiency,
      financial_health,
      transparency,
      governance,
      confidence: self.confidence(inputs, now),
      last_calculated: now,
    }
  }

  pub fn efficiency(&self, fin: Option<&FinancialRecord>) -> f64 {
    let Some(fin) = fin.filter(|f| f.total_spending > 0.0) else {
      return 0.0;
    };
    match fin.charitable_spend.filter(|c| *c > 0.0) {
      Some(charitable) => (charitable / fin.total_spending * 100.0).min(100.0),
      None => self.neutral_efficiency,
    }
  }

  pub fn financial_health(&self, fin: Option<&FinancialRecord>) -> f64 {
    let Some(fin) = fin.filter(|f| f.total_spending > 0.0) else {
      return 0.0;
    };
    let cushion = fin
      .reserves
      .filter(|r| *r > 0.0)
      .or(fin.assets.filter(|a| *a > 0.0));
    let Some(cushion) = cushion else {
      return self.neutral_financial_health;
    };

    let months = cushion / (fin.total_spending / 12.0);
    if months < self.min_reserve_months {
      months / self.min_reserve_months * 100.0
    } else if months <= self.max_reserve_months {
      100.0
    } else {
      let excess = months - self.max_reserve_months;
      let penalty = (excess / 12.0 * 5.0).min(self.max_excess_reserve_penalty);
      (100.0 - penalty).max(self.excess_reserve_floor)
    }
  }

  pub fn transparency(&self, inputs: &ScoringInputs, today: NaiveDate) -> f64 {
    let mut points = 0.0;
    if inputs.organization.has_website() {
      points += WEBSITE_POINTS;
    }
    if inputs.latest_financial.is_some() {
      points += FINANCIAL_DATA_POINTS;
    }
    if inputs.trustee_count > 0 {
      points += TRUSTEE_POINTS;
    }
    points += self.filing_timeliness(&inputs.filings) * TIMELINESS_FACTOR;
    points += self.filing_consistency(&inputs.filings, today) * CONSISTENCY_FACTOR;
    points += self.accounts_quality(&inputs.filings, today) * ACCOUNTS_QUALITY_FACTOR;
    points
  }

  /// Share of the most recent due-dated cycles filed on or before the due
  /// date, scaled to 100.
  pub fn filing_timeliness(&self, filings: &[FilingHistoryRecord]) -> f64 {
    let mut dated: Vec<&FilingHistoryRecord> =
      filings.iter().filter(|f| f.due_date.is_some()).collect();
    if dated.is_empty() {
      return self.neutral_filing_timeliness;
    }
    dated.sort_by(|a, b| b.due_date.cmp(&a.due_date));
    dated.truncate(TIMELINESS_CYCLES);

    let on_time = dated
      .iter()
      .filter(|f| f.filed_on_time() == Some(true))
      .count();
    on_time as f64 / dated.len() as f64 * 100.0
  }

  /// Share of cycles in the consistency window that received anything.
  pub fn filing_consistency(
    &self,
    filings: &[FilingHistoryRecord],
    today: NaiveDate,
  ) -> f64 {
    let cutoff = years_before(today, CONSISTENCY_YEARS);
    let expected: Vec<&FilingHistoryRecord> = filings
      .iter()
      .filter(|f| f.reference_date().is_some_and(|d| d >= cutoff))
      .collect();
    if expected.is_empty() {
      return self.neutral_filing_consistency;
    }
    let received = expected.iter().filter(|f| f.was_received()).count();
    received as f64 / expected.len() as f64 * 100.0
  }

  /// 100 minus the qualified-accounts percentage over recent cycles.
  pub fn accounts_quality(
    &self,
    filings: &[FilingHistoryRecord],
    today: NaiveDate,
  ) -> f64 {
    let cutoff = years_before(today, ACCOUNTS_QUALITY_YEARS);
    let flags: Vec<bool> = filings
      .iter()
      .filter(|f| f.reference_date().is_some_and(|d| d >= cutoff))
      .filter_map(|f| f.accounts_qualified)
      .collect();
    if flags.is_empty() {
      return self.neutral_accounts_quality;
    }
    let qualified = flags.iter().filter(|q| **q).count();
    100.0 - qualified as f64 / flags.len() as f64 * 100.0
  }

  pub fn governance(&self, trustee_count: usize) -> f64 {
    if trustee_count >= self.full_governance_trustees {
      100.0
    } else {
      trustee_count as f64 / self.full_governance_trustees as f64 * 100.0
    }
  }

  pub fn confidence(&self, inputs: &ScoringInputs, now: DateTime<Utc>) -> Confidence {
    let mut completeness = 0;
    if inputs.latest_financial.is_some() {
      completeness += 1;
    }
    if inputs.organization.has_website() {
      completeness += 1;
    }
    if inputs.trustee_count > 0 {
      completeness += 1;
    }
    let age = now.signed_duration_since(inputs.organization.last_updated);
    if age.num_days() > self.stale_after_days {
      completeness -= 1;
    }
    Confidence::from_completeness(completeness)
  }
}

fn years_before(today: NaiveDate, years: u32) -> NaiveDate {
  today
    .checked_sub_months(Months::new(years * 12))
    .unwrap_or(NaiveDate::MIN)
}
