//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and calendar dates as
//! `YYYY-MM-DD`. Booleans are stored as 0/1 integers.

use chrono::{DateTime, NaiveDate, Utc};
use charitylens_core::{
  finance::{FilingHistoryRecord, FinancialRecord},
  organization::{Organization, Trustee},
  score::{Confidence, Score},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

pub fn encode_opt_date(d: Option<NaiveDate>) -> Option<String> { d.map(encode_date) }

pub fn decode_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
  s.as_deref().map(decode_date).transpose()
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list shared by every `organizations` SELECT, in [`RawOrganization`]
/// field order.
pub const ORGANIZATION_COLUMNS: &str = "organisation_number, registered_number, \
   linked_number, company_number, name, status, date_registered, date_removed, \
   address, website, email, phone, activities, last_updated";

/// Raw values read directly from an `organizations` row.
pub struct RawOrganization {
  pub organisation_number: i64,
  pub registered_number:   i64,
  pub linked_number:       i64,
  pub company_number:      Option<String>,
  pub name:                String,
  pub status:              String,
  pub date_registered:     Option<String>,
  pub date_removed:        Option<String>,
  pub address:             Option<String>,
  pub website:             Option<String>,
  pub email:               Option<String>,
  pub phone:               Option<String>,
  pub activities:          Option<String>,
  pub last_updated:        String,
}

impl RawOrganization {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      organisation_number: row.get(0)?,
      registered_number:   row.get(1)?,
      linked_number:       row.get(2)?,
      company_number:      row.get(3)?,
      name:                row.get(4)?,
      status:              row.get(5)?,
      date_registered:     row.get(6)?,
      date_removed:        row.get(7)?,
      address:             row.get(8)?,
      website:             row.get(9)?,
      email:               row.get(10)?,
      phone:               row.get(11)?,
      activities:          row.get(12)?,
      last_updated:        row.get(13)?,
    })
  }

  pub fn into_organization(self) -> Result<Organization> {
    Ok(Organization {
      organisation_number: self.organisation_number,
      registered_number:   self.registered_number,
      linked_number:       self.linked_number,
      company_number:      self.company_number,
      name:                self.name,
      status:              self.status,
      date_registered:     decode_opt_date(self.date_registered)?,
      date_removed:        decode_opt_date(self.date_removed)?,
      address:             self.address,
      website:             self.website,
      email:               self.email,
      phone:               self.phone,
      activities:          self.activities,
      last_updated:        decode_dt(&self.last_updated)?,
    })
  }
}

pub const FINANCIAL_COLUMNS: &str = "registered_number, year_end, total_income, \
   total_spending, charitable_spend, fundraising_spend, other_spend, reserves, \
   assets, employees, trustee_count, last_updated";

/// Raw values read directly from a `financial_records` row.
pub struct RawFinancial {
  pub registered_number: i64,
  pub year_end:          String,
  pub total_income:      f64,
  pub total_spending:    f64,
  pub charitable_spend:  Option<f64>,
  pub fundraising_spend: Option<f64>,
  pub other_spend:       Option<f64>,
  pub reserves:          Option<f64>,
  pub assets:            Option<f64>,
  pub employees:         Option<i64>,
  pub trustee_count:     Option<i64>,
  pub last_updated:      String,
}

impl RawFinancial {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      registered_number: row.get(0)?,
      year_end:          row.get(1)?,
      total_income:      row.get(2)?,
      total_spending:    row.get(3)?,
      charitable_spend:  row.get(4)?,
      fundraising_spend: row.get(5)?,
      other_spend:       row.get(6)?,
      reserves:          row.get(7)?,
      assets:            row.get(8)?,
      employees:         row.get(9)?,
      trustee_count:     row.get(10)?,
      last_updated:      row.get(11)?,
    })
  }

  pub fn into_financial(self) -> Result<FinancialRecord> {
    Ok(FinancialRecord {
      registered_number: self.registered_number,
      year_end:          decode_date(&self.year_end)?,
      total_income:      self.total_income,
      total_spending:    self.total_spending,
      charitable_spend:  self.charitable_spend,
      fundraising_spend: self.fundraising_spend,
      other_spend:       self.other_spend,
      reserves:          self.reserves,
      assets:            self.assets,
      employees:         self.employees,
      trustee_count:     self.trustee_count,
      last_updated:      decode_dt(&self.last_updated)?,
    })
  }
}

/// Raw values read directly from a `trustees` row.
pub struct RawTrustee {
  pub registered_number: i64,
  pub name:              String,
  pub is_chair:          bool,
  pub last_updated:      String,
}

impl RawTrustee {
  pub fn into_trustee(self) -> Result<Trustee> {
    Ok(Trustee {
      registered_number: self.registered_number,
      name:              self.name,
      is_chair:          self.is_chair,
      last_updated:      decode_dt(&self.last_updated)?,
    })
  }
}

pub const FILING_COLUMNS: &str = "organisation_number, registered_number, \
   cycle_reference, period_start, period_end, due_date, return_received, \
   accounts_received, gross_income, gross_expenditure, accounts_qualified, \
   suppressed, suppression_type, date_of_extract";

/// Raw values read directly from a `filing_history` row.
pub struct RawFiling {
  pub organisation_number: i64,
  pub registered_number:   i64,
  pub cycle_reference:     String,
  pub period_start:        Option<String>,
  pub period_end:          Option<String>,
  pub due_date:            Option<String>,
  pub return_received:     Option<String>,
  pub accounts_received:   Option<String>,
  pub gross_income:        Option<f64>,
  pub gross_expenditure:   Option<f64>,
  pub accounts_qualified:  Option<bool>,
  pub suppressed:          bool,
  pub suppression_type:    Option<String>,
  pub date_of_extract:     Option<String>,
}

impl RawFiling {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      organisation_number: row.get(0)?,
      registered_number:   row.get(1)?,
      cycle_reference:     row.get(2)?,
      period_start:        row.get(3)?,
      period_end:          row.get(4)?,
      due_date:            row.get(5)?,
      return_received:     row.get(6)?,
      accounts_received:   row.get(7)?,
      gross_income:        row.get(8)?,
      gross_expenditure:   row.get(9)?,
      accounts_qualified:  row.get(10)?,
      suppressed:          row.get(11)?,
      suppression_type:    row.get(12)?,
      date_of_extract:     row.get(13)?,
    })
  }

  pub fn into_filing(self) -> Result<FilingHistoryRecord> {
    Ok(FilingHistoryRecord {
      organisation_number: self.organisation_number,
      registered_number:   self.registered_number,
      period_start:        decode_opt_date(self.period_start)?,
      period_end:          decode_opt_date(self.period_end)?,
      cycle_reference:     self.cycle_reference,
      due_date:            decode_opt_date(self.due_date)?,
      return_received:     decode_opt_date(self.return_received)?,
      accounts_received:   decode_opt_date(self.accounts_received)?,
      gross_income:        self.gross_income,
      gross_expenditure:   self.gross_expenditure,
      accounts_qualified:  self.accounts_qualified,
      suppressed:          self.suppressed,
      suppression_type:    self.suppression_type,
      date_of_extract:     decode_opt_date(self.date_of_extract)?,
    })
  }
}

/// Raw values read directly from a `scores` row.
pub struct RawScore {
  pub registered_number: i64,
  pub overall:           f64,
  pub efficiency:        f64,
  pub financial_health:  f64,
  pub transparency:      f64,
  pub governance:        f64,
  pub confidence:        String,
  pub last_calculated:   String,
}

impl RawScore {
  pub fn into_score(self) -> Result<Score> {
    Ok(Score {
      registered_number: self.registered_number,
      overall:           self.overall,
      efficiency:        self.efficiency,
      financial_health:  self.financial_health,
      transparency:      self.transparency,
      governance:        self.governance,
      confidence:        self.confidence.parse::<Confidence>()?,
      last_calculated:   decode_dt(&self.last_calculated)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dates_roundtrip_as_iso_days() {
    let d = NaiveDate::from_ymd_opt(2022, 3, 31).unwrap();
    assert_eq!(encode_date(d), "2022-03-31");
    assert_eq!(decode_date("2022-03-31").unwrap(), d);
    assert!(decode_date("31/03/2022").is_err());
  }
}
