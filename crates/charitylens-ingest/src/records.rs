//! Row shapes of the four bulk extract families.
//!
//! Each row decodes leniently and converts into the domain value the store
//! accepts. A row that decodes but cannot be stored meaningfully (no
//! registration number, no trustee name, ...) converts to `None` and is
//! counted as skipped rather than failed.

use std::future::Future;

use chrono::Utc;
use serde::{Deserialize, de::DeserializeOwned};

use charitylens_core::{
  date::{parse_loose_date, parse_optional_date},
  finance::{FilingHistoryRecord, FinancialRecord},
  lenient,
  organization::{Organization, PRIMARY_LINKED_ID, Trustee},
  store::{BatchOutcome, CharityStore, OrganizationImport},
};

/// One record family of the bulk extract.
pub trait DumpRecord: DeserializeOwned + Send + 'static {
  type Item: Send + 'static;

  /// Label used in log lines.
  const FAMILY: &'static str;

  fn into_item(self) -> Option<Self::Item>;

  /// Upsert one batch in a single store transaction.
  fn write<S: CharityStore>(
    store: &S,
    batch: Vec<Self::Item>,
  ) -> impl Future<Output = Result<BatchOutcome, S::Error>> + Send;
}

fn valid_number(n: Option<i64>) -> Option<i64> { n.filter(|n| *n != 0) }

// ─── Organizations ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrganizationRow {
  #[serde(deserialize_with = "lenient::integer")]
  pub organisation_number:                 Option<i64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub registered_charity_number:           Option<i64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub linked_charity_number:               Option<i64>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_name:                        Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_registration_status:         Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_of_registration:                Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_of_removal:                     Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_address1:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_address2:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_address3:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_address4:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_address5:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_postcode:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_phone:               Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_email:               Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_contact_web:                 Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_company_registration_number: Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_activities:                  Option<String>,
  #[serde(deserialize_with = "lenient::number")]
  pub latest_income:                       Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub latest_expenditure:                  Option<f64>,
  #[serde(deserialize_with = "lenient::string")]
  pub latest_acc_fin_period_end_date:      Option<String>,
}

impl OrganizationRow {
  fn address(&self) -> Option<String> {
    let parts: Vec<&str> = [
      &self.charity_contact_address1,
      &self.charity_contact_address2,
      &self.charity_contact_address3,
      &self.charity_contact_address4,
      &self.charity_contact_address5,
      &self.charity_contact_postcode,
    ]
    .into_iter()
    .filter_map(|p| p.as_deref().map(str::trim).filter(|p| !p.is_empty()))
    .collect();

    (!parts.is_empty()).then(|| parts.join(", "))
  }

  /// Latest-year totals, only when both figures and the period end are
  /// present.
  fn financial(&self, registered_number: i64) -> Option<FinancialRecord> {
    let income = self.latest_income?;
    let spending = self.latest_expenditure?;
    let year_end = parse_optional_date(self.latest_acc_fin_period_end_date.as_deref())?;
    Some(FinancialRecord::totals(registered_number, year_end, income, spending))
  }
}

impl DumpRecord for OrganizationRow {
  type Item = OrganizationImport;

  const FAMILY: &'static str = "organizations";

  fn into_item(self) -> Option<OrganizationImport> {
    let registered_number = valid_number(self.registered_charity_number)?;
    let organisation_number = valid_number(self.organisation_number)?;
    let financial = self.financial(registered_number);
    let address = self.address();
    let organization = Organization {
      organisation_number,
      registered_number,
      linked_number: self.linked_charity_number.unwrap_or(PRIMARY_LINKED_ID),
      company_number: self.charity_company_registration_number,
      name: self.charity_name.unwrap_or_default(),
      status: self.charity_registration_status.unwrap_or_default(),
      date_registered: parse_optional_date(self.date_of_registration.as_deref()),
      date_removed: parse_optional_date(self.date_of_removal.as_deref()),
      address,
      website: self.charity_contact_web,
      email: self.charity_contact_email,
      phone: self.charity_contact_phone,
      activities: self.charity_activities,
      last_updated: Utc::now(),
    };
    Some(OrganizationImport { organization, financial })
  }

  fn write<S: CharityStore>(
    store: &S,
    batch: Vec<OrganizationImport>,
  ) -> impl Future<Output = Result<BatchOutcome, S::Error>> + Send {
    store.upsert_organizations(batch)
  }
}

// ─── Trustees ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrusteeRow {
  #[serde(deserialize_with = "lenient::integer")]
  pub registered_charity_number: Option<i64>,
  #[serde(deserialize_with = "lenient::string")]
  pub trustee_name:              Option<String>,
  #[serde(deserialize_with = "lenient::flag")]
  pub trustee_is_chair:          Option<bool>,
}

impl DumpRecord for TrusteeRow {
  type Item = Trustee;

  const FAMILY: &'static str = "trustees";

  fn into_item(self) -> Option<Trustee> {
    let registered_number = valid_number(self.registered_charity_number)?;
    let name = self.trustee_name?;
    let mut trustee = Trustee::new(registered_number, name.trim());
    trustee.is_chair = self.trustee_is_chair.unwrap_or(false);
    Some(trustee)
  }

  fn write<S: CharityStore>(
    store: &S,
    batch: Vec<Trustee>,
  ) -> impl Future<Output = Result<BatchOutcome, S::Error>> + Send {
    store.upsert_trustees(batch)
  }
}

// ─── Detailed financials (annual return part B) ──────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartBRow {
  #[serde(deserialize_with = "lenient::integer")]
  pub registered_charity_number:          Option<i64>,
  /// Set on the most recent submitted period only.
  #[serde(deserialize_with = "lenient::flag")]
  pub latest_fin_period_submitted_ind:    Option<bool>,
  #[serde(deserialize_with = "lenient::string")]
  pub fin_period_end_date:                Option<String>,
  #[serde(deserialize_with = "lenient::number")]
  pub income_total_income_and_endowments: Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub expenditure_total:                  Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub expenditure_charitable_expenditure: Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub expenditure_raising_funds:          Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub expenditure_governance:             Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub reserves:                           Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub assets_total_assets_and_liabilities: Option<f64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub count_employees:                    Option<i64>,
}

impl DumpRecord for PartBRow {
  type Item = FinancialRecord;

  const FAMILY: &'static str = "financials";

  fn into_item(self) -> Option<FinancialRecord> {
    if self.latest_fin_period_submitted_ind != Some(true) {
      return None;
    }
    let registered_number = valid_number(self.registered_charity_number)?;
    let year_end = parse_optional_date(self.fin_period_end_date.as_deref())?;

    let mut record = FinancialRecord::totals(
      registered_number,
      year_end,
      self.income_total_income_and_endowments.unwrap_or_default(),
      self.expenditure_total.unwrap_or_default(),
    );
    record.charitable_spend = self.expenditure_charitable_expenditure;
    record.fundraising_spend = self.expenditure_raising_funds;
    record.other_spend = self.expenditure_governance;
    record.reserves = self.reserves;
    record.assets = self.assets_total_assets_and_liabilities;
    record.employees = self.count_employees;
    Some(record)
  }

  fn write<S: CharityStore>(
    store: &S,
    batch: Vec<FinancialRecord>,
  ) -> impl Future<Output = Result<BatchOutcome, S::Error>> + Send {
    store.upsert_financials(batch)
  }
}

// ─── Filing history ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryRow {
  #[serde(deserialize_with = "lenient::integer")]
  pub organisation_number:         Option<i64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub registered_charity_number:   Option<i64>,
  #[serde(deserialize_with = "lenient::string")]
  pub fin_period_start_date:       Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub fin_period_end_date:         Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub ar_cycle_reference:          Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub reporting_due_date:          Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_annual_return_received: Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_accounts_received:      Option<String>,
  #[serde(deserialize_with = "lenient::number")]
  pub total_gross_income:          Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub total_gross_expenditure:     Option<f64>,
  #[serde(deserialize_with = "lenient::flag")]
  pub accounts_qualified:          Option<bool>,
  #[serde(deserialize_with = "lenient::flag")]
  pub suppression_ind:             Option<bool>,
  #[serde(deserialize_with = "lenient::string")]
  pub suppression_type:            Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_of_extract:             Option<String>,
}

impl DumpRecord for HistoryRow {
  type Item = FilingHistoryRecord;

  const FAMILY: &'static str = "filing history";

  fn into_item(self) -> Option<FilingHistoryRecord> {
    let registered_number = valid_number(self.registered_charity_number)?;
    let organisation_number = valid_number(self.organisation_number)?;
    let cycle_reference = self.ar_cycle_reference?.trim().to_owned();
    let date = |raw: &Option<String>| raw.as_deref().and_then(parse_loose_date);

    Some(FilingHistoryRecord {
      organisation_number,
      registered_number,
      period_start: date(&self.fin_period_start_date),
      period_end: date(&self.fin_period_end_date),
      cycle_reference,
      due_date: date(&self.reporting_due_date),
      return_received: date(&self.date_annual_return_received),
      accounts_received: date(&self.date_accounts_received),
      gross_income: self.total_gross_income,
      gross_expenditure: self.total_gross_expenditure,
      accounts_qualified: self.accounts_qualified,
      suppressed: self.suppression_ind.unwrap_or(false),
      suppression_type: self.suppression_type,
      date_of_extract: date(&self.date_of_extract),
    })
  }

  fn write<S: CharityStore>(
    store: &S,
    batch: Vec<FilingHistoryRecord>,
  ) -> impl Future<Output = Result<BatchOutcome, S::Error>> + Send {
    store.upsert_filing_history(batch)
  }
}
