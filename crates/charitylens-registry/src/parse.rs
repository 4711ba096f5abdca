//! Typed shapes for registry API responses.
//!
//! Field presence and scalar types vary between records, so every field is
//! optional and decoded leniently. The accessors on [`CharityDetails`] carry
//! the fallback rules for turning a response into stored records.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use charitylens_core::{
  date::parse_optional_date,
  finance::{FinancialRecord, SpendBreakdown},
  lenient,
  organization::{Organization, PRIMARY_LINKED_ID, Trustee},
  store::FetchedCharity,
};

/// Separators tried, in order, when trustee names arrive as one string.
const TRUSTEE_SEPARATORS: [char; 4] = [',', ';', '|', '\n'];

/// Response of `allcharitydetailsV2/{number}/0`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CharityDetails {
  #[serde(deserialize_with = "lenient::integer")]
  pub reg_charity_number:                  Option<i64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub registered_charity_number:           Option<i64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub organisation_number:                 Option<i64>,
  #[serde(deserialize_with = "lenient::integer")]
  pub group_subsid_suffix:                 Option<i64>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_company_registration_number: Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_name:                        Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub reg_status:                          Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_of_registration:                Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub date_of_removal:                     Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub address_line_one:                    Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub address_line_two:                    Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub address_line_three:                  Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub address_line_four:                   Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub address_line_five:                   Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub address_post_code:                   Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub web:                                 Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub email:                               Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub phone:                               Option<String>,
  #[serde(deserialize_with = "lenient::string")]
  pub charity_activities:                  Option<String>,
  /// Free text in older responses, structured in newer ones; only the text
  /// form is used.
  pub who_what_where:                      Option<Value>,
  #[serde(deserialize_with = "lenient::number")]
  pub latest_income:                       Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub latest_expenditure:                  Option<f64>,
  #[serde(deserialize_with = "lenient::string")]
  pub latest_acc_fin_year_end_date:        Option<String>,
  /// Either an array of `{ "trustee_name": .. }` objects or one delimited
  /// string.
  pub trustee_names:                       Option<Value>,
}

impl CharityDetails {
  /// The registration number, tried across the candidate keys in order and
  /// falling back to the number that was requested.
  pub fn registered_number(&self, requested: i64) -> i64 {
    [self.reg_charity_number, self.registered_charity_number]
      .into_iter()
      .flatten()
      .find(|n| *n != 0)
      .unwrap_or(requested)
  }

  /// The registry's internal entity id. Registration numbers share its
  /// range, so there is no stand-in when the response omits it.
  pub fn organisation_number(&self) -> Option<i64> {
    self.organisation_number.filter(|n| *n != 0)
  }

  pub fn linked_number(&self) -> i64 { self.group_subsid_suffix.unwrap_or(PRIMARY_LINKED_ID) }

  /// Up to five address lines and the postcode, comma-joined.
  pub fn address(&self) -> Option<String> {
    let parts: Vec<&str> = [
      &self.address_line_one,
      &self.address_line_two,
      &self.address_line_three,
      &self.address_line_four,
      &self.address_line_five,
      &self.address_post_code,
    ]
    .into_iter()
    .filter_map(|p| p.as_deref().map(str::trim).filter(|p| !p.is_empty()))
    .collect();

    (!parts.is_empty()).then(|| parts.join(", "))
  }

  pub fn activities(&self) -> Option<String> {
    self.charity_activities.clone().or_else(|| {
      self
        .who_what_where
        .as_ref()
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
    })
  }

  /// `None` when the response carries no organisation number.
  pub fn to_organization(&self, requested: i64) -> Option<Organization> {
    Some(Organization {
      organisation_number: self.organisation_number()?,
      registered_number:   self.registered_number(requested),
      linked_number:       self.linked_number(),
      company_number:      self.charity_company_registration_number.clone(),
      name:                self.charity_name.clone().unwrap_or_default(),
      status:              self.reg_status.clone().unwrap_or_default(),
      date_registered:     parse_optional_date(self.date_of_registration.as_deref()),
      date_removed:        parse_optional_date(self.date_of_removal.as_deref()),
      address:             self.address(),
      website:             self.web.clone(),
      email:               self.email.clone(),
      phone:               self.phone.clone(),
      activities:          self.activities(),
      last_updated:        Utc::now(),
    })
  }

  /// Latest-year totals, when the response names a financial year end.
  pub fn to_financial(&self, requested: i64) -> Option<FinancialRecord> {
    let year_end = parse_optional_date(self.latest_acc_fin_year_end_date.as_deref())?;
    Some(FinancialRecord::totals(
      self.registered_number(requested),
      year_end,
      self.latest_income.unwrap_or_default(),
      self.latest_expenditure.unwrap_or_default(),
    ))
  }

  pub fn trustees(&self, requested: i64) -> Vec<Trustee> {
    let registered_number = self.registered_number(requested);
    match &self.trustee_names {
      Some(Value::Array(items)) => items
        .iter()
        .filter_map(|item| {
          let name = item.get("trustee_name")?.as_str()?.trim();
          if name.is_empty() {
            return None;
          }
          let mut trustee = Trustee::new(registered_number, name);
          trustee.is_chair = item
            .get("trustee_is_chair")
            .or_else(|| item.get("is_chair"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
          Some(trustee)
        })
        .collect(),
      Some(Value::String(joined)) => split_trustee_names(joined)
        .into_iter()
        .map(|name| Trustee::new(registered_number, name))
        .collect(),
      _ => Vec::new(),
    }
  }

  /// Everything needed to persist this response in one transaction, or
  /// `None` when it cannot be keyed.
  pub fn into_fetched(self, requested: i64) -> Option<FetchedCharity> {
    Some(FetchedCharity {
      organization: self.to_organization(requested)?,
      financial:    self.to_financial(requested),
      trustees:     self.trustees(requested),
    })
  }
}

/// Split a delimited trustee string on the first separator it contains,
/// dropping blanks and generic placeholder entries.
pub fn split_trustee_names(joined: &str) -> Vec<String> {
  let pieces: Vec<&str> = match TRUSTEE_SEPARATORS.iter().find(|sep| joined.contains(**sep)) {
    Some(sep) => joined.split(*sep).collect(),
    None => vec![joined],
  };
  pieces
    .into_iter()
    .map(str::trim)
    .filter(|name| !name.is_empty() && !name.to_lowercase().contains("trustee"))
    .map(str::to_owned)
    .collect()
}

/// One year of `charityfinancialhistory/{number}/0`, most recent first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FinancialHistoryEntry {
  #[serde(deserialize_with = "lenient::string")]
  pub financial_period_end_date: Option<String>,
  #[serde(deserialize_with = "lenient::number")]
  pub income:                    Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub expenditure:               Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub exp_charitable_activities: Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub exp_raising_funds:         Option<f64>,
  #[serde(deserialize_with = "lenient::number")]
  pub exp_governance:            Option<f64>,
}

impl FinancialHistoryEntry {
  pub fn breakdown(&self) -> SpendBreakdown {
    SpendBreakdown {
      charitable:  self.exp_charitable_activities,
      fundraising: self.exp_raising_funds,
      governance:  self.exp_governance,
    }
  }
}

/// Breakdown of the most recent year in a history response.
pub fn latest_breakdown(history: &[FinancialHistoryEntry]) -> Option<SpendBreakdown> {
  history.first().map(FinancialHistoryEntry::breakdown)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use serde_json::json;

  use super::*;

  fn details(value: Value) -> CharityDetails { serde_json::from_value(value).unwrap() }

  #[test]
  fn registered_number_tries_candidates_then_request() {
    assert_eq!(details(json!({ "reg_charity_number": 1001 })).registered_number(5), 1001);
    assert_eq!(
      details(json!({ "registered_charity_number": "2002" })).registered_number(5),
      2002
    );
    assert_eq!(details(json!({ "organisation_number": 77 })).registered_number(5), 5);
    assert_eq!(details(json!({})).registered_number(5), 5);
  }

  #[test]
  fn organisation_number_has_no_fallback() {
    let d = details(json!({ "reg_charity_number": 1001, "organisation_number": 42 }));
    assert_eq!(d.organisation_number(), Some(42));

    let unkeyed = details(json!({ "reg_charity_number": 1001, "charity_name": "x" }));
    assert_eq!(unkeyed.organisation_number(), None);
    assert!(unkeyed.to_organization(1001).is_none());
    assert!(unkeyed.into_fetched(1001).is_none());
  }

  #[test]
  fn builds_organization_from_payload() {
    let d = details(json!({
      "reg_charity_number": 220949,
      "organisation_number": 1,
      "group_subsid_suffix": 0,
      "charity_company_registration_number": 4325234,
      "charity_name": "British Red Cross",
      "reg_status": "R",
      "date_of_registration": "1963-07-23T00:00:00",
      "address_line_one": "44 Moorfields",
      "address_line_two": "",
      "address_line_three": "London",
      "address_post_code": "EC2Y 9AL",
      "web": "www.redcross.org.uk",
      "latest_income": 300000000.0,
      "latest_expenditure": "290000000",
      "latest_acc_fin_year_end_date": "2023-12-31T00:00:00"
    }));

    let org = d.to_organization(220949).unwrap();
    assert_eq!(org.registered_number, 220949);
    assert_eq!(org.organisation_number, 1);
    assert!(org.is_primary());
    assert_eq!(org.company_number.as_deref(), Some("4325234"));
    assert_eq!(org.address.as_deref(), Some("44 Moorfields, London, EC2Y 9AL"));
    assert_eq!(org.date_registered, NaiveDate::from_ymd_opt(1963, 7, 23));
    assert!(org.has_website());

    let fin = d.to_financial(220949).unwrap();
    assert_eq!(fin.year_end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    assert_eq!(fin.total_spending, 290_000_000.0);
  }

  #[test]
  fn no_year_end_means_no_financial_record() {
    let d = details(json!({ "latest_income": 10.0, "latest_expenditure": 5.0 }));
    assert!(d.to_financial(1).is_none());
  }

  #[test]
  fn trustees_from_object_array() {
    let d = details(json!({
      "reg_charity_number": 9,
      "trustee_names": [
        { "trustee_name": "Jane Smith", "trustee_is_chair": true },
        { "trustee_name": "" },
        { "trustee_id": 12 },
        { "trustee_name": "John Doe" }
      ]
    }));
    let trustees = d.trustees(9);
    assert_eq!(trustees.len(), 2);
    assert_eq!(trustees[0].name, "Jane Smith");
    assert!(trustees[0].is_chair);
    assert!(!trustees[1].is_chair);
  }

  #[test]
  fn trustees_from_delimited_string() {
    let d = details(json!({ "trustee_names": "Jane Smith; John Doe ;Corporate Trustee Ltd; " }));
    let names: Vec<_> = d.trustees(3).into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["Jane Smith", "John Doe"]);
  }

  #[test]
  fn split_uses_first_separator_present() {
    assert_eq!(split_trustee_names("A, B | C"), ["A", "B | C"]);
    assert_eq!(split_trustee_names("Solo Name"), ["Solo Name"]);
    assert!(split_trustee_names("The Trustees").is_empty());
  }

  #[test]
  fn latest_breakdown_uses_first_entry() {
    let history: Vec<FinancialHistoryEntry> = serde_json::from_value(json!([
      { "exp_charitable_activities": 800.0, "exp_raising_funds": 100, "exp_governance": null },
      { "exp_charitable_activities": 1.0 }
    ]))
    .unwrap();

    let breakdown = latest_breakdown(&history).unwrap();
    assert_eq!(breakdown.charitable, Some(800.0));
    assert_eq!(breakdown.fundraising, Some(100.0));
    assert_eq!(breakdown.governance, None);
    assert!(latest_breakdown(&[]).is_none());
  }
}
