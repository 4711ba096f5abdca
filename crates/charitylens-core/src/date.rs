//! Lenient date parsing for registry payloads and bulk dumps.
//!
//! Both sources mix `2019-03-31T00:00:00`, `2019-03-31` and full RFC 3339
//! timestamps. Anything that matches none of them is treated as absent.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Parse a date in any of the accepted formats. Empty input yields `None`.
pub fn parse_loose_date(raw: &str) -> Option<NaiveDate> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
    return Some(dt.date());
  }
  if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
    return Some(d);
  }
  DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive())
}

/// [`parse_loose_date`] over an optional field.
pub fn parse_optional_date(raw: Option<&str>) -> Option<NaiveDate> {
  raw.and_then(parse_loose_date)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn accepts_all_dump_formats() {
    assert_eq!(parse_loose_date("2021-03-31T00:00:00"), Some(ymd(2021, 3, 31)));
    assert_eq!(parse_loose_date("2021-03-31"), Some(ymd(2021, 3, 31)));
    assert_eq!(
      parse_loose_date("2021-03-31T10:15:00+01:00"),
      Some(ymd(2021, 3, 31))
    );
  }

  #[test]
  fn garbage_and_empty_are_absent() {
    assert_eq!(parse_loose_date(""), None);
    assert_eq!(parse_loose_date("   "), None);
    assert_eq!(parse_loose_date("31/03/2021"), None);
    assert_eq!(parse_optional_date(None), None);
  }
}
