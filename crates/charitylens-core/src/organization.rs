//! Organizations and their trustees.
//!
//! An organization row is identified by its organisation id. Several rows can
//! share a registration number: the primary entity has linked id 0 and its
//! subsidiaries count up from 1.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Registration statuses that mark an organization as no longer on the
/// register. Default queries hide these rows.
pub const REMOVED_STATUSES: &[&str] = &["Removed", "RM"];

/// Linked id of the primary (controlling) entity for a registration number.
pub const PRIMARY_LINKED_ID: i64 = 0;

// ─── Organization ────────────────────────────────────────────────────────────

/// One registered entity. Replaced wholesale on every fetch or import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
  /// Unique per entity; primary key.
  pub organisation_number: i64,
  /// Public registration number, shared by a primary and its subsidiaries.
  pub registered_number:   i64,
  /// 0 for the primary entity, 1+ for linked subsidiaries.
  pub linked_number:       i64,
  pub company_number:      Option<String>,
  pub name:                String,
  /// Free-text lifecycle label as published by the registry.
  pub status:              String,
  pub date_registered:     Option<NaiveDate>,
  pub date_removed:        Option<NaiveDate>,
  pub address:             Option<String>,
  pub website:             Option<String>,
  pub email:               Option<String>,
  pub phone:               Option<String>,
  /// Free-text description of what the organization does.
  pub activities:          Option<String>,
  pub last_updated:        DateTime<Utc>,
}

impl Organization {
  pub fn is_primary(&self) -> bool { self.linked_number == PRIMARY_LINKED_ID }

  pub fn has_website(&self) -> bool {
    self.website.as_deref().is_some_and(|w| !w.trim().is_empty())
  }
}

// ─── Trustee ─────────────────────────────────────────────────────────────────

/// Set membership of a named trustee on a registration number. There is no
/// identity or history beyond the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trustee {
  pub registered_number: i64,
  pub name:              String,
  pub is_chair:          bool,
  pub last_updated:      DateTime<Utc>,
}

impl Trustee {
  pub fn new(registered_number: i64, name: impl Into<String>) -> Self {
    Self {
      registered_number,
      name: name.into(),
      is_chair: false,
      last_updated: Utc::now(),
    }
  }
}
