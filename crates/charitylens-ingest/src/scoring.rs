//! Materialise scores for every organization that lacks one.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use charitylens_core::{ScoringEngine, store::CharityStore};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreAllReport {
  pub total:   u64,
  pub scored:  u64,
  pub failed:  u64,
  pub elapsed: Duration,
}

/// Score every primary, non-removed organization without a stored score.
///
/// The id list is read in full before any score is written. A failure on
/// one organization is logged and counted; only the initial listing can
/// fail the whole run.
pub async fn score_all<S: CharityStore>(
  engine: &ScoringEngine<S>,
  progress_interval: u64,
) -> Result<ScoreAllReport> {
  let started = Instant::now();
  let pending = engine
    .store()
    .unscored_organizations()
    .await
    .map_err(Error::store)?;
  let interval = progress_interval.max(1);

  let mut report = ScoreAllReport { total: pending.len() as u64, ..Default::default() };
  info!(total = report.total, "scoring organizations");

  for (done, number) in pending.into_iter().enumerate() {
    match engine.score(number, true).await {
      Ok(_) => report.scored += 1,
      Err(e) => {
        warn!(registered_number = number, error = %e, "failed to score");
        report.failed += 1;
      }
    }
    if (done as u64 + 1) % interval == 0 {
      info!(done = done + 1, total = report.total, "scoring progress");
    }
  }

  report.elapsed = started.elapsed();
  info!(
    scored = report.scored,
    failed = report.failed,
    elapsed_secs = report.elapsed.as_secs_f64(),
    "scoring complete"
  );
  Ok(report)
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use charitylens_store_sqlite::SqliteStore;

  use super::*;
  use crate::{ImportConfig, Importer};

  #[tokio::test]
  async fn scores_only_unscored_live_primaries() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let importer = Importer::new(store.clone(), ImportConfig::default());
    let orgs = r#"[
      {"organisation_number": 10, "registered_charity_number": 1, "linked_charity_number": 0,
       "charity_name": "One", "charity_registration_status": "Registered",
       "charity_contact_web": "one.org", "latest_income": 100, "latest_expenditure": 100,
       "latest_acc_fin_period_end_date": "2023-03-31"},
      {"organisation_number": 11, "registered_charity_number": 1, "linked_charity_number": 1,
       "charity_name": "One subsidiary", "charity_registration_status": "Registered"},
      {"organisation_number": 20, "registered_charity_number": 2, "linked_charity_number": 0,
       "charity_name": "Two", "charity_registration_status": "Removed"},
      {"organisation_number": 30, "registered_charity_number": 3, "linked_charity_number": 0,
       "charity_name": "Three", "charity_registration_status": "Registered"}
    ]"#;
    importer
      .import_organizations(Cursor::new(orgs.as_bytes().to_vec()))
      .await
      .unwrap();

    let engine = ScoringEngine::new(store.clone());
    let report = score_all(&engine, 1).await.unwrap();
    assert_eq!((report.total, report.scored, report.failed), (2, 2, 0));
    assert!(store.get_score(1).await.unwrap().is_some());
    assert!(store.get_score(2).await.unwrap().is_none());
    assert!(store.get_score(3).await.unwrap().is_some());

    let again = score_all(&engine, 1).await.unwrap();
    assert_eq!(again.total, 0);
  }
}
