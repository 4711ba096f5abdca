//! Streaming import of bulk extract arrays.
//!
//! Elements are read and decoded on a blocking thread and handed to the
//! async side one batch at a time, so memory stays bounded by the batch size
//! regardless of file size. Each batch is written in one store transaction.

use std::{
  fs::File,
  io::{BufRead, BufReader},
  path::Path,
  sync::{Arc, Mutex, MutexGuard},
  time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use charitylens_core::store::CharityStore;

use crate::{
  ArrayReader, Result,
  records::{DumpRecord, HistoryRow, OrganizationRow, PartBRow, TrusteeRow},
};

const READ_BUFFER: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct ImportConfig {
  /// Records per store transaction.
  pub batch_size:        usize,
  /// Elements between progress log lines.
  pub progress_interval: u64,
}

impl Default for ImportConfig {
  fn default() -> Self { Self { batch_size: 1_000, progress_interval: 5_000 } }
}

/// Running counts for one import. `total` counts array elements read;
/// every element ends up in exactly one of the other three buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportProgress {
  pub total:   u64,
  pub success: u64,
  pub failed:  u64,
  pub skipped: u64,
  pub elapsed: Duration,
}

impl ImportProgress {
  /// Elements per second over `elapsed`.
  pub fn rate(&self) -> f64 {
    let secs = self.elapsed.as_secs_f64();
    if secs > 0.0 { self.total as f64 / secs } else { 0.0 }
  }
}

fn lock(progress: &Mutex<ImportProgress>) -> MutexGuard<'_, ImportProgress> {
  progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Streams extract arrays into a [`CharityStore`].
pub struct Importer<S> {
  store:  S,
  config: ImportConfig,
}

impl<S: CharityStore> Importer<S> {
  pub fn new(store: S, config: ImportConfig) -> Self { Self { store, config } }

  pub fn store(&self) -> &S { &self.store }

  pub async fn import_organizations<R>(&self, reader: R) -> Result<ImportProgress>
  where
    R: BufRead + Send + 'static,
  {
    self.import::<OrganizationRow, R>(reader).await
  }

  pub async fn import_trustees<R>(&self, reader: R) -> Result<ImportProgress>
  where
    R: BufRead + Send + 'static,
  {
    self.import::<TrusteeRow, R>(reader).await
  }

  /// Detailed financial figures. Only rows flagged as the latest submitted
  /// period are stored; the rest count as skipped.
  pub async fn import_financials<R>(&self, reader: R) -> Result<ImportProgress>
  where
    R: BufRead + Send + 'static,
  {
    self.import::<PartBRow, R>(reader).await
  }

  pub async fn import_filing_history<R>(&self, reader: R) -> Result<ImportProgress>
  where
    R: BufRead + Send + 'static,
  {
    self.import::<HistoryRow, R>(reader).await
  }

  /// Open `path` and import it as record family `T`.
  pub async fn import_file<T: DumpRecord>(&self, path: impl AsRef<Path>) -> Result<ImportProgress> {
    let path = path.as_ref();
    info!(family = T::FAMILY, path = %path.display(), "starting import");
    let file = File::open(path)?;
    self
      .import::<T, _>(BufReader::with_capacity(READ_BUFFER, file))
      .await
  }

  /// Import one extract array as record family `T`.
  ///
  /// A structural error (not an array, truncated input) stops the import
  /// after flushing what was already decoded, and is returned. Everything
  /// else is counted and the stream continues.
  pub async fn import<T, R>(&self, reader: R) -> Result<ImportProgress>
  where
    T: DumpRecord,
    R: BufRead + Send + 'static,
  {
    let started = Instant::now();
    let progress = Arc::new(Mutex::new(ImportProgress::default()));
    let (tx, mut rx) = mpsc::channel::<Vec<T::Item>>(1);

    let reading = tokio::task::spawn_blocking({
      let progress = progress.clone();
      let config = self.config.clone();
      move || read_batches::<T, R>(reader, &config, &progress, started, tx)
    });

    while let Some(batch) = rx.recv().await {
      let size = batch.len() as u64;
      match T::write(&self.store, batch).await {
        Ok(outcome) => {
          for failure in &outcome.failures {
            debug!(family = T::FAMILY, %failure, "record rejected by store");
          }
          let mut p = lock(&progress);
          p.success += outcome.written as u64;
          p.failed += outcome.failed as u64;
        }
        Err(e) => {
          warn!(family = T::FAMILY, error = %e, size, "batch transaction failed");
          lock(&progress).failed += size;
        }
      }
    }

    let read_result = reading.await?;

    let mut summary = *lock(&progress);
    summary.elapsed = started.elapsed();
    let rate = format!("{:.2}/s", summary.rate());
    info!(
      family = T::FAMILY,
      total = summary.total,
      success = summary.success,
      failed = summary.failed,
      skipped = summary.skipped,
      elapsed_secs = summary.elapsed.as_secs_f64(),
      rate = %rate,
      "import complete"
    );

    read_result?;
    Ok(summary)
  }
}

/// Blocking half of an import: split, decode and batch elements.
fn read_batches<T, R>(
  reader: R,
  config: &ImportConfig,
  progress: &Mutex<ImportProgress>,
  started: Instant,
  tx: mpsc::Sender<Vec<T::Item>>,
) -> Result<()>
where
  T: DumpRecord,
  R: BufRead,
{
  let batch_size = config.batch_size.max(1);
  let interval = config.progress_interval.max(1);
  let mut array = ArrayReader::new(reader)?;
  let mut batch = Vec::with_capacity(batch_size);

  let result = loop {
    let raw = match array.next_element() {
      Ok(Some(raw)) => raw,
      Ok(None) => break Ok(()),
      Err(e) => break Err(e),
    };

    let decoded = serde_json::from_slice::<T>(&raw);
    let snapshot = {
      let mut p = lock(progress);
      p.total += 1;
      match decoded {
        Ok(row) => match row.into_item() {
          Some(item) => batch.push(item),
          None => p.skipped += 1,
        },
        Err(e) => {
          p.failed += 1;
          warn!(family = T::FAMILY, element = p.total, error = %e, "failed to decode record");
        }
      }
      (p.total % interval == 0).then(|| {
        p.elapsed = started.elapsed();
        *p
      })
    };

    if let Some(p) = snapshot {
      let rate = format!("{:.2}/s", p.rate());
      info!(
        family = T::FAMILY,
        processed = p.total,
        success = p.success,
        failed = p.failed,
        skipped = p.skipped,
        rate = %rate,
        "import progress"
      );
    }

    if batch.len() >= batch_size {
      let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
      if tx.blocking_send(full).is_err() {
        return Ok(());
      }
    }
  };

  if !batch.is_empty() {
    let _ = tx.blocking_send(batch);
  }
  result
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use charitylens_store_sqlite::SqliteStore;

  use super::*;
  use crate::Error;

  fn cursor(json: String) -> Cursor<Vec<u8>> { Cursor::new(json.into_bytes()) }

  fn organizations(numbers: impl IntoIterator<Item = i64>) -> String {
    let rows: Vec<String> = numbers
      .into_iter()
      .map(|n| {
        format!(
          r#"{{"organisation_number": {}, "registered_charity_number": {n},
               "linked_charity_number": 0, "charity_name": "Charity {n}",
               "charity_registration_status": "Registered",
               "latest_income": 1000, "latest_expenditure": 900,
               "latest_acc_fin_period_end_date": "2023-03-31T00:00:00"}}"#,
          n * 10
        )
      })
      .collect();
    format!("[{}]", rows.join(",\n"))
  }

  async fn importer(batch_size: usize) -> Importer<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    Importer::new(store, ImportConfig { batch_size, progress_interval: 2 })
  }

  #[tokio::test]
  async fn importing_twice_is_idempotent() {
    let importer = importer(3).await;

    let first = importer.import_organizations(cursor(organizations(1..=7))).await.unwrap();
    assert_eq!(first.total, 7);
    assert_eq!(first.success, 7);
    let after_first = importer.store().row_counts().await.unwrap();

    let second = importer.import_organizations(cursor(organizations(1..=7))).await.unwrap();
    assert_eq!(second.success, 7);
    let after_second = importer.store().row_counts().await.unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.organizations, 7);
    assert_eq!(after_second.financials, 7);
  }

  #[tokio::test]
  async fn malformed_element_is_counted_and_skipped_over() {
    let importer = importer(2).await;
    let input = r#"[
      {"registered_charity_number": 1, "trustee_name": "A"},
      {"registered_charity_number": 2, "trustee_name": "B"},
      {"registered_charity_number": 3, "trustee_name": },
      {"registered_charity_number": 4, "trustee_name": "D"},
      {"registered_charity_number": 5, "trustee_name": "E"}
    ]"#;

    let progress = importer.import_trustees(cursor(input.to_owned())).await.unwrap();
    assert_eq!(progress.total, 5);
    assert_eq!(progress.success, 4);
    assert_eq!(progress.failed, 1);
    assert_eq!(importer.store().row_counts().await.unwrap().trustees, 4);
  }

  #[tokio::test]
  async fn row_without_organisation_number_leaves_others_alone() {
    let importer = importer(10).await;
    let input = r#"[
      {"organisation_number": 300100, "registered_charity_number": 1111,
       "charity_name": "A", "charity_registration_status": "Registered"},
      {"registered_charity_number": 300100,
       "charity_name": "B", "charity_registration_status": "Registered"}
    ]"#;

    let progress = importer.import_organizations(cursor(input.to_owned())).await.unwrap();
    assert_eq!((progress.success, progress.skipped, progress.failed), (1, 1, 0));

    let a = importer.store().get_organization(1111, false).await.unwrap().unwrap();
    assert_eq!(a.name, "A");
    assert!(!importer.store().organization_exists(300100).await.unwrap());
    assert_eq!(importer.store().row_counts().await.unwrap().organizations, 1);
  }

  #[tokio::test]
  async fn leading_byte_order_mark_is_ignored() {
    let importer = importer(10).await;
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend_from_slice(organizations([42]).as_bytes());

    let progress = importer.import_organizations(Cursor::new(bytes)).await.unwrap();
    assert_eq!(progress.success, 1);
    assert!(importer.store().organization_exists(42).await.unwrap());
  }

  #[tokio::test]
  async fn only_latest_financial_periods_are_stored() {
    let importer = importer(10).await;
    let input = r#"[
      {"registered_charity_number": 9, "latest_fin_period_submitted_ind": true,
       "fin_period_end_date": "2023-03-31", "income_total_income_and_endowments": 10,
       "expenditure_total": 8},
      {"registered_charity_number": 9, "latest_fin_period_submitted_ind": false,
       "fin_period_end_date": "2022-03-31", "income_total_income_and_endowments": 9,
       "expenditure_total": 7},
      {"registered_charity_number": 0, "latest_fin_period_submitted_ind": true,
       "fin_period_end_date": "2023-03-31"}
    ]"#;

    let progress = importer.import_financials(cursor(input.to_owned())).await.unwrap();
    assert_eq!((progress.success, progress.skipped, progress.failed), (1, 2, 0));

    let latest = importer.store().latest_financial(9).await.unwrap().unwrap();
    assert_eq!(latest.total_income, 10.0);
    assert_eq!(importer.store().row_counts().await.unwrap().financials, 1);
  }

  #[tokio::test]
  async fn filing_history_rows_are_keyed_by_cycle() {
    let importer = importer(10).await;
    let input = r#"[
      {"organisation_number": 70, "registered_charity_number": 7, "ar_cycle_reference": "AR21",
       "reporting_due_date": "2022-01-31T00:00:00", "date_annual_return_received": "2022-01-10T00:00:00"},
      {"organisation_number": 70, "registered_charity_number": 7, "ar_cycle_reference": "AR22",
       "reporting_due_date": "2023-01-31T00:00:00"},
      {"organisation_number": 70, "registered_charity_number": 7, "ar_cycle_reference": "AR22",
       "reporting_due_date": "2023-01-31T00:00:00", "date_accounts_received": "2023-02-20T00:00:00"}
    ]"#;

    let progress = importer.import_filing_history(cursor(input.to_owned())).await.unwrap();
    assert_eq!(progress.success, 3);

    let history = importer.store().filing_history(7).await.unwrap();
    assert_eq!(history.len(), 2);
    let late = history.iter().find(|h| h.cycle_reference == "AR22").unwrap();
    assert_eq!(late.filed_on_time(), Some(false));
  }

  #[tokio::test]
  async fn truncated_array_flushes_then_fails() {
    let importer = importer(100).await;
    let mut input = organizations(1..=3);
    input.truncate(input.len() - 1);
    input.push_str(r#", {"registered_charity_number": 4"#);

    let err = importer.import_organizations(cursor(input)).await.unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }));
    assert_eq!(importer.store().row_counts().await.unwrap().organizations, 3);
  }

  #[tokio::test]
  async fn not_an_array_is_rejected() {
    let importer = importer(10).await;
    let err = importer
      .import_trustees(cursor(r#"{"registered_charity_number": 1}"#.to_owned()))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Malformed { .. }));
  }

  #[tokio::test]
  async fn missing_file_is_an_io_error() {
    let importer = importer(10).await;
    let err = importer
      .import_file::<OrganizationRow>("/nonexistent/charity.json")
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
  }
}
