//! Live enumeration of registration numbers against the registry.
//!
//! One feeder pushes identifiers into a bounded queue drained by a fixed
//! pool of workers. The feeder persists a checkpoint as it goes so an
//! interrupted crawl picks up where it stopped.
//!
//! Cancellation stops the feeder only. Every identifier already in the
//! queue is still processed and counted, so the final checkpoint never
//! runs ahead of the work.

use std::{
  sync::{Arc, Mutex, MutexGuard},
  time::{Duration, Instant},
};

use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use charitylens_core::store::CharityStore;
use charitylens_registry::{KeyStats, Registry, parse::latest_breakdown};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CrawlConfig {
  /// First identifier of the inclusive range.
  pub start:               i64,
  /// Last identifier of the inclusive range.
  pub end:                 i64,
  /// Explicit starting point; takes precedence over the stored checkpoint.
  pub resume:              Option<i64>,
  pub concurrency:         usize,
  /// Dispatched identifiers between checkpoint writes.
  pub checkpoint_interval: u64,
  /// Also fetch the financial history to fill in the spend breakdown.
  pub detailed_financials: bool,
  /// Log every failed fetch at `warn` rather than `debug`.
  pub verbose:             bool,
}

impl Default for CrawlConfig {
  fn default() -> Self {
    Self {
      start:               1,
      end:                 999_999,
      resume:              None,
      concurrency:         5,
      checkpoint_interval: 100,
      detailed_financials: false,
      verbose:             false,
    }
  }
}

/// Counters shared by every worker of one crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
  pub processed: u64,
  pub success:   u64,
  pub failed:    u64,
  pub skipped:   u64,
  /// Most recently dispatched identifier.
  pub current:   i64,
}

#[derive(Debug, Clone)]
pub struct CrawlReport {
  pub stats:           CrawlStats,
  pub start_from:      i64,
  pub last_dispatched: Option<i64>,
  pub elapsed:         Duration,
  pub key_stats:       Vec<KeyStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
  Success,
  Skipped,
  Failed,
}

fn lock(stats: &Mutex<CrawlStats>) -> MutexGuard<'_, CrawlStats> {
  stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Crawler<S, R> {
  store:    Arc<S>,
  registry: Arc<R>,
  config:   CrawlConfig,
}

impl<S, R> Crawler<S, R>
where
  S: CharityStore + 'static,
  R: Registry + 'static,
{
  pub fn new(store: Arc<S>, registry: Arc<R>, config: CrawlConfig) -> Self {
    Self { store, registry, config }
  }

  /// The explicit resume point, else one past a checkpoint inside the
  /// range, else the range start.
  pub async fn resolve_start(&self) -> Result<i64> {
    if let Some(resume) = self.config.resume {
      info!(resume, "resuming from explicit identifier");
      return Ok(resume);
    }
    let checkpoint = self.store.load_checkpoint().await.map_err(Error::store)?;
    match checkpoint {
      Some(c) if (self.config.start..=self.config.end).contains(&c) => {
        info!(checkpoint = c, "resuming after checkpoint");
        Ok(c + 1)
      }
      _ => Ok(self.config.start),
    }
  }

  /// Crawl the configured range until it is exhausted or `cancel` fires.
  ///
  /// Per-identifier failures are counted, never returned. Errors here are
  /// limited to reading the checkpoint and worker panics.
  pub async fn run(&self, cancel: CancellationToken) -> Result<CrawlReport> {
    let started = Instant::now();
    let start_from = self.resolve_start().await?;
    let end = self.config.end;
    let concurrency = self.config.concurrency.max(1);
    let interval = self.config.checkpoint_interval.max(1);

    info!(start = start_from, end, concurrency, "starting crawl");

    let stats = Arc::new(Mutex::new(CrawlStats::default()));
    let (tx, rx) = mpsc::channel::<i64>(concurrency * 2);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut workers = JoinSet::new();
    for worker in 0..concurrency {
      workers.spawn(work(
        worker,
        self.store.clone(),
        self.registry.clone(),
        rx.clone(),
        stats.clone(),
        self.config.clone(),
      ));
    }

    let mut last_dispatched = None;
    let mut since_checkpoint = 0u64;
    for number in start_from..=end {
      let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(number) => sent.is_ok(),
      };
      if !sent {
        info!(last_dispatched, "crawl cancelled, draining workers");
        break;
      }

      last_dispatched = Some(number);
      lock(&stats).current = number;
      since_checkpoint += 1;
      if since_checkpoint >= interval {
        since_checkpoint = 0;
        self.checkpoint(number).await;
        let snapshot = *lock(&stats);
        let rate = snapshot.processed as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
        let rate = format!("{rate:.2}/s");
        info!(
          current = number,
          processed = snapshot.processed,
          success = snapshot.success,
          failed = snapshot.failed,
          skipped = snapshot.skipped,
          rate = %rate,
          "crawl progress"
        );
      }
    }
    drop(tx);

    while let Some(joined) = workers.join_next().await {
      joined?;
    }

    if let Some(last) = last_dispatched {
      self.checkpoint(last).await;
    }

    let report = CrawlReport {
      stats: *lock(&stats),
      start_from,
      last_dispatched,
      elapsed: started.elapsed(),
      key_stats: self.registry.key_stats(),
    };
    log_report(&report);
    Ok(report)
  }

  async fn checkpoint(&self, number: i64) {
    if let Err(e) = self.store.save_checkpoint(number).await {
      warn!(number, error = %e, "failed to save checkpoint");
    }
  }
}

async fn work<S, R>(
  worker: usize,
  store: Arc<S>,
  registry: Arc<R>,
  queue: Arc<tokio::sync::Mutex<mpsc::Receiver<i64>>>,
  stats: Arc<Mutex<CrawlStats>>,
  config: CrawlConfig,
) where
  S: CharityStore,
  R: Registry,
{
  // Never cancelled: a dispatched identifier runs to completion.
  let record = CancellationToken::new();
  loop {
    let next = queue.lock().await.recv().await;
    let Some(number) = next else { break };

    let outcome = process(number, store.as_ref(), registry.as_ref(), &config, &record).await;
    let mut s = lock(&stats);
    match outcome {
      Outcome::Success => s.success += 1,
      Outcome::Skipped => s.skipped += 1,
      Outcome::Failed => s.failed += 1,
    }
    s.processed += 1;
  }
  debug!(worker, "worker finished");
}

async fn process<S, R>(
  number: i64,
  store: &S,
  registry: &R,
  config: &CrawlConfig,
  cancel: &CancellationToken,
) -> Outcome
where
  S: CharityStore,
  R: Registry,
{
  match store.organization_exists(number).await {
    Ok(true) => return Outcome::Skipped,
    Ok(false) => {}
    Err(e) => {
      warn!(registered_number = number, error = %e, "existence check failed");
      return Outcome::Failed;
    }
  }

  let details = match registry.fetch_details(number, cancel).await {
    Ok(details) => details,
    Err(e) if e.is_not_found() => return Outcome::Skipped,
    Err(e) => {
      if config.verbose {
        warn!(registered_number = number, error = %e, "fetch failed");
      } else {
        debug!(registered_number = number, error = %e, "fetch failed");
      }
      return Outcome::Failed;
    }
  };

  let Some(mut fetched) = details.into_fetched(number) else {
    warn!(registered_number = number, "response has no organisation number");
    return Outcome::Failed;
  };
  if config.detailed_financials
    && let Some(financial) = fetched.financial.as_mut()
  {
    match registry.fetch_financial_history(number, cancel).await {
      Ok(history) => {
        if let Some(breakdown) = latest_breakdown(&history) {
          financial.merge_breakdown(&breakdown);
        }
      }
      Err(e) => debug!(registered_number = number, error = %e, "no financial breakdown"),
    }
  }

  match store.save_fetched(fetched).await {
    Ok(()) => {
      debug!(registered_number = number, "stored");
      Outcome::Success
    }
    Err(e) => {
      warn!(registered_number = number, error = %e, "failed to store fetched record");
      Outcome::Failed
    }
  }
}

fn log_report(report: &CrawlReport) {
  let s = &report.stats;
  info!(
    processed = s.processed,
    success = s.success,
    failed = s.failed,
    skipped = s.skipped,
    start = report.start_from,
    last_dispatched = report.last_dispatched,
    elapsed_secs = report.elapsed.as_secs_f64(),
    "crawl complete"
  );
  for key in &report.key_stats {
    info!(
      key = %key.masked_key,
      total = key.total_requests,
      failed = key.failed_requests,
      "api key usage"
    );
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use charitylens_core::organization::Organization;
  use charitylens_registry::{
    RegistryError,
    parse::{CharityDetails, FinancialHistoryEntry},
  };
  use charitylens_store_sqlite::SqliteStore;
  use chrono::Utc;

  use super::*;

  /// Serves every identifier except those in `missing`, recording calls.
  #[derive(Default)]
  struct FakeRegistry {
    missing:        HashSet<i64>,
    failing:        HashSet<i64>,
    calls:          Mutex<Vec<i64>>,
    /// When set, cancels this token after the given number of calls.
    cancel_after:   Option<(usize, CancellationToken)>,
    /// Answer `Cancelled` when the token handed to a fetch has fired, the
    /// way the real client does from its limiter wait.
    honours_cancel: bool,
    /// Serve payloads without an organisation number.
    unkeyed:        bool,
  }

  impl Registry for FakeRegistry {
    async fn fetch_details(
      &self,
      registered_number: i64,
      cancel: &CancellationToken,
    ) -> charitylens_registry::Result<CharityDetails> {
      let calls = {
        let mut calls = self.calls.lock().unwrap();
        calls.push(registered_number);
        calls.len()
      };
      if let Some((after, token)) = &self.cancel_after
        && calls >= *after
      {
        token.cancel();
      }
      if self.honours_cancel && cancel.is_cancelled() {
        return Err(RegistryError::Cancelled);
      }
      if self.missing.contains(&registered_number) {
        return Err(RegistryError::NotFound);
      }
      if self.failing.contains(&registered_number) {
        return Err(RegistryError::Server { status: 503, body: String::new() });
      }
      Ok(CharityDetails {
        organisation_number: (!self.unkeyed).then_some(registered_number + 500_000),
        reg_charity_number: Some(registered_number),
        charity_name: Some(format!("Charity {registered_number}")),
        reg_status: Some("Registered".into()),
        latest_income: Some(1000.0),
        latest_expenditure: Some(800.0),
        latest_acc_fin_year_end_date: Some("2023-03-31T00:00:00".into()),
        trustee_names: Some(serde_json::json!("A Smith, B Jones")),
        ..Default::default()
      })
    }

    async fn fetch_financial_history(
      &self,
      _registered_number: i64,
      _cancel: &CancellationToken,
    ) -> charitylens_registry::Result<Vec<FinancialHistoryEntry>> {
      Ok(vec![FinancialHistoryEntry {
        exp_charitable_activities: Some(600.0),
        exp_raising_funds: Some(150.0),
        ..Default::default()
      }])
    }

    fn key_stats(&self) -> Vec<KeyStats> { Vec::new() }
  }

  impl FakeRegistry {
    fn calls(&self) -> Vec<i64> {
      let mut calls = self.calls.lock().unwrap().clone();
      calls.sort_unstable();
      calls
    }
  }

  fn organization(organisation_number: i64, registered_number: i64) -> Organization {
    Organization {
      organisation_number,
      registered_number,
      linked_number: 0,
      company_number: None,
      name: "Already here".into(),
      status: "Registered".into(),
      date_registered: None,
      date_removed: None,
      address: None,
      website: None,
      email: None,
      phone: None,
      activities: None,
      last_updated: Utc::now(),
    }
  }

  async fn store() -> Arc<SqliteStore> { Arc::new(SqliteStore::open_in_memory().await.unwrap()) }

  fn config(start: i64, end: i64, concurrency: usize) -> CrawlConfig {
    CrawlConfig { start, end, concurrency, checkpoint_interval: 4, ..Default::default() }
  }

  #[tokio::test]
  async fn every_identifier_is_dispatched_exactly_once() {
    for concurrency in [1, 3, 8] {
      let store = store().await;
      let registry = Arc::new(FakeRegistry::default());
      let crawler = Crawler::new(store.clone(), registry.clone(), config(10, 40, concurrency));

      let report = crawler.run(CancellationToken::new()).await.unwrap();

      assert_eq!(registry.calls(), (10..=40).collect::<Vec<_>>());
      assert_eq!(report.stats.processed, 31);
      assert_eq!(report.stats.success, 31);
      assert_eq!(report.last_dispatched, Some(40));
      assert_eq!(store.load_checkpoint().await.unwrap(), Some(40));
      assert_eq!(store.row_counts().await.unwrap().organizations, 31);
    }
  }

  #[tokio::test]
  async fn resumes_after_checkpoint_inside_range() {
    let store = store().await;
    store.save_checkpoint(14).await.unwrap();
    let registry = Arc::new(FakeRegistry::default());
    let crawler = Crawler::new(store.clone(), registry.clone(), config(10, 20, 2));

    let report = crawler.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.start_from, 15);
    assert_eq!(registry.calls(), (15..=20).collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn checkpoint_outside_range_and_explicit_resume() {
    let store = store().await;
    store.save_checkpoint(500).await.unwrap();
    let registry = Arc::new(FakeRegistry::default());

    let crawler = Crawler::new(store.clone(), registry.clone(), config(10, 12, 1));
    assert_eq!(crawler.resolve_start().await.unwrap(), 10);

    let explicit = CrawlConfig { resume: Some(11), ..config(10, 12, 1) };
    let crawler = Crawler::new(store, registry, explicit);
    assert_eq!(crawler.resolve_start().await.unwrap(), 11);
  }

  #[tokio::test]
  async fn absent_and_existing_identifiers_are_skips() {
    let store = store().await;
    store
      .upsert_organizations(vec![charitylens_core::store::OrganizationImport {
        organization: organization(3, 3),
        financial:    None,
      }])
      .await
      .unwrap();

    let registry = Arc::new(FakeRegistry {
      missing: HashSet::from([2, 4]),
      failing: HashSet::from([5]),
      ..Default::default()
    });
    let crawler = Crawler::new(store.clone(), registry.clone(), config(1, 6, 2));
    let stats = crawler.run(CancellationToken::new()).await.unwrap().stats;

    assert_eq!(stats.processed, 6);
    assert_eq!(stats.success, 2);
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.failed, 1);
    assert!(!registry.calls().contains(&3));
    assert_eq!(store.trustee_count(1).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn detailed_financials_merge_the_breakdown() {
    let store = store().await;
    let registry = Arc::new(FakeRegistry::default());
    let config = CrawlConfig { detailed_financials: true, ..config(7, 7, 1) };
    Crawler::new(store.clone(), registry, config)
      .run(CancellationToken::new())
      .await
      .unwrap();

    let financial = store.latest_financial(7).await.unwrap().unwrap();
    assert_eq!(financial.charitable_spend, Some(600.0));
    assert_eq!(financial.fundraising_spend, Some(150.0));
    assert_eq!(financial.other_spend, None);
  }

  #[tokio::test]
  async fn cancellation_stops_the_feeder_and_records_progress() {
    let store = store().await;
    let cancel = CancellationToken::new();
    let registry = Arc::new(FakeRegistry {
      cancel_after: Some((5, cancel.clone())),
      ..Default::default()
    });
    let crawler = Crawler::new(store.clone(), registry.clone(), config(1, 10_000, 1));

    let report = crawler.run(cancel).await.unwrap();

    let last = report.last_dispatched.unwrap();
    assert!(last < 10_000);
    assert!(registry.calls().len() < 100);
    assert_eq!(store.load_checkpoint().await.unwrap(), Some(last));
  }

  #[tokio::test]
  async fn records_in_flight_at_cancellation_are_completed() {
    let store = store().await;
    let cancel = CancellationToken::new();
    let registry = Arc::new(FakeRegistry {
      cancel_after: Some((3, cancel.clone())),
      honours_cancel: true,
      ..Default::default()
    });
    let crawler = Crawler::new(store.clone(), registry.clone(), config(1, 1_000, 3));

    let report = crawler.run(cancel).await.unwrap();

    let last = report.last_dispatched.unwrap();
    assert!(last < 1_000);
    assert_eq!(registry.calls(), (1..=last).collect::<Vec<_>>());
    assert_eq!(report.stats.processed, last as u64);
    assert_eq!(report.stats.success, last as u64);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(store.row_counts().await.unwrap().organizations, last as u64);
    assert_eq!(store.load_checkpoint().await.unwrap(), Some(last));
  }

  #[tokio::test]
  async fn response_without_organisation_number_is_a_failure() {
    let store = store().await;
    store
      .upsert_organizations(vec![charitylens_core::store::OrganizationImport {
        organization: organization(4, 1111),
        financial:    None,
      }])
      .await
      .unwrap();
    let registry = Arc::new(FakeRegistry { unkeyed: true, ..Default::default() });

    let stats = Crawler::new(store.clone(), registry, config(4, 4, 1))
      .run(CancellationToken::new())
      .await
      .unwrap()
      .stats;

    assert_eq!((stats.processed, stats.failed), (1, 1));
    assert!(store.organization_exists(1111).await.unwrap());
    assert!(!store.organization_exists(4).await.unwrap());
  }

  #[tokio::test]
  async fn already_cancelled_dispatches_nothing() {
    let store = store().await;
    let registry = Arc::new(FakeRegistry::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = Crawler::new(store.clone(), registry.clone(), config(1, 50, 4))
      .run(cancel)
      .await
      .unwrap();

    assert_eq!(report.last_dispatched, None);
    assert!(registry.calls().is_empty());
    assert_eq!(store.load_checkpoint().await.unwrap(), None);
  }
}
