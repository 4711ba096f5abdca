//! `charityseeder`: populate and score a CharityLens store.
//!
//! # Usage
//!
//! ```text
//! charityseeder import --charity-file publicextract.charity.json \
//!                      --trustee-file publicextract.charity_trustee.json
//! charityseeder download
//! charityseeder crawl --start 200000 --end 210000 --api-key KEY1 --api-key KEY2
//! charityseeder score --number 202918
//! ```
//!
//! Settings come from `seeder.toml` (or `--config`) and `CHARITYLENS_*`
//! environment variables; flags override both.

mod config;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, Result, bail, ensure};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use charitylens_core::ScoringEngine;
use charitylens_ingest::{CrawlConfig, Crawler, Importer, score_all};
use charitylens_registry::{BulkDownloader, DumpKind, RateLimiter, RegistryClient};
use charitylens_store_sqlite::SqliteStore;

use crate::config::SeederConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "charityseeder", version, about = "Populate and score the CharityLens store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, global = true, default_value = "seeder.toml")]
  config: PathBuf,

  /// SQLite database file (overrides `store_path`).
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Log at debug level and report every failed fetch.
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Import bulk extract files from disk, then score.
  Import(ImportArgs),
  /// Download the bulk extracts, import them from memory, then score.
  Download(DownloadArgs),
  /// Enumerate registration numbers against the live registry API.
  Crawl(CrawlArgs),
  /// Score organizations that have no score yet, or one on demand.
  Score(ScoreArgs),
}

#[derive(Args)]
struct ImportArgs {
  #[arg(long, default_value = "publicextract.charity.json")]
  charity_file: PathBuf,

  #[arg(long, default_value = "publicextract.charity_trustee.json")]
  trustee_file: PathBuf,

  /// Annual return part B extract (detailed financials).
  #[arg(long)]
  financial_file: Option<PathBuf>,

  /// Annual return history extract (filing history).
  #[arg(long)]
  history_file: Option<PathBuf>,

  #[arg(long)]
  batch_size: Option<usize>,

  #[arg(long)]
  skip_scoring: bool,
}

#[derive(Args)]
struct DownloadArgs {
  /// Base URL the `publicextract.*.zip` archives are served from.
  #[arg(long)]
  base_url: Option<String>,

  #[arg(long)]
  batch_size: Option<usize>,

  #[arg(long)]
  skip_scoring: bool,
}

#[derive(Args)]
struct CrawlArgs {
  #[arg(long, default_value_t = 1)]
  start: i64,

  #[arg(long, default_value_t = 999_999)]
  end: i64,

  /// Start here regardless of the stored checkpoint.
  #[arg(long)]
  resume: Option<i64>,

  #[arg(long)]
  concurrency: Option<usize>,

  /// Requests per second across all keys.
  #[arg(long)]
  rate_limit: Option<u32>,

  #[arg(long)]
  max_retries: Option<u32>,

  /// Registry subscription key; repeat for round-robin use.
  #[arg(long = "api-key", value_name = "KEY")]
  api_keys: Vec<String>,

  /// Also fetch each organization's financial history for the spend
  /// breakdown. Doubles the request count.
  #[arg(long)]
  detailed_financials: bool,

  #[arg(long)]
  skip_scoring: bool,
}

#[derive(Args)]
struct ScoreArgs {
  /// Recompute a single registration number and print the result.
  #[arg(long)]
  number: Option<i64>,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy(),
    )
    .init();

  let mut cfg = SeederConfig::load(&cli.config)
    .with_context(|| format!("failed to read config from {}", cli.config.display()))?;
  if let Some(db) = cli.db {
    cfg.store_path = db;
  }

  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {}", cfg.store_path.display()))?;

  let cancel = CancellationToken::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, finishing in-flight work");
        cancel.cancel();
      }
    }
  });

  match cli.command {
    Command::Import(args) => import(&mut cfg, &store, args).await?,
    Command::Download(args) => download(&mut cfg, &store, args, &cancel).await?,
    Command::Crawl(args) => crawl(&mut cfg, &store, args, cli.verbose, &cancel).await?,
    Command::Score(args) => score(&cfg, &store, args).await?,
  }

  let counts = store.row_counts().await.context("failed to count rows")?;
  info!(
    organizations = counts.organizations,
    financials = counts.financials,
    trustees = counts.trustees,
    filings = counts.filings,
    scores = counts.scores,
    "store totals"
  );
  Ok(())
}

// ─── Modes ────────────────────────────────────────────────────────────────────

async fn import(cfg: &mut SeederConfig, store: &SqliteStore, args: ImportArgs) -> Result<()> {
  use charitylens_ingest::records::{HistoryRow, OrganizationRow, PartBRow, TrusteeRow};

  require_file(&args.charity_file)?;
  require_file(&args.trustee_file)?;
  for optional in [&args.financial_file, &args.history_file].into_iter().flatten() {
    require_file(optional)?;
  }
  if let Some(batch_size) = args.batch_size {
    cfg.batch_size = batch_size;
  }

  let importer = Importer::new(store.clone(), cfg.import_config());
  importer
    .import_file::<OrganizationRow>(&args.charity_file)
    .await
    .context("organization import failed")?;
  importer
    .import_file::<TrusteeRow>(&args.trustee_file)
    .await
    .context("trustee import failed")?;

  match &args.financial_file {
    Some(path) => report(importer.import_file::<PartBRow>(path).await, "financial import"),
    None => info!("no financial file given, skipping detailed financials"),
  }
  match &args.history_file {
    Some(path) => report(importer.import_file::<HistoryRow>(path).await, "filing history import"),
    None => info!("no history file given, skipping filing history"),
  }

  if !args.skip_scoring {
    score_unscored(cfg, store).await?;
  }
  Ok(())
}

async fn download(
  cfg: &mut SeederConfig,
  store: &SqliteStore,
  args: DownloadArgs,
  cancel: &CancellationToken,
) -> Result<()> {
  if let Some(base_url) = args.base_url {
    cfg.bulk_base_url = base_url;
  }
  if let Some(batch_size) = args.batch_size {
    cfg.batch_size = batch_size;
  }

  let downloader = BulkDownloader::new(cfg.download_config()).context("failed to build HTTP client")?;
  let mut batch = downloader.download_all(&DumpKind::ALL, cancel).await;
  if let Some(e) = batch.error() {
    warn!(error = %e, "continuing with the extracts that did download");
  }

  let (Some(organizations), Some(trustees)) =
    (batch.take(DumpKind::Organizations), batch.take(DumpKind::Trustees))
  else {
    bail!("organization and trustee extracts are both required");
  };

  let importer = Importer::new(store.clone(), cfg.import_config());
  importer
    .import_organizations(organizations.reader())
    .await
    .context("organization import failed")?;
  importer
    .import_trustees(trustees.reader())
    .await
    .context("trustee import failed")?;

  match batch.take(DumpKind::AnnualReturnPartB) {
    Some(file) => report(importer.import_financials(file.reader()).await, "financial import"),
    None => warn!("financial extract unavailable, skipping detailed financials"),
  }
  match batch.take(DumpKind::AnnualReturnHistory) {
    Some(file) => report(
      importer.import_filing_history(file.reader()).await,
      "filing history import",
    ),
    None => warn!("history extract unavailable, skipping filing history"),
  }

  if !args.skip_scoring {
    score_unscored(cfg, store).await?;
  }
  Ok(())
}

async fn crawl(
  cfg: &mut SeederConfig,
  store: &SqliteStore,
  args: CrawlArgs,
  verbose: bool,
  cancel: &CancellationToken,
) -> Result<()> {
  ensure!(args.start <= args.end, "--start must not exceed --end");
  if let Some(concurrency) = args.concurrency {
    cfg.concurrency = concurrency;
  }
  if let Some(rate_limit) = args.rate_limit {
    cfg.rate_limit = rate_limit;
  }
  if let Some(max_retries) = args.max_retries {
    cfg.max_retries = max_retries;
  }
  if !args.api_keys.is_empty() {
    cfg.api_keys = args.api_keys;
  }

  let limiter = Arc::new(RateLimiter::new(cfg.rate_limit));
  let client = RegistryClient::new(cfg.client_config(), limiter)
    .context("no usable API key: set CHARITYLENS_API_KEYS or pass --api-key")?;
  info!(
    keys = cfg.client_config().api_keys.len(),
    rate_limit = cfg.rate_limit,
    "registry client ready"
  );

  let crawler = Crawler::new(Arc::new(store.clone()), Arc::new(client), CrawlConfig {
    start: args.start,
    end: args.end,
    resume: args.resume,
    concurrency: cfg.concurrency,
    checkpoint_interval: cfg.checkpoint_interval,
    detailed_financials: args.detailed_financials,
    verbose,
  });
  crawler.run(cancel.clone()).await.context("crawl failed")?;

  if !args.skip_scoring && !cancel.is_cancelled() {
    score_unscored(cfg, store).await?;
  }
  Ok(())
}

async fn score(cfg: &SeederConfig, store: &SqliteStore, args: ScoreArgs) -> Result<()> {
  let Some(number) = args.number else {
    return score_unscored(cfg, store).await;
  };

  let engine = ScoringEngine::new(store.clone());
  let score = engine
    .score(number, true)
    .await
    .with_context(|| format!("failed to score {number}"))?;
  println!(
    "{number}: overall {:.1} (efficiency {:.1}, financial health {:.1}, transparency {:.1}, \
     governance {:.1}), confidence {}",
    score.overall,
    score.efficiency,
    score.financial_health,
    score.transparency,
    score.governance,
    score.confidence.as_str(),
  );
  Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn score_unscored(cfg: &SeederConfig, store: &SqliteStore) -> Result<()> {
  let engine = ScoringEngine::new(store.clone());
  score_all(&engine, cfg.progress_interval)
    .await
    .context("failed to list unscored organizations")?;
  Ok(())
}

fn require_file(path: &Path) -> Result<()> {
  ensure!(path.is_file(), "input file not found: {}", path.display());
  Ok(())
}

/// Log the outcome of an optional import without failing the run.
fn report<T>(result: charitylens_ingest::Result<T>, what: &str) {
  if let Err(e) = result {
    warn!(error = %e, "{what} failed");
  }
}
