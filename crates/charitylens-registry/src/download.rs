//! [`BulkDownloader`] fetches the registry's zipped JSON extracts into
//! memory.

use std::{
  collections::HashMap,
  fmt,
  io::{Cursor, Read},
  time::Duration,
};

use bytes::Bytes;
use reqwest::StatusCode;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{RegistryError, Result, client::default_user_agent, limiter::sleep_or_cancel};

pub const DEFAULT_BULK_BASE_URL: &str =
  "https://ccewuksprdoneregsadata1.blob.core.windows.net/data/json";

// ─── Catalogue ───────────────────────────────────────────────────────────────

/// The published extracts, each a zip holding one JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DumpKind {
  Organizations,
  Trustees,
  /// Detailed financial figures per submitted year.
  AnnualReturnPartB,
  AnnualReturnHistory,
}

impl DumpKind {
  pub const ALL: [DumpKind; 4] = [
    Self::Organizations,
    Self::Trustees,
    Self::AnnualReturnPartB,
    Self::AnnualReturnHistory,
  ];

  pub fn extract_name(self) -> &'static str {
    match self {
      Self::Organizations => "charity",
      Self::Trustees => "charity_trustee",
      Self::AnnualReturnPartB => "charity_annual_return_partb",
      Self::AnnualReturnHistory => "charity_annual_return_history",
    }
  }

  pub fn archive_name(self) -> String { format!("publicextract.{}.zip", self.extract_name()) }
}

impl fmt::Display for DumpKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.extract_name()) }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// One extracted JSON file, held in memory.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
  pub kind:      DumpKind,
  /// Name of the entry inside the archive.
  pub file_name: String,
  pub data:      Bytes,
}

impl DownloadedFile {
  pub fn reader(&self) -> Cursor<Bytes> { Cursor::new(self.data.clone()) }
}

/// Outcome of a parallel download: whatever succeeded plus the failures.
#[derive(Debug, Default)]
pub struct DownloadBatch {
  pub files:    HashMap<DumpKind, DownloadedFile>,
  pub failures: Vec<(DumpKind, RegistryError)>,
}

impl DownloadBatch {
  pub fn is_complete(&self) -> bool { self.failures.is_empty() }

  pub fn take(&mut self, kind: DumpKind) -> Option<DownloadedFile> { self.files.remove(&kind) }

  /// All failures combined into one error, if there were any.
  pub fn error(&self) -> Option<RegistryError> {
    if self.failures.is_empty() {
      return None;
    }
    let mut failures: Vec<String> = self
      .failures
      .iter()
      .map(|(kind, e)| format!("{kind}: {e}"))
      .collect();
    failures.sort();
    Some(RegistryError::Downloads(failures.join("; ")))
  }
}

// ─── Downloader ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DownloadConfig {
  pub base_url:     String,
  pub timeout:      Duration,
  /// Total attempts per archive, including the first.
  pub max_attempts: u32,
  pub retry_delay:  Duration,
  pub user_agent:   String,
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self {
      base_url:     DEFAULT_BULK_BASE_URL.to_owned(),
      timeout:      Duration::from_secs(15 * 60),
      max_attempts: 3,
      retry_delay:  Duration::from_secs(10),
      user_agent:   default_user_agent(),
    }
  }
}

/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct BulkDownloader {
  http:   reqwest::Client,
  config: DownloadConfig,
}

impl BulkDownloader {
  pub fn new(config: DownloadConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.timeout)
      .user_agent(config.user_agent.clone())
      .build()?;
    Ok(Self { http, config })
  }

  pub fn url(&self, kind: DumpKind) -> String {
    format!("{}/{}", self.config.base_url.trim_end_matches('/'), kind.archive_name())
  }

  /// Download every requested extract concurrently, one task each.
  pub async fn download_all(&self, kinds: &[DumpKind], cancel: &CancellationToken) -> DownloadBatch {
    let mut tasks = JoinSet::new();
    for &kind in kinds {
      let downloader = self.clone();
      let cancel = cancel.clone();
      tasks.spawn(async move { (kind, downloader.download(kind, &cancel).await) });
    }

    let mut batch = DownloadBatch::default();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((kind, Ok(file))) => {
          batch.files.insert(kind, file);
        }
        Ok((kind, Err(e))) => {
          warn!(%kind, error = %e, "download failed");
          batch.failures.push((kind, e));
        }
        Err(e) => warn!(error = %e, "download task panicked"),
      }
    }
    batch
  }

  /// Download one extract with retries and unpack its JSON file.
  pub async fn download(&self, kind: DumpKind, cancel: &CancellationToken) -> Result<DownloadedFile> {
    let url = self.url(kind);
    info!(%kind, %url, "downloading extract");

    let archive = self.fetch_with_retry(kind, &url, cancel).await?;
    info!(%kind, bytes = archive.len(), "download complete, extracting");

    let (file_name, data) = tokio::task::spawn_blocking(move || first_file(&archive)).await??;
    info!(%kind, file = %file_name, bytes = data.len(), "extraction complete");

    Ok(DownloadedFile { kind, file_name, data: Bytes::from(data) })
  }

  async fn fetch_with_retry(
    &self,
    kind: DumpKind,
    url: &str,
    cancel: &CancellationToken,
  ) -> Result<Bytes> {
    let attempts = self.config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      let err = match self.fetch(kind, url, cancel).await {
        Ok(data) => return Ok(data),
        Err(RegistryError::Cancelled) => return Err(RegistryError::Cancelled),
        Err(e) => e,
      };
      warn!(%kind, attempt, attempts, error = %err, "download attempt failed");
      if attempt >= attempts {
        return Err(RegistryError::RetriesExhausted(Box::new(err)));
      }
      sleep_or_cancel(self.config.retry_delay, cancel).await?;
      attempt += 1;
    }
  }

  async fn fetch(&self, kind: DumpKind, url: &str, cancel: &CancellationToken) -> Result<Bytes> {
    let mut resp = tokio::select! {
      _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
      resp = self.http.get(url).send() => resp?,
    };

    let status = resp.status();
    if status != StatusCode::OK {
      let body = resp.text().await.unwrap_or_default();
      return Err(if status.is_server_error() {
        RegistryError::Server { status: status.as_u16(), body }
      } else {
        RegistryError::Client { status: status.as_u16(), body }
      });
    }

    let total = resp.content_length();
    let mut data = Vec::with_capacity(total.unwrap_or_default() as usize);
    let mut reported_decile = 0;
    loop {
      let chunk = tokio::select! {
        _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
        chunk = resp.chunk() => chunk?,
      };
      let Some(chunk) = chunk else { break };
      data.extend_from_slice(&chunk);

      if let Some(total) = total.filter(|t| *t > 0) {
        let decile = (data.len() as u64 * 10 / total).min(10);
        if decile > reported_decile {
          reported_decile = decile;
          info!(%kind, percent = decile * 10, bytes = data.len(), total, "download progress");
        }
      }
    }
    Ok(Bytes::from(data))
  }
}

/// Name and contents of the first regular file in a zip archive.
fn first_file(archive: &[u8]) -> Result<(String, Vec<u8>)> {
  let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
  for index in 0..zip.len() {
    let mut entry = zip.by_index(index)?;
    if entry.is_dir() {
      continue;
    }
    let name = entry.name().to_owned();
    let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
    entry.read_to_end(&mut data)?;
    return Ok((name, data));
  }
  Err(RegistryError::EmptyArchive)
}

#[cfg(test)]
mod tests {
  use std::{
    io::Write,
    sync::{
      Arc,
      atomic::{AtomicU32, Ordering},
    },
  };

  use axum::{Router, extract::Path, http::StatusCode, response::IntoResponse, routing::get};
  use zip::write::SimpleFileOptions;

  use super::*;

  fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
      match contents {
        Some(contents) => {
          writer.start_file(*name, options).unwrap();
          writer.write_all(contents).unwrap();
        }
        None => writer.add_directory(*name, options).unwrap(),
      }
    }
    writer.finish().unwrap().into_inner()
  }

  async fn serve(failures: Arc<AtomicU32>) -> String {
    let charity = build_zip(&[
      ("nested/", None),
      ("publicextract.charity.json", Some(&br#"[{"registered_charity_number":1}]"#[..])),
    ]);
    let empty = build_zip(&[("only/", None)]);

    let app = Router::new().route(
      "/data/{file}",
      get(move |Path(file): Path<String>| {
        let charity = charity.clone();
        let empty = empty.clone();
        let failures = failures.clone();
        async move {
          match file.as_str() {
            "publicextract.charity.zip" => charity.into_response(),
            "publicextract.charity_annual_return_history.zip" => empty.into_response(),
            _ => {
              failures.fetch_add(1, Ordering::SeqCst);
              StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
          }
        }
      }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}/data")
  }

  fn downloader(base_url: String) -> BulkDownloader {
    BulkDownloader::new(DownloadConfig {
      base_url,
      max_attempts: 2,
      retry_delay: Duration::from_millis(1),
      ..DownloadConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn archive_names_follow_the_catalogue() {
    assert_eq!(DumpKind::Organizations.archive_name(), "publicextract.charity.zip");
    assert_eq!(
      DumpKind::AnnualReturnPartB.archive_name(),
      "publicextract.charity_annual_return_partb.zip"
    );
  }

  #[test]
  fn first_file_skips_directories() {
    let archive =
      build_zip(&[("dir/", None), ("a.json", Some(&b"[]"[..])), ("b.json", Some(&b"[1]"[..]))]);
    let (name, data) = first_file(&archive).unwrap();
    assert_eq!(name, "a.json");
    assert_eq!(data, b"[]");
  }

  #[tokio::test]
  async fn downloads_and_extracts() {
    let d = downloader(serve(Arc::default()).await);
    let file = d
      .download(DumpKind::Organizations, &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(file.file_name, "publicextract.charity.json");
    assert!(file.data.starts_with(b"["));
  }

  #[tokio::test]
  async fn archive_without_files_is_an_error() {
    let d = downloader(serve(Arc::default()).await);
    let err = d
      .download(DumpKind::AnnualReturnHistory, &CancellationToken::new())
      .await
      .unwrap_err();
    assert!(matches!(err, RegistryError::EmptyArchive));
  }

  #[tokio::test]
  async fn partial_failure_keeps_successes() {
    let failures = Arc::new(AtomicU32::new(0));
    let d = downloader(serve(failures.clone()).await);

    let mut batch = d
      .download_all(
        &[DumpKind::Organizations, DumpKind::Trustees],
        &CancellationToken::new(),
      )
      .await;

    assert!(!batch.is_complete());
    assert_eq!(failures.load(Ordering::SeqCst), 2);
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.failures[0].0, DumpKind::Trustees);
    assert!(batch.error().unwrap().to_string().contains("charity_trustee"));
    assert!(batch.take(DumpKind::Organizations).is_some());
  }

  #[tokio::test]
  async fn cancelled_download_stops() {
    let d = downloader(serve(Arc::default()).await);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = d.download(DumpKind::Organizations, &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
  }
}
