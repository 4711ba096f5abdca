//! Seeder configuration: an optional TOML file under `CHARITYLENS_*`
//! environment variables. Command-line flags are applied on top in `main`.

use std::{path::{Path, PathBuf}, time::Duration};

use config::{ConfigBuilder, ConfigError, Environment, File, builder::DefaultState};
use serde::Deserialize;

use charitylens_ingest::{CrawlConfig, ImportConfig};
use charitylens_registry::{ClientConfig, DownloadConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeederConfig {
  pub store_path:                PathBuf,
  /// Registry subscription keys, used round-robin.
  pub api_keys:                  Vec<String>,
  /// Requests per second across all keys.
  pub rate_limit:                u32,
  pub max_retries:               u32,
  pub concurrency:               usize,
  pub batch_size:                usize,
  pub progress_interval:         u64,
  pub checkpoint_interval:       u64,
  pub registry_base_url:         String,
  pub bulk_base_url:             String,
  pub user_agent:                String,
  pub request_timeout_secs:      u64,
  pub download_timeout_secs:     u64,
  pub download_attempts:         u32,
  pub download_retry_delay_secs: u64,
}

impl Default for SeederConfig {
  fn default() -> Self {
    let client = ClientConfig::default();
    let download = DownloadConfig::default();
    let import = ImportConfig::default();
    Self {
      store_path:                PathBuf::from("seed.db"),
      api_keys:                  Vec::new(),
      rate_limit:                10,
      max_retries:               client.max_retries,
      concurrency:               CrawlConfig::default().concurrency,
      batch_size:                import.batch_size,
      progress_interval:         import.progress_interval,
      checkpoint_interval:       CrawlConfig::default().checkpoint_interval,
      registry_base_url:         client.base_url,
      bulk_base_url:             download.base_url,
      user_agent:                client.user_agent,
      request_timeout_secs:      client.timeout.as_secs(),
      download_timeout_secs:     download.timeout.as_secs(),
      download_attempts:         download.max_attempts,
      download_retry_delay_secs: download.retry_delay.as_secs(),
    }
  }
}

impl SeederConfig {
  /// Read `path` if it exists, then the environment.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    Self::build(config::Config::builder().add_source(File::from(path).required(false)))
  }

  fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
    builder
      .add_source(
        Environment::with_prefix("CHARITYLENS")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("api_keys"),
      )
      .build()?
      .try_deserialize()
  }

  pub fn client_config(&self) -> ClientConfig {
    ClientConfig {
      base_url: self.registry_base_url.clone(),
      api_keys: self
        .api_keys
        .iter()
        .map(|k| k.trim().to_owned())
        .filter(|k| !k.is_empty())
        .collect(),
      user_agent: self.user_agent.clone(),
      max_retries: self.max_retries,
      timeout: Duration::from_secs(self.request_timeout_secs),
      ..ClientConfig::default()
    }
  }

  pub fn download_config(&self) -> DownloadConfig {
    DownloadConfig {
      base_url:     self.bulk_base_url.clone(),
      timeout:      Duration::from_secs(self.download_timeout_secs),
      max_attempts: self.download_attempts,
      retry_delay:  Duration::from_secs(self.download_retry_delay_secs),
      user_agent:   self.user_agent.clone(),
    }
  }

  pub fn import_config(&self) -> ImportConfig {
    ImportConfig { batch_size: self.batch_size, progress_interval: self.progress_interval }
  }
}
