//! Access to the public charity registry.
//!
//! [`RegistryClient`] talks to the live JSON API under a shared
//! [`RateLimiter`]; [`BulkDownloader`] fetches the zipped bulk extracts.
//! Both thread a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! through every wait so a crawl can stop promptly.

mod client;
mod download;
mod limiter;

pub mod error;
pub mod parse;

pub use client::{ClientConfig, KeyStats, Registry, RegistryClient};
pub use download::{BulkDownloader, DownloadBatch, DownloadConfig, DownloadedFile, DumpKind};
pub use error::{RegistryError, Result};
pub use limiter::{LimiterStats, RateLimiter};
