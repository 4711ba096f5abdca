//! Population of the CharityLens store.
//!
//! Two paths feed the same [`CharityStore`](charitylens_core::store::CharityStore):
//! the [`Importer`] streams bulk JSON extracts in batches, and the
//! [`Crawler`] enumerates registration numbers against the live registry.
//! [`score_all`] materialises scores once either has run.

mod array;
mod crawler;
mod importer;
mod scoring;

pub mod error;
pub mod records;

pub use array::ArrayReader;
pub use crawler::{CrawlConfig, CrawlReport, CrawlStats, Crawler};
pub use error::{Error, Result};
pub use importer::{ImportConfig, ImportProgress, Importer};
pub use scoring::{ScoreAllReport, score_all};
