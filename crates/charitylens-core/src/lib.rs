//! Core types and trait definitions for the CharityLens data pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! The store, registry, ingest and seeder crates all depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod date;
pub mod engine;
pub mod error;
pub mod finance;
pub mod lenient;
pub mod organization;
pub mod score;
pub mod store;

pub use engine::ScoringEngine;
pub use error::{Error, Result};
