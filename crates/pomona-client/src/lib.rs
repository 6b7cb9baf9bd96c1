//! Pomona Client - HTTP access to remote indicator catalogs
//!
//! This crate provides:
//!
//! - [`fetch`] - a retrying fetcher that streams large documents to scratch files
//! - [`indicator`] - the catalog client for XML indicator sources
//!
//! # Overview
//!
//! [`HttpFetcher`] owns the HTTP client, timeouts and retry policy.
//! [`IndicatorClient`] builds catalog, detail and enrichment URLs on top of it
//! and implements [`pomona_core::traits::CatalogClient`].

pub mod fetch;
pub mod indicator;

pub use fetch::HttpFetcher;
pub use indicator::{IndicatorClient, IndicatorClientFactory};
