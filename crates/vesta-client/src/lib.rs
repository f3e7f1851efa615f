//! Vesta Client - The archive's boundary with the outside world
//!
//! - [`catalog`] - reads catalog snapshot files into [`CatalogEntry`](vesta_core::CatalogEntry) values
//! - [`fetch`] - downloads dataset resources over HTTP

pub mod catalog;
pub mod fetch;

pub use catalog::{parse_catalog_document, read_catalog};
pub use fetch::{is_gzip, part_path, HttpFetcher, ResourceFetcher};
