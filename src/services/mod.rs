//! Service layer for the reward cache.
//!
//! This module contains the stages a refresh runs through:
//! - Document retrieval (`Fetcher`, `HttpFetcher`)
//! - Table extraction (`TableParser` and its backends)
//! - Record normalization (`Normalizer`)

mod fetch;
mod normalize;
pub mod parser;

pub use fetch::{Fetcher, HttpFetcher, RawDocument};
pub use normalize::{Batch, NormalizeReport, Normalizer};
pub use parser::{ParsedTable, RawCell, RawRow, TableParser, select_backend};
